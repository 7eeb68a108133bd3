use std::collections::HashMap;

/// Identifier-generation strategies known to this crate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum IdentifierStrategy {
    /// Keys are generated by the data store at insert time (auto-increment
    /// or identity columns) and reconciled through the batch engine when the
    /// environment allows it.
    Identity,
}

impl IdentifierStrategy {
    /// Picks how inserts are performed for this strategy given what the data
    /// store and persister support.
    pub const fn insert_mode(self, capabilities: &Capabilities) -> InsertMode {
        match self {
            Self::Identity => capabilities.insert_mode(),
        }
    }
}

/// What the active data store, driver, and persister can do.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// The driver exposes generated keys after an insert.
    pub generated_keys: bool,
    /// The dialect returns one generated key per row of a batch insert.
    pub batch_generated_keys: bool,
    /// The persister can bind records into a reusable batch statement.
    pub persister_batching: bool,
}

impl Capabilities {
    /// Everything the batch engine needs.
    pub const fn batching() -> Self {
        Self {
            generated_keys: true,
            batch_generated_keys: true,
            persister_batching: true,
        }
    }

    /// [`InsertMode::Batched`] when every capability is present, otherwise
    /// [`InsertMode::SingleRow`].
    pub const fn insert_mode(&self) -> InsertMode {
        if self.generated_keys && self.batch_generated_keys && self.persister_batching {
            InsertMode::Batched
        } else {
            InsertMode::SingleRow
        }
    }
}

/// How a coordinator groups rows into physical inserts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum InsertMode {
    /// Rows are drained in chunks of the effective batch size.
    #[default]
    Batched,
    /// Every row is inserted on its own, whatever batch size is requested.
    SingleRow,
}

/// Maps strategy names, as they appear in entity mappings, to strategies.
#[derive(Clone, Debug)]
pub struct StrategyProvider {
    strategies: HashMap<&'static str, IdentifierStrategy>,
}

impl StrategyProvider {
    /// Name under which [`IdentifierStrategy::Identity`] is registered.
    pub const IDENTITY: &'static str = "identity";

    /// Creates a provider with every built-in strategy registered.
    pub fn new() -> Self {
        let mut strategies = HashMap::new();
        strategies.insert(Self::IDENTITY, IdentifierStrategy::Identity);
        Self { strategies }
    }

    /// Looks up a strategy by name.
    pub fn get(&self, name: &str) -> Option<IdentifierStrategy> {
        self.strategies.get(name).copied()
    }

    /// Every registered name and its strategy.
    pub const fn strategies(&self) -> &HashMap<&'static str, IdentifierStrategy> {
        &self.strategies
    }
}

impl Default for StrategyProvider {
    fn default() -> Self {
        Self::new()
    }
}
