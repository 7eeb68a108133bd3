use core::fmt;

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::{
    cache::SessionKeyCache,
    config::{BatchConfig, BatchSize},
    error::Result,
    executor::{BatchConnection, BatchInsertExecutor, EntityPersister, InsertTemplate},
    registry::PendingRecordRegistry,
    session::{PersistenceSession, SessionKey},
    strategy::{Capabilities, InsertMode},
};

/// What was still held for a session when it was closed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SessionResidue {
    /// Records that were queued but never inserted.
    pub records: usize,
    /// Keys that were generated but never handed out.
    pub keys: usize,
}

impl SessionResidue {
    /// `true` if nothing was left behind.
    pub const fn is_empty(&self) -> bool {
        self.records == 0 && self.keys == 0
    }
}

/// The surface the persistence integration calls.
///
/// Records are registered with [`Self::on_record_prepared`] as they are
/// scheduled for insertion. When the integration is about to insert a row it
/// calls [`Self::on_row_about_to_insert`] (or [`Self::assign_key`]) and gets
/// that row's generated key back. Keys come back per session in the order
/// the records were registered, provided the data store generates keys in
/// ascending insertion order.
///
/// The coordinator owns its registry, cache, and executor; nothing is shared
/// through globals, so independent coordinators never see each other's
/// sessions.
///
/// # Example
/// ```
/// # #[cfg(feature = "memory")] {
/// use batchid::{
///     BatchConfig, BatchSize, IdentifierAssignmentCoordinator, InsertTemplate, MemoryConnection,
///     MemoryPersister, MemoryTable, SessionKey,
/// };
///
/// let table = MemoryTable::new();
/// let mut conn = MemoryConnection::new(table.clone());
/// let persister = MemoryPersister::new("id", |name: &&str| vec![name.to_string()]);
/// let coordinator = IdentifierAssignmentCoordinator::new(persister, BatchConfig::default());
/// let template = InsertTemplate::new("insert into users (name) values (?)", "id");
///
/// let session = SessionKey::issue(1);
/// coordinator.on_record_prepared(session, "ada").unwrap();
/// coordinator.on_record_prepared(session, "grace").unwrap();
///
/// let batch = BatchSize::new(2).unwrap();
/// let first = coordinator.on_row_about_to_insert(session, batch, &template, &mut conn).unwrap();
/// let second = coordinator.on_row_about_to_insert(session, batch, &template, &mut conn).unwrap();
/// assert!(first < second);
/// assert_eq!(table.row(first).unwrap(), Some(vec!["ada".to_string()]));
/// # }
/// ```
pub struct IdentifierAssignmentCoordinator<R, K, P> {
    registry: PendingRecordRegistry<R>,
    cache: SessionKeyCache<K>,
    executor: BatchInsertExecutor<P>,
    config: BatchConfig,
    mode: InsertMode,
}

impl<R, K, P> IdentifierAssignmentCoordinator<R, K, P> {
    /// Creates a batching coordinator that binds and decodes through
    /// `persister`.
    pub fn new(persister: P, config: BatchConfig) -> Self {
        Self {
            registry: PendingRecordRegistry::new(),
            cache: SessionKeyCache::new(),
            executor: BatchInsertExecutor::new(persister),
            config,
            mode: InsertMode::Batched,
        }
    }

    /// Creates a coordinator whose mode is chosen from `capabilities`: the
    /// batch engine when the environment supports it, single-row inserts
    /// otherwise.
    pub fn install(persister: P, config: BatchConfig, capabilities: &Capabilities) -> Self {
        Self::new(persister, config).with_mode(capabilities.insert_mode())
    }

    /// Overrides the insert mode.
    #[must_use]
    pub fn with_mode(mut self, mode: InsertMode) -> Self {
        self.mode = mode;
        self
    }

    /// The active insert mode.
    pub const fn mode(&self) -> InsertMode {
        self.mode
    }

    /// The factory-level configuration.
    pub const fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// The pending record registry.
    pub const fn registry(&self) -> &PendingRecordRegistry<R> {
        &self.registry
    }

    /// The generated key cache.
    pub const fn cache(&self) -> &SessionKeyCache<K> {
        &self.cache
    }

    /// Registers `record` as awaiting a generated key in `session`.
    ///
    /// # Errors
    ///
    /// Only fails if a lock is poisoned.
    pub fn on_record_prepared(&self, session: SessionKey, record: R) -> Result<()> {
        self.registry.append(session, record)
    }

    /// Returns the generated key for the next row `session` inserts.
    ///
    /// If no key is cached for the session, up to `batch_size` pending
    /// records are drained and inserted in one batch through `connection`,
    /// and the resulting keys are cached. In [`InsertMode::SingleRow`] the
    /// batch size is always 1.
    ///
    /// # Errors
    ///
    /// - [`crate::Error::NoPendingRecords`] if nothing is queued for the
    ///   session.
    /// - [`crate::Error::Execution`] or [`crate::Error::KeyCountMismatch`]
    ///   if the batch insert fails. The drained records are not requeued.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "trace", skip_all, fields(session = %session))
    )]
    pub fn on_row_about_to_insert<C>(
        &self,
        session: SessionKey,
        batch_size: BatchSize,
        template: &InsertTemplate,
        connection: &mut C,
    ) -> Result<K>
    where
        C: BatchConnection,
        P: EntityPersister<R, C::Statement, Key = K>,
        K: PartialOrd + fmt::Debug,
    {
        let batch_size = match self.mode {
            InsertMode::Batched => batch_size,
            InsertMode::SingleRow => BatchSize::ONE,
        };

        self.cache.next_key(session, batch_size, |session, batch_size| {
            let chunk = self.registry.drain(session, batch_size)?;
            self.executor.execute(session, &chunk, template, connection)
        })
    }

    /// Like [`Self::on_row_about_to_insert`], taking the session key, the
    /// batch size, and the connection from a [`PersistenceSession`].
    ///
    /// The batch size is the session's own setting if it has one, otherwise
    /// the coordinator's configured default.
    ///
    /// # Errors
    ///
    /// See [`Self::on_row_about_to_insert`].
    pub fn assign_key<S>(&self, session: &mut S, template: &InsertTemplate) -> Result<K>
    where
        S: PersistenceSession,
        P: EntityPersister<R, <S::Connection as BatchConnection>::Statement, Key = K>,
        K: PartialOrd + fmt::Debug,
    {
        let key = session.session_key();
        let batch_size = self.config.effective_batch_size(session.batch_size());
        self.on_row_about_to_insert(key, batch_size, template, session.connection())
    }

    /// Forgets everything held for `session`: queued records and unconsumed
    /// keys alike.
    ///
    /// Integrations that can observe session end should call this; the
    /// opportunistic sweep in the cache covers those that cannot.
    ///
    /// # Errors
    ///
    /// Only fails if a lock is poisoned.
    pub fn on_session_closed(&self, session: SessionKey) -> Result<SessionResidue> {
        let residue = SessionResidue {
            records: self.registry.discard(session)?,
            keys: self.cache.discard(session)?,
        };

        #[cfg(feature = "tracing")]
        if !residue.is_empty() {
            tracing::warn!(
                session = %session,
                records = residue.records,
                keys = residue.keys,
                "session closed with unassigned records or unused keys"
            );
        }

        Ok(residue)
    }
}
