//! An in-process table with an auto-increment key column.
//!
//! [`MemoryTable`] behaves like a data store that honours the
//! ascending-generation assumption: every batch is inserted under the table's
//! lock and receives consecutive, strictly increasing keys in row order.
//! [`MemoryConnection`], [`MemoryStatement`], and [`MemoryPersister`] plug it
//! into the collaborator traits so the coordinator can be exercised without a
//! database.

use core::mem;
use std::{collections::BTreeMap, sync::Arc};

use crate::{
    config::BatchSize,
    error::{BoxError, Result},
    executor::{BatchConnection, BatchStatement, EntityPersister, InsertTemplate},
    mutex::{Mutex, acquire},
    session::{PersistenceSession, SessionKey},
};

struct TableState {
    next_key: u64,
    rows: BTreeMap<u64, Vec<String>>,
    batches: usize,
}

/// A shared, thread-safe table of rows keyed by generated `u64` keys.
///
/// Clones share the same rows.
#[derive(Clone)]
pub struct MemoryTable {
    state: Arc<Mutex<TableState>>,
}

impl MemoryTable {
    /// Creates an empty table whose first generated key is 1.
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    /// Creates an empty table whose first generated key is `first_key`.
    pub fn starting_at(first_key: u64) -> Self {
        Self {
            state: Arc::new(Mutex::new(TableState {
                next_key: first_key,
                rows: BTreeMap::new(),
                batches: 0,
            })),
        }
    }

    /// Inserts `rows` as one batch and returns their keys in row order.
    ///
    /// # Errors
    ///
    /// Fails if the table lock is poisoned or the key space is exhausted.
    pub fn insert_batch(&self, rows: Vec<Vec<String>>) -> Result<Vec<u64>, BoxError> {
        let mut state = acquire(&self.state)?;
        let mut keys = Vec::with_capacity(rows.len());
        for row in rows {
            let key = state.next_key;
            state.next_key = key.checked_add(1).ok_or("generated key space exhausted")?;
            state.rows.insert(key, row);
            keys.push(key);
        }
        state.batches += 1;
        Ok(keys)
    }

    /// The values stored under `key`, if any.
    ///
    /// # Errors
    ///
    /// Only fails if the lock is poisoned.
    pub fn row(&self, key: u64) -> Result<Option<Vec<String>>> {
        Ok(acquire(&self.state)?.rows.get(&key).cloned())
    }

    /// Number of stored rows.
    ///
    /// # Errors
    ///
    /// Only fails if the lock is poisoned.
    pub fn len(&self) -> Result<usize> {
        Ok(acquire(&self.state)?.rows.len())
    }

    /// `true` if no rows have been stored.
    ///
    /// # Errors
    ///
    /// Only fails if the lock is poisoned.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Number of batches executed against this table.
    ///
    /// # Errors
    ///
    /// Only fails if the lock is poisoned.
    pub fn batches(&self) -> Result<usize> {
        Ok(acquire(&self.state)?.batches)
    }
}

impl Default for MemoryTable {
    fn default() -> Self {
        Self::new()
    }
}

/// A prepared insert against a [`MemoryTable`].
pub struct MemoryStatement {
    table: MemoryTable,
    params: Vec<String>,
    batch: Vec<Vec<String>>,
    keys: Vec<u64>,
}

impl MemoryStatement {
    /// Binds the next positional parameter.
    pub fn bind(&mut self, value: impl Into<String>) {
        self.params.push(value.into());
    }
}

impl BatchStatement for MemoryStatement {
    type Row = u64;

    fn add_batch(&mut self) -> Result<(), BoxError> {
        if self.params.is_empty() {
            return Err("no parameters bound".into());
        }
        self.batch.push(mem::take(&mut self.params));
        Ok(())
    }

    fn execute_batch(&mut self) -> Result<(), BoxError> {
        self.keys = self.table.insert_batch(mem::take(&mut self.batch))?;
        Ok(())
    }

    fn generated_keys(&mut self) -> Result<Vec<u64>, BoxError> {
        Ok(self.keys.clone())
    }
}

/// A connection to a [`MemoryTable`] that tracks statement lifetimes.
pub struct MemoryConnection {
    table: MemoryTable,
    prepared: usize,
    released: usize,
}

impl MemoryConnection {
    /// Opens a connection to `table`.
    pub const fn new(table: MemoryTable) -> Self {
        Self {
            table,
            prepared: 0,
            released: 0,
        }
    }

    /// The table this connection writes to.
    pub const fn table(&self) -> &MemoryTable {
        &self.table
    }

    /// Statements prepared so far.
    pub const fn prepared(&self) -> usize {
        self.prepared
    }

    /// Statements prepared but not yet released.
    pub const fn open_statements(&self) -> usize {
        self.prepared.saturating_sub(self.released)
    }
}

impl BatchConnection for MemoryConnection {
    type Statement = MemoryStatement;

    fn prepare_returning_keys(&mut self, _template: &InsertTemplate) -> Result<MemoryStatement, BoxError> {
        self.prepared += 1;
        Ok(MemoryStatement {
            table: self.table.clone(),
            params: Vec::new(),
            batch: Vec::new(),
            keys: Vec::new(),
        })
    }

    fn release(&mut self, statement: &mut MemoryStatement) {
        statement.params.clear();
        statement.batch.clear();
        statement.keys.clear();
        self.released += 1;
    }
}

/// Maps records to row values with a closure and decodes `u64` keys.
pub struct MemoryPersister<F> {
    key_column: String,
    columns: F,
}

impl<F> MemoryPersister<F> {
    /// Creates a persister whose identity column is `key_column` and whose
    /// bound values come from `columns`.
    pub fn new(key_column: impl Into<String>, columns: F) -> Self {
        Self {
            key_column: key_column.into(),
            columns,
        }
    }
}

impl<R, F> EntityPersister<R, MemoryStatement> for MemoryPersister<F>
where
    F: Fn(&R) -> Vec<String>,
{
    type Key = u64;

    fn key_column(&self) -> &str {
        &self.key_column
    }

    fn bind(&self, record: &R, statement: &mut MemoryStatement) -> Result<(), BoxError> {
        for value in (self.columns)(record) {
            statement.bind(value);
        }
        Ok(())
    }

    fn decode_key(&self, row: &u64, _key_column: &str) -> Result<u64, BoxError> {
        Ok(*row)
    }
}

/// A persistence session backed by a [`MemoryConnection`].
pub struct MemorySession {
    key: SessionKey,
    batch_size: Option<BatchSize>,
    connection: MemoryConnection,
}

impl MemorySession {
    /// Opens a session with a freshly issued key for `handle`.
    pub fn open(handle: u128, table: MemoryTable) -> Self {
        Self {
            key: SessionKey::issue(handle),
            batch_size: None,
            connection: MemoryConnection::new(table),
        }
    }

    /// Sets this session's own batch size.
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: BatchSize) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    /// The session's connection.
    pub const fn connection_ref(&self) -> &MemoryConnection {
        &self.connection
    }
}

impl PersistenceSession for MemorySession {
    type Connection = MemoryConnection;

    fn session_key(&self) -> SessionKey {
        self.key
    }

    fn batch_size(&self) -> Option<BatchSize> {
        self.batch_size
    }

    fn connection(&mut self) -> &mut MemoryConnection {
        &mut self.connection
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batches_receive_consecutive_keys() {
        let table = MemoryTable::starting_at(100);
        let first = table
            .insert_batch(vec![vec!["a".into()], vec!["b".into()]])
            .unwrap();
        let second = table.insert_batch(vec![vec!["c".into()]]).unwrap();

        assert_eq!(first, vec![100, 101]);
        assert_eq!(second, vec![102]);
        assert_eq!(table.row(101).unwrap(), Some(vec!["b".to_string()]));
        assert_eq!(table.len().unwrap(), 3);
        assert_eq!(table.batches().unwrap(), 2);
    }

    #[test]
    fn add_batch_without_parameters_fails() {
        let mut conn = MemoryConnection::new(MemoryTable::new());
        let template = InsertTemplate::new("insert into t (v) values (?)", "id");
        let mut statement = conn.prepare_returning_keys(&template).unwrap();

        assert!(statement.add_batch().is_err());

        conn.release(&mut statement);
        assert_eq!(conn.open_statements(), 0);
    }

    #[test]
    fn extra_release_does_not_underflow_open_statements() {
        let mut conn = MemoryConnection::new(MemoryTable::new());
        let template = InsertTemplate::new("insert into t (v) values (?)", "id");
        let mut statement = conn.prepare_returning_keys(&template).unwrap();

        conn.release(&mut statement);
        conn.release(&mut statement);

        assert_eq!(conn.prepared(), 1);
        assert_eq!(conn.open_statements(), 0);
    }
}
