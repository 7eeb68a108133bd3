use core::fmt;

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::{
    error::{BoxError, Error, Result},
    session::SessionKey,
};

/// An insert statement whose identity column is generated by the data store.
///
/// Pairs the SQL text with the name of the column the generated keys are
/// read back from.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct InsertTemplate {
    sql: String,
    key_column: String,
}

impl InsertTemplate {
    /// Creates a template for `sql` whose generated key is read from
    /// `key_column`.
    pub fn new(sql: impl Into<String>, key_column: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            key_column: key_column.into(),
        }
    }

    /// The insert SQL text.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// The identity column the connection is asked to return.
    ///
    /// Keys are always decoded with the persister's own key column, whatever
    /// this says.
    pub fn key_column(&self) -> &str {
        &self.key_column
    }
}

impl fmt::Display for InsertTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql)
    }
}

/// A prepared insert statement that accumulates rows and returns the keys the
/// data store generated for them.
pub trait BatchStatement {
    /// One row of the generated-key result.
    type Row;

    /// Adds the currently bound parameter values to the batch.
    fn add_batch(&mut self) -> Result<(), BoxError>;

    /// Executes every queued row in one round trip.
    fn execute_batch(&mut self) -> Result<(), BoxError>;

    /// Reads back the generated-key rows of the last execution, in cursor
    /// order.
    fn generated_keys(&mut self) -> Result<Vec<Self::Row>, BoxError>;
}

/// A live connection able to prepare key-returning batch inserts.
pub trait BatchConnection {
    /// The prepared statement type.
    type Statement: BatchStatement;

    /// Prepares `template` so that executing it returns generated keys.
    fn prepare_returning_keys(&mut self, template: &InsertTemplate) -> Result<Self::Statement, BoxError>;

    /// Releases the statement and its result cursor.
    ///
    /// Called exactly once for every statement returned by
    /// [`Self::prepare_returning_keys`], whatever the outcome of the batch.
    fn release(&mut self, statement: &mut Self::Statement);
}

/// The entity-persister collaborator: knows how one record type maps onto a
/// statement of type `S`.
pub trait EntityPersister<R, S: BatchStatement> {
    /// The generated key type, e.g. `u64` for an auto-increment column.
    type Key;

    /// Name of the identity column.
    fn key_column(&self) -> &str;

    /// Writes the persisted fields of `record` into `statement`'s parameters.
    fn bind(&self, record: &R, statement: &mut S) -> Result<(), BoxError>;

    /// Decodes one generated key from a result row. `key_column` is always
    /// [`Self::key_column`].
    fn decode_key(&self, row: &S::Row, key_column: &str) -> Result<Self::Key, BoxError>;
}

/// Holds a prepared statement for the duration of one batch and hands it back
/// to the connection when dropped.
struct StatementScope<'c, C: BatchConnection> {
    connection: &'c mut C,
    statement: C::Statement,
}

impl<'c, C: BatchConnection> StatementScope<'c, C> {
    fn prepare(connection: &'c mut C, template: &InsertTemplate) -> Result<Self, BoxError> {
        let statement = connection.prepare_returning_keys(template)?;
        Ok(Self {
            connection,
            statement,
        })
    }
}

impl<C: BatchConnection> Drop for StatementScope<'_, C> {
    fn drop(&mut self) {
        self.connection.release(&mut self.statement);
    }
}

/// Executes one physical batch insert per chunk and returns the generated
/// keys in row order.
///
/// The executor relies on the data store producing keys in the same order as
/// the rows were inserted. It never reorders keys; a batch whose keys are not
/// non-decreasing is logged as a warning and returned unchanged.
pub struct BatchInsertExecutor<P> {
    persister: P,
}

impl<P> BatchInsertExecutor<P> {
    /// Creates an executor that binds and decodes through `persister`.
    pub const fn new(persister: P) -> Self {
        Self { persister }
    }

    /// The persister used for binding and decoding.
    pub const fn persister(&self) -> &P {
        &self.persister
    }

    /// Inserts every record of `chunk` in one batch and returns one generated
    /// key per record, in the same order.
    ///
    /// The statement is released on every path out of this function.
    ///
    /// # Errors
    ///
    /// - [`Error::Execution`] if preparing, binding, executing, or decoding
    ///   fails. The failure is logged with the statement text first.
    /// - [`Error::KeyCountMismatch`] if the number of keys read back differs
    ///   from `chunk.len()`.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip_all, fields(session = %session, rows = chunk.len()))
    )]
    pub fn execute<R, C>(
        &self,
        session: SessionKey,
        chunk: &[R],
        template: &InsertTemplate,
        connection: &mut C,
    ) -> Result<Vec<P::Key>>
    where
        C: BatchConnection,
        P: EntityPersister<R, C::Statement>,
        P::Key: PartialOrd + fmt::Debug,
    {
        let keys = {
            let mut scope =
                StatementScope::prepare(connection, template).map_err(|e| failed(template, e))?;
            self.run(chunk, template, &mut scope.statement)
                .map_err(|e| failed(template, e))?
        };

        if keys.len() != chunk.len() {
            #[cfg(feature = "tracing")]
            tracing::error!(
                statement = template.sql(),
                expected = chunk.len(),
                actual = keys.len(),
                "generated key count does not match batch size"
            );
            return Err(Error::KeyCountMismatch {
                session,
                expected: chunk.len(),
                actual: keys.len(),
            });
        }

        #[cfg(feature = "tracing")]
        if !keys.windows(2).all(|pair| pair[0] <= pair[1]) {
            tracing::warn!(
                statement = template.sql(),
                ?keys,
                "generated keys are not ascending; records may be paired with the wrong keys"
            );
        }

        Ok(keys)
    }

    fn run<R, S>(&self, chunk: &[R], _template: &InsertTemplate, statement: &mut S) -> Result<Vec<P::Key>, BoxError>
    where
        S: BatchStatement,
        P: EntityPersister<R, S>,
    {
        for record in chunk {
            self.persister.bind(record, statement)?;
            #[cfg(feature = "tracing")]
            tracing::trace!(statement = _template.sql(), "added row to batch");
            statement.add_batch()?;
        }

        statement.execute_batch()?;

        let key_column = self.persister.key_column();
        statement
            .generated_keys()?
            .iter()
            .map(|row| self.persister.decode_key(row, key_column))
            .collect()
    }
}

#[cold]
fn failed(template: &InsertTemplate, source: BoxError) -> Error {
    #[cfg(feature = "tracing")]
    tracing::error!(statement = template.sql(), error = %source, "batch insert failed");
    Error::Execution {
        statement: template.sql().to_owned(),
        source,
    }
}
