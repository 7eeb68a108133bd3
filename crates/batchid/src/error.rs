use crate::session::SessionKey;

/// A boxed, thread-safe error returned by collaborators (connections,
/// statements, persisters).
pub type BoxError = Box<dyn core::error::Error + Send + Sync + 'static>;

/// The crate-wide result type.
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// All errors that `batchid` can produce.
///
/// Every failure surfaces to the immediate caller. Nothing is retried and no
/// partially assigned batch is ever kept.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// A drain or fill was requested for a session that has no queued
    /// records, so there is nothing to assign a key to.
    #[error("no pending records for session {session}")]
    NoPendingRecords {
        /// The session that had nothing queued.
        session: SessionKey,
    },

    /// The data store returned a different number of generated keys than
    /// rows submitted in the batch.
    ///
    /// This means the driver or dialect does not honour the one-key-per-row
    /// contract. It is fatal: none of the returned keys are cached.
    #[error("batch for session {session} inserted {expected} rows but returned {actual} keys")]
    KeyCountMismatch {
        /// The session whose chunk was executed.
        session: SessionKey,
        /// Number of records in the executed chunk.
        expected: usize,
        /// Number of generated keys read back.
        actual: usize,
    },

    /// Binding, executing, or decoding keys for a batch insert failed.
    ///
    /// The failure has already been logged together with `statement`, and
    /// the statement resources have been released.
    #[error("batch insert failed: {statement}")]
    Execution {
        /// The SQL text of the statement that failed.
        statement: String,
        /// The collaborator's underlying error.
        #[source]
        source: BoxError,
    },

    /// A batch size of zero was supplied.
    #[error("batch size must be at least 1")]
    InvalidBatchSize,

    /// The operation failed because a lock was **poisoned**.
    ///
    /// This occurs when a thread panics while holding the lock. When the
    /// `parking-lot` feature is enabled, mutexes do **not** poison, so this
    /// variant is not available.
    #[cfg_attr(docsrs, doc(cfg(not(feature = "parking-lot"))))]
    #[cfg(not(feature = "parking-lot"))]
    #[error("lock poisoned")]
    LockPoisoned,
}

#[cfg(not(feature = "parking-lot"))]
use crate::mutex::{MutexGuard, PoisonError};
#[cfg(not(feature = "parking-lot"))]
impl<T> From<PoisonError<MutexGuard<'_, T>>> for Error {
    fn from(_: PoisonError<MutexGuard<'_, T>>) -> Self {
        Self::LockPoisoned
    }
}
