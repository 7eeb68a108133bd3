use std::collections::{HashMap, VecDeque};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::{
    config::BatchSize,
    error::{Error, Result},
    mutex::{Mutex, acquire},
    session::SessionKey,
};

/// Per-session FIFO queues of records that have been handed to the
/// persistence layer but have not yet received a generated key.
///
/// A session has an entry only while at least one of its records is pending.
/// Records leave the registry exactly once, through [`Self::drain`].
pub struct PendingRecordRegistry<R> {
    pending: Mutex<HashMap<SessionKey, VecDeque<R>>>,
}

impl<R> PendingRecordRegistry<R> {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Appends `record` to the tail of `session`'s queue, creating the queue
    /// if this is the session's first pending record.
    ///
    /// # Errors
    ///
    /// Only fails if the lock is poisoned.
    pub fn append(&self, session: SessionKey, record: R) -> Result<()> {
        let mut pending = acquire(&self.pending)?;
        pending.entry(session).or_default().push_back(record);
        Ok(())
    }

    /// Removes and returns the oldest `batch_size` records queued for
    /// `session`, oldest first.
    ///
    /// If the session holds at most `batch_size` records, its entry is
    /// removed and every record is returned. Otherwise the remaining records
    /// stay queued under the same key in their original order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoPendingRecords`] if `session` has no entry, and
    /// [`Error::LockPoisoned`] if the lock is poisoned.
    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip(self, session), fields(session = %session)))]
    pub fn drain(&self, session: SessionKey, batch_size: BatchSize) -> Result<Vec<R>> {
        let mut pending = acquire(&self.pending)?;
        let Some(mut queue) = pending.remove(&session) else {
            return Err(Error::NoPendingRecords { session });
        };

        if queue.len() > batch_size.get() {
            let rest = queue.split_off(batch_size.get());
            pending.insert(session, rest);
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(
            drained = queue.len(),
            remaining = pending.get(&session).map_or(0, VecDeque::len),
            "drained pending records"
        );

        Ok(queue.into())
    }

    /// Drops every record still queued for `session`, returning how many were
    /// discarded.
    ///
    /// # Errors
    ///
    /// Only fails if the lock is poisoned.
    pub fn discard(&self, session: SessionKey) -> Result<usize> {
        let mut pending = acquire(&self.pending)?;
        Ok(pending.remove(&session).map_or(0, |queue| queue.len()))
    }

    /// Number of records currently queued for `session`.
    ///
    /// # Errors
    ///
    /// Only fails if the lock is poisoned.
    pub fn pending(&self, session: SessionKey) -> Result<usize> {
        let pending = acquire(&self.pending)?;
        Ok(pending.get(&session).map_or(0, VecDeque::len))
    }

    /// Number of sessions with at least one pending record.
    ///
    /// # Errors
    ///
    /// Only fails if the lock is poisoned.
    pub fn session_count(&self) -> Result<usize> {
        Ok(acquire(&self.pending)?.len())
    }
}

impl<R> Default for PendingRecordRegistry<R> {
    fn default() -> Self {
        Self::new()
    }
}
