use std::collections::{HashMap, VecDeque};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::{
    config::BatchSize,
    error::{Error, Result},
    mutex::{Mutex, acquire},
    session::SessionKey,
};

/// Per-session queues of generated keys that have not been handed out yet.
///
/// Keys are consumed strictly oldest first. A queue is removed the moment it
/// becomes empty, and every call to [`Self::next_key`] first sweeps any empty
/// queue left behind, so sessions that end without notice do not accumulate.
///
/// The whole of [`Self::next_key`] (sweep, lookup, fill, and pop) runs under
/// one lock. That includes the database round trip performed by a fill, so
/// concurrent callers for *any* session wait behind an in-flight batch. This
/// rules out two threads deciding to fill the same session at once.
pub struct SessionKeyCache<K> {
    queues: Mutex<HashMap<SessionKey, VecDeque<K>>>,
}

impl<K> SessionKeyCache<K> {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the next generated key for `session`.
    ///
    /// If no key is cached for `session`, `fill` is called with the session
    /// and `batch_size`; it is expected to drain a chunk of pending records,
    /// insert it, and return the keys in insertion order. Those keys are
    /// cached and the oldest is returned.
    ///
    /// # Errors
    ///
    /// Propagates any error from `fill` without caching anything, and
    /// returns [`Error::NoPendingRecords`] if `fill` yields no keys.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "trace", skip_all, fields(session = %session, batch_size = batch_size.get()))
    )]
    pub fn next_key<F>(&self, session: SessionKey, batch_size: BatchSize, fill: F) -> Result<K>
    where
        F: FnOnce(SessionKey, BatchSize) -> Result<Vec<K>>,
    {
        let mut queues = acquire(&self.queues)?;
        queues.retain(|_, queue| !queue.is_empty());

        if !queues.contains_key(&session) {
            let keys = fill(session, batch_size)?;
            if keys.is_empty() {
                return Err(Error::NoPendingRecords { session });
            }
            #[cfg(feature = "tracing")]
            tracing::debug!(keys = keys.len(), "cached generated keys");
            queues.insert(session, keys.into());
        }

        let Some(queue) = queues.get_mut(&session) else {
            return Err(Error::NoPendingRecords { session });
        };
        let key = queue.pop_front().ok_or(Error::NoPendingRecords { session })?;
        if queue.is_empty() {
            queues.remove(&session);
        }
        Ok(key)
    }

    /// Drops every key still cached for `session`, returning how many were
    /// discarded.
    ///
    /// # Errors
    ///
    /// Only fails if the lock is poisoned.
    pub fn discard(&self, session: SessionKey) -> Result<usize> {
        let mut queues = acquire(&self.queues)?;
        Ok(queues.remove(&session).map_or(0, |queue| queue.len()))
    }

    /// Number of keys cached and not yet handed out for `session`.
    ///
    /// # Errors
    ///
    /// Only fails if the lock is poisoned.
    pub fn cached(&self, session: SessionKey) -> Result<usize> {
        let queues = acquire(&self.queues)?;
        Ok(queues.get(&session).map_or(0, VecDeque::len))
    }

    /// Number of sessions with at least one cached key.
    ///
    /// # Errors
    ///
    /// Only fails if the lock is poisoned.
    pub fn session_count(&self) -> Result<usize> {
        Ok(acquire(&self.queues)?.len())
    }
}

impl<K> Default for SessionKeyCache<K> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::Cell;

    fn size(n: usize) -> BatchSize {
        BatchSize::new(n).unwrap()
    }

    #[test]
    fn fills_once_then_serves_oldest_first() {
        let cache = SessionKeyCache::new();
        let session = SessionKey::issue(1);
        let fills = Cell::new(0);
        let fill = |_: SessionKey, _: BatchSize| -> Result<Vec<u64>> {
            fills.set(fills.get() + 1);
            Ok(vec![101, 102, 103])
        };

        assert_eq!(cache.next_key(session, size(3), fill).unwrap(), 101);
        assert_eq!(cache.cached(session).unwrap(), 2);
        assert_eq!(cache.next_key(session, size(3), fill).unwrap(), 102);
        assert_eq!(cache.next_key(session, size(3), fill).unwrap(), 103);
        assert_eq!(fills.get(), 1);
        assert_eq!(cache.session_count().unwrap(), 0);
    }

    #[test]
    fn fill_receives_session_and_batch_size() {
        let cache = SessionKeyCache::new();
        let session = SessionKey::issue(1);

        let key = cache
            .next_key(session, size(7), |s, b| {
                assert_eq!(s, session);
                assert_eq!(b.get(), 7);
                Ok(vec![1u64])
            })
            .unwrap();
        assert_eq!(key, 1);
    }

    #[test]
    fn fill_error_caches_nothing() {
        let cache = SessionKeyCache::<u64>::new();
        let session = SessionKey::issue(1);

        let err = cache
            .next_key(session, size(2), |s, _| Err(Error::NoPendingRecords { session: s }))
            .unwrap_err();
        assert!(matches!(err, Error::NoPendingRecords { .. }));
        assert_eq!(cache.session_count().unwrap(), 0);

        let err = cache
            .next_key(session, size(2), |s, _| {
                Err(Error::KeyCountMismatch {
                    session: s,
                    expected: 2,
                    actual: 1,
                })
            })
            .unwrap_err();
        assert!(matches!(err, Error::KeyCountMismatch { .. }));
        assert_eq!(cache.cached(session).unwrap(), 0);
    }

    #[test]
    fn empty_fill_is_no_pending_records() {
        let cache = SessionKeyCache::<u64>::new();
        let session = SessionKey::issue(1);

        let err = cache.next_key(session, size(2), |_, _| Ok(Vec::new())).unwrap_err();
        assert!(matches!(err, Error::NoPendingRecords { session: s } if s == session));
        assert_eq!(cache.session_count().unwrap(), 0);
    }

    #[test]
    fn sessions_do_not_share_keys() {
        let cache = SessionKeyCache::new();
        let a = SessionKey::issue(5);
        let b = SessionKey::issue(5);

        assert_eq!(cache.next_key(a, size(2), |_, _| Ok(vec![1, 2])).unwrap(), 1);
        assert_eq!(cache.next_key(b, size(2), |_, _| Ok(vec![10, 20])).unwrap(), 10);
        assert_eq!(cache.next_key(a, size(2), |_, _| unreachable!()).unwrap(), 2);
        assert_eq!(cache.next_key(b, size(2), |_, _| unreachable!()).unwrap(), 20);
    }

    #[test]
    fn discard_drops_remaining_keys() {
        let cache = SessionKeyCache::new();
        let session = SessionKey::issue(1);

        cache.next_key(session, size(4), |_, _| Ok(vec![1, 2, 3, 4])).unwrap();
        assert_eq!(cache.discard(session).unwrap(), 3);
        assert_eq!(cache.discard(session).unwrap(), 0);
        assert_eq!(cache.session_count().unwrap(), 0);
    }
}
