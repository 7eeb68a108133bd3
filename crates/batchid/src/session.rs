use core::fmt;
use portable_atomic::{AtomicU64, Ordering};

use crate::{config::BatchSize, executor::BatchConnection};

/// Source of per-instance disambiguators. Starts at 1 so that `0` never
/// appears in an issued key.
static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(1);

/// A process-unique identifier for one active unit of work.
///
/// A persistence session exposes a handle (for example a UUID) that is not
/// necessarily unique among concurrently live sessions: handles can be
/// reused, copied, or shared by related sessions. The key therefore pairs the
/// handle with an `instance` number drawn from a process-wide counter when
/// the session is opened. Two keys compare equal only if both parts match.
///
/// Keys are cheap to clone and hash, and are used to index both the pending
/// record registry and the generated key cache.
///
/// # Example
/// ```
/// use batchid::SessionKey;
///
/// let a = SessionKey::issue(7);
/// let b = SessionKey::issue(7);
/// assert_eq!(a.handle(), b.handle());
/// assert_ne!(a, b);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionKey {
    handle: u128,
    instance: u64,
}

impl SessionKey {
    /// Issues a fresh key for a session identified by `handle`.
    ///
    /// Each call returns a key distinct from every other key issued in this
    /// process, even for identical handles.
    pub fn issue(handle: u128) -> Self {
        let instance = NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed);
        Self { handle, instance }
    }

    /// Rebuilds a key from explicit parts.
    ///
    /// Intended for integrations that already track their own instance
    /// identity. Uniqueness is then the caller's responsibility.
    pub const fn from_parts(handle: u128, instance: u64) -> Self {
        Self { handle, instance }
    }

    /// The session handle supplied by the persistence layer.
    pub const fn handle(&self) -> u128 {
        self.handle
    }

    /// The instance disambiguator.
    pub const fn instance(&self) -> u64 {
        self.instance
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}#{}", self.handle, self.instance)
    }
}

/// The persistence-session collaborator.
///
/// Implemented by the surrounding integration for whatever object represents
/// one unit of work. The core only needs a stable key, the session's batch
/// size override (if any), and access to the live connection.
pub trait PersistenceSession {
    /// Connection type used to execute batch inserts.
    type Connection: BatchConnection;

    /// The key identifying this session for its whole lifetime.
    fn session_key(&self) -> SessionKey;

    /// The batch size configured on this session, if it overrides the
    /// factory default.
    fn batch_size(&self) -> Option<BatchSize> {
        None
    }

    /// The live connection that batch inserts run against.
    fn connection(&mut self) -> &mut Self::Connection;
}
