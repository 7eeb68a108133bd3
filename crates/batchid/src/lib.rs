//! Batch-insert identifier reconciliation.
//!
//! When rows are inserted in batches and the data store assigns primary keys
//! at execution time, each generated key has to find its way back to the
//! in-memory record that produced it. `batchid` does this per session:
//!
//! 1. Records are queued per session as they are prepared for persistence
//!    ([`PendingRecordRegistry`]).
//! 2. When a row is about to be inserted and no key is cached for its
//!    session, a chunk of up to `batch_size` pending records is drained and
//!    inserted in one round trip ([`BatchInsertExecutor`]).
//! 3. The keys that come back are cached per session and handed out oldest
//!    first ([`SessionKeyCache`]).
//!
//! [`IdentifierAssignmentCoordinator`] wires the three together and is the
//! only type most integrations need.
//!
//! ## Ordering assumption
//!
//! Pairing relies on the data store generating keys for a batch in ascending
//! order that matches row insertion order, as auto-increment columns do. This
//! is not verified beyond a warning; a store that breaks it pairs records
//! with the wrong keys.
//!
//! ## Features
//!
//! - `tracing` (default): structured logs and spans via `tracing`.
//! - `parking-lot`: use `parking_lot` mutexes; removes lock poisoning.
//! - `serde`: `Serialize`/`Deserialize` for configuration types.
//! - `memory`: an in-process auto-increment table implementing the
//!   collaborator traits.

mod cache;
mod config;
mod coordinator;
mod error;
mod executor;
#[cfg(any(test, feature = "memory"))]
mod memory;
mod mutex;
mod registry;
mod session;
mod strategy;

pub use crate::cache::*;
pub use crate::config::*;
pub use crate::coordinator::*;
pub use crate::error::*;
pub use crate::executor::*;
#[cfg_attr(docsrs, doc(cfg(feature = "memory")))]
#[cfg(any(test, feature = "memory"))]
pub use crate::memory::*;
pub use crate::registry::*;
pub use crate::session::*;
pub use crate::strategy::*;
