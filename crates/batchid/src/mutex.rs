#[cfg(not(feature = "parking-lot"))]
pub use std::sync::{Mutex, MutexGuard, PoisonError};

#[cfg(feature = "parking-lot")]
pub use parking_lot::{Mutex, MutexGuard};

use crate::error::Result;

/// Locks `mutex`, mapping poisoning to [`crate::Error::LockPoisoned`].
///
/// With `parking-lot` enabled this never fails.
#[inline]
pub(crate) fn acquire<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    #[cfg(feature = "parking-lot")]
    {
        Ok(mutex.lock())
    }
    #[cfg(not(feature = "parking-lot"))]
    {
        Ok(mutex.lock()?)
    }
}
