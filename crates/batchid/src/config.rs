use core::{fmt, num::NonZeroUsize};

use crate::error::{Error, Result};

/// Batch size used when neither the session nor the configuration says
/// otherwise.
pub const DEFAULT_BATCH_SIZE: BatchSize = BatchSize::new_const(50);

/// The number of rows sent to the data store in one batch insert.
///
/// Always at least 1. Zero is rejected at construction, so every drain and
/// fill operates on a valid size.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct BatchSize(NonZeroUsize);

impl BatchSize {
    /// A batch of exactly one row.
    pub const ONE: Self = Self(NonZeroUsize::MIN);

    /// Creates a batch size, returning [`Error::InvalidBatchSize`] for zero.
    pub fn new(size: usize) -> Result<Self> {
        NonZeroUsize::new(size).map(Self).ok_or(Error::InvalidBatchSize)
    }

    const fn new_const(size: usize) -> Self {
        match NonZeroUsize::new(size) {
            Some(size) => Self(size),
            None => panic!("batch size must be non-zero"),
        }
    }

    /// The size as a plain `usize`.
    pub const fn get(self) -> usize {
        self.0.get()
    }
}

impl Default for BatchSize {
    fn default() -> Self {
        DEFAULT_BATCH_SIZE
    }
}

impl From<NonZeroUsize> for BatchSize {
    fn from(size: NonZeroUsize) -> Self {
        Self(size)
    }
}

impl TryFrom<usize> for BatchSize {
    type Error = Error;

    fn try_from(size: usize) -> Result<Self> {
        Self::new(size)
    }
}

impl fmt::Display for BatchSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Factory-level settings shared by every session of a coordinator.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct BatchConfig {
    /// Batch size for sessions that do not set their own.
    pub default_batch_size: BatchSize,
}

impl BatchConfig {
    /// Creates a configuration with the given factory default.
    pub const fn new(default_batch_size: BatchSize) -> Self {
        Self { default_batch_size }
    }

    /// Resolves the batch size for one call: the session's own setting wins,
    /// otherwise the factory default applies.
    pub fn effective_batch_size(&self, session_override: Option<BatchSize>) -> BatchSize {
        session_override.unwrap_or(self.default_batch_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_is_rejected() {
        assert!(matches!(BatchSize::new(0), Err(Error::InvalidBatchSize)));
        assert!(matches!(BatchSize::try_from(0), Err(Error::InvalidBatchSize)));
        assert_eq!(BatchSize::new(3).unwrap().get(), 3);
    }

    #[test]
    fn session_override_wins() {
        let config = BatchConfig::new(BatchSize::new(10).unwrap());
        assert_eq!(config.effective_batch_size(None).get(), 10);
        assert_eq!(
            config
                .effective_batch_size(Some(BatchSize::new(4).unwrap()))
                .get(),
            4
        );
    }

    #[test]
    fn default_config_uses_default_batch_size() {
        assert_eq!(BatchConfig::default().default_batch_size, DEFAULT_BATCH_SIZE);
        assert_eq!(DEFAULT_BATCH_SIZE.get(), 50);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn serde_round_trips_and_rejects_zero() {
        let config: BatchConfig = serde_json::from_str(r#"{"default_batch_size":8}"#).unwrap();
        assert_eq!(config.default_batch_size.get(), 8);
        assert_eq!(
            serde_json::to_string(&config).unwrap(),
            r#"{"default_batch_size":8}"#
        );

        let empty: BatchConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(empty, BatchConfig::default());

        assert!(serde_json::from_str::<BatchConfig>(r#"{"default_batch_size":0}"#).is_err());
    }
}
