//! Queue configuration

use super::arena::MAX_SLOTS;
use crate::{Error, Result};

/// Construction-time options for a [`ConcurrentQueue`](super::ConcurrentQueue)
///
/// ```rust
/// use tagqueue::{ConcurrentQueue, QueueConfig};
///
/// let config = QueueConfig::new().reserve(4096).metrics(true);
/// let queue: ConcurrentQueue<u64> = ConcurrentQueue::with_config(config)?;
/// assert!(queue.is_empty());
/// # Ok::<(), tagqueue::Error>(())
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueConfig {
    /// Node slots to install up front, so the first `reserve` enqueues never grow
    /// the node table. The dummy node occupies one of them.
    pub reserve: usize,
    /// Start with metrics recording enabled
    pub metrics: bool,
    /// Record every minted tag and check that no tag is ever seen on two different
    /// slots. Intended for debugging runs: the ledger grows with every enqueue.
    pub validate_tags: bool,
}

impl QueueConfig {
    /// Default configuration: nothing reserved, metrics off, no tag ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of node slots installed at construction
    pub fn reserve(mut self, slots: usize) -> Self {
        self.reserve = slots;
        self
    }

    /// Enable or disable metrics recording from the start
    pub fn metrics(mut self, enabled: bool) -> Self {
        self.metrics = enabled;
        self
    }

    /// Enable or disable the tag ledger
    pub fn validate_tags(mut self, enabled: bool) -> Self {
        self.validate_tags = enabled;
        self
    }

    /// Check the configuration against the limits of the node table
    ///
    /// # Errors
    ///
    /// [`Error::CapacityExceeded`] if `reserve` is larger than the table can address.
    pub fn validate(&self) -> Result<()> {
        if self.reserve > MAX_SLOTS {
            return Err(Error::CapacityExceeded {
                requested: self.reserve,
                max: MAX_SLOTS,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_methods() {
        let config = QueueConfig::new()
            .reserve(128)
            .metrics(true)
            .validate_tags(true);
        assert_eq!(config.reserve, 128);
        assert!(config.metrics);
        assert!(config.validate_tags);
        assert_eq!(QueueConfig::new(), QueueConfig::default());
    }

    #[test]
    fn test_validate() {
        assert!(QueueConfig::new().validate().is_ok());
        assert!(QueueConfig::new().reserve(MAX_SLOTS).validate().is_ok());

        if MAX_SLOTS < usize::MAX {
            let err = QueueConfig::new()
                .reserve(MAX_SLOTS + 1)
                .validate()
                .unwrap_err();
            assert_eq!(
                err,
                Error::CapacityExceeded {
                    requested: MAX_SLOTS + 1,
                    max: MAX_SLOTS,
                }
            );
        }
    }
}
