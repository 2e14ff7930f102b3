//! Pool configuration types

use crate::backend::QueueHandle;
use crate::error::{PoolError, PoolResult};

/// Default additional reservation size when a pool grows (64 MB)
pub const DEFAULT_GROWTH_INCREMENT: usize = 64 * 1024 * 1024;

/// Behavior flags for `initialize`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PoolFlags {
    /// Standard behavior: pools may reserve additional device memory when
    /// every arena is exhausted
    #[default]
    Default,
    /// No reservations beyond the initial one; exhaustion always yields
    /// `OutOfMemory`
    CannotGrow,
}

/// One queue to bind a dedicated arena to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueConfig {
    pub queue: QueueHandle,
    /// Explicit arena size; `None` takes an even share of the remainder
    pub reserve_bytes: Option<usize>,
}

/// Configuration for one managed device
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    pub device_id: i32,
    /// Total bytes to reserve up front; 0 defers to a heuristic based on
    /// free device memory (half of what is currently free)
    pub total_bytes: usize,
    /// Queues to bind dedicated arenas to
    pub queues: Vec<QueueConfig>,
    /// Minimum size of each additional reservation when growing
    pub growth_increment: usize,
}

impl DeviceConfig {
    pub fn new(device_id: i32, total_bytes: usize) -> Self {
        DeviceConfig {
            device_id,
            total_bytes,
            queues: Vec::new(),
            growth_increment: DEFAULT_GROWTH_INCREMENT,
        }
    }

    /// Bind a dedicated arena to `queue`, sized as an even share of the
    /// space left after explicitly-sized queues
    pub fn with_queue(mut self, queue: QueueHandle) -> Self {
        self.queues.push(QueueConfig {
            queue,
            reserve_bytes: None,
        });
        self
    }

    /// Bind a dedicated arena to `queue` with an explicit reservation size
    pub fn with_sized_queue(mut self, queue: QueueHandle, reserve_bytes: usize) -> Self {
        self.queues.push(QueueConfig {
            queue,
            reserve_bytes: Some(reserve_bytes),
        });
        self
    }

    pub fn with_growth_increment(mut self, bytes: usize) -> Self {
        self.growth_increment = bytes;
        self
    }

    /// Validate internal consistency
    ///
    /// Rejected: duplicate queue handles, an explicit per-queue size of
    /// zero, and explicit sizes whose sum exceeds the device total (when a
    /// total is given).
    pub fn validate(&self) -> PoolResult<()> {
        for (i, qc) in self.queues.iter().enumerate() {
            if qc.reserve_bytes == Some(0) {
                return Err(PoolError::InvalidArgument(format!(
                    "queue {:?}: per-queue reservation size cannot be zero",
                    qc.queue
                )));
            }
            if self.queues[..i].iter().any(|other| other.queue == qc.queue) {
                return Err(PoolError::InvalidArgument(format!(
                    "queue {:?} configured twice for device {}",
                    qc.queue, self.device_id
                )));
            }
        }

        if self.total_bytes != 0 {
            let explicit: usize = self
                .queues
                .iter()
                .filter_map(|qc| qc.reserve_bytes)
                .sum();
            if explicit > self.total_bytes {
                return Err(PoolError::InvalidArgument(format!(
                    "device {}: per-queue reservations ({} bytes) exceed device total ({} bytes)",
                    self.device_id, explicit, self.total_bytes
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_config() {
        let config = DeviceConfig::new(0, 1 << 20)
            .with_queue(QueueHandle::from_raw(1))
            .with_sized_queue(QueueHandle::from_raw(2), 4096);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_oversubscribed_queues_rejected() {
        let config = DeviceConfig::new(0, 8192)
            .with_sized_queue(QueueHandle::from_raw(1), 8192)
            .with_sized_queue(QueueHandle::from_raw(2), 8192);
        assert!(matches!(
            config.validate(),
            Err(PoolError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_duplicate_queue_rejected() {
        let q = QueueHandle::from_raw(9);
        let config = DeviceConfig::new(0, 1 << 20).with_queue(q).with_queue(q);
        assert!(matches!(
            config.validate(),
            Err(PoolError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_zero_sized_queue_rejected() {
        let config =
            DeviceConfig::new(0, 1 << 20).with_sized_queue(QueueHandle::from_raw(1), 0);
        assert!(matches!(
            config.validate(),
            Err(PoolError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_heuristic_total_skips_sum_check() {
        // total_bytes == 0 defers sizing to initialize time; the sum check
        // happens there against the heuristic size.
        let config = DeviceConfig::new(0, 0).with_sized_queue(QueueHandle::from_raw(1), 4096);
        assert!(config.validate().is_ok());
    }
}
