//! Unified error handling for streampool
//!
//! All pool operations are synchronous and report failure through
//! [`PoolError`] rather than terminating the process. The only exception is
//! corruption of the allocator's own metadata (a ledger that no longer
//! partitions its arena), which panics loudly instead of limping on.

use std::fmt;

use thiserror::Error;

/// Pool error types
///
/// `OutOfMemory` and `UnknownPointer` are expected, recoverable-by-caller
/// conditions. `MemoryLeak` is reported by `finalize` when live allocations
/// are still outstanding; teardown proceeds but the caller is told exactly
/// what leaked.
#[derive(Error, Debug, Clone)]
pub enum PoolError {
    #[error("pool manager is not initialized")]
    NotInitialized,
    #[error("pool manager is already initialized")]
    AlreadyInitialized,
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("out of device memory: {0}")]
    OutOfMemory(String),
    #[error("unknown pointer: {0:#x} is not a live allocation")]
    UnknownPointer(usize),
    #[error("memory leak at finalize: {0}")]
    MemoryLeak(LeakReport),
    #[error("internal error: {0}")]
    Internal(String),
}

impl<T> From<std::sync::PoisonError<T>> for PoolError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        PoolError::Internal(format!("lock poisoned: {}", err))
    }
}

/// Pool result type
pub type PoolResult<T> = Result<T, PoolError>;

/// Outstanding allocations on one device at finalize time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceLeak {
    pub device_id: i32,
    /// Number of live allocations never freed
    pub allocations: usize,
    /// Total bytes still marked used
    pub bytes: usize,
}

/// Aggregated leak report across every device pool
///
/// `finalize` keeps tearing pools down after the first leak is found and
/// collects every device's outstanding allocations into one report.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LeakReport {
    pub devices: Vec<DeviceLeak>,
}

impl LeakReport {
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Total leaked bytes across all devices
    pub fn total_bytes(&self) -> usize {
        self.devices.iter().map(|d| d.bytes).sum()
    }

    /// Total leaked allocation count across all devices
    pub fn total_allocations(&self) -> usize {
        self.devices.iter().map(|d| d.allocations).sum()
    }
}

impl fmt::Display for LeakReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} allocation(s), {} byte(s) outstanding across {} device(s)",
            self.total_allocations(),
            self.total_bytes(),
            self.devices.len()
        )?;
        for leak in &self.devices {
            write!(
                f,
                "; device {}: {} allocation(s), {} byte(s)",
                leak.device_id, leak.allocations, leak.bytes
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leak_report_totals() {
        let report = LeakReport {
            devices: vec![
                DeviceLeak {
                    device_id: 0,
                    allocations: 2,
                    bytes: 4096,
                },
                DeviceLeak {
                    device_id: 1,
                    allocations: 1,
                    bytes: 512,
                },
            ],
        };
        assert_eq!(report.total_allocations(), 3);
        assert_eq!(report.total_bytes(), 4608);
        assert!(!report.is_empty());
    }

    #[test]
    fn test_leak_report_display_names_devices() {
        let report = LeakReport {
            devices: vec![DeviceLeak {
                device_id: 3,
                allocations: 1,
                bytes: 256,
            }],
        };
        let msg = format!("{}", PoolError::MemoryLeak(report));
        assert!(msg.contains("device 3"));
        assert!(msg.contains("256"));
    }

    #[test]
    fn test_unknown_pointer_formats_hex() {
        let msg = format!("{}", PoolError::UnknownPointer(0xdead00));
        assert!(msg.contains("0xdead00"));
    }
}
