//! Kernel-wide limits and defaults.

use crate::errors::{Errno, KResult};
use crate::time::Duration;

/// Lowest scheduling priority.
pub const MIN_PRIORITY: u8 = 0;
/// Highest scheduling priority.
pub const MAX_PRIORITY: u8 = 255;
/// Priority given to threads created without explicit scheduling.
pub const DEFAULT_PRIORITY: u8 = 1;

/// Default stack size for new threads.
pub const DEFAULT_STACK_SIZE: usize = 12 * 1024;
/// Smallest stack a thread may be created with.
pub const MIN_STACK_SIZE: usize = 4 * 1024;
/// Largest stack a thread may be created with.
pub const MAX_STACK_SIZE: usize = 2 * 1024 * 1024;

/// Number of thread-specific data keys.
pub const KEYS_MAX: usize = 128;

/// Tunables for one [`crate::Kernel`] instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelConfig {
    /// Upper bound on simultaneously live threads, the main thread included.
    pub max_threads: usize,
    /// Number of thread-specific data keys.
    pub keys_max: usize,
    pub default_stack_size: usize,
    pub min_stack_size: usize,
    pub max_stack_size: usize,
    /// Priority of threads created with inherited scheduling from a
    /// context that has none (only the main thread's own creation).
    pub default_priority: u8,
    /// Priority the adopted main thread starts with.
    pub main_priority: u8,
    /// Slice length for SCHED_RR threads.
    pub time_slice: Duration,
}

impl KernelConfig {
    pub const fn new() -> Self {
        Self {
            max_threads: 64,
            keys_max: KEYS_MAX,
            default_stack_size: DEFAULT_STACK_SIZE,
            min_stack_size: MIN_STACK_SIZE,
            max_stack_size: MAX_STACK_SIZE,
            default_priority: DEFAULT_PRIORITY,
            main_priority: DEFAULT_PRIORITY,
            time_slice: Duration::from_millis(10),
        }
    }

    /// Check that the limits are coherent.
    pub fn validate(&self) -> KResult<()> {
        if self.max_threads == 0
            || self.min_stack_size == 0
            || self.min_stack_size > self.default_stack_size
            || self.default_stack_size > self.max_stack_size
            || self.time_slice.as_nanos() == 0
        {
            return Err(Errno::EINVAL);
        }
        Ok(())
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert_eq!(KernelConfig::default().validate(), Ok(()));
    }

    #[test]
    fn rejects_inverted_stack_limits() {
        let cfg = KernelConfig {
            min_stack_size: 64 * 1024,
            ..KernelConfig::default()
        };
        assert_eq!(cfg.validate(), Err(Errno::EINVAL));
    }
}
