//! Board support: the clock, the countdown timer and the idle wait.

use crate::signal::Signal;
use crate::time::{Duration, Instant};

/// Services the kernel needs from the board-support package.
///
/// Methods take `&self`; implementations use interior mutability because
/// they are shared with interrupt context.
pub trait Board: Send + Sync {
    /// Monotonic time since boot.
    fn now(&self) -> Instant;

    /// Granularity of [`Board::now`].
    fn resolution(&self) -> Duration;

    /// Raise `SIGALRM` after `after`, or stop the timer with `None`.
    /// Replaces any earlier programming.
    fn program_timer(&self, after: Option<Duration>);

    /// Sleep until the next interrupt and report the signal it raised.
    /// Called with interrupts disabled when nothing is ready to run.
    fn wait_for_interrupt(&self) -> Option<Signal>;

    /// Stop the system with `status`.
    fn shutdown(&self, status: i32) -> !;
}

#[cfg(target_arch = "sparc")]
mod leon;
#[cfg(any(test, feature = "std-shim"))]
mod manual;

#[cfg(target_arch = "sparc")]
pub use leon::LeonBoard;
#[cfg(any(test, feature = "std-shim"))]
pub use manual::{ManualBoard, Shutdown};
