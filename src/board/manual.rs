//! A board with a hand-driven clock for host builds.

use portable_atomic::{AtomicU64, Ordering};
use spin::Mutex;

use super::Board;
use crate::signal::Signal;
use crate::time::{Duration, Instant};

/// Panic payload carried out of [`ManualBoard::shutdown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shutdown(pub i32);

/// Time only moves when told to, or when every thread is idle: then the
/// clock jumps straight to the programmed expiry.
///
/// ```
/// use leon_pthreads::{Board, Duration, Instant, ManualBoard};
///
/// let board = ManualBoard::new();
/// board.program_timer(Some(Duration::from_millis(5)));
/// assert!(!board.advance(Duration::from_millis(4)));
/// assert!(board.advance(Duration::from_millis(1)));
/// assert_eq!(board.programmed(), None);
/// assert_eq!(board.now(), Instant::from_nanos(5_000_000));
/// ```
#[derive(Debug, Default)]
pub struct ManualBoard {
    now: AtomicU64,
    armed: Mutex<Option<Instant>>,
}

impl ManualBoard {
    pub const fn new() -> Self {
        Self {
            now: AtomicU64::new(0),
            armed: Mutex::new(None),
        }
    }

    pub fn set_now(&self, at: Instant) {
        self.now.store(at.as_nanos(), Ordering::Release);
    }

    /// Move the clock forward. Returns `true` if the timer came due, in
    /// which case the caller should deliver `SIGALRM`.
    pub fn advance(&self, by: Duration) -> bool {
        let now = self.now.fetch_add(by.as_nanos(), Ordering::AcqRel) + by.as_nanos();
        let mut armed = self.armed.lock();
        match *armed {
            Some(at) if at.as_nanos() <= now => {
                *armed = None;
                true
            }
            _ => false,
        }
    }

    /// Absolute time the timer is programmed for.
    pub fn programmed(&self) -> Option<Instant> {
        *self.armed.lock()
    }
}

impl Board for ManualBoard {
    fn now(&self) -> Instant {
        Instant::from_nanos(self.now.load(Ordering::Acquire))
    }

    fn resolution(&self) -> Duration {
        Duration::from_nanos(1)
    }

    fn program_timer(&self, after: Option<Duration>) {
        *self.armed.lock() = after.map(|d| self.now().saturating_add(d));
    }

    fn wait_for_interrupt(&self) -> Option<Signal> {
        let at = self.armed.lock().take();
        match at {
            Some(at) => {
                self.now.fetch_max(at.as_nanos(), Ordering::AcqRel);
                Some(Signal::SIGALRM)
            }
            None => panic!("deadlock: every thread is blocked and no timer is armed"),
        }
    }

    fn shutdown(&self, status: i32) -> ! {
        std::panic::panic_any(Shutdown(status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_jumps_to_the_programmed_expiry() {
        let board = ManualBoard::new();
        board.program_timer(Some(Duration::from_millis(5)));
        assert_eq!(board.programmed(), Some(Instant::from_nanos(5_000_000)));
        assert_eq!(board.wait_for_interrupt(), Some(Signal::SIGALRM));
        assert_eq!(board.now(), Instant::from_nanos(5_000_000));
        assert_eq!(board.programmed(), None);
    }

    #[test]
    fn advance_reports_expiry_once() {
        let board = ManualBoard::new();
        board.program_timer(Some(Duration::from_nanos(10)));
        assert!(!board.advance(Duration::from_nanos(9)));
        assert!(board.advance(Duration::from_nanos(1)));
        assert!(!board.advance(Duration::from_nanos(100)));
    }
}
