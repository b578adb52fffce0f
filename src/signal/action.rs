use alloc::sync::Arc;
use core::fmt;

use super::set::{SigSet, Signal};

/// User signal handler. Runs on the receiving thread, outside the kernel.
pub type Handler = Arc<dyn Fn(Signal) + Send + Sync>;

/// What happens when a signal is delivered.
#[derive(Clone, Default)]
pub enum Disposition {
    /// The per-signal default action.
    #[default]
    Default,
    Ignore,
    Handler(Handler),
}

impl Disposition {
    pub fn handler<F>(f: F) -> Self
    where
        F: Fn(Signal) + Send + Sync + 'static,
    {
        Disposition::Handler(Arc::new(f))
    }
}

impl fmt::Debug for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Disposition::Default => f.write_str("Default"),
            Disposition::Ignore => f.write_str("Ignore"),
            Disposition::Handler(_) => f.write_str("Handler(..)"),
        }
    }
}

/// `struct sigaction`: the disposition plus the signals blocked while the
/// handler runs.
#[derive(Clone, Debug, Default)]
pub struct SigAction {
    pub disposition: Disposition,
    pub mask: SigSet,
}

impl SigAction {
    pub fn new(disposition: Disposition) -> Self {
        Self {
            disposition,
            mask: SigSet::empty(),
        }
    }

    #[must_use]
    pub fn with_mask(mut self, mask: SigSet) -> Self {
        self.mask = mask;
        self
    }
}

/// Where a signal came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SigCode {
    /// Raised by `kill`/`raise` at process scope.
    #[default]
    User,
    /// Sent to one thread with `pthread_kill` or `cancel`.
    Directed,
    /// Raised by the board (interrupt, fault, timer).
    Interrupt,
}

/// Delivery record, as returned by `sigwaitinfo`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SigInfo {
    pub signo: Signal,
    pub code: SigCode,
}
