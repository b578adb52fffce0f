//! Signal numbers and signal sets.

use core::fmt;

use crate::errors::{Errno, KResult};

/// One past the highest ordinary signal number; also the number reserved
/// for thread cancellation.
pub const NSIG: u8 = 32;

/// A signal number in `1..=NSIG`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Signal(u8);

impl Signal {
    pub const SIGHUP: Signal = Signal(1);
    pub const SIGINT: Signal = Signal(2);
    pub const SIGQUIT: Signal = Signal(3);
    pub const SIGILL: Signal = Signal(4);
    pub const SIGTRAP: Signal = Signal(5);
    pub const SIGABRT: Signal = Signal(6);
    pub const SIGEMT: Signal = Signal(7);
    pub const SIGFPE: Signal = Signal(8);
    pub const SIGKILL: Signal = Signal(9);
    pub const SIGBUS: Signal = Signal(10);
    pub const SIGSEGV: Signal = Signal(11);
    pub const SIGSYS: Signal = Signal(12);
    pub const SIGPIPE: Signal = Signal(13);
    /// Timer expiry. Raising it makes the kernel service the timeout queue.
    pub const SIGALRM: Signal = Signal(14);
    pub const SIGTERM: Signal = Signal(15);
    pub const SIGURG: Signal = Signal(16);
    pub const SIGSTOP: Signal = Signal(17);
    pub const SIGTSTP: Signal = Signal(18);
    pub const SIGCONT: Signal = Signal(19);
    pub const SIGCHLD: Signal = Signal(20);
    pub const SIGTTIN: Signal = Signal(21);
    pub const SIGTTOU: Signal = Signal(22);
    pub const SIGIO: Signal = Signal(23);
    pub const SIGXCPU: Signal = Signal(24);
    pub const SIGXFSZ: Signal = Signal(25);
    pub const SIGVTALRM: Signal = Signal(26);
    pub const SIGPROF: Signal = Signal(27);
    pub const SIGWINCH: Signal = Signal(28);
    pub const SIGLOST: Signal = Signal(29);
    pub const SIGUSR1: Signal = Signal(30);
    pub const SIGUSR2: Signal = Signal(31);
    /// Thread cancellation request.
    pub const SIGCANCEL: Signal = Signal(NSIG);

    /// Validate a raw signal number.
    pub const fn new(raw: u8) -> KResult<Self> {
        if raw == 0 || raw > NSIG {
            return Err(Errno::EINVAL);
        }
        Ok(Signal(raw))
    }

    pub const fn raw(self) -> u8 {
        self.0
    }

    pub(crate) const fn index(self) -> usize {
        self.0 as usize
    }

    const fn bit(self) -> u64 {
        1 << self.0
    }

    /// Signals the kernel raises on behalf of a faulting thread.
    pub fn is_synchronous(self) -> bool {
        SigSet::synchronous().contains(self)
    }

    /// Whether the default action for this signal is to do nothing.
    pub fn default_is_ignore(self) -> bool {
        matches!(
            self,
            Signal::SIGURG | Signal::SIGCONT | Signal::SIGCHLD | Signal::SIGIO | Signal::SIGWINCH
        )
    }
}

impl fmt::Debug for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Signal::SIGALRM => f.write_str("SIGALRM"),
            Signal::SIGCANCEL => f.write_str("SIGCANCEL"),
            Signal::SIGKILL => f.write_str("SIGKILL"),
            Signal::SIGSTOP => f.write_str("SIGSTOP"),
            Signal::SIGUSR1 => f.write_str("SIGUSR1"),
            Signal::SIGUSR2 => f.write_str("SIGUSR2"),
            Signal(n) => write!(f, "SIG#{}", n),
        }
    }
}

/// A set of signals stored as a bitfield indexed by signal number.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SigSet(u64);

impl SigSet {
    const VALID: u64 = ((1u64 << (NSIG as u64 + 1)) - 1) & !1;

    pub const fn empty() -> Self {
        SigSet(0)
    }

    /// Every signal number, cancellation included.
    pub const fn full() -> Self {
        SigSet(Self::VALID)
    }

    /// Signals no mask may ever contain through the ordinary mask calls.
    pub const fn cantmask() -> Self {
        SigSet(Signal::SIGKILL.bit() | Signal::SIGSTOP.bit() | Signal::SIGCANCEL.bit())
    }

    /// Every signal a thread can block; the mask of a cancelled thread.
    pub const fn all_signals() -> Self {
        SigSet(Self::VALID & !(Signal::SIGKILL.bit() | Signal::SIGSTOP.bit()))
    }

    /// Fault signals routed to whichever thread was running.
    pub const fn synchronous() -> Self {
        SigSet(
            Signal::SIGILL.bit()
                | Signal::SIGABRT.bit()
                | Signal::SIGEMT.bit()
                | Signal::SIGFPE.bit()
                | Signal::SIGBUS.bit()
                | Signal::SIGSEGV.bit(),
        )
    }

    pub const fn from_bits(bits: u64) -> Self {
        SigSet(bits & Self::VALID)
    }

    pub const fn bits(self) -> u64 {
        self.0
    }

    pub fn of(signals: &[Signal]) -> Self {
        signals.iter().fold(SigSet::empty(), |set, &s| set.with(s))
    }

    pub const fn contains(self, sig: Signal) -> bool {
        self.0 & sig.bit() != 0
    }

    pub fn add(&mut self, sig: Signal) {
        self.0 |= sig.bit();
    }

    pub fn remove(&mut self, sig: Signal) {
        self.0 &= !sig.bit();
    }

    #[must_use]
    pub const fn with(self, sig: Signal) -> Self {
        SigSet(self.0 | sig.bit())
    }

    #[must_use]
    pub const fn without(self, sig: Signal) -> Self {
        SigSet(self.0 & !sig.bit())
    }

    #[must_use]
    pub const fn union(self, other: SigSet) -> Self {
        SigSet(self.0 | other.0)
    }

    #[must_use]
    pub const fn intersection(self, other: SigSet) -> Self {
        SigSet(self.0 & other.0)
    }

    /// Members of `self` that are not in `other`.
    #[must_use]
    pub const fn difference(self, other: SigSet) -> Self {
        SigSet(self.0 & !other.0)
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn intersects(self, other: SigSet) -> bool {
        self.0 & other.0 != 0
    }

    /// Lowest-numbered member.
    pub fn first(self) -> Option<Signal> {
        if self.0 == 0 {
            None
        } else {
            Some(Signal(self.0.trailing_zeros() as u8))
        }
    }

    /// Members in ascending signal order.
    pub fn iter(self) -> impl Iterator<Item = Signal> {
        let mut rest = self;
        core::iter::from_fn(move || {
            let sig = rest.first()?;
            rest.remove(sig);
            Some(sig)
        })
    }
}

impl FromIterator<Signal> for SigSet {
    fn from_iter<I: IntoIterator<Item = Signal>>(iter: I) -> Self {
        iter.into_iter().fold(SigSet::empty(), |set, s| set.with(s))
    }
}

impl fmt::Debug for SigSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// How `sigprocmask` combines the supplied set with the current mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaskHow {
    Block,
    Unblock,
    SetMask,
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;

    #[test]
    fn signal_numbers_are_range_checked() {
        assert_eq!(Signal::new(0), Err(Errno::EINVAL));
        assert_eq!(Signal::new(33), Err(Errno::EINVAL));
        assert_eq!(Signal::new(32), Ok(Signal::SIGCANCEL));
    }

    #[test]
    fn named_sets() {
        assert!(SigSet::cantmask().contains(Signal::SIGCANCEL));
        assert!(SigSet::all_signals().contains(Signal::SIGCANCEL));
        assert!(!SigSet::all_signals().contains(Signal::SIGKILL));
        assert!(!SigSet::all_signals().contains(Signal::SIGSTOP));
        assert!(Signal::SIGSEGV.is_synchronous());
        assert!(!Signal::SIGUSR1.is_synchronous());
        assert!(!SigSet::full().contains(Signal(0)));
    }

    #[test]
    fn set_algebra() {
        let a = SigSet::of(&[Signal::SIGUSR1, Signal::SIGHUP]);
        let b = SigSet::of(&[Signal::SIGUSR1, Signal::SIGTERM]);
        assert_eq!(a.intersection(b), SigSet::of(&[Signal::SIGUSR1]));
        assert_eq!(a.difference(b), SigSet::of(&[Signal::SIGHUP]));
        assert_eq!(a.union(b).iter().count(), 3);
        assert_eq!(a.first(), Some(Signal::SIGHUP));
        let order: Vec<_> = a.union(b).iter().collect();
        assert_eq!(order, [Signal::SIGHUP, Signal::SIGTERM, Signal::SIGUSR1]);
    }
}
