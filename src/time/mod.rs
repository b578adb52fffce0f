//! Time values, the timeout queue and the sleep family.
//!
//! Internally every deadline is an [`Instant`] on the board's monotonic
//! clock. [`Timespec`] only exists at the API boundary where POSIX callers
//! hand in `{sec, nsec}` pairs.

pub(crate) mod sleep;
pub(crate) mod timer;

pub use timer::{TimerMode, TimerSlot};

use crate::errors::{Errno, KResult};

/// Nanoseconds in one second.
pub const NANOS_PER_SEC: u64 = 1_000_000_000;

/// Nanoseconds since the board clock started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Instant(u64);

impl Instant {
    /// Create a new instant from nanoseconds since boot.
    pub const fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    pub const fn as_nanos(self) -> u64 {
        self.0
    }

    /// Time elapsed from `earlier` to `self`, or zero if `earlier` is later.
    pub fn saturating_duration_since(self, earlier: Instant) -> Duration {
        Duration(self.0.saturating_sub(earlier.0))
    }

    pub fn checked_add(self, d: Duration) -> Option<Instant> {
        self.0.checked_add(d.0).map(Instant)
    }

    pub fn saturating_add(self, d: Duration) -> Instant {
        Instant(self.0.saturating_add(d.0))
    }
}

impl core::ops::Add<Duration> for Instant {
    type Output = Self;

    fn add(self, duration: Duration) -> Self {
        self.saturating_add(duration)
    }
}

/// A span of time with nanosecond resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Duration(u64);

impl Duration {
    pub const ZERO: Duration = Duration(0);

    pub const fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    pub const fn from_micros(micros: u64) -> Self {
        Self(micros * 1_000)
    }

    pub const fn from_millis(millis: u64) -> Self {
        Self(millis * 1_000_000)
    }

    pub const fn from_secs(secs: u64) -> Self {
        Self(secs * NANOS_PER_SEC)
    }

    pub const fn as_nanos(self) -> u64 {
        self.0
    }

    pub const fn as_millis(self) -> u64 {
        self.0 / 1_000_000
    }

    /// Whole seconds, rounded up.
    pub const fn as_secs_ceil(self) -> u64 {
        self.0.div_ceil(NANOS_PER_SEC)
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn saturating_sub(self, other: Duration) -> Duration {
        Duration(self.0.saturating_sub(other.0))
    }
}

/// POSIX `struct timespec`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Timespec {
    pub sec: i64,
    pub nsec: i64,
}

impl Timespec {
    pub const fn new(sec: i64, nsec: i64) -> Self {
        Self { sec, nsec }
    }

    /// Reject a nanosecond field outside `0..1e9`.
    pub fn validate(&self) -> KResult<()> {
        if self.nsec < 0 || self.nsec as u64 >= NANOS_PER_SEC {
            return Err(Errno::EINVAL);
        }
        Ok(())
    }

    /// Convert a validated timespec to a duration; negative values clamp to zero.
    pub fn to_duration(&self) -> Duration {
        if self.sec < 0 {
            return Duration::ZERO;
        }
        let secs = (self.sec as u64).saturating_mul(NANOS_PER_SEC);
        Duration(secs.saturating_add(self.nsec.max(0) as u64))
    }

    pub fn from_duration(d: Duration) -> Self {
        Self {
            sec: (d.0 / NANOS_PER_SEC) as i64,
            nsec: (d.0 % NANOS_PER_SEC) as i64,
        }
    }
}

impl From<Duration> for Timespec {
    fn from(d: Duration) -> Self {
        Self::from_duration(d)
    }
}

/// Clocks understood by `clock_gettime` and friends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockId {
    /// Wall clock; settable.
    Realtime,
    /// Time since boot; never jumps.
    Monotonic,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timespec_rejects_bad_nanos() {
        assert_eq!(Timespec::new(1, 1_000_000_000).validate(), Err(Errno::EINVAL));
        assert_eq!(Timespec::new(1, -1).validate(), Err(Errno::EINVAL));
        assert_eq!(Timespec::new(0, 999_999_999).validate(), Ok(()));
    }

    #[test]
    fn timespec_duration_conversion() {
        let ts = Timespec::new(2, 500);
        assert_eq!(ts.to_duration().as_nanos(), 2 * NANOS_PER_SEC + 500);
        assert_eq!(Timespec::from(ts.to_duration()), ts);
        assert_eq!(Timespec::new(-3, 0).to_duration(), Duration::ZERO);
    }

    #[test]
    fn seconds_round_up() {
        assert_eq!(Duration::from_millis(1).as_secs_ceil(), 1);
        assert_eq!(Duration::from_secs(3).as_secs_ceil(), 3);
        assert_eq!(Duration::ZERO.as_secs_ceil(), 0);
    }
}
