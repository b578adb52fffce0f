//! Error codes returned by every kernel operation.
//!
//! The kernel reports failures the POSIX way: each operation returns a
//! [`KResult`] whose error side is an [`Errno`]. Nothing inside the kernel
//! unwinds on bad input; the only process-ending condition is the last
//! thread terminating, which goes through [`crate::board::Board::shutdown`].

use core::fmt;

/// Result type for kernel operations.
pub type KResult<T> = Result<T, Errno>;

/// POSIX error numbers used by the threading kernel.
///
/// The discriminants are the newlib values, so [`Errno::as_raw`] can be
/// handed straight to C callers through `errno`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum Errno {
    /// Operation not permitted (unlock by a thread that does not own the mutex).
    EPERM = 1,
    /// No such thread, or the handle refers to a reaped thread.
    ESRCH = 3,
    /// A blocking call was interrupted by a handled signal.
    EINTR = 4,
    /// Resource exhausted, or a timed wait expired.
    EAGAIN = 11,
    /// Out of memory.
    ENOMEM = 12,
    /// Resource busy.
    EBUSY = 16,
    /// Invalid argument, invalid object, or object not active.
    EINVAL = 22,
    /// The operation would deadlock the caller.
    EDEADLK = 45,
    /// Function not implemented in this build.
    ENOSYS = 88,
    /// Requested option is not supported.
    ENOTSUP = 134,
}

impl Errno {
    /// Numeric value as seen by C code.
    pub const fn as_raw(self) -> i32 {
        self as i32
    }

    /// Map a raw errno back to the enum.
    pub const fn from_raw(raw: i32) -> Option<Self> {
        Some(match raw {
            1 => Self::EPERM,
            3 => Self::ESRCH,
            4 => Self::EINTR,
            11 => Self::EAGAIN,
            12 => Self::ENOMEM,
            16 => Self::EBUSY,
            22 => Self::EINVAL,
            45 => Self::EDEADLK,
            88 => Self::ENOSYS,
            134 => Self::ENOTSUP,
            _ => return None,
        })
    }

    /// Short description, as `strerror` would print it.
    pub const fn description(self) -> &'static str {
        match self {
            Self::EPERM => "operation not permitted",
            Self::ESRCH => "no such thread",
            Self::EINTR => "interrupted by a signal",
            Self::EAGAIN => "resource temporarily unavailable",
            Self::ENOMEM => "out of memory",
            Self::EBUSY => "resource busy",
            Self::EINVAL => "invalid argument",
            Self::EDEADLK => "resource deadlock avoided",
            Self::ENOSYS => "function not implemented",
            Self::ENOTSUP => "not supported",
        }
    }
}

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} ({}): {}", self, self.as_raw(), self.description())
    }
}

impl From<alloc::collections::TryReserveError> for Errno {
    fn from(_: alloc::collections::TryReserveError) -> Self {
        Errno::EAGAIN
    }
}
