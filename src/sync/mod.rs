//! Mutexes and condition variables.
//!
//! Both live in arenas inside the kernel state and are named by
//! generation-checked handles, so a destroyed object reports `EINVAL`
//! instead of being reused behind a stale handle.

pub(crate) mod cond;
pub(crate) mod mutex;

use crate::mem::RawHandle;

pub use cond::CondAttr;
pub use mutex::{MutexAttr, MutexKind, MutexProtocol};

/// Handle to a mutex made by [`crate::Kernel::mutex_init`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MutexId(pub(crate) RawHandle);

/// Handle to a condition variable made by [`crate::Kernel::cond_init`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CondId(pub(crate) RawHandle);
