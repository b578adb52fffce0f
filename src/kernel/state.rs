//! Shared scheduler state guarded by the kernel flag.

use alloc::vec::Vec;

use crate::config::KernelConfig;
use crate::errors::{Errno, KResult};
use crate::mem::arena::Arena;
use crate::sched::queue::{AllQueue, PrioQueue, TimerQueue};
use crate::signal::{SigAction, SigCode, SigSet, NSIG};
use crate::sync::cond::CondRecord;
use crate::sync::mutex::MutexRecord;
use crate::thread::specific::KeySlot;
use crate::thread::{Slot, ThreadTable};

/// Everything the kernel flag protects.
///
/// All of the scheduling, signal, timer and mutex logic is written as
/// methods on this type, spread over the modules that own each concern.
/// None of it touches a saved context; switching is left to
/// [`crate::Kernel`], which drives these methods from inside its critical
/// section.
pub(crate) struct KernelState {
    pub(crate) config: KernelConfig,
    pub(crate) threads: ThreadTable,
    pub(crate) ready: PrioQueue,
    pub(crate) suspended: PrioQueue,
    pub(crate) all: AllQueue,
    pub(crate) timeouts: TimerQueue,
    pub(crate) mutexes: Arena<MutexRecord>,
    pub(crate) conds: Arena<CondRecord>,
    /// The thread whose context is loaded.
    pub(crate) current: Option<Slot>,
    /// Set whenever the head of Ready may have changed.
    pub(crate) state_change: bool,
    /// Mask the main thread starts with.
    pub(crate) proc_mask: SigSet,
    /// Signals pending at process scope.
    pub(crate) pending: SigSet,
    pub(crate) pending_codes: [SigCode; NSIG as usize + 1],
    pub(crate) actions: [SigAction; NSIG as usize + 1],
    pub(crate) keys: Vec<KeySlot>,
    /// Returned, detached threads whose storage is freed once another
    /// thread runs.
    pub(crate) zombies: Vec<Slot>,
    pub(crate) live_threads: usize,
    /// Wall-clock time minus board time, in nanoseconds.
    pub(crate) wall_offset: i64,
    /// Exit status requested by the last thread ending or a fatal default action.
    pub(crate) shutdown: Option<i32>,
}

impl KernelState {
    pub(crate) fn new(config: KernelConfig) -> Self {
        Self {
            config,
            threads: ThreadTable::new(),
            ready: PrioQueue::new(),
            suspended: PrioQueue::new(),
            all: AllQueue::new(),
            timeouts: TimerQueue::new(),
            mutexes: Arena::new(),
            conds: Arena::new(),
            current: None,
            state_change: false,
            proc_mask: SigSet::empty(),
            pending: SigSet::empty(),
            pending_codes: [SigCode::User; NSIG as usize + 1],
            actions: core::array::from_fn(|_| SigAction::default()),
            keys: Vec::new(),
            zombies: Vec::new(),
            live_threads: 0,
            wall_offset: 0,
            shutdown: None,
        }
    }

    /// The calling thread, or `EINVAL` before [`crate::Kernel::init`].
    pub(crate) fn current_slot(&self) -> KResult<Slot> {
        self.current.ok_or(Errno::EINVAL)
    }
}
