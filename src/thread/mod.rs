//! Thread records and the thread table.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::fmt;
use core::ops::{Index, IndexMut};

use bitflags::bitflags;

use crate::errors::KResult;
use crate::mem::arena::Arena;
use crate::mem::{RawHandle, Stack};
use crate::sched::queue::{Link, PrioQueue};
use crate::sched::QueueId;
use crate::signal::{SigCode, SigInfo, SigSet, NSIG};
use crate::sync::CondId;
use crate::time::timer::{TimerEntry, TimerRef};

pub mod attr;
pub(crate) mod control;
pub(crate) mod lifecycle;
pub(crate) mod specific;

pub use attr::{DetachState, InheritSched, Scope, ThreadAttr};
#[cfg(feature = "realtime")]
pub use attr::Realtime;
pub use specific::Key;

/// Handle to a thread.
///
/// Handles carry a generation: once a thread's storage is reclaimed every
/// copy of its handle stops resolving and operations report `ESRCH`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(pub(crate) RawHandle);

impl fmt::Debug for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ThreadId({}.{})", self.0.index(), self.0.generation())
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.0.index(), self.0.generation())
    }
}

/// Position of a live thread in the table. Only valid while the kernel
/// flag is held and the thread has not been reaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct Slot(pub(crate) u32);

impl Slot {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

bitflags! {
    /// Run-state flags of a thread.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ThreadState: u32 {
        /// Eligible to run: the thread sits on the Ready queue.
        const RUNNING = 1 << 0;
        const BLOCKED = 1 << 1;
        const SUSPENDED = 1 << 2;
        /// Blocked in `sigwait` and friends.
        const SIGWAIT = 1 << 3;
        const SIGSUSPEND = 1 << 4;
        /// Deferred cancellation: act on cancel only at interruption points.
        const CONTROLLED = 1 << 5;
        const DETACHED = 1 << 6;
        const RETURNED = 1 << 7;
        const EXITING = 1 << 8;
        const INTR_POINT = 1 << 9;
        const MAIN = 1 << 10;
        /// A sleep or timed wait is armed.
        const SYNC_TIMER = 1 << 11;
        /// A round-robin slice or real-time deadline is armed.
        const ASYNC_TIMER = 1 << 12;
        /// The synchronous timer belongs to a condition-variable wait.
        const COND_TIMER = 1 << 13;
    }
}

/// Scheduling policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedPolicy {
    #[default]
    Fifo,
    /// Time-sliced among equals; needs the `round-robin` feature.
    RoundRobin,
}

/// How a thread ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// Returned from its entry function or called `exit`.
    Value(usize),
    /// Acted on a cancellation request (`PTHREAD_CANCELED`).
    Canceled,
    /// A periodic job overran its deadline.
    DeadlineMissed,
}

pub(crate) enum Entry {
    Once(Box<dyn FnOnce() -> usize + Send>),
    #[cfg(feature = "realtime")]
    Periodic(Box<dyn FnMut() -> core::ops::ControlFlow<usize> + Send>),
}

/// The thread record.
pub(crate) struct Tcb {
    pub(crate) id: ThreadId,
    pub(crate) name: Option<&'static str>,
    pub(crate) state: ThreadState,
    pub(crate) policy: SchedPolicy,
    /// Priority set by the application.
    pub(crate) base_prio: u8,
    /// Priority the queues order by; raised by held ceiling mutexes.
    pub(crate) prio: u8,
    #[cfg(feature = "prio-ceiling")]
    pub(crate) ceilings: Vec<u8>,

    pub(crate) queue: Option<QueueId>,
    pub(crate) primary: Link<Slot>,
    pub(crate) all: Link<Slot>,
    pub(crate) timers: [TimerEntry; 2],

    pub(crate) mask: SigSet,
    pub(crate) pending: SigSet,
    pub(crate) pending_codes: [SigCode; NSIG as usize + 1],
    pub(crate) sigwaitset: SigSet,
    /// Signal that satisfied the last signal wait.
    pub(crate) delivered: Option<SigInfo>,
    /// Handlers to run on the next pass through the trampoline.
    pub(crate) inject: SigSet,
    /// Set when the thread must terminate on the next pass through the trampoline.
    pub(crate) exit_request: Option<ExitStatus>,
    /// Outcome of the last blocking wait, written by whoever woke the thread.
    pub(crate) wait_status: KResult<()>,

    pub(crate) cond: Option<CondId>,
    pub(crate) joinq: PrioQueue,
    pub(crate) result: Option<ExitStatus>,
    pub(crate) join_result: Option<ExitStatus>,
    pub(crate) cleanup: Vec<Box<dyn FnOnce() + Send>>,
    pub(crate) specific: Vec<usize>,

    pub(crate) entry: Option<Entry>,
    pub(crate) stack: Option<Stack>,
    #[cfg(feature = "realtime")]
    pub(crate) realtime: attr::Realtime,
    #[cfg(feature = "round-robin")]
    pub(crate) slice_left: Option<crate::time::Duration>,
}

impl Tcb {
    pub(crate) fn new(policy: SchedPolicy, prio: u8, mask: SigSet) -> Self {
        Self {
            id: ThreadId(RawHandle::default()),
            name: None,
            state: ThreadState::CONTROLLED,
            policy,
            base_prio: prio,
            prio,
            #[cfg(feature = "prio-ceiling")]
            ceilings: Vec::new(),
            queue: None,
            primary: Link::new(),
            all: Link::new(),
            timers: [TimerEntry::new(), TimerEntry::new()],
            mask,
            pending: SigSet::empty(),
            pending_codes: [SigCode::User; NSIG as usize + 1],
            sigwaitset: SigSet::empty(),
            delivered: None,
            inject: SigSet::empty(),
            exit_request: None,
            wait_status: Ok(()),
            cond: None,
            joinq: PrioQueue::new(),
            result: None,
            join_result: None,
            cleanup: Vec::new(),
            specific: Vec::new(),
            entry: None,
            stack: None,
            #[cfg(feature = "realtime")]
            realtime: attr::Realtime::default(),
            #[cfg(feature = "round-robin")]
            slice_left: None,
        }
    }

    /// Whether a cancellation request may be acted on right now.
    pub(crate) fn cancel_actionable(&self) -> bool {
        !self.state.contains(ThreadState::CONTROLLED) || self.state.contains(ThreadState::INTR_POINT)
    }

    /// Whether the thread ran past the bottom of its stack.
    pub(crate) fn stack_overflowed(&self) -> bool {
        self.stack.as_ref().is_some_and(|s| !s.canary_intact())
    }
}

/// Point-in-time view of a thread, for diagnostics and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadInfo {
    pub id: ThreadId,
    pub name: Option<&'static str>,
    pub state: ThreadState,
    pub policy: SchedPolicy,
    pub priority: u8,
    pub base_priority: u8,
    pub mask: SigSet,
    pub pending: SigSet,
    pub result: Option<ExitStatus>,
}

impl From<&Tcb> for ThreadInfo {
    fn from(t: &Tcb) -> Self {
        Self {
            id: t.id,
            name: t.name,
            state: t.state,
            policy: t.policy,
            priority: t.prio,
            base_priority: t.base_prio,
            mask: t.mask,
            pending: t.pending,
            result: t.result,
        }
    }
}

/// All live thread records, indexed by [`Slot`].
pub(crate) struct ThreadTable {
    arena: Arena<Tcb>,
}

impl ThreadTable {
    pub(crate) const fn new() -> Self {
        Self { arena: Arena::new() }
    }

    pub(crate) fn insert(&mut self, tcb: Tcb) -> KResult<Slot> {
        let handle = self.arena.insert(tcb)?;
        let slot = Slot(handle.index());
        self[slot].id = ThreadId(handle);
        Ok(slot)
    }

    pub(crate) fn remove(&mut self, slot: Slot) -> Option<Tcb> {
        let handle = self.arena.handle_at(slot.0)?;
        self.arena.remove(handle)
    }

    /// Map a handle to its slot, or `None` if the thread was reaped.
    pub(crate) fn resolve(&self, id: ThreadId) -> Option<Slot> {
        self.arena.get(id.0).map(|_| Slot(id.0.index()))
    }

    pub(crate) fn get(&self, slot: Slot) -> Option<&Tcb> {
        self.arena.at(slot.0)
    }

    pub(crate) fn get_mut(&mut self, slot: Slot) -> Option<&mut Tcb> {
        self.arena.at_mut(slot.0)
    }

    pub(crate) fn timer(&self, r: TimerRef) -> &TimerEntry {
        &self[r.slot].timers[r.which as usize]
    }

    pub(crate) fn timer_mut(&mut self, r: TimerRef) -> &mut TimerEntry {
        &mut self[r.slot].timers[r.which as usize]
    }
}

impl Index<Slot> for ThreadTable {
    type Output = Tcb;

    fn index(&self, slot: Slot) -> &Tcb {
        match self.arena.at(slot.0) {
            Some(tcb) => tcb,
            None => panic!("no live thread in {:?}", slot),
        }
    }
}

impl IndexMut<Slot> for ThreadTable {
    fn index_mut(&mut self, slot: Slot) -> &mut Tcb {
        match self.arena.at_mut(slot.0) {
            Some(tcb) => tcb,
            None => panic!("no live thread in {:?}", slot),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clobbered_canary_reads_as_overflow() {
        let mut tcb = Tcb::new(SchedPolicy::Fifo, 1, SigSet::empty());
        assert!(!tcb.stack_overflowed());

        let stack = Stack::allocate(4096).unwrap();
        // SAFETY: the lowest word belongs to the allocation.
        unsafe { (stack.limit() as *mut u64).write(0) };
        tcb.stack = Some(stack);
        assert!(tcb.stack_overflowed());
    }
}
