//! Condition variables.

use super::{CondId, MutexId};
use crate::arch::Arch;
use crate::board::Board;
use crate::errors::{Errno, KResult};
use crate::kernel::state::KernelState;
use crate::kernel::Kernel;
use crate::sched::queue::PrioQueue;
use crate::sched::QueueId;
use crate::thread::{Slot, ThreadState};
use crate::time::timer::TimerScope;
use crate::time::{Instant, Timespec, TimerMode, TimerSlot};

/// Attributes for [`Kernel::cond_init`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CondAttr {
    process_shared: bool,
}

impl CondAttr {
    pub const fn new() -> Self {
        Self {
            process_shared: false,
        }
    }

    pub fn process_shared(mut self, shared: bool) -> Self {
        self.process_shared = shared;
        self
    }

    pub fn get_process_shared(&self) -> bool {
        self.process_shared
    }
}

pub(crate) struct CondRecord {
    pub(crate) queue: PrioQueue,
    /// Mutex every current waiter released; cleared with the last waiter.
    pub(crate) mutex: Option<MutexId>,
    pub(crate) waiters: usize,
}

impl CondRecord {
    pub(crate) const fn new() -> Self {
        Self {
            queue: PrioQueue::new(),
            mutex: None,
            waiters: 0,
        }
    }
}

impl<A: Arch, B: Board> Kernel<A, B> {
    pub fn cond_init(&self, attr: &CondAttr) -> KResult<CondId> {
        if attr.process_shared {
            return Err(Errno::ENOSYS);
        }
        let mut k = self.enter();
        let handle = k.conds.insert(CondRecord::new())?;
        Ok(CondId(handle))
    }

    /// Fails with `EBUSY` while threads wait on it.
    pub fn cond_destroy(&self, id: CondId) -> KResult<()> {
        let mut k = self.enter();
        let rec = k.conds.get(id.0).ok_or(Errno::EINVAL)?;
        if rec.waiters > 0 {
            return Err(Errno::EBUSY);
        }
        k.conds.remove(id.0);
        Ok(())
    }

    /// Release `mutex`, wait for a signal on `cond`, and lock `mutex`
    /// again before returning. May return early without a signal; callers
    /// recheck their predicate.
    pub fn cond_wait(&self, cond: CondId, mutex: MutexId) -> KResult<()> {
        self.cond_block(cond, mutex, None)
    }

    /// Like [`Kernel::cond_wait`] with an absolute wall-clock deadline.
    /// Reports `EAGAIN` once it passes; the mutex is held again either way.
    pub fn cond_timed_wait(&self, cond: CondId, mutex: MutexId, abstime: &Timespec) -> KResult<()> {
        abstime.validate()?;
        let at = self.wall_to_instant(abstime);
        self.cond_block(cond, mutex, Some(at))
    }

    fn cond_block(&self, cond: CondId, mutex: MutexId, until: Option<Instant>) -> KResult<()> {
        let mut k = self.enter();
        let me = k.current_slot()?;
        let rec = k.conds.get(cond.0).ok_or(Errno::EINVAL)?;
        if rec.mutex.is_some_and(|m| m != mutex) {
            return Err(Errno::EINVAL);
        }
        let m = k.mutexes.get(mutex.0).ok_or(Errno::EINVAL)?;
        if m.owner != Some(me) {
            return Err(Errno::EPERM);
        }
        let depth = m.count;
        if k.interruption_point(self.board_dyn(), me) {
            return Ok(());
        }
        if let Some(at) = until {
            k.timer_arm(self.board_dyn(), me, TimerMode::Absolute, at)?;
            k.threads[me].state.insert(ThreadState::COND_TIMER);
        }

        k.release_mutex(mutex, me);
        if let Some(rec) = k.conds.get_mut(cond.0) {
            rec.mutex = Some(mutex);
            rec.waiters += 1;
        }
        k.block_current(Some(QueueId::Cond(cond)))?;
        let t = &mut k.threads[me];
        t.cond = Some(cond);
        t.state.insert(ThreadState::INTR_POINT);
        drop(k);

        let mut k = self.enter();
        let status = k.threads[me].wait_status;
        k.cond_leave(self.board_dyn(), me);
        drop(k);

        self.mutex_lock(mutex)?;
        if depth > 0 {
            let mut k = self.enter();
            if let Some(m) = k.mutexes.get_mut(mutex.0) {
                m.count = depth;
            }
        }
        match status {
            Err(Errno::EAGAIN) => Err(Errno::EAGAIN),
            _ => Ok(()),
        }
    }

    /// Wake the highest-priority waiter.
    pub fn cond_signal(&self, id: CondId) -> KResult<()> {
        let mut k = self.enter();
        k.conds.get(id.0).ok_or(Errno::EINVAL)?;
        k.cond_wake_one(self.board_dyn(), id);
        Ok(())
    }

    pub fn cond_broadcast(&self, id: CondId) -> KResult<()> {
        let mut k = self.enter();
        k.conds.get(id.0).ok_or(Errno::EINVAL)?;
        while k.cond_wake_one(self.board_dyn(), id) {}
        Ok(())
    }
}

impl KernelState {
    fn cond_wake_one(&mut self, board: &dyn Board, id: CondId) -> bool {
        let Some(slot) = self.dequeue_head(QueueId::Cond(id)) else {
            return false;
        };
        if self.threads[slot].state.contains(ThreadState::COND_TIMER) {
            self.timer_cancel(board, slot, TimerScope::One(TimerSlot::Sync));
        }
        self.threads[slot].wait_status = Ok(());
        self.wake(slot);
        true
    }

    /// Take `slot` out of its condition-variable wait, if it is in one.
    pub(crate) fn cond_leave(&mut self, board: &dyn Board, slot: Slot) {
        let Some(id) = self.threads[slot].cond.take() else {
            return;
        };
        if self.threads[slot].state.contains(ThreadState::COND_TIMER) {
            self.timer_cancel(board, slot, TimerScope::One(TimerSlot::Sync));
        }
        if self.threads[slot].queue == Some(QueueId::Cond(id)) {
            self.dequeue(slot);
        }
        if let Some(rec) = self.conds.get_mut(id.0) {
            rec.waiters = rec.waiters.saturating_sub(1);
            if rec.waiters == 0 {
                rec.mutex = None;
            }
        }
    }
}
