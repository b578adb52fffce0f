//! Scheduling control and introspection of running threads.

use super::{SchedPolicy, Slot, ThreadId, ThreadInfo, ThreadState};
use crate::arch::Arch;
use crate::board::Board;
use crate::config::{MAX_PRIORITY, MIN_PRIORITY};
use crate::errors::{Errno, KResult};
use crate::kernel::state::KernelState;
use crate::kernel::Kernel;
use crate::sched::QueueId;
use crate::time::Duration;
#[cfg(feature = "round-robin")]
use crate::time::timer::TimerScope;
#[cfg(feature = "round-robin")]
use crate::time::{TimerMode, TimerSlot};

impl<A: Arch, B: Board> Kernel<A, B> {
    /// Give the processor to the next thread of equal priority, if any.
    pub fn yield_now(&self) {
        let mut k = self.enter();
        if let Some(me) = k.current {
            k.requeue(me);
        }
    }

    pub fn self_id(&self) -> KResult<ThreadId> {
        let k = self.enter();
        let me = k.current_slot()?;
        Ok(k.threads[me].id)
    }

    pub fn equal(&self, a: ThreadId, b: ThreadId) -> bool {
        a == b
    }

    /// Number of threads that have not yet terminated.
    pub fn thread_count(&self) -> usize {
        self.enter().live_threads
    }

    pub fn priority_min(&self, _policy: SchedPolicy) -> u8 {
        MIN_PRIORITY
    }

    pub fn priority_max(&self, _policy: SchedPolicy) -> u8 {
        MAX_PRIORITY
    }

    /// Slice length given to `id` under round-robin scheduling.
    pub fn rr_interval(&self, id: ThreadId) -> KResult<Duration> {
        let k = self.enter();
        k.threads.resolve(id).ok_or(Errno::ESRCH)?;
        Ok(k.config.time_slice)
    }

    /// Change the policy and base priority of `id`.
    ///
    /// The thread moves to the front of its new priority band in whatever
    /// queue holds it. Held ceiling mutexes keep its effective priority up.
    pub fn setschedparam(&self, id: ThreadId, policy: SchedPolicy, priority: u8) -> KResult<()> {
        if policy == SchedPolicy::RoundRobin && !cfg!(feature = "round-robin") {
            return Err(Errno::ENOTSUP);
        }
        let mut k = self.enter();
        let slot = k.threads.resolve(id).ok_or(Errno::ESRCH)?;
        if k.threads[slot].state.contains(ThreadState::RETURNED) {
            return Err(Errno::ESRCH);
        }
        #[cfg(feature = "realtime")]
        if policy == SchedPolicy::RoundRobin && k.threads[slot].realtime != super::Realtime::default() {
            return Err(Errno::EINVAL);
        }
        let t = &mut k.threads[slot];
        let old = t.policy;
        t.policy = policy;
        t.base_prio = priority;
        #[cfg(feature = "round-robin")]
        if old == SchedPolicy::RoundRobin && policy != SchedPolicy::RoundRobin {
            t.slice_left = None;
            k.timer_cancel(self.board_dyn(), slot, TimerScope::One(TimerSlot::Async));
        }
        let effective = k.effective_priority(slot);
        k.set_priority(slot, effective);
        log::debug!("{} now {:?} at priority {} (was {:?})", id, policy, priority, old);
        Ok(())
    }

    /// Policy and base priority of `id`.
    pub fn getschedparam(&self, id: ThreadId) -> KResult<(SchedPolicy, u8)> {
        let k = self.enter();
        let slot = k.threads.resolve(id).ok_or(Errno::ESRCH)?;
        let t = &k.threads[slot];
        Ok((t.policy, t.base_prio))
    }

    /// Stop `id` from being scheduled until [`Kernel::resume`].
    ///
    /// A blocked thread stays on its wait queue; when woken it moves to the
    /// Suspend queue instead of Ready.
    pub fn suspend(&self, id: ThreadId) -> KResult<()> {
        let mut k = self.enter();
        let slot = k.threads.resolve(id).ok_or(Errno::ESRCH)?;
        let t = &mut k.threads[slot];
        if t.state.intersects(ThreadState::RETURNED | ThreadState::EXITING) {
            return Err(Errno::ESRCH);
        }
        if t.state.contains(ThreadState::SUSPENDED) {
            return Ok(());
        }
        t.state.insert(ThreadState::SUSPENDED);
        if t.state.contains(ThreadState::RUNNING) {
            t.state.remove(ThreadState::RUNNING);
            k.dequeue(slot);
            k.enqueue(QueueId::Suspended, slot);
        }
        log::debug!("suspended {}", id);
        Ok(())
    }

    pub fn resume(&self, id: ThreadId) -> KResult<()> {
        let mut k = self.enter();
        let slot = k.threads.resolve(id).ok_or(Errno::ESRCH)?;
        let t = &mut k.threads[slot];
        if !t.state.contains(ThreadState::SUSPENDED) {
            return Ok(());
        }
        t.state.remove(ThreadState::SUSPENDED);
        if t.queue == Some(QueueId::Suspended) {
            t.state.insert(ThreadState::RUNNING);
            k.dequeue(slot);
            k.enqueue(QueueId::Ready, slot);
        }
        log::debug!("resumed {}", id);
        Ok(())
    }

    /// Snapshot of `id` for diagnostics.
    pub fn thread_info(&self, id: ThreadId) -> KResult<ThreadInfo> {
        let k = self.enter();
        let slot = k.threads.resolve(id).ok_or(Errno::ESRCH)?;
        Ok(ThreadInfo::from(&k.threads[slot]))
    }
}

impl KernelState {
    /// Base priority raised to the highest ceiling the thread holds.
    pub(crate) fn effective_priority(&self, slot: Slot) -> u8 {
        let t = &self.threads[slot];
        #[cfg(feature = "prio-ceiling")]
        {
            t.ceilings.iter().copied().fold(t.base_prio, u8::max)
        }
        #[cfg(not(feature = "prio-ceiling"))]
        {
            t.base_prio
        }
    }

    /// Hand the round-robin slice over at a switch from `prev` to `next`:
    /// the outgoing thread keeps what is left of its slice, the incoming
    /// one gets that remainder or a fresh slice.
    #[cfg(feature = "round-robin")]
    pub(crate) fn rotate_slice(&mut self, board: &dyn Board, prev: Option<Slot>, next: Slot) {
        if let Some(p) = prev {
            let running_slice = self.threads.get(p).and_then(|t| {
                let e = &t.timers[TimerSlot::Async as usize];
                (e.is_armed() && e.mode == Some(TimerMode::RoundRobin)).then_some(e.deadline)
            });
            if let Some(deadline) = running_slice {
                self.timer_cancel(board, p, TimerScope::One(TimerSlot::Async));
                let left = deadline.saturating_duration_since(board.now());
                self.threads[p].slice_left = (!left.is_zero()).then_some(left);
            }
        }

        let t = &mut self.threads[next];
        if t.policy != SchedPolicy::RoundRobin || t.state.contains(ThreadState::ASYNC_TIMER) {
            return;
        }
        let slice = t.slice_left.take().unwrap_or(self.config.time_slice);
        let at = board.now().saturating_add(slice);
        if let Err(e) = self.timer_arm(board, next, TimerMode::RoundRobin, at) {
            log::trace!("no slice for {:?}: {}", next, e);
        }
    }
}
