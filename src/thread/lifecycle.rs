//! Thread creation, termination, join and detach.

use alloc::boxed::Box;
#[cfg(feature = "realtime")]
use core::ops::ControlFlow;

use super::{DetachState, Entry, ExitStatus, InheritSched, Slot, Tcb, ThreadAttr, ThreadId, ThreadState};
use crate::arch::Arch;
use crate::board::Board;
use crate::errors::{Errno, KResult};
use crate::kernel::state::KernelState;
use crate::kernel::Kernel;
use crate::mem::Stack;
use crate::sched::QueueId;
use crate::signal::SigSet;
use crate::time::timer::TimerScope;
#[cfg(feature = "realtime")]
use crate::time::{timer::TimerMode, Instant, TimerSlot};

impl<A: Arch, B: Board> Kernel<A, B> {
    /// Start a thread running `f`.
    ///
    /// The new thread inherits the caller's signal mask, and its policy and
    /// priority too unless `attr` asks for explicit scheduling. It goes on
    /// Ready behind its equals; if it outranks the caller it runs before
    /// this call returns.
    ///
    /// Errors: `EINVAL` for bad attributes, `EAGAIN` when out of stack
    /// memory or over the thread limit.
    pub fn create<F>(&'static self, attr: &ThreadAttr, f: F) -> KResult<ThreadId>
    where
        F: FnOnce() -> usize + Send + 'static,
    {
        #[cfg(feature = "realtime")]
        if attr.get_realtime().period.is_some() {
            return Err(Errno::EINVAL);
        }
        self.spawn(attr, Entry::Once(Box::new(f)))
    }

    /// Start a periodic real-time thread.
    ///
    /// `job` runs once per period from the start time on. Each run must
    /// finish before the next release or the thread ends with
    /// [`ExitStatus::DeadlineMissed`]. Returning `Break(v)` ends the thread
    /// with `v`.
    #[cfg(feature = "realtime")]
    pub fn create_periodic<F>(&'static self, attr: &ThreadAttr, job: F) -> KResult<ThreadId>
    where
        F: FnMut() -> ControlFlow<usize> + Send + 'static,
    {
        if attr.get_realtime().period.is_none() {
            return Err(Errno::EINVAL);
        }
        self.spawn(attr, Entry::Periodic(Box::new(job)))
    }

    fn spawn(&'static self, attr: &ThreadAttr, entry: Entry) -> KResult<ThreadId> {
        let stack_size = attr.validate(self.config())?;
        let stack = Stack::allocate(stack_size).ok_or(Errno::EAGAIN)?;
        let mut ctx: Box<A::SavedContext> = Box::default();

        let mut k = self.enter();
        if k.live_threads >= k.config.max_threads {
            return Err(Errno::EAGAIN);
        }
        let me = k.current_slot()?;
        let parent = &k.threads[me];
        let (policy, prio) = match attr.get_inherit_sched() {
            InheritSched::Inherit => (parent.policy, parent.base_prio),
            InheritSched::Explicit => (attr.get_policy(), attr.get_priority()),
        };
        let mut tcb = Tcb::new(policy, prio, parent.mask);
        tcb.name = attr.get_name();
        if attr.get_detach_state() == DetachState::Detached {
            tcb.state.insert(ThreadState::DETACHED);
        }
        #[cfg(feature = "realtime")]
        {
            tcb.realtime = attr.get_realtime();
        }
        tcb.entry = Some(entry);
        let slot = k.threads.insert(tcb)?;

        // SAFETY: the stack moves into the thread record below and lives
        // until the record is reaped.
        let prepared = unsafe {
            A::init_context(&mut ctx, &stack, Self::thread_body, self as *const Self as usize)
        };
        if let Err(e) = prepared.and_then(|()| self.install_context(slot, ctx)) {
            k.threads.remove(slot);
            return Err(e);
        }

        let st = &mut *k;
        st.threads[slot].stack = Some(stack);
        st.threads[slot].state.insert(ThreadState::RUNNING);
        st.all.push_front(&mut st.threads, slot);
        st.live_threads += 1;
        st.enqueue(QueueId::Ready, slot);
        let id = st.threads[slot].id;
        log::debug!("created {} ({:?} at priority {})", id, policy, prio);
        Ok(id)
    }

    /// End the calling thread with `value`.
    pub fn exit(&self, value: usize) -> ! {
        self.terminate(ExitStatus::Value(value))
    }

    /// Wait for `id` to end and collect its status.
    ///
    /// Errors: `EDEADLK` for the caller itself, `ESRCH` once the thread
    /// was detached or reaped (including by a competing joiner), `EINVAL`
    /// for a detached thread that is still running.
    pub fn join(&self, id: ThreadId) -> KResult<ExitStatus> {
        loop {
            let mut k = self.enter();
            let me = k.current_slot()?;
            let target = k.threads.resolve(id).ok_or(Errno::ESRCH)?;
            if target == me {
                return Err(Errno::EDEADLK);
            }
            let t = &k.threads[target];
            if t.state.contains(ThreadState::RETURNED) {
                if t.state.contains(ThreadState::DETACHED) {
                    return Err(Errno::ESRCH);
                }
                let result = t.result.unwrap_or(ExitStatus::Value(0));
                self.free_thread(&mut k, target);
                log::debug!("joined {} with {:?}", id, result);
                return Ok(result);
            }
            if t.state.contains(ThreadState::DETACHED) {
                return Err(Errno::EINVAL);
            }
            if k.interruption_point(self.board_dyn(), me) {
                // Run the handler (or die) first, then look again.
                continue;
            }

            k.block_current(Some(QueueId::Join(target)))?;
            k.threads[me].state.insert(ThreadState::INTR_POINT);
            k.threads[me].join_result = None;
            drop(k);

            let mut k = self.enter();
            match k.threads[me].wait_status {
                Ok(()) => {
                    if let Some(result) = k.threads[me].join_result.take() {
                        log::debug!("joined {} with {:?}", id, result);
                        return Ok(result);
                    }
                }
                Err(Errno::ESRCH) => return Err(Errno::ESRCH),
                Err(_) => {}
            }
        }
    }

    /// Let `id` be reclaimed as soon as it ends.
    pub fn detach(&self, id: ThreadId) -> KResult<()> {
        let mut k = self.enter();
        let target = k.threads.resolve(id).ok_or(Errno::ESRCH)?;
        let t = &mut k.threads[target];
        if t.state.contains(ThreadState::DETACHED) {
            return Err(Errno::ESRCH);
        }
        t.state.insert(ThreadState::DETACHED);
        if t.state.contains(ThreadState::RETURNED) {
            self.free_thread(&mut k, target);
        }
        Ok(())
    }

    /// Run the entry function of a freshly started thread.
    pub(crate) fn run_entry(&self) -> ExitStatus {
        let (entry, _me) = {
            let mut k = self.enter();
            match k.current {
                Some(me) => (k.threads[me].entry.take(), Some(me)),
                None => (None, None),
            }
        };
        #[cfg(feature = "realtime")]
        let rt = {
            let k = self.enter();
            _me.map(|me| k.threads[me].realtime).unwrap_or_default()
        };
        match entry {
            #[cfg(feature = "realtime")]
            Some(Entry::Once(f)) => {
                if let Some(start) = rt.start {
                    self.sleep_until(Instant::from_nanos(start.to_duration().as_nanos()));
                }
                if let Some(deadline) = rt.deadline {
                    let at = Instant::from_nanos(deadline.to_duration().as_nanos());
                    if self.arm_async(TimerMode::DeadlineExit, at).is_err() {
                        return ExitStatus::DeadlineMissed;
                    }
                }
                let value = f();
                self.cancel_async();
                ExitStatus::Value(value)
            }
            #[cfg(not(feature = "realtime"))]
            Some(Entry::Once(f)) => ExitStatus::Value(f()),
            #[cfg(feature = "realtime")]
            Some(Entry::Periodic(job)) => self.run_periodic(job, rt),
            None => ExitStatus::Value(0),
        }
    }

    /// Release `job` once per period until it breaks or overruns.
    #[cfg(feature = "realtime")]
    fn run_periodic(
        &self,
        mut job: Box<dyn FnMut() -> ControlFlow<usize> + Send>,
        rt: super::Realtime,
    ) -> ExitStatus {
        let (Some(start), Some(period)) = (rt.start, rt.period) else {
            return ExitStatus::Value(0);
        };
        let mut release = Instant::from_nanos(start.to_duration().as_nanos());
        self.sleep_until(release);
        loop {
            let next = release.saturating_add(period);
            if self.arm_async(TimerMode::DeadlineExit, next).is_err() {
                return ExitStatus::DeadlineMissed;
            }
            let flow = job();
            self.cancel_async();
            if let ControlFlow::Break(value) = flow {
                return ExitStatus::Value(value);
            }
            self.sleep_until(next);
            release = next;
        }
    }

    #[cfg(feature = "realtime")]
    fn arm_async(&self, mode: TimerMode, at: Instant) -> KResult<()> {
        let mut k = self.enter();
        let me = k.current_slot()?;
        k.timer_arm(self.board_dyn(), me, mode, at)
    }

    #[cfg(feature = "realtime")]
    fn cancel_async(&self) {
        let mut k = self.enter();
        if let Some(me) = k.current {
            k.timer_cancel(self.board_dyn(), me, TimerScope::One(TimerSlot::Async));
        }
    }

    /// Pop and run cleanup handlers, newest first, outside the kernel.
    pub(crate) fn run_cleanup(&self, me: Slot) {
        loop {
            let handler = self.enter().threads[me].cleanup.pop();
            match handler {
                Some(handler) => handler(),
                None => return,
            }
        }
    }
}

impl KernelState {
    /// Bookkeeping of a thread that has run its cleanup: it leaves every
    /// queue, hands its status to the first joiner and is queued for
    /// reclamation if nobody else will do it.
    pub(crate) fn finish_thread(&mut self, board: &dyn Board, me: Slot) {
        self.all.remove(&mut self.threads, me);
        self.timer_cancel(board, me, TimerScope::All);
        self.cond_leave(board, me);
        self.dequeue(me);
        #[cfg(feature = "prio-ceiling")]
        self.threads[me].ceilings.clear();

        let t = &mut self.threads[me];
        t.mask = SigSet::all_signals();
        t.sigwaitset = SigSet::empty();
        t.state.remove(
            ThreadState::RUNNING
                | ThreadState::BLOCKED
                | ThreadState::SUSPENDED
                | ThreadState::SIGWAIT
                | ThreadState::SIGSUSPEND
                | ThreadState::INTR_POINT,
        );
        t.state.insert(ThreadState::RETURNED);
        let result = t.result.unwrap_or(ExitStatus::Value(0));

        let mut joined = false;
        while let Some(joiner) = self.dequeue_head(QueueId::Join(me)) {
            let j = &mut self.threads[joiner];
            if joined {
                j.wait_status = Err(Errno::ESRCH);
            } else {
                j.join_result = Some(result);
                j.wait_status = Ok(());
                joined = true;
            }
            self.wake(joiner);
        }
        let t = &mut self.threads[me];
        if joined {
            t.state.insert(ThreadState::DETACHED);
        }
        if t.state.contains(ThreadState::DETACHED) {
            self.zombies.push(me);
        }
        self.live_threads -= 1;
        if self.live_threads == 0 {
            self.shutdown.get_or_insert(0);
        }
        self.state_change = true;
    }
}
