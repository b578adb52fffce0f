//! POSIX-shaped signal and cancellation calls.

use super::{Disposition, MaskHow, SigAction, SigCode, SigInfo, SigSet, Signal};
use crate::arch::Arch;
use crate::board::Board;
use crate::errors::{Errno, KResult};
use crate::kernel::Kernel;
use crate::thread::{ThreadId, ThreadState};
use crate::time::{Duration, Timespec, TimerMode};

/// Whether cancellation requests are acted on or left pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CancelState {
    #[default]
    Enable,
    Disable,
}

/// When an enabled cancellation request takes effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CancelType {
    /// At the next interruption point.
    #[default]
    Deferred,
    /// As soon as it is delivered.
    Async,
}

impl<A: Arch, B: Board> Kernel<A, B> {
    /// Install `action` for `sig` if given, returning the previous action.
    ///
    /// `SIGKILL`, `SIGSTOP`, `SIGCANCEL` and the timer signal cannot be
    /// caught, nor blocked by a handler mask. Switching to ignore or
    /// default discards instances already pending.
    pub fn sigaction(&self, sig: Signal, action: Option<SigAction>) -> KResult<SigAction> {
        let reserved = SigSet::cantmask().with(Signal::SIGALRM);
        if let Some(act) = &action {
            if reserved.contains(sig) || act.mask.intersects(SigSet::cantmask()) {
                return Err(Errno::EINVAL);
            }
        }
        let mut k = self.enter();
        let old = k.actions[sig.index()].clone();
        let Some(act) = action else {
            return Ok(old);
        };
        if !matches!(act.disposition, Disposition::Handler(_)) {
            k.pending.remove(sig);
            let slots: alloc::vec::Vec<_> = k.all.iter(&k.threads).collect();
            for slot in slots {
                k.threads[slot].pending.remove(sig);
            }
        }
        log::trace!("{:?} disposition now {:?}", sig, act.disposition);
        k.actions[sig.index()] = act;
        Ok(old)
    }

    /// Change the calling thread's mask; returns the previous one.
    /// Unmaskable signals are silently left out. Anything the new mask
    /// unblocks that is already pending is delivered before returning.
    pub fn sigprocmask(&self, how: MaskHow, set: Option<SigSet>) -> KResult<SigSet> {
        let mut k = self.enter();
        let me = k.current_slot()?;
        let old = k.threads[me].mask;
        let Some(set) = set else {
            return Ok(old);
        };
        let new = match how {
            MaskHow::Block => old.union(set),
            MaskHow::Unblock => old.difference(set),
            MaskHow::SetMask => set,
        };
        // The cancellation bit belongs to `setcancelstate`.
        let keep = old.intersection(SigSet::of(&[Signal::SIGCANCEL]));
        k.threads[me].mask = new.difference(SigSet::cantmask()).union(keep);
        k.deliver_pending(self.board_dyn(), me);
        Ok(old)
    }

    pub fn pthread_sigmask(&self, how: MaskHow, set: Option<SigSet>) -> KResult<SigSet> {
        self.sigprocmask(how, set)
    }

    /// Signals pending for the calling thread or the process.
    pub fn sigpending(&self) -> KResult<SigSet> {
        let k = self.enter();
        let me = k.current_slot()?;
        Ok(k.threads[me].pending.union(k.pending))
    }

    /// Wait for a signal in `set` and consume it.
    pub fn sigwait(&self, set: SigSet) -> KResult<Signal> {
        self.sigwaitinfo(set).map(|info| info.signo)
    }

    pub fn sigwaitinfo(&self, set: SigSet) -> KResult<SigInfo> {
        loop {
            match self.wait_for_signal(set, None) {
                Err(Errno::EINTR) => continue,
                other => return other,
            }
        }
    }

    /// Like [`Kernel::sigwaitinfo`] but gives up with `EAGAIN` after
    /// `timeout`. A handler running meanwhile ends the wait with `EINTR`.
    pub fn sigtimedwait(&self, set: SigSet, timeout: &Timespec) -> KResult<SigInfo> {
        let timeout = Duration::from_timespec(timeout)?;
        self.wait_for_signal(set, Some(timeout))
    }

    fn wait_for_signal(&self, set: SigSet, timeout: Option<Duration>) -> KResult<SigInfo> {
        let set = set.difference(SigSet::cantmask());
        if set.is_empty() {
            return Err(Errno::EINVAL);
        }
        let mut k = self.enter();
        let me = k.current_slot()?;
        if k.interruption_point(self.board_dyn(), me) {
            return Err(Errno::EINTR);
        }
        if let Some(info) = k.take_pending_in(me, set) {
            return Ok(info);
        }
        if let Some(timeout) = timeout {
            let at = self.board().now().saturating_add(timeout);
            k.timer_arm(self.board_dyn(), me, TimerMode::Relative, at)?;
        }
        k.block_current(None)?;
        let t = &mut k.threads[me];
        t.sigwaitset = set;
        t.delivered = None;
        t.state.insert(ThreadState::SIGWAIT | ThreadState::INTR_POINT);
        drop(k);

        let mut k = self.enter();
        let t = &mut k.threads[me];
        t.state.remove(ThreadState::SIGWAIT);
        t.sigwaitset = SigSet::empty();
        if let Some(info) = t.delivered.take() {
            return Ok(info);
        }
        match t.wait_status {
            Err(e) => Err(e),
            Ok(()) => Err(Errno::EINTR),
        }
    }

    /// Replace the mask with `mask` until a handler has run, then restore
    /// it. Always ends with `EINTR`.
    pub fn sigsuspend(&self, mask: SigSet) -> KResult<()> {
        let mut k = self.enter();
        let me = k.current_slot()?;
        let saved = k.threads[me].mask;
        let keep = saved.intersection(SigSet::of(&[Signal::SIGCANCEL]));
        k.threads[me].mask = mask.difference(SigSet::cantmask()).union(keep);
        if !k.interruption_point(self.board_dyn(), me) {
            k.block_current(None)?;
            k.threads[me]
                .state
                .insert(ThreadState::SIGSUSPEND | ThreadState::INTR_POINT);
        }
        // Leaving runs the handler, after the wake if there was a wait.
        drop(k);

        let mut k = self.enter();
        let t = &mut k.threads[me];
        t.state.remove(ThreadState::SIGSUSPEND);
        t.mask = saved;
        k.deliver_pending(self.board_dyn(), me);
        Err(Errno::EINTR)
    }

    /// Wait for any handled signal.
    pub fn pause(&self) -> KResult<()> {
        let mask = {
            let k = self.enter();
            let me = k.current_slot()?;
            k.threads[me].mask
        };
        self.sigsuspend(mask)
    }

    /// Send `sig` to the calling thread.
    pub fn raise(&self, sig: Signal) -> KResult<()> {
        let id = self.self_id()?;
        self.pthread_kill(id, sig)
    }

    /// Raise `sig` at process scope. The unmaskable signals cannot be sent.
    pub fn kill(&self, sig: Signal) -> KResult<()> {
        if SigSet::cantmask().contains(sig) {
            return Err(Errno::EINVAL);
        }
        let mut k = self.enter();
        k.raise_signal(self.board_dyn(), sig, None, SigCode::User);
        Ok(())
    }

    pub fn pthread_kill(&self, id: ThreadId, sig: Signal) -> KResult<()> {
        if SigSet::cantmask().contains(sig) {
            return Err(Errno::EINVAL);
        }
        self.send_directed(id, sig)
    }

    /// Request cancellation of `id`. The request stays pending while the
    /// target has cancellation disabled, and with deferred cancellation
    /// until it reaches an interruption point.
    pub fn cancel(&self, id: ThreadId) -> KResult<()> {
        log::debug!("cancel requested for {}", id);
        self.send_directed(id, Signal::SIGCANCEL)
    }

    fn send_directed(&self, id: ThreadId, sig: Signal) -> KResult<()> {
        let mut k = self.enter();
        let slot = k.threads.resolve(id).ok_or(Errno::ESRCH)?;
        if k.threads[slot].state.contains(ThreadState::RETURNED) {
            return Err(Errno::ESRCH);
        }
        k.raise_signal(self.board_dyn(), sig, Some(slot), SigCode::Directed);
        Ok(())
    }

    pub fn setcancelstate(&self, state: CancelState) -> KResult<CancelState> {
        let mut k = self.enter();
        let me = k.current_slot()?;
        let t = &mut k.threads[me];
        let old = if t.mask.contains(Signal::SIGCANCEL) {
            CancelState::Disable
        } else {
            CancelState::Enable
        };
        match state {
            CancelState::Disable => t.mask.add(Signal::SIGCANCEL),
            CancelState::Enable => t.mask.remove(Signal::SIGCANCEL),
        }
        k.deliver_pending(self.board_dyn(), me);
        Ok(old)
    }

    pub fn setcanceltype(&self, ty: CancelType) -> KResult<CancelType> {
        let mut k = self.enter();
        let me = k.current_slot()?;
        let t = &mut k.threads[me];
        let old = if t.state.contains(ThreadState::CONTROLLED) {
            CancelType::Deferred
        } else {
            CancelType::Async
        };
        t.state.set(ThreadState::CONTROLLED, ty == CancelType::Deferred);
        k.deliver_pending(self.board_dyn(), me);
        Ok(old)
    }

    /// An explicit interruption point: act on a pending cancellation.
    pub fn testcancel(&self) {
        let mut k = self.enter();
        if let Some(me) = k.current {
            k.interruption_point(self.board_dyn(), me);
        }
    }
}
