//! Signal routing and delivery.
//!
//! A raised signal is routed to one receiver in a fixed order: an explicit
//! target, then the running thread for fault signals, then the timeout
//! queue for `SIGALRM`, then the first thread on the All-Threads list that
//! waits for it or leaves it unblocked. With no receiver it stays pending
//! at process scope.
//!
//! Delivery never runs user code. A handler is only recorded on the
//! receiving thread; the thread runs it itself from the trampoline the
//! next time it leaves the kernel.

use crate::board::Board;
use crate::kernel::state::KernelState;
use crate::thread::{ExitStatus, Slot, ThreadState};
use crate::time::timer::TimerScope;

use super::{Disposition, Handler, SigCode, SigInfo, SigSet, Signal};

/// Work a thread must do on its way out of the kernel.
pub(crate) enum Injection {
    /// Terminate with this status.
    Exit(ExitStatus),
    /// Run `handler` with `mask` added to the thread's mask.
    Handler {
        sig: Signal,
        handler: Handler,
        mask: SigSet,
    },
}

impl KernelState {
    /// Route `sig` to a receiver and deliver it.
    pub(crate) fn raise_signal(
        &mut self,
        board: &dyn Board,
        sig: Signal,
        target: Option<Slot>,
        code: SigCode,
    ) {
        if let Some(slot) = target {
            log::trace!("{:?} directed to {:?}", sig, slot);
            self.deliver_to_thread(board, slot, sig, code);
            return;
        }
        if sig.is_synchronous() {
            if let Some(cur) = self.current {
                log::trace!("{:?} routed to running thread {:?}", sig, cur);
                self.deliver_to_thread(board, cur, sig, code);
                return;
            }
        }
        if sig == Signal::SIGALRM {
            self.timer_expire(board);
            return;
        }
        match self.find_receiver(sig) {
            Some(slot) => {
                log::trace!("{:?} routed to {:?}", sig, slot);
                self.deliver_to_thread(board, slot, sig, code);
            }
            None => {
                log::trace!("{:?} pending at process scope", sig);
                self.pending.add(sig);
                self.pending_codes[sig.index()] = code;
            }
        }
    }

    /// First thread, in All-Threads order, that waits for `sig` or does
    /// not block it.
    pub(crate) fn find_receiver(&self, sig: Signal) -> Option<Slot> {
        self.all.iter(&self.threads).find(|&s| {
            let t = &self.threads[s];
            t.sigwaitset.contains(sig) || !t.mask.contains(sig)
        })
    }

    /// Deliver to a specific thread, or leave it pending there.
    pub(crate) fn deliver_to_thread(
        &mut self,
        board: &dyn Board,
        slot: Slot,
        sig: Signal,
        code: SigCode,
    ) {
        let t = &mut self.threads[slot];
        if t.state.contains(ThreadState::RETURNED) {
            return;
        }
        let blocked = t.mask.contains(sig) && !t.sigwaitset.contains(sig);
        if blocked || (sig == Signal::SIGCANCEL && !t.cancel_actionable()) {
            t.pending.add(sig);
            t.pending_codes[sig.index()] = code;
            return;
        }
        self.accept_signal(board, slot, sig, code);
    }

    /// Act on a signal the thread is ready to receive.
    fn accept_signal(&mut self, board: &dyn Board, slot: Slot, sig: Signal, code: SigCode) {
        let t = &mut self.threads[slot];
        if t.state.contains(ThreadState::SIGWAIT) && t.sigwaitset.contains(sig) {
            t.delivered = Some(SigInfo { signo: sig, code });
            t.state.remove(ThreadState::SIGWAIT);
            t.sigwaitset = SigSet::empty();
            t.wait_status = Ok(());
            if t.state.contains(ThreadState::SYNC_TIMER) {
                self.timer_cancel(board, slot, TimerScope::All);
            }
            self.wake(slot);
            return;
        }
        if sig == Signal::SIGCANCEL {
            log::debug!("cancelling {:?}", t.id);
            self.begin_forced_exit(board, slot, ExitStatus::Canceled);
            return;
        }
        let (handled, fatal) = match &self.actions[sig.index()].disposition {
            Disposition::Ignore => (false, false),
            Disposition::Default => (false, !sig.default_is_ignore()),
            Disposition::Handler(_) => (true, false),
        };
        if fatal {
            let status = 128 + i32::from(sig.raw());
            log::warn!("{:?} has no handler; shutting down with status {}", sig, status);
            self.shutdown.get_or_insert(status);
        } else if handled {
            t.inject.add(sig);
            if t.state.contains(ThreadState::BLOCKED) {
                self.interrupt_wait(board, slot);
            }
        }
    }

    /// Tear `slot` out of every wait and send it to terminate via the
    /// trampoline.
    pub(crate) fn begin_forced_exit(&mut self, board: &dyn Board, slot: Slot, status: ExitStatus) {
        let t = &self.threads[slot];
        if t.state.intersects(ThreadState::EXITING | ThreadState::RETURNED) || t.exit_request.is_some() {
            return;
        }
        self.timer_cancel(board, slot, TimerScope::All);
        self.cond_leave(board, slot);
        self.all.remove(&mut self.threads, slot);

        let t = &mut self.threads[slot];
        t.state
            .remove(ThreadState::SIGWAIT | ThreadState::SIGSUSPEND | ThreadState::SUSPENDED);
        t.sigwaitset = SigSet::empty();
        t.mask = SigSet::all_signals().without(Signal::SIGCANCEL);
        t.exit_request = Some(status);
        t.wait_status = Err(crate::errors::Errno::EINTR);
        // A suspended thread is neither running nor blocked; treat it as blocked
        // so the wake below puts it back on Ready.
        if !t.state.contains(ThreadState::RUNNING) {
            t.state.insert(ThreadState::BLOCKED);
        }
        self.wake(slot);
        self.state_change = true;
    }

    /// Deliver every pending signal `slot` no longer blocks, thread scope
    /// first.
    pub(crate) fn deliver_pending(&mut self, board: &dyn Board, slot: Slot) {
        loop {
            let t = &mut self.threads[slot];
            if t.exit_request.is_some() || t.state.contains(ThreadState::RETURNED) {
                return;
            }
            let mut deliverable = t.pending.difference(t.mask);
            if !t.cancel_actionable() {
                deliverable.remove(Signal::SIGCANCEL);
            }
            if let Some(sig) = deliverable.first() {
                t.pending.remove(sig);
                let code = t.pending_codes[sig.index()];
                self.accept_signal(board, slot, sig, code);
                continue;
            }
            if let Some(sig) = self.pending.difference(t.mask).first() {
                self.pending.remove(sig);
                let code = self.pending_codes[sig.index()];
                self.accept_signal(board, slot, sig, code);
                continue;
            }
            return;
        }
    }

    /// Act on whatever an interruption point makes deliverable. Returns
    /// `true` when the thread now has a handler or its termination to run
    /// before it may block.
    pub(crate) fn interruption_point(&mut self, board: &dyn Board, slot: Slot) -> bool {
        self.threads[slot].state.insert(ThreadState::INTR_POINT);
        self.deliver_pending(board, slot);
        let t = &mut self.threads[slot];
        t.state.remove(ThreadState::INTR_POINT);
        t.exit_request.is_some() || !t.inject.is_empty()
    }

    /// Remove and return a signal from `set` that is pending for `slot`,
    /// checking the thread before the process.
    pub(crate) fn take_pending_in(&mut self, slot: Slot, set: SigSet) -> Option<SigInfo> {
        let t = &mut self.threads[slot];
        if let Some(sig) = t.pending.intersection(set).first() {
            t.pending.remove(sig);
            return Some(SigInfo {
                signo: sig,
                code: t.pending_codes[sig.index()],
            });
        }
        let sig = self.pending.intersection(set).first()?;
        self.pending.remove(sig);
        Some(SigInfo {
            signo: sig,
            code: self.pending_codes[sig.index()],
        })
    }

    /// Next thing `slot` must do before returning to its caller.
    pub(crate) fn take_injection(&mut self, slot: Slot) -> Option<Injection> {
        let t = &mut self.threads[slot];
        if let Some(status) = t.exit_request.take() {
            t.state.insert(ThreadState::EXITING);
            t.result = Some(status);
            return Some(Injection::Exit(status));
        }
        while let Some(sig) = t.inject.first() {
            t.inject.remove(sig);
            let action = &self.actions[sig.index()];
            // The disposition may have changed since the handler was queued.
            if let Disposition::Handler(handler) = &action.disposition {
                return Some(Injection::Handler {
                    sig,
                    handler: handler.clone(),
                    mask: action.mask,
                });
            }
        }
        None
    }
}
