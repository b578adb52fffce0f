//! The kernel object and its critical section.
//!
//! One [`Kernel`] value owns every piece of scheduler state. Code touches
//! that state only while holding the kernel flag, through a
//! [`KernelGuard`]. The flag is not reentrant, and releasing it is the only
//! place a context switch can happen: the release path delivers signals
//! that arrived while the flag was held, reaps finished threads and
//! switches to the head of the Ready queue if that is no longer the
//! running thread.

pub(crate) mod state;

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::cell::UnsafeCell;
use core::marker::PhantomData;
use core::ops::{Deref, DerefMut};

use portable_atomic::{AtomicBool, AtomicU64, Ordering};

use crate::arch::Arch;
use crate::board::Board;
use crate::config::KernelConfig;
use crate::errors::{Errno, KResult};
use crate::signal::dispatch::Injection;
use crate::signal::{SigCode, SigSet, Signal};
use crate::thread::{ExitStatus, SchedPolicy, Slot, Tcb, ThreadId, ThreadState};
use crate::sched::QueueId;
use state::KernelState;

/// The threading kernel.
///
/// `A` supplies context switching and `B` the clock, the countdown timer
/// and the idle wait. Thread creation needs a `&'static Kernel`, so the
/// value normally lives in a `static` or is leaked at start-up.
///
/// ```ignore
/// static KERNEL: Kernel<SparcArch, LeonBoard> = ...;
///
/// fn main() {
///     KERNEL.init().unwrap();
///     let worker = KERNEL.create(&ThreadAttr::new(), || 42).unwrap();
///     assert_eq!(KERNEL.join(worker), Ok(ExitStatus::Value(42)));
/// }
/// ```
pub struct Kernel<A: Arch, B: Board> {
    board: B,
    /// The kernel flag.
    in_kernel: AtomicBool,
    /// Signals raised by interrupts while the flag was held.
    new_signals: AtomicU64,
    started: AtomicBool,
    /// Read-only copy for checks made outside the critical section.
    config: KernelConfig,
    state: UnsafeCell<KernelState>,
    /// Saved contexts, indexed like the thread table. Boxed so their
    /// addresses survive growth of the vector.
    contexts: UnsafeCell<Vec<Option<Box<A::SavedContext>>>>,
    _arch: PhantomData<fn() -> A>,
}

// SAFETY: all interior state is reached only while holding `in_kernel`.
unsafe impl<A: Arch, B: Board> Sync for Kernel<A, B> {}

/// Proof that the kernel flag is held. Dereferences to the kernel state;
/// dropping it leaves the critical section.
pub(crate) struct KernelGuard<'k, A: Arch, B: Board> {
    kernel: &'k Kernel<A, B>,
}

impl<A: Arch, B: Board> Deref for KernelGuard<'_, A, B> {
    type Target = KernelState;

    fn deref(&self) -> &KernelState {
        // SAFETY: the guard holds the flag.
        unsafe { &*self.kernel.state.get() }
    }
}

impl<A: Arch, B: Board> DerefMut for KernelGuard<'_, A, B> {
    fn deref_mut(&mut self) -> &mut KernelState {
        // SAFETY: the guard holds the flag.
        unsafe { &mut *self.kernel.state.get() }
    }
}

impl<A: Arch, B: Board> Drop for KernelGuard<'_, A, B> {
    fn drop(&mut self) {
        #[cfg(any(test, feature = "std-shim"))]
        if std::thread::panicking() {
            self.kernel.in_kernel.store(false, Ordering::Release);
            return;
        }
        self.kernel.leave();
    }
}

impl<A: Arch, B: Board> Kernel<A, B> {
    pub fn new(board: B, config: KernelConfig) -> KResult<Self> {
        config.validate()?;
        Ok(Self {
            board,
            in_kernel: AtomicBool::new(false),
            new_signals: AtomicU64::new(0),
            started: AtomicBool::new(false),
            config,
            state: UnsafeCell::new(KernelState::new(config)),
            contexts: UnsafeCell::new(Vec::new()),
            _arch: PhantomData,
        })
    }

    pub fn board(&self) -> &B {
        &self.board
    }

    pub(crate) fn board_dyn(&self) -> &dyn Board {
        &self.board
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    /// Adopt the calling context as the main thread.
    ///
    /// The main thread gets the configured main priority and the process
    /// signal mask. Fails with `EINVAL` if called twice.
    pub fn init(&self) -> KResult<ThreadId> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(Errno::EINVAL);
        }
        let mut k = self.enter();
        let mut tcb = Tcb::new(SchedPolicy::Fifo, k.config.main_priority, k.proc_mask);
        tcb.name = Some("main");
        tcb.state.insert(ThreadState::MAIN | ThreadState::RUNNING);
        let slot = k.threads.insert(tcb)?;
        if let Err(e) = self.install_context(slot, Box::default()) {
            k.threads.remove(slot);
            return Err(e);
        }
        let st = &mut *k;
        st.all.push_front(&mut st.threads, slot);
        st.live_threads += 1;
        st.current = Some(slot);
        st.enqueue(QueueId::Ready, slot);
        let id = st.threads[slot].id;
        log::debug!("kernel started; main thread is {}", id);
        Ok(id)
    }

    /// Enter the critical section.
    ///
    /// # Panics
    ///
    /// If the flag is already held: the kernel never nests.
    pub(crate) fn enter(&self) -> KernelGuard<'_, A, B> {
        if self.in_kernel.swap(true, Ordering::Acquire) {
            panic!("kernel critical section re-entered");
        }
        KernelGuard { kernel: self }
    }

    fn acquire_raw(&self) {
        if self.in_kernel.swap(true, Ordering::Acquire) {
            panic!("kernel critical section re-entered");
        }
    }

    /// # Safety
    ///
    /// The caller holds the kernel flag and keeps no other reference to the
    /// state alive.
    #[allow(clippy::mut_from_ref)]
    unsafe fn state_mut(&self) -> &mut KernelState {
        unsafe { &mut *self.state.get() }
    }

    /// Leave the critical section, then run whatever was injected into the
    /// calling thread.
    fn leave(&self) {
        self.release();
        self.run_trampoline();
    }

    /// Drop the flag, rescheduling first when anything calls for it.
    fn release(&self) {
        loop {
            // SAFETY: flag held; the reference dies before the store below.
            let st = unsafe { self.state_mut() };
            if st.state_change || st.shutdown.is_some() || self.new_signals.load(Ordering::Acquire) != 0 {
                self.reschedule();
            }
            self.in_kernel.store(false, Ordering::Release);
            // An interrupt may have slipped in after the last check.
            if self.new_signals.load(Ordering::Acquire) == 0
                || self.in_kernel.swap(true, Ordering::Acquire)
            {
                return;
            }
        }
    }

    /// Deliver deferred signals, reap, and switch to the head of Ready.
    /// Called with the flag held; returns with it held, possibly much
    /// later and after other threads have run.
    fn reschedule(&self) {
        loop {
            // SAFETY: flag held. Not used across the switch below.
            let st = unsafe { self.state_mut() };
            let raised = SigSet::from_bits(self.new_signals.swap(0, Ordering::AcqRel));
            for sig in raised.iter() {
                st.raise_signal(&self.board, sig, None, SigCode::Interrupt);
            }
            if let Some(status) = st.shutdown {
                log::debug!("shutting down with status {}", status);
                self.in_kernel.store(false, Ordering::Release);
                self.board.shutdown(status);
            }
            self.reap(st);
            st.state_change = false;

            let Some(next) = st.ready.front() else {
                self.idle();
                continue;
            };
            if st.current == Some(next) {
                if self.new_signals.load(Ordering::Acquire) == 0 {
                    return;
                }
                continue;
            }

            let prev = st.current.replace(next);
            #[cfg(feature = "round-robin")]
            st.rotate_slice(&self.board, prev, next);
            log::trace!("switch {:?} -> {:?}", prev, next);

            let Some(next_ctx) = self.context_ptr(next) else {
                unreachable!("ready thread {:?} has no saved context", next);
            };
            let prev_ctx = prev
                .filter(|&p| st.threads.get(p).is_some_and(|t| !t.state.contains(ThreadState::RETURNED)))
                .and_then(|p| self.context_ptr(p));
            match prev_ctx {
                // SAFETY: both contexts are boxed and owned by live threads.
                Some(prev_ctx) => unsafe { A::context_switch(prev_ctx, next_ctx) },
                // SAFETY: the calling thread has returned; its context is
                // never resumed and is freed by a later reap.
                None => unsafe { A::context_exit(next_ctx) },
            }
        }
    }

    /// Wait for an interrupt when nothing can run.
    fn idle(&self) {
        let saved = A::disable_interrupts();
        if let Some(sig) = self.board.wait_for_interrupt() {
            self.new_signals
                .fetch_or(SigSet::of(&[sig]).bits(), Ordering::AcqRel);
        }
        A::restore_interrupts(saved);
    }

    /// Free returned, detached threads other than the running one.
    fn reap(&self, st: &mut KernelState) {
        let mut i = 0;
        while i < st.zombies.len() {
            let z = st.zombies[i];
            if Some(z) == st.current {
                i += 1;
                continue;
            }
            st.zombies.swap_remove(i);
            self.free_thread(st, z);
        }
    }

    /// Release the storage of a returned thread.
    pub(crate) fn free_thread(&self, st: &mut KernelState, slot: Slot) {
        if let Some(tcb) = st.threads.remove(slot) {
            if tcb.stack_overflowed() {
                log::warn!("{} overran its stack", tcb.id);
            }
            log::debug!("reaped {}", tcb.id);
        }
        // SAFETY: flag held; the context belongs to a thread that never runs again.
        let contexts = unsafe { &mut *self.contexts.get() };
        if let Some(ctx) = contexts.get_mut(slot.index()) {
            *ctx = None;
        }
    }

    /// Give `slot` its saved context. Flag held.
    pub(crate) fn install_context(&self, slot: Slot, ctx: Box<A::SavedContext>) -> KResult<()> {
        // SAFETY: flag held by the caller.
        let contexts = unsafe { &mut *self.contexts.get() };
        if contexts.len() <= slot.index() {
            contexts.try_reserve(slot.index() + 1 - contexts.len())?;
            contexts.resize_with(slot.index() + 1, || None);
        }
        contexts[slot.index()] = Some(ctx);
        Ok(())
    }

    /// Run `f` on the saved context of `slot`. Flag held.
    pub(crate) fn with_context<R>(
        &self,
        slot: Slot,
        f: impl FnOnce(&mut A::SavedContext) -> R,
    ) -> Option<R> {
        // SAFETY: flag held by the caller.
        let contexts = unsafe { &mut *self.contexts.get() };
        contexts.get_mut(slot.index())?.as_deref_mut().map(f)
    }

    fn context_ptr(&self, slot: Slot) -> Option<*mut A::SavedContext> {
        self.with_context(slot, |ctx| ctx as *mut A::SavedContext)
    }

    /// Run injected work for the calling thread until none is left: signal
    /// handlers with their action masks applied, or termination.
    fn run_trampoline(&self) {
        loop {
            self.acquire_raw();
            // SAFETY: flag held.
            let st = unsafe { self.state_mut() };
            let Some(me) = st.current else {
                self.release();
                return;
            };
            let injection = st.take_injection(me);
            self.release();

            match injection {
                None => return,
                Some(Injection::Exit(status)) => self.terminate(status),
                Some(Injection::Handler { sig, handler, mask }) => {
                    self.acquire_raw();
                    // SAFETY: flag held.
                    let st = unsafe { self.state_mut() };
                    let t = &mut st.threads[me];
                    let saved = t.mask;
                    // A handler may block too; keep the outcome of the wait it interrupted.
                    let outcome = (t.wait_status, t.delivered, t.join_result);
                    t.mask = saved.union(mask).with(sig).difference(SigSet::cantmask());
                    self.release();

                    log::trace!("running handler for {:?}", sig);
                    handler(sig);

                    self.acquire_raw();
                    // SAFETY: flag held.
                    let st = unsafe { self.state_mut() };
                    let t = &mut st.threads[me];
                    (t.wait_status, t.delivered, t.join_result) = outcome;
                    if t.exit_request.is_none() {
                        t.mask = saved;
                        st.deliver_pending(&self.board, me);
                    }
                    self.release();
                }
            }
        }
    }

    /// Interrupt entry: raise `sig` as if by the hardware.
    ///
    /// While the kernel flag is held the signal is only recorded; the
    /// holder delivers it when it leaves the critical section.
    pub fn interrupt(&self, sig: Signal) {
        if self.in_kernel.swap(true, Ordering::Acquire) {
            self.new_signals
                .fetch_or(SigSet::of(&[sig]).bits(), Ordering::AcqRel);
            return;
        }
        let mut k = KernelGuard { kernel: self };
        k.raise_signal(&self.board, sig, None, SigCode::Interrupt);
    }

    /// Deliver anything pending that the calling thread no longer blocks.
    pub fn handle_pending_signals(&self) {
        let mut k = self.enter();
        if let Some(me) = k.current {
            k.deliver_pending(&self.board, me);
        }
    }

    /// Entry point of every created thread. Reached through the first
    /// switch to the thread, with the flag held on its behalf.
    pub(crate) fn thread_body(arg: usize) {
        // SAFETY: `create` passes the address of a `&'static Kernel<A, B>`.
        let kernel = unsafe { &*(arg as *const Kernel<A, B>) };
        kernel.start_thread()
    }

    fn start_thread(&self) -> ! {
        // SAFETY: the flag was held across the switch that started us.
        let st = unsafe { self.state_mut() };
        self.reap(st);
        self.release();
        self.run_trampoline();
        let status = self.run_entry();
        self.terminate(status)
    }

    /// Finish the calling thread: cleanup handlers, key destructors, then
    /// the bookkeeping under the flag and a final switch away.
    pub(crate) fn terminate(&self, status: ExitStatus) -> ! {
        self.acquire_raw();
        // SAFETY: flag held.
        let st = unsafe { self.state_mut() };
        let Some(me) = st.current else {
            unreachable!("terminate called before init");
        };
        let t = &mut st.threads[me];
        if !t.state.contains(ThreadState::EXITING) {
            t.state.insert(ThreadState::EXITING);
            t.result = Some(status);
        }
        t.exit_request = None;
        t.inject = SigSet::empty();
        t.mask = SigSet::all_signals();
        log::debug!("{} exiting with {:?}", t.id, t.result);
        self.release();

        self.run_cleanup(me);
        self.run_key_destructors(me);

        self.acquire_raw();
        // SAFETY: flag held.
        let st = unsafe { self.state_mut() };
        st.finish_thread(&self.board, me);
        self.reschedule();
        unreachable!("returned thread {:?} was resumed", me)
    }

    #[cfg(test)]
    pub(crate) fn with_state<R>(&self, f: impl FnOnce(&mut KernelState) -> R) -> R {
        let mut k = self.enter();
        f(&mut k)
    }
}
