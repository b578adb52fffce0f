//! SPARC V8 (LEON) backend.
//!
//! Register-window flushing and the actual save/restore live in the BCC
//! board support package; this module only binds to it. A saved context is
//! the BSP's thread jump buffer: stack pointer and return address in the
//! first two words, PSR and WIM at words 8 and 9.

use alloc::boxed::Box;
use core::cell::Cell;
use core::ptr;

use portable_atomic::{AtomicPtr, Ordering};

use super::Arch;
use crate::errors::KResult;
use crate::mem::Stack;

const JB_SP: usize = 0;
const JB_PC: usize = 1;
const JB_PSR: usize = 8;
/// Room for the integer registers, PSR/WIM and the FPU owner word.
const JB_WORDS: usize = 48;

/// Window save area plus the argument slots every SPARC frame reserves.
const MIN_FRAME: usize = 96;

#[repr(C, align(8))]
pub struct SparcContext {
    jb: [u32; JB_WORDS],
    /// Entry of a context that has never run.
    start: Cell<Option<Box<Start>>>,
}

impl Default for SparcContext {
    fn default() -> Self {
        Self {
            jb: [0; JB_WORDS],
            start: Cell::new(None),
        }
    }
}

extern "C" {
    /// Flush the register windows, save into `old` and resume `new`.
    fn _leonbare_kernel_switchto(old: *mut SparcContext, new: *const SparcContext) -> u32;
    /// Resume `env` without saving anything; `val` lands in `%o0`.
    fn thread_longjmp(env: *const u32, val: i32) -> !;
    /// Fill in the WIM and FPU owner words from the PSR already in `env`.
    fn _do_thread_setjmp(env: *mut u32, savesigs: u32) -> i32;
    /// Clear PSR.ET; returns the previous PSR.
    fn leonbare_disable_traps() -> u32;
    /// Write back a PSR returned by `leonbare_disable_traps`.
    fn leonbare_enable_traps(psr: u32);
}

pub struct Start {
    entry: fn(usize),
    arg: usize,
}

/// The entry about to run on a fresh context. Set right before the first
/// switch to it, taken by `thread_start` before anything else can switch.
static STARTING: AtomicPtr<Start> = AtomicPtr::new(ptr::null_mut());

extern "C" fn thread_start() -> ! {
    let cookie = STARTING.load(Ordering::Acquire);
    STARTING.store(ptr::null_mut(), Ordering::Release);
    debug_assert!(!cookie.is_null());
    // SAFETY: published by `publish_start` from a box this context owned.
    let Start { entry, arg } = *unsafe { Box::from_raw(cookie) };
    entry(arg);
    // `entry` leaves through `context_exit`.
    loop {
        core::hint::spin_loop();
    }
}

/// # Safety
///
/// `next` must point to a live context.
unsafe fn publish_start(next: *const SparcContext) {
    if let Some(start) = unsafe { (*next).start.take() } {
        STARTING.store(Box::into_raw(start), Ordering::Release);
    }
}

pub struct SparcArch;

impl Arch for SparcArch {
    type SavedContext = SparcContext;

    unsafe fn init_context(
        ctx: &mut SparcContext,
        stack: &Stack,
        entry: fn(usize),
        arg: usize,
    ) -> KResult<()> {
        let sp = stack.base() as usize - MIN_FRAME;
        // SAFETY: the frame lies inside the stack, which outlives ctx. The
        // first restore loads the locals and ins from it.
        unsafe { ptr::write_bytes(sp as *mut u8, 0, MIN_FRAME) };

        let psr = Self::disable_interrupts();
        Self::restore_interrupts(psr);
        ctx.jb = [0; JB_WORDS];
        ctx.jb[JB_SP] = sp as u32;
        // The BSP resumes with `jmp %o7 + 8`.
        ctx.jb[JB_PC] = (thread_start as usize as u32).wrapping_sub(8);
        ctx.jb[JB_PSR] = psr;
        // SAFETY: the buffer holds JB_WORDS words.
        unsafe { _do_thread_setjmp(ctx.jb.as_mut_ptr(), 0) };
        ctx.start.set(Some(Box::new(Start { entry, arg })));
        Ok(())
    }

    unsafe fn context_switch(prev: *mut SparcContext, next: *const SparcContext) {
        unsafe {
            publish_start(next);
            _leonbare_kernel_switchto(prev, next);
        }
    }

    unsafe fn context_exit(next: *const SparcContext) -> ! {
        unsafe {
            publish_start(next);
            thread_longjmp((*next).jb.as_ptr(), 1)
        }
    }

    type IrqState = u32;

    fn disable_interrupts() -> u32 {
        // SAFETY: only touches PSR.ET.
        unsafe { leonbare_disable_traps() }
    }

    fn restore_interrupts(psr: u32) {
        // SAFETY: `psr` came from `leonbare_disable_traps` in this context.
        unsafe { leonbare_enable_traps(psr) }
    }
}
