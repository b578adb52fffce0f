//! Host backend: every kernel thread runs on its own OS thread.
//!
//! A saved context is a baton. Switching hands the baton of the next
//! context over and parks the caller on its own, so exactly one OS thread
//! executes kernel-thread code at any moment and the scheduler's decisions
//! are the only thing that decides who runs.

use alloc::boxed::Box;
use alloc::sync::Arc;
use core::cell::Cell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Condvar, Mutex, PoisonError};

use super::Arch;
use crate::errors::{Errno, KResult};
use crate::mem::Stack;

const MIN_HOST_STACK: usize = 256 * 1024;

/// Unwind payload used to retire the OS thread of a terminated context.
struct ContextExited;

#[derive(Default)]
struct Baton {
    held: Mutex<bool>,
    turn: Condvar,
}

impl Baton {
    fn pass(&self) {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        *held = true;
        self.turn.notify_one();
    }

    fn wait(&self) {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        while !*held {
            held = self.turn.wait(held).unwrap_or_else(PoisonError::into_inner);
        }
        *held = false;
    }
}

#[derive(Default)]
pub struct HostContext {
    baton: Arc<Baton>,
}

std::thread_local! {
    static INTERRUPTS: Cell<bool> = const { Cell::new(true) };
}

pub struct HostArch;

impl Arch for HostArch {
    type SavedContext = HostContext;

    unsafe fn init_context(
        ctx: &mut HostContext,
        stack: &Stack,
        entry: fn(usize),
        arg: usize,
    ) -> KResult<()> {
        let baton = ctx.baton.clone();
        std::thread::Builder::new()
            .name("leon-pthread".into())
            .stack_size(stack.size().max(MIN_HOST_STACK))
            .spawn(move || {
                baton.wait();
                match panic::catch_unwind(AssertUnwindSafe(|| entry(arg))) {
                    Err(payload) if payload.is::<ContextExited>() => {}
                    Err(payload) => {
                        let msg = payload
                            .downcast_ref::<&str>()
                            .copied()
                            .or_else(|| payload.downcast_ref::<std::string::String>().map(|s| s.as_str()))
                            .unwrap_or("non-string payload");
                        std::eprintln!("kernel thread panicked: {}", msg);
                        std::process::abort();
                    }
                    Ok(()) => {
                        std::eprintln!("kernel thread entry returned");
                        std::process::abort();
                    }
                }
            })
            .map(drop)
            .map_err(|_| Errno::EAGAIN)
    }

    unsafe fn context_switch(prev: *mut HostContext, next: *const HostContext) {
        // Clone first: once `next` runs it may free either context.
        let (prev, next) = unsafe { ((*prev).baton.clone(), (*next).baton.clone()) };
        next.pass();
        prev.wait();
    }

    unsafe fn context_exit(next: *const HostContext) -> ! {
        let next = unsafe { (*next).baton.clone() };
        next.pass();
        panic::resume_unwind(Box::new(ContextExited))
    }

    type IrqState = bool;

    fn disable_interrupts() -> bool {
        INTERRUPTS.with(|i| i.replace(false))
    }

    fn restore_interrupts(saved: bool) {
        INTERRUPTS.with(|i| i.set(saved));
    }
}
