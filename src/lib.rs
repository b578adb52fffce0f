#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(unreachable_pub)]

//! POSIX-style threads for bare-metal SPARC LEON boards.
//!
//! A single-processor threading kernel: priority scheduling with FIFO
//! order among equals, mutexes with an optional priority-ceiling protocol,
//! condition variables, per-thread signal masks and handlers, deferred or
//! asynchronous cancellation, and a timeout queue driven by one hardware
//! countdown timer.
//!
//! # Target Platform
//!
//! - **Hardware**: LEON2/LEON3 boards with the BCC bare-metal runtime
//! - **Architecture**: SPARC V8
//! - **Host testing**: the `std-shim` feature runs every kernel thread on an
//!   OS thread, passing a baton so exactly one runs at a time
//!
//! # Features
//!
//! - `prio-ceiling`: priority-ceiling mutexes (default)
//! - `round-robin`: SCHED_RR time slicing
//! - `realtime`: start time, deadline and period attributes
//! - `std-shim`: host architecture and manual board clock
//!
//! # Quick Start
//!
//! ```ignore
//! use leon_pthreads::{ExitStatus, Kernel, KernelConfig, LeonBoard, SparcArch, ThreadAttr};
//!
//! fn main() {
//!     let kernel: &'static Kernel<SparcArch, LeonBoard> = Box::leak(Box::new(
//!         Kernel::new(LeonBoard::new(), KernelConfig::default()).unwrap(),
//!     ));
//!     kernel.init().unwrap();
//!
//!     let worker = kernel.create(&ThreadAttr::new().priority(5), || 42).unwrap();
//!     assert_eq!(kernel.join(worker), Ok(ExitStatus::Value(42)));
//! }
//! ```
//!
//! # Architecture
//!
//! - [`kernel`]: the kernel object and its non-reentrant critical section;
//!   leaving the critical section is the only place a thread switch happens
//! - [`sched`]: the intrusive queues (Ready, Suspend, wait queues, timeouts)
//! - [`signal`]: routing, delivery and the handler trampoline
//! - [`time`]: the timeout queue and the sleep family
//! - [`sync`]: mutexes and condition variables
//! - [`thread`]: creation, termination, join, keys and cleanup handlers
//! - [`arch`] and [`board`]: the hardware seams

pub mod arch;
pub mod board;
pub mod config;
pub mod errors;
pub mod kernel;
pub mod mem;
pub(crate) mod sched;
pub mod signal;
pub mod sync;
pub mod thread;
pub mod time;

#[cfg(test)]
mod tests;

#[cfg(any(test, feature = "std-shim"))]
extern crate std;

extern crate alloc;

#[cfg(all(not(test), not(feature = "std-shim"), target_os = "none"))]
use core::panic::PanicInfo;

#[cfg(all(not(test), not(feature = "std-shim"), target_os = "none"))]
#[panic_handler]
fn panic(_info: &PanicInfo) -> ! {
    let _ = <arch::DefaultArch as arch::Arch>::disable_interrupts();
    loop {
        core::hint::spin_loop();
    }
}

// ============================================================================
// Public API
// ============================================================================

pub use arch::{Arch, DefaultArch};
pub use board::Board;
pub use config::{KernelConfig, DEFAULT_PRIORITY, MAX_PRIORITY, MIN_PRIORITY};
pub use errors::{Errno, KResult};
pub use kernel::Kernel;
pub use mem::Stack;
pub use signal::{
    CancelState, CancelType, Disposition, MaskHow, SigAction, SigCode, SigInfo, SigSet, Signal,
};
pub use sync::{CondAttr, CondId, MutexAttr, MutexId, MutexKind, MutexProtocol};
pub use thread::{
    DetachState, ExitStatus, InheritSched, Key, SchedPolicy, Scope, ThreadAttr, ThreadId,
    ThreadInfo, ThreadState,
};
#[cfg(feature = "realtime")]
pub use thread::Realtime;
pub use time::{ClockId, Duration, Instant, Timespec};

#[cfg(target_arch = "sparc")]
pub use arch::sparc::SparcArch;
#[cfg(target_arch = "sparc")]
pub use board::LeonBoard;
#[cfg(any(test, feature = "std-shim"))]
pub use arch::host::HostArch;
#[cfg(any(test, feature = "std-shim"))]
pub use board::{ManualBoard, Shutdown};
