//! Test helper utilities and common functionality.

use alloc::boxed::Box;
use alloc::vec::Vec;

use crate::arch::host::HostArch;
use crate::board::ManualBoard;
use crate::config::KernelConfig;
use crate::kernel::state::KernelState;
use crate::kernel::Kernel;
use crate::signal::SigSet;
use crate::thread::{SchedPolicy, Slot, Tcb, ThreadTable};

pub(crate) type HostKernel = Kernel<HostArch, ManualBoard>;

/// Kernel state with a few thread records and no running thread.
///
/// The records are on the All-Threads list, newest first, but on no
/// primary queue; tests place them where they need them.
pub(crate) struct Fixture {
    pub(crate) state: KernelState,
    pub(crate) slots: Vec<Slot>,
}

impl Fixture {
    pub(crate) fn new(priorities: &[u8]) -> Self {
        let mut state = KernelState::new(KernelConfig::default());
        let mut slots = Vec::new();
        for &prio in priorities {
            let slot = state
                .threads
                .insert(Tcb::new(SchedPolicy::Fifo, prio, SigSet::empty()))
                .expect("thread table insert");
            state.all.push_front(&mut state.threads, slot);
            slots.push(slot);
        }
        state.live_threads = slots.len();
        Self { state, slots }
    }
}

/// A bare thread table holding one record per priority.
pub(crate) fn table_with(priorities: &[u8]) -> (ThreadTable, Vec<Slot>) {
    let mut threads = ThreadTable::new();
    let slots = priorities
        .iter()
        .map(|&prio| {
            threads
                .insert(Tcb::new(SchedPolicy::Fifo, prio, SigSet::empty()))
                .expect("thread table insert")
        })
        .collect();
    (threads, slots)
}

/// A started host kernel whose main thread is the calling test thread.
pub(crate) fn host_kernel() -> &'static HostKernel {
    host_kernel_with(KernelConfig::default())
}

pub(crate) fn host_kernel_with(config: KernelConfig) -> &'static HostKernel {
    let kernel = Kernel::new(ManualBoard::new(), config).expect("valid config");
    let kernel: &'static HostKernel = Box::leak(Box::new(kernel));
    kernel.init().expect("kernel init");
    kernel
}
