//! Architecture abstraction for context switching and interrupt masking.
//!
//! The scheduler never touches registers. It asks the [`Arch`]
//! implementation to prepare a context for a new thread, to transfer
//! control between two saved contexts, and to mask interrupts around the
//! idle wait.

use crate::errors::KResult;
use crate::mem::Stack;

/// Architecture abstraction trait.
///
/// # Safety
///
/// Implementations transfer control between stacks. All methods marked as
/// unsafe have preconditions that must be upheld by the caller.
pub trait Arch: 'static {
    /// Everything needed to resume a suspended thread. Opaque to the
    /// scheduler.
    type SavedContext: Send + Default;

    /// Prepare `ctx` so that switching to it calls `entry(arg)` on `stack`.
    ///
    /// # Safety
    ///
    /// - `stack` must outlive every use of `ctx`
    /// - `entry` must never return; it leaves through [`Arch::context_exit`]
    unsafe fn init_context(
        ctx: &mut Self::SavedContext,
        stack: &Stack,
        entry: fn(usize),
        arg: usize,
    ) -> KResult<()>;

    /// Save the running context into `prev` and resume `next`. Returns when
    /// some later switch resumes `prev`.
    ///
    /// # Safety
    ///
    /// - `prev` must be the context of the caller
    /// - `next` must point to a context prepared by `init_context` or saved
    ///   by an earlier switch
    /// - both must stay valid until `prev` is resumed
    unsafe fn context_switch(prev: *mut Self::SavedContext, next: *const Self::SavedContext);

    /// Resume `next` and abandon the calling context for good.
    ///
    /// # Safety
    ///
    /// Same requirements on `next` as [`Arch::context_switch`]. Nothing on
    /// the caller's stack may be relied on afterwards.
    unsafe fn context_exit(next: *const Self::SavedContext) -> !;

    /// Processor interrupt state captured by [`Arch::disable_interrupts`].
    type IrqState: Copy;

    /// Mask interrupts and return the state to restore afterwards.
    fn disable_interrupts() -> Self::IrqState;

    /// Put back the state an earlier [`Arch::disable_interrupts`] returned.
    fn restore_interrupts(saved: Self::IrqState);
}

#[cfg(any(test, feature = "std-shim"))]
pub mod host;
#[cfg(target_arch = "sparc")]
pub mod sparc;

#[cfg(target_arch = "sparc")]
pub use sparc::SparcArch as DefaultArch;

#[cfg(all(not(target_arch = "sparc"), any(test, feature = "std-shim")))]
pub use host::HostArch as DefaultArch;

#[cfg(all(not(target_arch = "sparc"), not(test), not(feature = "std-shim")))]
compile_error!("leon-pthreads targets SPARC LEON. Build for a sparc target or enable the std-shim feature on the host.");
