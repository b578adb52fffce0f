//! Signals: numbering, sets, dispositions, routing and the user API.
//!
//! Routing and delivery live in [`dispatch`] as methods on the kernel
//! state; the POSIX-shaped calls built on them are in `api`.

mod action;
mod api;
pub(crate) mod dispatch;
mod set;

pub use action::{Disposition, Handler, SigAction, SigCode, SigInfo};
pub use api::{CancelState, CancelType};
pub use set::{MaskHow, SigSet, Signal, NSIG};
