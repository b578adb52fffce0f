//! Storage for kernel objects and thread stacks.

pub(crate) mod arena;
pub mod stack;

pub use arena::RawHandle;
pub use stack::Stack;
