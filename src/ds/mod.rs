//! Data structures shared by the backend and the allocator pool.

pub mod mpmcstack;
pub mod rbtree;

pub use mpmcstack::{MpmcStack, StackNode};
pub use rbtree::{RbPath, RbRep, RbTree};
