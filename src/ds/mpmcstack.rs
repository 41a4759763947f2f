//! Concurrent stack of intrusively linked objects.
//!
//! Used by the allocator pool: nodes are pool entries that are never freed,
//! and the link word lives inside the node itself. Pushes are single
//! compare-exchange operations; pops are serialized by a one-word spin so
//! that a node re-pushed while another thread is mid-pop cannot swap a
//! stale link under the head (the ABA case).

use core::ptr::{self, NonNull};
use core::sync::atomic::{AtomicBool, AtomicPtr, Ordering};

/// Implemented by objects that can live on an [`MpmcStack`].
pub trait StackNode: Sized {
    /// The intrusive link word.
    fn next(&self) -> &AtomicPtr<Self>;
}

pub struct MpmcStack<T: StackNode> {
    head: AtomicPtr<T>,
    pop_lock: AtomicBool,
}

impl<T: StackNode> MpmcStack<T> {
    pub const fn new() -> Self {
        Self {
            head: AtomicPtr::new(ptr::null_mut()),
            pop_lock: AtomicBool::new(false),
        }
    }

    pub fn push(&self, node: NonNull<T>) {
        self.push_list(node, node);
    }

    /// Push a chain of nodes already linked `first -> ... -> last`.
    pub fn push_list(&self, first: NonNull<T>, last: NonNull<T>) {
        let mut head = self.head.load(Ordering::Relaxed);
        loop {
            unsafe { last.as_ref() }.next().store(head, Ordering::Relaxed);
            match self.head.compare_exchange_weak(
                head,
                first.as_ptr(),
                Ordering::Release,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(current) => head = current,
            }
        }
    }

    pub fn pop(&self) -> Option<NonNull<T>> {
        while self.pop_lock.swap(true, Ordering::Acquire) {
            core::hint::spin_loop();
        }
        let popped = loop {
            let head = self.head.load(Ordering::Acquire);
            let Some(node) = NonNull::new(head) else {
                break None;
            };
            // Nodes are never freed, so reading the link of a node another
            // thread may just have pushed is always a valid load.
            let next = unsafe { node.as_ref() }.next().load(Ordering::Relaxed);
            if self
                .head
                .compare_exchange(head, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                break Some(node);
            }
        };
        self.pop_lock.store(false, Ordering::Release);
        popped
    }

    /// Detach the whole stack. The caller owns the returned chain and walks
    /// it through [`StackNode::next`].
    pub fn pop_all(&self) -> Option<NonNull<T>> {
        NonNull::new(self.head.swap(ptr::null_mut(), Ordering::AcqRel))
    }
}
