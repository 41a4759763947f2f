//! Pool of reusable allocator objects.
//!
//! Instances are allocated once through a [`PoolSource`] and never freed;
//! they cycle between "in use" and "on the free stack". Besides the
//! concurrent acquire/release pair, the pool keeps a linked list of every
//! instance ever created so diagnostics and teardown can visit all of them
//! (not thread-safe; callable only when no concurrent allocator activity
//! is possible).

use core::ptr::NonNull;
use core::sync::atomic::{AtomicBool, AtomicPtr, Ordering};

use spin::Mutex;

use crate::ds::mpmcstack::{MpmcStack, StackNode};

/// Intrusive pool state embedded in every pooled object.
pub struct PoolLinks<T> {
    /// Free-stack link.
    next: AtomicPtr<T>,
    /// "Every instance ever" link; written once under the state lock.
    list_next: AtomicPtr<T>,
    in_use: AtomicBool,
}

impl<T> PoolLinks<T> {
    pub const fn new() -> Self {
        Self {
            next: AtomicPtr::new(core::ptr::null_mut()),
            list_next: AtomicPtr::new(core::ptr::null_mut()),
            in_use: AtomicBool::new(false),
        }
    }

    pub fn in_use(&self) -> bool {
        self.in_use.load(Ordering::Relaxed)
    }
}

/// Implemented by types that live in a pool.
pub trait Pooled: Sized {
    fn pool_links(&self) -> &PoolLinks<Self>;
}

impl<T: Pooled> StackNode for T {
    fn next(&self) -> &AtomicPtr<T> {
        &self.pool_links().next
    }
}

/// Storage provider for fresh pool entries; typically backed by the
/// backend's metadata path.
pub trait PoolSource<T> {
    /// Produce a new, fully initialized instance. It will never be freed.
    fn create() -> Option<NonNull<T>>;
}

/// Shared state of one pool.
pub struct PoolState<T: Pooled> {
    stack: MpmcStack<T>,
    /// Guards `list`; taken only when a fresh instance is linked in.
    lock: Mutex<()>,
    list: AtomicPtr<T>,
}

impl<T: Pooled> PoolState<T> {
    pub const fn new() -> Self {
        Self {
            stack: MpmcStack::new(),
            lock: Mutex::new(()),
            list: AtomicPtr::new(core::ptr::null_mut()),
        }
    }
}

/// Outcome of one allocator's `debug_check_empty` visit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DebugCheck {
    /// The instance holds no allocations.
    pub empty: bool,
    /// Checking caused messages (e.g. posted remote batches), so the sweep
    /// must run again before the verdict is final.
    pub sent_messages: bool,
}

pub struct Pool;

impl Pool {
    /// Pop a reusable instance or create a fresh one.
    ///
    /// Reused instances come back exactly as released: no constructor or
    /// destructor runs between uses.
    pub fn acquire<T: Pooled, S: PoolSource<T>>(state: &PoolState<T>) -> NonNull<T> {
        if let Some(p) = state.stack.pop() {
            unsafe { p.as_ref() }.pool_links().in_use.store(true, Ordering::Relaxed);
            return p;
        }

        let Some(p) = S::create() else {
            crate::logger::fatal(format_args!(
                "pool: failed to create a new instance; cannot initialize allocator"
            ));
        };

        {
            let _guard = state.lock.lock();
            let links = unsafe { p.as_ref() }.pool_links();
            links
                .list_next
                .store(state.list.load(Ordering::Relaxed), Ordering::Relaxed);
            state.list.store(p.as_ptr(), Ordering::Relaxed);
        }

        unsafe { p.as_ref() }.pool_links().in_use.store(true, Ordering::Relaxed);
        p
    }

    /// Return an instance obtained from `acquire`. The object is not torn
    /// down; it will be reused as-is.
    pub fn release<T: Pooled>(state: &PoolState<T>, p: NonNull<T>) {
        unsafe { p.as_ref() }
            .pool_links()
            .in_use
            .store(false, Ordering::Relaxed);
        state.stack.push(p);
    }

    /// Detach the whole free stack. Walk it with `extract_next`; return it
    /// with `restore`. Do not mix with `release`.
    pub fn extract<T: Pooled>(state: &PoolState<T>) -> Option<NonNull<T>> {
        state.stack.pop_all()
    }

    /// Successor of `p` in an extracted chain.
    pub fn extract_next<T: Pooled>(p: NonNull<T>) -> Option<NonNull<T>> {
        NonNull::new(unsafe { p.as_ref() }.pool_links().next.load(Ordering::Relaxed))
    }

    /// Push back a chain previously obtained from `extract`.
    pub fn restore<T: Pooled>(state: &PoolState<T>, first: NonNull<T>, last: NonNull<T>) {
        state.stack.push_list(first, last);
    }

    /// Visit the instances ever created: `iterate(state, None)` starts,
    /// `iterate(state, Some(p))` continues. Not thread-safe; a diagnostic
    /// operation for quiescent moments only.
    pub fn iterate<T: Pooled>(
        state: &PoolState<T>,
        p: Option<NonNull<T>>,
    ) -> Option<NonNull<T>> {
        match p {
            None => NonNull::new(state.list.load(Ordering::Relaxed)),
            Some(p) => NonNull::new(
                unsafe { p.as_ref() }
                    .pool_links()
                    .list_next
                    .load(Ordering::Relaxed),
            ),
        }
    }

    /// Flush every instance parked on the free stack, then put the stack
    /// back. Lets idle allocators return their cached memory without a
    /// thread attached.
    pub fn cleanup_unused<T: Pooled, F>(state: &PoolState<T>, mut flush: F)
    where
        F: FnMut(&mut T),
    {
        let Some(first) = Self::extract(state) else {
            return;
        };
        let mut last = first;
        let mut curr = Some(first);
        while let Some(mut p) = curr {
            flush(unsafe { p.as_mut() });
            last = p;
            curr = Self::extract_next(p);
        }
        Self::restore(state, first, last);
    }

    /// Check that every instance ever created is empty, re-sweeping while
    /// flushes keep producing messages. Diagnostic only, not thread-safe.
    pub fn debug_check_empty<T: Pooled, F>(state: &PoolState<T>, mut check: F) -> bool
    where
        F: FnMut(&mut T) -> DebugCheck,
    {
        loop {
            let mut okay = true;
            let mut sent = false;
            let mut curr = Self::iterate(state, None);
            while let Some(mut p) = curr {
                let result = check(unsafe { p.as_mut() });
                okay &= result.empty;
                sent |= result.sent_messages;
                curr = Self::iterate(state, Some(p));
            }
            if !sent {
                return okay;
            }
        }
    }
}
