//! Per-thread allocation cache.
//!
//! One [`LocalCache`] per OS thread holds a signed free list per small
//! sizeclass. Allocation is a sizeclass lookup and a list pop; a miss
//! calls the slab layer's slow path, which returns a freshly populated
//! iterator. Deallocation pushes locally when the object belongs to this
//! thread's allocator, and stages a remote batch otherwise.

use core::sync::atomic::{compiler_fence, AtomicUsize, Ordering};

use crate::mem::entropy::LocalEntropy;
use crate::mem::freelist::FreeListIter;
use crate::mem::remote::{RemoteAllocator, RemoteDeallocCache, RemoteId};
use crate::mem::sizeclass::{size_to_sizeclass, NUM_SMALL_SIZECLASSES};
use crate::mem::stats::AllocStats;

pub struct LocalCache {
    /// Free list per small sizeclass; the whole fast path lives here.
    small_fast_free_lists: [FreeListIter; NUM_SMALL_SIZECLASSES],

    /// This thread's key material.
    pub entropy: LocalEntropy,

    /// Message-queue endpoint of the owning allocator, used to decide
    /// whether a deallocation is local.
    remote_allocator: &'static RemoteAllocator,

    /// Reentrancy marker; see `acquire`/`release`.
    in_use: AtomicUsize,

    /// Staged deallocations for other threads' allocators.
    pub remote_dealloc_cache: RemoteDeallocCache,

    /// Per-sizeclass event counters, merged at teardown.
    pub stats: AllocStats,
}

impl LocalCache {
    pub fn new(remote_allocator: &'static RemoteAllocator, entropy: LocalEntropy) -> Self {
        Self {
            small_fast_free_lists: [FreeListIter::new(); NUM_SMALL_SIZECLASSES],
            entropy,
            remote_allocator,
            in_use: AtomicUsize::new(0),
            remote_dealloc_cache: RemoteDeallocCache::new(),
            stats: AllocStats::new(),
        }
    }

    /// Identity of the owning allocator.
    pub fn owner_id(&self) -> RemoteId {
        self.remote_allocator.trunc_id()
    }

    /// Mark the cache as entered. The enclosing allocator uses this to
    /// assert that a signal handler never re-enters a cache mid-operation.
    pub fn acquire(&self) {
        while self.in_use.fetch_add(1, Ordering::Relaxed) != 0 {
            self.in_use.fetch_sub(1, Ordering::Relaxed);
            core::hint::spin_loop();
        }
    }

    pub fn release(&self) {
        self.in_use.store(0, Ordering::Relaxed);
        compiler_fence(Ordering::SeqCst);
    }

    /// Allocate `size` bytes from the small free lists.
    ///
    /// On a miss, `slowpath` receives the sizeclass and the (empty) list
    /// to repopulate and returns the allocated address (0 on failure).
    pub fn alloc<S>(&mut self, size: usize, slowpath: S) -> usize
    where
        S: FnOnce(usize, &mut FreeListIter) -> usize,
    {
        let Some(sizeclass) = size_to_sizeclass(size) else {
            // Large requests never reach the small path.
            return 0;
        };
        let fl = &mut self.small_fast_free_lists[sizeclass];
        if !fl.is_empty() {
            let addr = fl.take();
            self.stats.get_mut(sizeclass).objects_allocated.inc();
            return addr;
        }
        slowpath(sizeclass, fl)
    }

    /// Return an object owned by this thread's allocator to its list.
    pub fn dealloc_local(&mut self, sizeclass: usize, addr: usize) {
        self.small_fast_free_lists[sizeclass].insert(addr);
        self.stats.get_mut(sizeclass).objects_deallocated.inc();
    }

    /// Stage an object owned by `id` for batched return.
    pub fn dealloc_remote(&mut self, id: RemoteId, addr: usize) {
        debug_assert!(id != self.owner_id());
        self.remote_dealloc_cache.dealloc(id, addr);
    }

    /// Drain every free list into `dealloc` and post pending remote
    /// batches. Used during thread teardown; returns true if remote
    /// messages were sent.
    pub fn flush<D>(&mut self, mut dealloc: D) -> bool
    where
        D: FnMut(usize, usize),
    {
        for sizeclass in 0..NUM_SMALL_SIZECLASSES {
            while !self.small_fast_free_lists[sizeclass].is_empty() {
                let addr = self.small_fast_free_lists[sizeclass].take();
                dealloc(sizeclass, addr);
            }
        }
        self.remote_dealloc_cache.post(self.remote_allocator.trunc_id())
    }
}
