//! Cross-thread deallocation boundary.
//!
//! A thread never touches another thread's free lists. Freeing an object
//! someone else owns goes through two pieces:
//!
//! - [`RemoteAllocator`]: the message-queue endpoint owned by each
//!   allocator. Producers push chains of freed objects with a single
//!   compare-exchange; the owner detaches the whole queue on cold paths.
//! - [`RemoteDeallocCache`]: a small per-thread set of per-destination
//!   batches, so remote frees cost one queue operation per batch rather
//!   than per object.
//!
//! Objects travel the queue linked through their first word with plain
//! (unsigned) links: the signing keys that guard local lists never leave
//! their owning thread.

use core::sync::atomic::{AtomicUsize, Ordering};

/// Identity of a remote allocator, as handed around by the front end.
pub type RemoteId = usize;

/// How many objects a batch may hold before it is posted.
const BATCH_LIMIT: usize = 64;

/// Direct-mapped batch slots per cache.
const REMOTE_SLOTS: usize = 8;

/// Message-queue endpoint of one allocator.
pub struct RemoteAllocator {
    /// Head of a chain of freed objects, linked through their first word.
    queue: AtomicUsize,
}

impl RemoteAllocator {
    pub const fn new() -> Self {
        Self {
            queue: AtomicUsize::new(0),
        }
    }

    /// The identity producers key their batches by.
    pub fn trunc_id(&self) -> RemoteId {
        self as *const RemoteAllocator as usize
    }

    /// Push a chain `first -> ... -> last` of freed objects. The links of
    /// the chain's interior are already in place; only `last`'s link is
    /// (re)written here.
    pub fn post_chain(&self, first: usize, last: usize) {
        debug_assert!(first != 0 && last != 0);
        let mut head = self.queue.load(Ordering::Relaxed);
        loop {
            // The chain is exclusively ours until the exchange succeeds.
            unsafe { core::ptr::write(last as *mut usize, head) };
            match self.queue.compare_exchange_weak(
                head,
                first,
                Ordering::Release,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(current) => head = current,
            }
        }
    }

    /// Owner-side drain: detach the whole queue. Returns the chain head
    /// (0 when empty); the owner walks it through the raw first-word links.
    pub fn drain(&self) -> usize {
        self.queue.swap(0, Ordering::AcqRel)
    }

    /// Walk one raw link of a drained chain.
    ///
    /// # Safety
    /// `obj` must be an element of a chain this thread drained.
    pub unsafe fn chain_next(obj: usize) -> usize {
        core::ptr::read(obj as *const usize)
    }
}

#[derive(Clone, Copy)]
struct Batch {
    id: RemoteId,
    first: usize,
    last: usize,
    count: usize,
}

impl Batch {
    const fn empty() -> Self {
        Self {
            id: 0,
            first: 0,
            last: 0,
            count: 0,
        }
    }
}

/// Per-thread staging area for remote frees.
pub struct RemoteDeallocCache {
    slots: [Batch; REMOTE_SLOTS],
}

impl RemoteDeallocCache {
    pub const fn new() -> Self {
        Self {
            slots: [Batch::empty(); REMOTE_SLOTS],
        }
    }

    fn slot_index(id: RemoteId) -> usize {
        // Spread allocator identities (aligned addresses) across the slots.
        (id >> 4).wrapping_mul(0x9E37_79B9) % REMOTE_SLOTS
    }

    /// Queue `addr` for the allocator identified by `id`. A colliding or
    /// full batch is posted to its destination on the spot.
    pub fn dealloc(&mut self, id: RemoteId, addr: usize) {
        let idx = Self::slot_index(id);
        if self.slots[idx].count != 0 && self.slots[idx].id != id {
            Self::post_batch(&mut self.slots[idx]);
        }

        let batch = &mut self.slots[idx];
        // Chain through the object's first word; the batch is thread-local
        // until posted.
        unsafe { core::ptr::write(addr as *mut usize, batch.first) };
        if batch.count == 0 {
            batch.last = addr;
            batch.id = id;
        }
        batch.first = addr;
        batch.count += 1;

        if batch.count >= BATCH_LIMIT {
            Self::post_batch(batch);
        }
    }

    /// Send every staged batch to its destination queue. Returns true if
    /// anything was posted. `own_id` batches are posted too: the owner
    /// drains its own queue on the next cold path.
    pub fn post(&mut self, own_id: RemoteId) -> bool {
        let _ = own_id;
        let mut sent = false;
        for batch in &mut self.slots {
            if batch.count != 0 {
                Self::post_batch(batch);
                sent = true;
            }
        }
        sent
    }

    fn post_batch(batch: &mut Batch) {
        debug_assert!(batch.count != 0);
        // The id is the queue's address; allocator objects are pooled and
        // never freed, so the endpoint outlives every batch.
        let remote = unsafe { &*(batch.id as *const RemoteAllocator) };
        remote.post_chain(batch.first, batch.last);
        *batch = Batch::empty();
    }
}
