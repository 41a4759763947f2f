//! Signed singly-linked free lists.
//!
//! Free objects within one slab link to each other through their first
//! word. The link is stored *encoded*: the successor address is mixed with
//! a per-list key and the process-global key, so that an attacker (or a
//! stray write) that corrupts a link produces, after decoding, a pointer
//! that leaves the slab and is caught by the cursor's window check before
//! it can be dereferenced. Detection is fatal; there is no recovery once
//! the heap's integrity is in question.

use core::sync::atomic::{AtomicUsize, Ordering};

use crate::config::{PTR_BITS, SLAB_SIZE};

/// Low half of a pointer; the multiplicative signature lives in the high
/// half so the encoded word still round-trips.
const MASK: usize = (1 << (PTR_BITS / 2)) - 1;

/// Well-known default signing key; `init_global_key` replaces it with
/// entropy before the first list is built.
const DEFAULT_GLOBAL_KEY: usize = 0x9999_9999_9999_9999_u64 as usize;

static GLOBAL_KEY: AtomicUsize = AtomicUsize::new(DEFAULT_GLOBAL_KEY);

/// The process-global component of every link signature.
pub fn global_key() -> usize {
    GLOBAL_KEY.load(Ordering::Relaxed)
}

/// Mix platform entropy into the global key. Call once at startup, before
/// any free list exists; links signed under the old key do not survive.
pub fn init_global_key(entropy: u64) {
    if entropy != 0 {
        GLOBAL_KEY.store(entropy as usize, Ordering::Relaxed);
    }
}

/// Per-link key for the head of a list starting at `addr`.
pub fn initial_key(addr: usize) -> usize {
    addr.wrapping_add(1)
}

/// True when two addresses cannot belong to the same slab.
pub fn different_slab(a: usize, b: usize) -> bool {
    (a ^ b) >= SLAB_SIZE
}

/// A freed object, addressed by its base. The first word of the object
/// holds the encoded link to the next free object on the same slab.
pub struct FreeObject;

impl FreeObject {
    /// The involutive link code: applying it twice with the same keys
    /// yields the original value, so one routine both signs and strips.
    pub fn encode(local_key: usize, next: usize) -> usize {
        let key = local_key ^ global_key();
        next ^ ((next & MASK).wrapping_add(1).wrapping_mul(key) & !MASK)
    }

    /// Store the encoded link to `next` into the object at `obj`.
    ///
    /// # Safety
    /// `obj` must be the base of at least one writable machine word.
    pub unsafe fn store_next(obj: usize, next: usize, key: usize) {
        core::ptr::write(obj as *mut usize, Self::encode(key, next));
        debug_assert!(Self::read_next(obj, key) == next);
    }

    /// Read the link stored in the object at `obj`.
    ///
    /// # Safety
    /// `obj` must be the base of at least one readable machine word.
    pub unsafe fn read_next(obj: usize, key: usize) -> usize {
        Self::encode(key, core::ptr::read(obj as *const usize))
    }
}

/// A position inside a signed list: the current object plus the previous
/// object's address, which doubles as the key for the next link.
#[derive(Clone, Copy)]
struct FreeObjectCursor {
    curr: usize,
    prev: usize,
}

impl FreeObjectCursor {
    const fn new() -> Self {
        Self { curr: 0, prev: 0 }
    }

    fn get_curr(&self) -> usize {
        self.curr
    }

    fn update_cursor(&mut self, next: usize) {
        #[cfg(debug_assertions)]
        if next != 0 && different_slab(self.prev, next) {
            crate::logger::fatal(format_args!(
                "heap corruption - free list crosses slab boundary at {:#x}",
                next
            ));
        }
        self.prev = self.curr;
        self.curr = next;
    }

    fn move_next(&mut self) {
        if different_slab(self.prev, self.curr) {
            crate::logger::fatal(format_args!(
                "heap corruption - free list corrupted at {:#x}",
                self.curr
            ));
        }
        // A list member is always a valid object of its slab; the window
        // check above rejects anything else before we touch it.
        let next = unsafe { FreeObject::read_next(self.curr, self.prev) };
        self.update_cursor(next);
    }

    fn set_next(&mut self, next: usize) {
        unsafe { FreeObject::store_next(self.curr, next, self.prev) };
    }

    fn set_next_and_move(&mut self, next: usize) {
        self.set_next(next);
        self.update_cursor(next);
    }

    fn reset_cursor(&mut self, next: usize) {
        self.prev = initial_key(next);
        self.curr = next;
    }
}

/// Consumer end of a signed list.
#[derive(Clone, Copy)]
pub struct FreeListIter {
    front: FreeObjectCursor,
}

impl FreeListIter {
    pub const fn new() -> Self {
        Self {
            front: FreeObjectCursor::new(),
        }
    }

    pub fn peek(&self) -> usize {
        self.front.get_curr()
    }

    pub fn is_empty(&self) -> bool {
        self.peek() == 0
    }

    /// Pop the head. The list must be non-empty.
    pub fn take(&mut self) -> usize {
        let curr = self.front.get_curr();
        self.front.move_next();
        curr
    }

    /// Push an object on the front, re-keying the head link so iteration
    /// still verifies. The object must belong to the same slab as the
    /// current head.
    pub fn insert(&mut self, addr: usize) {
        debug_assert!(self.is_empty() || !different_slab(self.peek(), addr));
        unsafe { FreeObject::store_next(addr, self.front.get_curr(), initial_key(addr)) };
        self.front.reset_cursor(addr);
    }
}

/// Producer end: builds a signed list over one slab with O(1) append, then
/// hands the finished list to an iterator.
pub struct FreeListBuilder {
    front: FreeObjectCursor,
    end: FreeObjectCursor,
}

impl FreeListBuilder {
    pub const fn new() -> Self {
        Self {
            front: FreeObjectCursor::new(),
            end: FreeObjectCursor::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.front.get_curr() == 0
    }

    /// Prime the list with its first object.
    pub fn open(&mut self, addr: usize) {
        debug_assert!(self.is_empty());
        self.end.reset_cursor(addr);
        self.front.reset_cursor(addr);
    }

    /// Append an object from the same slab.
    pub fn add(&mut self, addr: usize) {
        debug_assert!(!different_slab(self.end.get_curr(), addr));
        self.end.set_next_and_move(addr);
    }

    /// Sign the terminating null link.
    pub fn terminate(&mut self) {
        if !self.is_empty() {
            self.end.set_next(0);
        }
    }

    /// Terminate and move the list into `dst`, leaving this builder empty.
    pub fn close(&mut self, dst: &mut FreeListIter) {
        self.terminate();
        dst.front = self.front;
        self.init();
    }

    pub fn init(&mut self) {
        self.front.reset_cursor(0);
    }
}
