//! Buddy allocator over externally stored trees.
//!
//! Blocks are power-of-two sized and naturally aligned. Per size there is a
//! [`BuddyEntry`]: a two-slot inline cache backed by a red-black tree whose
//! node words live wherever the [`BuddyRep`] puts them (the pagemap, for
//! the chunk-level instantiation). Most entries hold at most two blocks at
//! a time, so the common case never touches the tree.

use crate::bits;
use crate::ds::rbtree::{RbRep, RbTree};

/// Node representation for a buddy allocator: the tree storage interface
/// plus the merge veto.
pub trait BuddyRep: RbRep {
    /// Whether the adjacent buddies `addr` and `addr ^ size` may merge.
    ///
    /// Only called once the buddy is known to be present in this
    /// allocator: probing the metadata of a block that was never handed to
    /// us may fault.
    fn can_consolidate(addr: usize, size: usize) -> bool {
        let _ = (addr, size);
        true
    }
}

/// Free blocks of one size: two inline slots, then a tree.
///
/// `count` is the total occupancy (slots plus tree). With `count <= 2` the
/// tree is empty and the blocks sit in `slots[..count]`; the transition to
/// three blocks spills the slots into the tree, and draining back to two
/// refills them.
pub struct BuddyEntry<R: BuddyRep> {
    tree: RbTree<R>,
    slots: [usize; 2],
    count: usize,
}

impl<R: BuddyRep> BuddyEntry<R> {
    pub const fn new() -> Self {
        Self {
            tree: RbTree::new(),
            slots: [0; 2],
            count: 0,
        }
    }

    fn invariant(&self) {
        debug_assert!(self.count > 2 || self.tree.is_empty());
        debug_assert!(self.count != 1 || self.slots[0] != 0);
        debug_assert!(self.count != 2 || self.slots[1] != 0);
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0 && self.tree.is_empty()
    }

    /// Blocks currently held.
    pub fn len(&self) -> usize {
        self.count
    }

    /// Insert a block, merging it with its buddy when possible.
    ///
    /// Returns 0 on a plain insert, or the base of the merged (doubled)
    /// block the caller must place one size up.
    pub fn add_block(&mut self, mut addr: usize, size: usize) -> usize {
        debug_assert!(bits::align_down(addr, size) == addr);

        if self.count == 0 {
            self.slots[0] = addr;
            self.count += 1;
            self.invariant();
            return 0;
        }

        if self.count == 1 {
            if bits::buddy(self.slots[0], size) == addr && R::can_consolidate(addr, size) {
                self.count = 0;
                self.slots[0] = 0;
                addr = bits::align_down(addr, size * 2);
                self.invariant();
                return addr;
            }
            self.slots[1] = addr;
            self.count += 1;
            self.invariant();
            return 0;
        }

        if self.count == 2 {
            self.tree.insert_elem(self.slots[0]);
            self.tree.insert_elem(self.slots[1]);
            self.slots = [0; 2];
        }

        let mut path = self.tree.get_root_path();
        let buddy = bits::buddy(addr, size);
        if self.tree.find(&mut path, buddy) {
            // Only consult the representation once the buddy is known to be
            // here; its metadata is guaranteed to exist, a stranger's is not.
            if R::can_consolidate(addr, size) {
                self.tree.remove_path(&mut path);
                self.count -= 1;
                if self.count == 2 {
                    self.slots[0] = self.tree.remove_min();
                    self.slots[1] = self.tree.remove_min();
                }
                if self.count == 1 {
                    self.slots[0] = self.tree.remove_min();
                }
                self.invariant();
                return bits::align_down(addr, size * 2);
            }

            // The path ended at the buddy, which stays. Re-traverse for this
            // block's own slot.
            path = self.tree.get_root_path();
            let present = self.tree.find(&mut path, addr);
            debug_assert!(!present, "double free of buddy block");
        }
        // A failed search for the buddy ends at the same null slot this
        // block belongs in: every other aligned block differs above the
        // pair bit, so both keys take the same turns.
        self.count += 1;
        self.tree.insert_path(&mut path, addr);
        self.invariant();
        0
    }

    /// Take any one block out, or 0 when empty.
    pub fn remove_block(&mut self) -> usize {
        if self.count == 0 {
            return 0;
        }

        if self.count < 3 {
            self.count -= 1;
            let addr = self.slots[self.count];
            self.slots[self.count] = 0;
            self.invariant();
            return addr;
        }

        let addr = self.tree.remove_min();
        self.count -= 1;
        if self.count == 2 {
            self.slots[1] = self.tree.remove_min();
            self.slots[0] = self.tree.remove_min();
        }
        self.invariant();
        addr
    }
}

/// Entry table capacity; indices above `MAX_SIZE_BITS - MIN_SIZE_BITS` stay
/// unused.
const MAX_BUDDY_ENTRIES: usize = usize::BITS as usize;

/// Buddy allocator handling blocks of size `2^MIN_SIZE_BITS` inclusive to
/// `2^MAX_SIZE_BITS` exclusive.
pub struct Buddy<R: BuddyRep, const MIN_SIZE_BITS: usize, const MAX_SIZE_BITS: usize> {
    entries: [BuddyEntry<R>; MAX_BUDDY_ENTRIES],
    /// Entries at or above this index are all empty.
    empty_at_or_above: usize,
}

impl<R: BuddyRep, const MIN_SIZE_BITS: usize, const MAX_SIZE_BITS: usize>
    Buddy<R, MIN_SIZE_BITS, MAX_SIZE_BITS>
{
    pub const fn new() -> Self {
        Self {
            entries: [const { BuddyEntry::new() }; MAX_BUDDY_ENTRIES],
            empty_at_or_above: 0,
        }
    }

    fn to_index(size: usize) -> usize {
        debug_assert!(size != 0);
        debug_assert!(bits::is_pow2(size));
        let log = bits::next_pow2_bits(size);
        debug_assert!(log >= MIN_SIZE_BITS, "block too small for this buddy");
        debug_assert!(log < MAX_SIZE_BITS, "block too large for this buddy");
        log - MIN_SIZE_BITS
    }

    fn validate_block(addr: usize, size: usize) {
        debug_assert!(bits::is_pow2(size));
        debug_assert!(addr == bits::align_down(addr, size));
        let _ = (addr, size);
    }

    fn invariant(&self) {
        #[cfg(debug_assertions)]
        {
            for entry in &self.entries[..MAX_SIZE_BITS - MIN_SIZE_BITS] {
                entry.invariant();
            }
            for entry in &self.entries[self.empty_at_or_above..MAX_SIZE_BITS - MIN_SIZE_BITS] {
                debug_assert!(entry.is_empty());
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries[..MAX_SIZE_BITS - MIN_SIZE_BITS]
            .iter()
            .all(BuddyEntry::is_empty)
    }

    /// Total bytes of all blocks currently held.
    pub fn contains_bytes(&self) -> usize {
        self.entries[..MAX_SIZE_BITS - MIN_SIZE_BITS]
            .iter()
            .enumerate()
            .map(|(i, e)| e.len() << (MIN_SIZE_BITS + i))
            .sum()
    }

    /// Add a block, consolidating with present buddies as far as possible.
    ///
    /// The block must be a power of two in `[2^MIN_SIZE_BITS,
    /// 2^MAX_SIZE_BITS)`, aligned to its size. Returns 0 once placed, or
    /// the base of a fully consolidated `2^MAX_SIZE_BITS` block that no
    /// longer fits here and becomes the caller's problem.
    pub fn add_block(&mut self, mut addr: usize, mut size: usize) -> usize {
        let mut idx = Self::to_index(size);
        Self::validate_block(addr, size);

        while size < bits::one_at_bit(MAX_SIZE_BITS) {
            if self.empty_at_or_above < idx + 1 {
                self.empty_at_or_above = idx + 1;
            }
            addr = self.entries[idx].add_block(addr, size);
            if addr == 0 {
                return 0;
            }
            size *= 2;
            idx += 1;
        }

        addr
    }

    /// Remove a block of exactly `request_size` bytes, splitting a larger
    /// block if needed, or 0 when nothing fits.
    pub fn remove_block(&mut self, request_size: usize) -> usize {
        let first_idx = Self::to_index(request_size);
        self.invariant();

        let mut idx = first_idx;
        let mut size = request_size;
        let mut addr;
        loop {
            if idx >= self.empty_at_or_above {
                // Every entry from the request up was empty, so the cursor
                // can drop back down to the request size.
                self.empty_at_or_above = self.empty_at_or_above.min(first_idx);
                return 0;
            }
            addr = self.entries[idx].remove_block();
            if addr != 0 {
                Self::validate_block(addr, size);
                break;
            }
            size *= 2;
            idx += 1;
        }

        // Split down to the requested size: keep the lower half, hand the
        // upper halves back (their buddies are in our hands, so no
        // consolidation can trigger).
        while idx > first_idx {
            size >>= 1;
            idx -= 1;
            self.add_block(addr + size, size);
        }

        self.invariant();
        addr
    }

    /// Remove one of the largest blocks held. Returns `(0, 0)` when empty.
    pub fn remove_largest(&mut self) -> (usize, usize) {
        let top = self.empty_at_or_above.min(MAX_SIZE_BITS - MIN_SIZE_BITS);
        for idx in (0..top).rev() {
            let addr = self.entries[idx].remove_block();
            if addr != 0 {
                return (addr, bits::one_at_bit(MIN_SIZE_BITS + idx));
            }
        }
        (0, 0)
    }
}
