//! Consolidating chunk cache over a buddy allocator.
//!
//! [`LargeBuddyRange`] sits between an allocator front and a (usually
//! slower or contended) parent range. Freed chunks are merged with their
//! buddies and kept here; misses refill adaptively from the parent, and a
//! high-watermark policy trims excess back. The buddy's red-black tree
//! nodes live in the pagemap entries of the free chunks themselves
//! ([`BuddyChunkRep`]), so caching a chunk costs nothing beyond the chunk.

use crate::backend::buddy::{Buddy, BuddyRep};
use crate::backend::{AddressRange, Range, SizeSpec};
use crate::bits;
use crate::config::{
    MIN_CHUNK_BITS, MIN_CHUNK_SIZE, PTR_BITS, TRIM_FLOOR_CHUNKS, TRIM_PROVIDED_MULTIPLIER,
};
use crate::ds::rbtree::RbRep;
use crate::pagemap::{self, MetaEntry, Word};

/// Bit of the first pagemap word that carries a tree node's colour. Must
/// stay below the chunk size (so it is never part of a chunk address) and
/// outside the words' reserved low bits.
pub const RED_BIT: usize = 1 << 8;

const _: () = assert!(RED_BIT < MIN_CHUNK_SIZE);
const _: () = assert!(MetaEntry::is_backend_allowed_value(Word::One, RED_BIT));
const _: () = assert!(MetaEntry::is_backend_allowed_value(Word::Two, RED_BIT));

/// Tree-node storage inside pagemap entries.
///
/// A node is the base address of a free chunk span; its left link is backend
/// word one of the span's metadata entry (with the colour packed in
/// [`RED_BIT`]), its right link is word two.
pub struct BuddyChunkRep;

impl BuddyChunkRep {
    fn word(right: bool) -> Word {
        if right {
            Word::Two
        } else {
            Word::One
        }
    }
}

impl RbRep for BuddyChunkRep {
    fn child(node: usize, right: bool) -> usize {
        debug_assert!(node != 0);
        pagemap::get_metaentry(node).backend_get(Self::word(right)) & !RED_BIT
    }

    fn set_child(node: usize, right: bool, value: usize) {
        debug_assert!(node != 0);
        debug_assert!(value & RED_BIT == 0);
        let entry = pagemap::get_metaentry(node);
        let keep = entry.backend_get(Self::word(right)) & RED_BIT;
        entry.backend_set(Self::word(right), value | keep);
    }

    fn is_red(node: usize) -> bool {
        if node == 0 {
            return false;
        }
        pagemap::get_metaentry(node).backend_get(Word::One) & RED_BIT != 0
    }

    fn set_red(node: usize, red: bool) {
        if node == 0 {
            return;
        }
        if Self::is_red(node) != red {
            pagemap::get_metaentry(node).backend_toggle(Word::One, RED_BIT);
        }
    }
}

impl BuddyRep for BuddyChunkRep {
    fn can_consolidate(addr: usize, size: usize) -> bool {
        // The higher of the pair starts a registered range exactly when a
        // reservation boundary separates the two halves.
        let larger = addr.max(bits::buddy(addr, size));
        !pagemap::get_metaentry(larger).is_boundary()
    }
}

/// Buddy-consolidating range layer.
///
/// `REFILL_SIZE_BITS` caps a single refill from the parent;
/// `MIN_REFILL_SIZE_BITS` floors it. `MAX_SIZE_BITS` bounds what the buddy
/// will hold; choosing `PTR_BITS - 1` makes this layer terminal (nothing is
/// ever pushed back to the parent).
pub struct LargeBuddyRange<
    R: Range,
    const REFILL_SIZE_BITS: usize,
    const MAX_SIZE_BITS: usize,
    const MIN_REFILL_SIZE_BITS: usize,
> {
    parent: R,
    /// Bytes pulled from the parent, net of returns.
    requested_total: usize,
    /// Bytes currently handed out to callers.
    provided_total: usize,
    buddy: Buddy<BuddyChunkRep, MIN_CHUNK_BITS, MAX_SIZE_BITS>,
}

impl<
        R: Range,
        const REFILL_SIZE_BITS: usize,
        const MAX_SIZE_BITS: usize,
        const MIN_REFILL_SIZE_BITS: usize,
    > LargeBuddyRange<R, REFILL_SIZE_BITS, MAX_SIZE_BITS, MIN_REFILL_SIZE_BITS>
{
    const REFILL_SIZE: usize = 1 << REFILL_SIZE_BITS;
    const MIN_REFILL_SIZE: usize = 1 << MIN_REFILL_SIZE_BITS;

    /// True when a parent round-trip exists for oversized blocks.
    const HAS_PARENT_PATH: bool = MAX_SIZE_BITS != PTR_BITS - 1;

    pub const fn new(parent: R) -> Self {
        assert!(REFILL_SIZE_BITS <= MAX_SIZE_BITS);
        assert!(MIN_REFILL_SIZE_BITS <= REFILL_SIZE_BITS);
        Self {
            parent,
            requested_total: 0,
            provided_total: 0,
            buddy: Buddy::new(),
        }
    }

    /// Bytes held from the parent.
    pub fn requested_total(&self) -> usize {
        self.requested_total
    }

    /// Bytes currently out with callers.
    pub fn provided_total(&self) -> usize {
        self.provided_total
    }

    /// Bytes parked in the buddy. At any quiescent point,
    /// `requested_total == provided_total + cached_bytes`.
    pub fn cached_bytes(&self) -> usize {
        self.buddy.contains_bytes()
    }

    pub fn parent(&self) -> &R {
        &self.parent
    }

    pub fn parent_mut(&mut self) -> &mut R {
        &mut self.parent
    }

    fn parent_alloc(&mut self, spec: SizeSpec) -> AddressRange {
        let result = self.parent.alloc_range(spec);
        if !result.is_null() {
            self.requested_total += result.length;
        }
        result
    }

    fn parent_dealloc(&mut self, base: usize, size: usize, force: bool) -> bool {
        debug_assert!(Self::HAS_PARENT_PATH);
        let accepted = self.parent.dealloc_range(base, size, force);
        if accepted {
            self.requested_total -= size;
        }
        accepted
    }

    /// Feed `[base, base + length)` to the buddy as naturally aligned
    /// power-of-two blocks. Unaligned edges are dropped (and accounted as
    /// never requested).
    fn add_range(&mut self, base: usize, length: usize) {
        let end = base + length;
        let first = bits::align_up(base, MIN_CHUNK_SIZE);
        let last = bits::align_down(end, MIN_CHUNK_SIZE);
        if first >= last {
            self.requested_total -= length;
            return;
        }
        self.requested_total -= (first - base) + (end - last);

        let mut curr = first;
        while curr < last {
            let align_bits = if curr == 0 {
                PTR_BITS - 1
            } else {
                curr.trailing_zeros() as usize
            };
            let fit_bits = bits::next_pow2_bits(last - curr + 1) - 1;
            let size_bits = align_bits.min(fit_bits).min(MAX_SIZE_BITS - 1);
            let size = bits::one_at_bit(size_bits);

            let overflow = self.buddy.add_block(curr, size);
            if overflow != 0 {
                self.dealloc_overflow(overflow);
            }
            curr += size;
        }
    }

    fn refill(&mut self, spec: SizeSpec) -> AddressRange {
        if R::ALIGNED {
            // Scale the pull to what has been requested so far: small users
            // grow their cache slowly, heavy users converge on REFILL_SIZE.
            // Successive refills double, so adjacent pulls from a contiguous
            // parent can consolidate.
            let mut refill_size = Self::REFILL_SIZE.min(self.requested_total);
            refill_size = refill_size.max(Self::MIN_REFILL_SIZE);
            refill_size = refill_size.max(spec.required);
            refill_size = bits::next_pow2(refill_size);

            let refill_range = self.parent_alloc(SizeSpec::new(refill_size, spec.required));
            if refill_range.is_null() {
                return AddressRange::null();
            }
            self.add_range(
                refill_range.base + spec.required,
                refill_range.length - spec.required,
            );
            return AddressRange::new(refill_range.base, spec.required);
        }

        // Unaligned parent: over-allocate so the aligned block is inside,
        // shrinking the attempt until the parent cooperates.
        let Some(needed_size) = spec.required.checked_mul(2) else {
            return AddressRange::null();
        };
        let mut refill_size = needed_size.max(Self::REFILL_SIZE);
        while needed_size <= refill_size {
            let refill_range = self.parent_alloc(SizeSpec::exact(refill_size));
            if !refill_range.is_null() {
                self.add_range(refill_range.base, refill_range.length);
                return self.alloc_range_impl(spec);
            }
            refill_size >>= 1;
        }
        AddressRange::null()
    }

    fn alloc_range_impl(&mut self, spec: SizeSpec) -> AddressRange {
        debug_assert!(spec.required >= MIN_CHUNK_SIZE);
        debug_assert!(bits::is_pow2(spec.required));

        if spec.required >= bits::one_at_bit(MAX_SIZE_BITS) - 1 {
            if R::ALIGNED {
                return self.parent_alloc(SizeSpec::exact(spec.required));
            }
            return AddressRange::null();
        }

        let addr = self.buddy.remove_block(spec.required);
        if addr == 0 {
            return self.refill(spec);
        }
        AddressRange::new(addr, spec.required)
    }

    /// Handle a block the buddy cannot hold, or (with `overflow == 0`)
    /// check the watermark and voluntarily trim.
    fn dealloc_overflow(&mut self, overflow: usize) {
        if !Self::HAS_PARENT_PATH {
            debug_assert!(overflow == 0, "overflow with no parent path");
            return;
        }

        if overflow != 0 {
            self.parent_dealloc(overflow, bits::one_at_bit(MAX_SIZE_BITS), true);
            return;
        }

        let mut threshold = (self.provided_total * TRIM_PROVIDED_MULTIPLIER)
            .max(TRIM_FLOOR_CHUNKS * MIN_CHUNK_SIZE);
        // provided_total hitting zero mid-run is unlikely; treat it as the
        // owning thread shutting down and return everything.
        if self.provided_total == 0 {
            threshold = 0;
        }
        while self.requested_total > threshold {
            self.invariant();
            let (addr, size) = self.buddy.remove_largest();
            if addr == 0 {
                crate::logger::fatal(format_args!(
                    "chunk cache accounting broken: requested_total={} provided_total={} with empty buddy",
                    self.requested_total, self.provided_total
                ));
            }
            if !self.parent_dealloc(addr, size, false) {
                // Parent is contended; put it back and retry another time.
                self.buddy.add_block(addr, size);
                break;
            }
        }
    }

    fn invariant(&self) {
        #[cfg(debug_assertions)]
        {
            let contains_bytes = self.buddy.contains_bytes();
            if self.requested_total != self.provided_total + contains_bytes {
                panic!(
                    "chunk cache invariant failed: requested_total={} provided_total={} contains_bytes={}",
                    self.requested_total, self.provided_total, contains_bytes
                );
            }
        }
    }
}

impl<
        R: Range,
        const REFILL_SIZE_BITS: usize,
        const MAX_SIZE_BITS: usize,
        const MIN_REFILL_SIZE_BITS: usize,
    > Range for LargeBuddyRange<R, REFILL_SIZE_BITS, MAX_SIZE_BITS, MIN_REFILL_SIZE_BITS>
{
    const ALIGNED: bool = true;
    const CONCURRENCY_SAFE: bool = false;

    fn alloc_range(&mut self, spec: SizeSpec) -> AddressRange {
        let result = self.alloc_range_impl(spec);
        if !result.is_null() {
            self.provided_total += result.length;
        }
        self.invariant();
        result
    }

    fn dealloc_range(&mut self, base: usize, size: usize, _force: bool) -> bool {
        debug_assert!(size >= MIN_CHUNK_SIZE);
        debug_assert!(bits::is_pow2(size));

        self.provided_total -= size;

        if Self::HAS_PARENT_PATH && size >= bits::one_at_bit(MAX_SIZE_BITS) - 1 {
            self.parent_dealloc(base, size, true);
            return true;
        }

        let overflow = self.buddy.add_block(base, size);
        self.dealloc_overflow(overflow);
        self.invariant();
        true
    }

    fn flush(&mut self) {
        if Self::HAS_PARENT_PATH {
            loop {
                let (addr, size) = self.buddy.remove_largest();
                if addr == 0 {
                    break;
                }
                self.parent_dealloc(addr, size, true);
            }
        }
        self.parent.flush();
    }
}
