//! Per-chunk metadata entries and the flat pagemap.
//!
//! The pagemap is a process-global sparse array with one [`MetaEntry`] per
//! chunk, indexed by `address >> MIN_CHUNK_BITS`. Each entry is two machine
//! words. The low [`RESERVED_BITS`] bits of every word belong to the front
//! end; the remaining bits are free for the backend, which uses them to
//! store the red-black tree links of the buddy allocator. Entry storage is
//! reserved from the PAL once at `init` and never moves.

use core::mem::size_of;
use core::sync::atomic::{AtomicUsize, Ordering};

use crate::bits;
use crate::config::MIN_CHUNK_BITS;
use crate::pal::Pal;

/// Number of low bits in each metadata word reserved for the front end.
/// Backend values must keep these bits zero.
pub const RESERVED_BITS: usize = 8;

/// Mask of the reserved low bits.
pub const RESERVED_MASK: usize = (1 << RESERVED_BITS) - 1;

/// Bit in word one marking the first chunk of a registered range. A set
/// boundary bit means the chunk below it came from a different reservation
/// and must never be consolidated across.
const BOUNDARY_BIT: usize = 1 << 0;

/// Selects one of the two words of a [`MetaEntry`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Word {
    One,
    Two,
}

/// One pagemap slot.
///
/// The words are atomics only so the global map is `Sync`; every mutation
/// happens under the exclusion of the range layer that owns the chunk, so
/// relaxed ordering suffices throughout.
#[repr(C)]
pub struct MetaEntry {
    word_one: AtomicUsize,
    word_two: AtomicUsize,
}

impl MetaEntry {
    pub const fn new() -> Self {
        Self {
            word_one: AtomicUsize::new(0),
            word_two: AtomicUsize::new(0),
        }
    }

    fn word(&self, which: Word) -> &AtomicUsize {
        match which {
            Word::One => &self.word_one,
            Word::Two => &self.word_two,
        }
    }

    /// True if `value` only uses bits the backend is allowed to touch.
    pub const fn is_backend_allowed_value(_which: Word, value: usize) -> bool {
        value & RESERVED_MASK == 0
    }

    /// Raw backend view of a word (reserved bits stripped).
    pub fn backend_get(&self, which: Word) -> usize {
        self.word(which).load(Ordering::Relaxed) & !RESERVED_MASK
    }

    /// Store a backend value, preserving the reserved low bits.
    pub fn backend_set(&self, which: Word, value: usize) {
        debug_assert!(Self::is_backend_allowed_value(which, value));
        let w = self.word(which);
        let keep = w.load(Ordering::Relaxed) & RESERVED_MASK;
        w.store(value | keep, Ordering::Relaxed);
    }

    /// Flip selected backend bits in place, preserving everything else.
    pub fn backend_toggle(&self, which: Word, mask: usize) {
        debug_assert!(Self::is_backend_allowed_value(which, mask));
        let w = self.word(which);
        w.store(w.load(Ordering::Relaxed) ^ mask, Ordering::Relaxed);
    }

    /// Whether this chunk starts a registered range.
    pub fn is_boundary(&self) -> bool {
        self.word_one.load(Ordering::Relaxed) & BOUNDARY_BIT != 0
    }

    fn set_boundary(&self) {
        self.word_one.fetch_or(BOUNDARY_BIT, Ordering::Relaxed);
    }
}

/// Bounded flat pagemap covering `[base, end)`.
///
/// Fields are atomics so the singleton can be const-constructed and filled
/// in by `init`; after `init` they are effectively immutable.
pub struct FlatPagemap {
    base: AtomicUsize,
    end: AtomicUsize,
    entries: AtomicUsize,
}

impl FlatPagemap {
    pub const fn new() -> Self {
        Self {
            base: AtomicUsize::new(0),
            end: AtomicUsize::new(0),
            entries: AtomicUsize::new(0),
        }
    }

    /// Set up metadata storage for the region `[base, base + size)`.
    ///
    /// `base` and `size` must be chunk-aligned. Storage for the entries is
    /// reserved from the PAL, committed, and zeroed.
    pub fn init<P: Pal>(&self, base: usize, size: usize) -> Result<(), &'static str> {
        if base % (1 << MIN_CHUNK_BITS) != 0 || size % (1 << MIN_CHUNK_BITS) != 0 {
            return Err("pagemap: region must be chunk-aligned");
        }
        if self.entries.load(Ordering::Acquire) != 0 {
            return Err("pagemap: already initialized");
        }

        let count = size >> MIN_CHUNK_BITS;
        let bytes = bits::align_up(count * size_of::<MetaEntry>(), P::PAGE_SIZE);
        let store = P::reserve(bytes).ok_or("pagemap: out of address space")?;
        P::notify_using(store, bytes);
        P::zero(store, bytes);

        self.base.store(base, Ordering::Relaxed);
        self.end.store(base + size, Ordering::Relaxed);
        self.entries.store(store, Ordering::Release);
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.entries.load(Ordering::Acquire) != 0
    }

    /// Metadata entry for the chunk containing `addr`.
    ///
    /// `addr` must lie inside the covered region; the backend only asks for
    /// entries of chunks it has been handed, which are registered by
    /// construction.
    pub fn get_metaentry(&self, addr: usize) -> &'static MetaEntry {
        let store = self.entries.load(Ordering::Acquire);
        let base = self.base.load(Ordering::Relaxed);
        let end = self.end.load(Ordering::Relaxed);
        if store == 0 || addr < base || addr >= end {
            crate::logger::fatal(format_args!(
                "pagemap: metaentry lookup outside covered region: {:#x}",
                addr
            ));
        }
        let idx = (addr - base) >> MIN_CHUNK_BITS;
        // Entry storage was sized for every chunk in [base, end) at init
        // and is never released.
        unsafe { &*(store as *const MetaEntry).add(idx) }
    }

    /// Record a freshly allocated range so metadata lookups succeed, and
    /// mark its first chunk as a consolidation boundary.
    pub fn register_range(&self, base: usize, length: usize) -> Result<(), &'static str> {
        let map_base = self.base.load(Ordering::Relaxed);
        let map_end = self.end.load(Ordering::Relaxed);
        if !self.is_initialized() {
            return Err("pagemap: not initialized");
        }
        if base < map_base || base + length > map_end {
            return Err("pagemap: range outside covered region");
        }
        self.get_metaentry(base).set_boundary();
        Ok(())
    }
}

/// The process-wide pagemap.
pub static PAGEMAP: FlatPagemap = FlatPagemap::new();

/// Initialize the global pagemap. Must happen before any range layer runs.
pub fn init<P: Pal>(base: usize, size: usize) -> Result<(), &'static str> {
    PAGEMAP.init::<P>(base, size)
}

pub fn get_metaentry(addr: usize) -> &'static MetaEntry {
    PAGEMAP.get_metaentry(addr)
}

pub fn register_range(base: usize, length: usize) -> Result<(), &'static str> {
    PAGEMAP.register_range(base, length)
}
