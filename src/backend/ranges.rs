//! Adapter layers of the range pipeline.
//!
//! Each type here adds exactly one behavior around a parent range: talking
//! to the PAL, registering the pagemap, committing pages, locking,
//! singleton/shared lifetime, usage statistics, and call logging.

use core::marker::PhantomData;
use core::sync::atomic::{AtomicUsize, Ordering};

use spin::Mutex;

use crate::backend::{AddressRange, Range, SharedRange, SizeSpec};
use crate::bits;
use crate::config::PTR_BITS;
use crate::pagemap;
use crate::pal::Pal;

// =============================================================================
// EmptyRange — inert leaf
// =============================================================================

/// A range with nothing to give. Useful as the leaf of buddy-only stacks in
/// tests and as the default parent.
#[derive(Default)]
pub struct EmptyRange;

impl EmptyRange {
    pub const fn new() -> Self {
        Self
    }
}

impl Range for EmptyRange {
    const ALIGNED: bool = true;
    const CONCURRENCY_SAFE: bool = true;

    fn alloc_range(&mut self, _spec: SizeSpec) -> AddressRange {
        AddressRange::null()
    }

    fn dealloc_range(&mut self, _base: usize, _size: usize, _force: bool) -> bool {
        debug_assert!(false, "nothing was ever allocated from an EmptyRange");
        true
    }
}

impl SharedRange for EmptyRange {
    fn alloc_shared(&self, _spec: SizeSpec) -> AddressRange {
        AddressRange::null()
    }

    fn dealloc_shared(&self, _base: usize, _size: usize, _force: bool) -> bool {
        debug_assert!(false, "nothing was ever allocated from an EmptyRange");
        true
    }
}

// =============================================================================
// PalRange — leaf over the platform
// =============================================================================

/// Leaf of the pipeline: reserves address space from the PAL. Reservations
/// are permanent; a dealloc is accepted and dropped (decommit is the
/// commit layer's business).
pub struct PalRange<P: Pal> {
    _pal: PhantomData<P>,
}

impl<P: Pal> PalRange<P> {
    pub const fn new() -> Self {
        Self { _pal: PhantomData }
    }

    fn alloc(spec: SizeSpec) -> AddressRange {
        if bits::next_pow2_bits(spec.required) >= PTR_BITS - 1 {
            return AddressRange::null();
        }

        let base = if P::ALIGNED_RESERVE {
            debug_assert!(spec.required >= P::MINIMUM_ALLOC_SIZE);
            P::reserve_aligned(spec.required)
        } else {
            P::reserve(spec.required)
        };

        match base {
            Some(base) => {
                crate::strace!("pal range: reserved {:#x} (+{:#x})", base, spec.required);
                AddressRange::new(base, spec.required)
            }
            None => AddressRange::null(),
        }
    }

    fn dealloc(base: usize, size: usize) -> bool {
        crate::swarn!(
            "pal range: dropping {:#x} (+{:#x}); address space is not returned",
            base,
            size
        );
        true
    }
}

impl<P: Pal> Range for PalRange<P> {
    const ALIGNED: bool = P::ALIGNED_RESERVE;
    const CONCURRENCY_SAFE: bool = true;

    fn alloc_range(&mut self, spec: SizeSpec) -> AddressRange {
        Self::alloc(spec)
    }

    fn dealloc_range(&mut self, base: usize, size: usize, _force: bool) -> bool {
        Self::dealloc(base, size)
    }
}

impl<P: Pal> SharedRange for PalRange<P> {
    fn alloc_shared(&self, spec: SizeSpec) -> AddressRange {
        Self::alloc(spec)
    }

    fn dealloc_shared(&self, base: usize, size: usize, _force: bool) -> bool {
        Self::dealloc(base, size)
    }
}

// =============================================================================
// PagemapRegisterRange — make metadata lookups work
// =============================================================================

/// Registers every range pulled from the parent in the pagemap, so that
/// metadata lookups on the new memory succeed. Registration marks the
/// range's first chunk as a consolidation boundary.
pub struct PagemapRegisterRange<R: Range> {
    parent: R,
}

impl<R: Range> PagemapRegisterRange<R> {
    pub const fn new(parent: R) -> Self {
        Self { parent }
    }
}

impl<R: Range> Range for PagemapRegisterRange<R> {
    const ALIGNED: bool = R::ALIGNED;
    const CONCURRENCY_SAFE: bool = R::CONCURRENCY_SAFE;

    fn alloc_range(&mut self, spec: SizeSpec) -> AddressRange {
        let range = self.parent.alloc_range(spec);
        if range.is_null() {
            return range;
        }
        if let Err(reason) = pagemap::register_range(range.base, range.length) {
            crate::serror!(
                "pagemap registration failed for {:#x} (+{:#x}): {}",
                range.base,
                range.length,
                reason
            );
            self.parent.dealloc_range(range.base, range.length, true);
            return AddressRange::null();
        }
        range
    }

    fn dealloc_range(&mut self, base: usize, size: usize, force: bool) -> bool {
        // Ranges stay registered; metadata must outlive the memory's stay
        // in any cache above.
        self.parent.dealloc_range(base, size, force)
    }

    fn flush(&mut self) {
        self.parent.flush();
    }
}

// =============================================================================
// CommitRange — commit on alloc, decommit on dealloc
// =============================================================================

/// Tells the PAL when memory goes into and out of use. Decommit happens
/// before delegating the dealloc; a refusal from the parent re-commits so
/// the caller still holds usable memory.
pub struct CommitRange<P: Pal, R: Range> {
    parent: R,
    _pal: PhantomData<P>,
}

impl<P: Pal, R: Range> CommitRange<P, R> {
    pub const fn new(parent: R) -> Self {
        Self {
            parent,
            _pal: PhantomData,
        }
    }
}

impl<P: Pal, R: Range> Range for CommitRange<P, R> {
    const ALIGNED: bool = R::ALIGNED;
    const CONCURRENCY_SAFE: bool = R::CONCURRENCY_SAFE;

    fn alloc_range(&mut self, spec: SizeSpec) -> AddressRange {
        debug_assert!(spec.desired % P::PAGE_SIZE == 0);
        debug_assert!(spec.required % P::PAGE_SIZE == 0);

        let range = self.parent.alloc_range(spec);
        if !range.is_null() {
            P::notify_using(range.base, range.length);
        }
        range
    }

    fn dealloc_range(&mut self, base: usize, size: usize, force: bool) -> bool {
        debug_assert!(size % P::PAGE_SIZE == 0);

        P::notify_not_using(base, size);
        let accepted = self.parent.dealloc_range(base, size, force);
        if !accepted {
            P::notify_using(base, size);
        }
        accepted
    }

    fn flush(&mut self) {
        self.parent.flush();
    }
}

// =============================================================================
// LockRange — serialize a non-concurrency-safe parent
// =============================================================================

/// Spin-lock serialization. This sits on cold paths only, so a simple spin
/// lock is enough. Non-forcing deallocs use the try path and report
/// refusal on contention, which is the signal that lets voluntary trimming
/// back off instead of blocking.
pub struct LockRange<R: Range> {
    parent: Mutex<R>,
}

impl<R: Range> LockRange<R> {
    pub const fn new(parent: R) -> Self {
        Self {
            parent: Mutex::new(parent),
        }
    }
}

impl<R: Range> Range for LockRange<R> {
    const ALIGNED: bool = R::ALIGNED;
    const CONCURRENCY_SAFE: bool = true;

    fn alloc_range(&mut self, spec: SizeSpec) -> AddressRange {
        self.alloc_shared(spec)
    }

    fn dealloc_range(&mut self, base: usize, size: usize, force: bool) -> bool {
        self.dealloc_shared(base, size, force)
    }

    fn flush(&mut self) {
        self.flush_shared();
    }
}

impl<R: Range> SharedRange for LockRange<R> {
    fn alloc_shared(&self, spec: SizeSpec) -> AddressRange {
        self.parent.lock().alloc_range(spec)
    }

    fn dealloc_shared(&self, base: usize, size: usize, force: bool) -> bool {
        if force {
            return self.parent.lock().dealloc_range(base, size, true);
        }
        match self.parent.try_lock() {
            Some(mut parent) => parent.dealloc_range(base, size, true),
            None => false,
        }
    }

    fn flush_shared(&self) {
        self.parent.lock().flush();
    }
}

// =============================================================================
// StaticRange / IndirectRange — lifetime adapters
// =============================================================================

/// Provider of a process-global backend singleton.
///
/// The embedder declares the static (typically a [`LockRange`] around the
/// consolidating stack) and points this trait at it.
pub trait BackendGlobal {
    type Parent: SharedRange + 'static;

    fn global() -> &'static Self::Parent;
}

/// Adapts the global singleton named by `G` into a per-allocator range.
pub struct StaticRange<G: BackendGlobal> {
    _global: PhantomData<G>,
}

impl<G: BackendGlobal> StaticRange<G> {
    pub const fn new() -> Self {
        Self {
            _global: PhantomData,
        }
    }
}

impl<G: BackendGlobal> Range for StaticRange<G> {
    const ALIGNED: bool = <G::Parent as Range>::ALIGNED;
    const CONCURRENCY_SAFE: bool = true;

    fn alloc_range(&mut self, spec: SizeSpec) -> AddressRange {
        G::global().alloc_shared(spec)
    }

    fn dealloc_range(&mut self, base: usize, size: usize, force: bool) -> bool {
        G::global().dealloc_shared(base, size, force)
    }

    fn flush(&mut self) {
        // The parent is shared; flushing it is not this instance's call.
    }
}

impl<G: BackendGlobal> SharedRange for StaticRange<G> {
    fn alloc_shared(&self, spec: SizeSpec) -> AddressRange {
        G::global().alloc_shared(spec)
    }

    fn dealloc_shared(&self, base: usize, size: usize, force: bool) -> bool {
        G::global().dealloc_shared(base, size, force)
    }
}

/// Holds a reference to a shared parent range, so several allocators can
/// sit on one region without `static` scope.
pub struct IndirectRange<R: SharedRange + 'static> {
    parent: Option<&'static R>,
}

impl<R: SharedRange + 'static> IndirectRange<R> {
    pub const fn new() -> Self {
        Self { parent: None }
    }

    pub const fn with_parent(parent: &'static R) -> Self {
        Self {
            parent: Some(parent),
        }
    }

    /// Point this range at its parent. Must happen before use.
    pub fn set_parent(&mut self, parent: &'static R) {
        self.parent = Some(parent);
    }

    fn parent(&self) -> Option<&'static R> {
        if self.parent.is_none() {
            crate::serror!("indirect range used before set_parent");
        }
        self.parent
    }
}

impl<R: SharedRange + 'static> Range for IndirectRange<R> {
    const ALIGNED: bool = R::ALIGNED;
    const CONCURRENCY_SAFE: bool = true;

    fn alloc_range(&mut self, spec: SizeSpec) -> AddressRange {
        match self.parent() {
            Some(parent) => parent.alloc_shared(spec),
            None => AddressRange::null(),
        }
    }

    fn dealloc_range(&mut self, base: usize, size: usize, force: bool) -> bool {
        match self.parent() {
            Some(parent) => parent.dealloc_shared(base, size, force),
            None => true,
        }
    }

    fn flush(&mut self) {
        if let Some(parent) = self.parent {
            parent.flush_shared();
        }
    }
}

// =============================================================================
// StatsRange — usage accounting
// =============================================================================

/// Read side of [`StatsRange`], also implemented by [`StatsCombiner`].
pub trait UsageStats {
    fn current_usage(&self) -> usize;

    fn peak_usage(&self) -> usize;
}

/// Tracks current and peak bytes obtained through this layer.
pub struct StatsRange<R: Range> {
    parent: R,
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl<R: Range> StatsRange<R> {
    pub const fn new(parent: R) -> Self {
        Self {
            parent,
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    fn note_alloc(&self, length: usize) {
        let prev = self.current.fetch_add(length, Ordering::Relaxed);
        let mut curr = self.peak.load(Ordering::Relaxed);
        while curr < prev + length {
            match self.peak.compare_exchange_weak(
                curr,
                prev + length,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(now) => curr = now,
            }
        }
    }
}

impl<R: Range> Range for StatsRange<R> {
    const ALIGNED: bool = R::ALIGNED;
    const CONCURRENCY_SAFE: bool = R::CONCURRENCY_SAFE;

    fn alloc_range(&mut self, spec: SizeSpec) -> AddressRange {
        let result = self.parent.alloc_range(spec);
        if !result.is_null() {
            self.note_alloc(result.length);
        }
        result
    }

    fn dealloc_range(&mut self, base: usize, size: usize, force: bool) -> bool {
        let accepted = self.parent.dealloc_range(base, size, force);
        if accepted {
            self.current.fetch_sub(size, Ordering::Relaxed);
        }
        accepted
    }

    fn flush(&mut self) {
        self.parent.flush();
    }
}

impl<R: Range> UsageStats for StatsRange<R> {
    fn current_usage(&self) -> usize {
        self.current.load(Ordering::Relaxed)
    }

    fn peak_usage(&self) -> usize {
        self.peak.load(Ordering::Relaxed)
    }
}

impl<T: UsageStats> UsageStats for &T {
    fn current_usage(&self) -> usize {
        (**self).current_usage()
    }

    fn peak_usage(&self) -> usize {
        (**self).peak_usage()
    }
}

/// Sums two stats fronts (e.g. the chunk path and the metadata path).
pub struct StatsCombiner<A: UsageStats, B: UsageStats> {
    a: A,
    b: B,
}

impl<A: UsageStats, B: UsageStats> StatsCombiner<A, B> {
    pub const fn new(a: A, b: B) -> Self {
        Self { a, b }
    }
}

impl<A: UsageStats, B: UsageStats> UsageStats for StatsCombiner<A, B> {
    fn current_usage(&self) -> usize {
        self.a.current_usage() + self.b.current_usage()
    }

    fn peak_usage(&self) -> usize {
        self.a.peak_usage() + self.b.peak_usage()
    }
}

// =============================================================================
// LogRange — call tracing
// =============================================================================

/// Logs every call through it, tagged with `NAME` to tell instances apart.
/// The output is compiled in only with the `trace` feature; the layer
/// otherwise forwards untouched.
pub struct LogRange<const NAME: usize, R: Range> {
    parent: R,
}

impl<const NAME: usize, R: Range> LogRange<NAME, R> {
    pub const fn new(parent: R) -> Self {
        Self { parent }
    }
}

impl<const NAME: usize, R: Range> Range for LogRange<NAME, R> {
    const ALIGNED: bool = R::ALIGNED;
    const CONCURRENCY_SAFE: bool = R::CONCURRENCY_SAFE;

    fn alloc_range(&mut self, spec: SizeSpec) -> AddressRange {
        #[cfg(feature = "trace")]
        crate::sdebug!(
            "range {}: alloc_range(desired={:#x}, required={:#x})",
            NAME,
            spec.desired,
            spec.required
        );
        let range = self.parent.alloc_range(spec);
        #[cfg(feature = "trace")]
        crate::sdebug!(
            "range {}: alloc_range -> {:#x} (+{:#x})",
            NAME,
            range.base,
            range.length
        );
        range
    }

    fn dealloc_range(&mut self, base: usize, size: usize, force: bool) -> bool {
        #[cfg(feature = "trace")]
        crate::sdebug!(
            "range {}: dealloc_range({:#x}, {:#x}, force={})",
            NAME,
            base,
            size,
            force
        );
        let accepted = self.parent.dealloc_range(base, size, force);
        #[cfg(feature = "trace")]
        crate::sdebug!("range {}: dealloc_range -> {}", NAME, accepted);
        accepted
    }

    fn flush(&mut self) {
        self.parent.flush();
    }
}
