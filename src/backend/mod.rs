//! The address-space backend.
//!
//! This module contains the pipeline of composable "range" layers that
//! turns raw PAL reservations into chunk-aligned, committed, consolidated
//! memory:
//! - the range contract (`SizeSpec`, `AddressRange`, `Range`, `SharedRange`)
//! - the buddy allocator over pagemap-resident red-black trees
//! - the consolidating chunk cache (`LargeBuddyRange`)
//! - the adapter layers (PAL leaf, pagemap registration, commit, locking,
//!   singleton/shared lifetime, statistics, logging)
//!
//! Layers compose by value: each wrapper owns its parent, and every call is
//! resolved monomorphically. A typical backend is built bottom-up as
//! `PalRange -> PagemapRegisterRange -> CommitRange -> LargeBuddyRange ->
//! LockRange`, published as a process singleton, and fronted per allocator
//! through `StaticRange` (plus `StatsRange`/`LogRange` shims).

pub mod buddy;
pub mod largebuddy;
pub mod ranges;

// Re-export commonly used items.
pub use buddy::{Buddy, BuddyEntry, BuddyRep};
pub use largebuddy::{BuddyChunkRep, LargeBuddyRange, RED_BIT};
pub use ranges::{
    BackendGlobal, CommitRange, EmptyRange, IndirectRange, LockRange, LogRange,
    PagemapRegisterRange, PalRange, StaticRange, StatsCombiner, StatsRange, UsageStats,
};

/// Request handed to `alloc_range`: grant at least `required`, ideally
/// `desired`. Both are powers of two and `required <= desired`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SizeSpec {
    pub desired: usize,
    pub required: usize,
}

impl SizeSpec {
    pub const fn new(desired: usize, required: usize) -> Self {
        debug_assert!(required <= desired);
        Self { desired, required }
    }

    pub const fn exact(size: usize) -> Self {
        Self {
            desired: size,
            required: size,
        }
    }
}

/// A granted range. `base == 0` signals allocation failure; a successful
/// grant has a power-of-two `length` with `base` naturally aligned once the
/// buddy layer is below.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AddressRange {
    pub base: usize,
    pub length: usize,
}

impl AddressRange {
    pub const fn new(base: usize, length: usize) -> Self {
        Self { base, length }
    }

    pub const fn null() -> Self {
        Self { base: 0, length: 0 }
    }

    pub const fn is_null(&self) -> bool {
        self.base == 0
    }
}

/// One layer of the address-space pipeline.
///
/// `dealloc_range` may return `false` only when `force` is false; a refusal
/// means "try again later" (the layer could not take the memory back
/// without blocking) and is flow control, not an error.
pub trait Range {
    /// Does this layer hand out naturally aligned blocks?
    const ALIGNED: bool;

    /// May this layer be driven from several threads at once?
    const CONCURRENCY_SAFE: bool;

    fn alloc_range(&mut self, spec: SizeSpec) -> AddressRange;

    fn dealloc_range(&mut self, base: usize, size: usize, force: bool) -> bool;

    /// Return every cached resource to the parent.
    fn flush(&mut self) {}
}

/// The range operations through a shared reference.
///
/// Implemented exactly by the layers that are safe to drive concurrently
/// (`CONCURRENCY_SAFE`), which is what lets them be published as statics.
/// Layers that adapt a shared parent (`StaticRange`, `IndirectRange`)
/// bound it by this trait, so "requires a concurrency-safe parent" is a
/// compile error rather than a runtime assertion.
pub trait SharedRange: Range {
    fn alloc_shared(&self, spec: SizeSpec) -> AddressRange;

    fn dealloc_shared(&self, base: usize, size: usize, force: bool) -> bool;

    fn flush_shared(&self) {}
}
