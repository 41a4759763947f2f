//! Compile-time configuration for the allocator core.
//!
//! Sizes that vary per deployment (refill ceiling, maximum buddy size) are
//! const generics on the types that use them; the values here are the
//! defaults and the process-wide constants every layer agrees on.

/// log2 of the chunk size. One pagemap entry covers one chunk.
pub const MIN_CHUNK_BITS: usize = 14;

/// The smallest block the chunk-level backend deals in (16 KiB).
pub const MIN_CHUNK_SIZE: usize = 1 << MIN_CHUNK_BITS;

/// Size of a slab. Free-list integrity checks treat any pointer that leaves
/// a window of this size as corruption.
pub const SLAB_SIZE: usize = MIN_CHUNK_SIZE;

/// log2 of the default ceiling for a single refill pulled from the parent
/// range (16 MiB).
pub const REFILL_SIZE_BITS: usize = 24;

/// log2 of the smallest refill the parent range may be asked for.
pub const MIN_REFILL_SIZE_BITS: usize = MIN_CHUNK_BITS;

/// Voluntary trimming starts once the bytes held from the parent exceed
/// `provided * TRIM_PROVIDED_MULTIPLIER` (tunable heuristic).
pub const TRIM_PROVIDED_MULTIPLIER: usize = 8;

/// Floor of the trim threshold, in chunks: small caches are never trimmed.
pub const TRIM_FLOOR_CHUNKS: usize = 16;

/// Width of a machine pointer in bits.
pub const PTR_BITS: usize = usize::BITS as usize;
