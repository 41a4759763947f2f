//! The allocation front.
//!
//! Everything the hot path touches lives here:
//! - signed per-slab free lists and their corruption-detecting cursors
//! - the per-thread [`LocalCache`] with one free list per small sizeclass
//! - the batched cross-thread return path (`RemoteAllocator`,
//!   `RemoteDeallocCache`)
//! - the pool of reusable allocator objects
//! - per-sizeclass allocation statistics

pub mod entropy;
pub mod freelist;
pub mod localcache;
pub mod pool;
pub mod remote;
pub mod sizeclass;
pub mod stats;

// Re-export commonly used items.
pub use entropy::LocalEntropy;
pub use freelist::{different_slab, global_key, FreeListBuilder, FreeListIter, FreeObject};
pub use localcache::LocalCache;
pub use pool::{DebugCheck, Pool, PoolLinks, PoolSource, PoolState, Pooled};
pub use remote::{RemoteAllocator, RemoteDeallocCache, RemoteId};
pub use sizeclass::{size_to_sizeclass, sizeclass_to_size, NUM_SMALL_SIZECLASSES};
pub use stats::{AllocStat, AllocStats, MonotoneStat};
