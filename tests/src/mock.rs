//! OS mocks for testing.
//!
//! These modules mock the **platform** the allocator depends on, NOT the
//! allocator's own code. This allows exercising the real range pipeline,
//! buddy trees, and free lists without owning the process's address space.
//!
//! ## What is mocked:
//! - Address-space reservation (one big host-allocated arena)
//! - Commit/decommit notifications (bookkeeping counters)
//! - Platform entropy (deterministic)
//!
//! ## What is NOT mocked:
//! - The pagemap, buddy allocator, ranges, free lists, pool
//! - Those are tested using the real allocator code
