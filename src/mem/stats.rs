//! Per-sizeclass allocation statistics.

use crate::mem::sizeclass::NUM_SMALL_SIZECLASSES;

/// A counter that only ever goes up.
#[derive(Clone, Copy, Debug, Default)]
pub struct MonotoneStat {
    value: usize,
}

impl MonotoneStat {
    pub const fn new() -> Self {
        Self { value: 0 }
    }

    pub fn inc(&mut self) {
        self.value += 1;
    }

    pub fn get(&self) -> usize {
        self.value
    }

    pub fn merge(&mut self, other: &MonotoneStat) {
        self.value += other.value;
    }
}

/// Event counters for one sizeclass.
#[derive(Clone, Copy, Debug, Default)]
pub struct AllocStat {
    pub objects_allocated: MonotoneStat,
    pub objects_deallocated: MonotoneStat,
    pub slabs_allocated: MonotoneStat,
    pub slabs_deallocated: MonotoneStat,
}

impl AllocStat {
    pub const fn new() -> Self {
        Self {
            objects_allocated: MonotoneStat::new(),
            objects_deallocated: MonotoneStat::new(),
            slabs_allocated: MonotoneStat::new(),
            slabs_deallocated: MonotoneStat::new(),
        }
    }

    pub fn merge(&mut self, other: &AllocStat) {
        self.objects_allocated.merge(&other.objects_allocated);
        self.objects_deallocated.merge(&other.objects_deallocated);
        self.slabs_allocated.merge(&other.slabs_allocated);
        self.slabs_deallocated.merge(&other.slabs_deallocated);
    }
}

/// Statistics for every small sizeclass, merged across caches at teardown.
#[derive(Clone, Copy, Debug, Default)]
pub struct AllocStats {
    sizeclass: [AllocStat; NUM_SMALL_SIZECLASSES],
}

impl AllocStats {
    pub const fn new() -> Self {
        Self {
            sizeclass: [AllocStat::new(); NUM_SMALL_SIZECLASSES],
        }
    }

    pub fn get(&self, sizeclass: usize) -> &AllocStat {
        &self.sizeclass[sizeclass]
    }

    pub fn get_mut(&mut self, sizeclass: usize) -> &mut AllocStat {
        &mut self.sizeclass[sizeclass]
    }

    pub fn merge(&mut self, other: &AllocStats) {
        for (mine, theirs) in self.sizeclass.iter_mut().zip(other.sizeclass.iter()) {
            mine.merge(theirs);
        }
    }
}
