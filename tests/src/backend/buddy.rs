//! Buddy allocator tests over the mock node table.
//!
//! Small configurations (16-byte minimum blocks) keep the scenarios
//! readable; the chunk-level instantiation only changes the constants.

#[cfg(test)]
mod tests {
    use stratalloc::backend::Buddy;
    use stratalloc::mem::LocalEntropy;

    use crate::mock::nodes::{self, TestRep};

    /// Blocks of 16..64 bytes; two 64-blocks consolidate into an overflow.
    type SmallBuddy = Buddy<TestRep, 4, 7>;

    /// Region base for synthetic blocks: aligned well past the largest
    /// block size so every alignment assert is about the offsets.
    const BASE: usize = 0x1000;

    #[test]
    fn basic_consolidation_walks_up_the_levels() {
        nodes::reset();
        let mut buddy = SmallBuddy::new();

        assert_eq!(buddy.add_block(BASE, 16), 0);
        assert_eq!(buddy.add_block(BASE + 0x10, 16), 0);
        // The pair merged: exactly one 32-byte block remains.
        assert_eq!(buddy.contains_bytes(), 32);

        assert_eq!(buddy.add_block(BASE + 0x20, 32), 0);
        assert_eq!(buddy.contains_bytes(), 64);

        // Merging the final pair would make a 128-byte block, which is too
        // big for this buddy: it comes back as overflow.
        assert_eq!(buddy.add_block(BASE + 0x40, 64), BASE);
        assert_eq!(buddy.contains_bytes(), 0);
        assert!(buddy.is_empty());
    }

    #[test]
    fn remove_splits_and_keeps_the_lower_half() {
        nodes::reset();
        let mut buddy = SmallBuddy::new();

        assert_eq!(buddy.add_block(BASE, 64), 0);
        assert_eq!(buddy.remove_block(16), BASE);

        // The upper halves went back: (BASE+0x10, 16) and (BASE+0x20, 32).
        assert_eq!(buddy.contains_bytes(), 48);
        assert_eq!(buddy.remove_block(16), BASE + 0x10);
        assert_eq!(buddy.remove_block(32), BASE + 0x20);
        assert!(buddy.is_empty());
    }

    #[test]
    fn consolidation_round_trip_restores_the_block() {
        nodes::reset();
        let mut buddy = SmallBuddy::new();

        buddy.add_block(BASE, 32);
        assert_eq!(buddy.remove_block(16), BASE);
        assert_eq!(buddy.remove_block(16), BASE + 0x10);

        // Re-adding both halves must reconstitute the original block.
        assert_eq!(buddy.add_block(BASE, 16), 0);
        assert_eq!(buddy.add_block(BASE + 0x10, 16), 0);
        assert_eq!(buddy.remove_block(32), BASE);
        assert!(buddy.is_empty());
    }

    #[test]
    fn consolidation_round_trip_overflows_at_the_top() {
        nodes::reset();
        // Only 16-byte blocks fit; a merged pair is already too large.
        let mut buddy: Buddy<TestRep, 4, 5> = Buddy::new();

        buddy.add_block(BASE, 16);
        assert_eq!(buddy.add_block(BASE + 0x10, 16), BASE);
        assert!(buddy.is_empty());
    }

    #[test]
    fn boundaries_veto_consolidation() {
        nodes::reset();
        // The upper half starts a separately registered region.
        nodes::set_boundary(BASE + 0x10);

        let mut buddy = SmallBuddy::new();
        assert_eq!(buddy.add_block(BASE, 16), 0);
        assert_eq!(buddy.add_block(BASE + 0x10, 16), 0);

        // Both blocks are present but unmerged.
        assert_eq!(buddy.contains_bytes(), 32);
        assert_eq!(buddy.remove_block(32), 0);
        let first = buddy.remove_block(16);
        let second = buddy.remove_block(16);
        assert_eq!(
            [first.min(second), first.max(second)],
            [BASE, BASE + 0x10]
        );
    }

    #[test]
    fn slots_spill_into_the_tree_and_drain_back() {
        nodes::reset();
        let mut buddy = SmallBuddy::new();

        // Five mutually non-buddy 16-byte blocks: two sit in the inline
        // slots, the spill pushes everything through the tree.
        let blocks = [BASE, BASE + 0x40, BASE + 0x80, BASE + 0xC0, BASE + 0x100];
        for &b in &blocks {
            assert_eq!(buddy.add_block(b, 16), 0);
        }
        assert_eq!(buddy.contains_bytes(), 5 * 16);

        let mut removed: Vec<usize> = (0..5).map(|_| buddy.remove_block(16)).collect();
        removed.sort_unstable();
        assert_eq!(removed, blocks);
        assert!(buddy.is_empty());
        assert_eq!(buddy.remove_block(16), 0);
    }

    #[test]
    fn remove_largest_takes_from_the_top() {
        nodes::reset();
        let mut buddy = SmallBuddy::new();
        buddy.add_block(BASE, 16);
        buddy.add_block(BASE + 0x40, 64);

        assert_eq!(buddy.remove_largest(), (BASE + 0x40, 64));
        assert_eq!(buddy.remove_largest(), (BASE, 16));
        assert_eq!(buddy.remove_largest(), (0, 0));
    }

    #[test]
    fn random_traffic_preserves_alignment_and_accounting() {
        nodes::reset();
        let mut buddy: Buddy<TestRep, 4, 10> = Buddy::new();
        let mut rng = LocalEntropy::from_seed(0xB0DD);

        // A pool of fresh 16-byte blocks across a 16 KiB synthetic region.
        let mut fresh: Vec<usize> = (0..1024).map(|i| 0x10000 + (i << 4)).collect();
        let mut held_bytes = 0usize;

        for _ in 0..2000 {
            if rng.next_u64() % 2 == 0 {
                if let Some(addr) = fresh.pop() {
                    held_bytes += 16;
                    let overflow = buddy.add_block(addr, 16);
                    if overflow != 0 {
                        // Fully consolidated past the top size; the block
                        // leaves the buddy's hands.
                        assert_eq!(overflow % 1024, 0);
                        held_bytes -= 1024;
                    }
                }
            } else {
                let size = 16 << (rng.next_u64() % 4);
                let addr = buddy.remove_block(size);
                if addr != 0 {
                    assert_eq!(addr % size, 0, "unaligned block {addr:#x} ({size})");
                    held_bytes -= size;
                    // Blocks never leave the synthetic region.
                    assert!((0x10000..0x14000).contains(&addr));
                }
            }
            assert_eq!(buddy.contains_bytes(), held_bytes);
        }
    }
}
