//! Red-black tree tests.
//!
//! The tree under test stores its node words in the mock node table, the
//! same way the chunk buddy stores them in the pagemap. The model test
//! drives it with pseudo-random insert/remove traffic and compares every
//! observable against `BTreeSet`, auditing the structural invariants as it
//! goes.

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use stratalloc::ds::RbTree;
    use stratalloc::mem::LocalEntropy;

    use crate::mock::nodes::{self, TestRep};

    fn key(i: usize) -> usize {
        // Nonzero, spaced like small aligned blocks.
        (i + 1) << 4
    }

    #[test]
    fn ascending_inserts_stay_balanced() {
        nodes::reset();
        let mut tree: RbTree<TestRep> = RbTree::new();
        for i in 0..64 {
            tree.insert_elem(key(i));
            assert!(tree.invariant());
        }
        for i in 0..64 {
            assert_eq!(tree.remove_min(), key(i));
            assert!(tree.invariant());
        }
        assert!(tree.is_empty());
    }

    #[test]
    fn descending_inserts_stay_balanced() {
        nodes::reset();
        let mut tree: RbTree<TestRep> = RbTree::new();
        for i in (0..64).rev() {
            tree.insert_elem(key(i));
            assert!(tree.invariant());
        }
        for i in (0..64).rev() {
            assert_eq!(tree.remove_max(), key(i));
            assert!(tree.invariant());
        }
        assert!(tree.is_empty());
    }

    #[test]
    fn find_positions_path_for_removal() {
        nodes::reset();
        let mut tree: RbTree<TestRep> = RbTree::new();
        for i in 0..32 {
            tree.insert_elem(key(i));
        }

        let mut path = tree.get_root_path();
        assert!(tree.find(&mut path, key(17)));
        tree.remove_path(&mut path);
        assert!(tree.invariant());

        let mut path = tree.get_root_path();
        assert!(!tree.find(&mut path, key(17)));
    }

    #[test]
    fn empty_tree_behaviour() {
        nodes::reset();
        let mut tree: RbTree<TestRep> = RbTree::new();
        assert!(tree.is_empty());
        assert_eq!(tree.remove_min(), 0);
        assert_eq!(tree.remove_max(), 0);
        let mut path = tree.get_root_path();
        assert!(!tree.find(&mut path, key(1)));
    }

    #[test]
    fn model_check_against_btreeset() {
        nodes::reset();
        let mut tree: RbTree<TestRep> = RbTree::new();
        let mut model: BTreeSet<usize> = BTreeSet::new();
        let mut rng = LocalEntropy::from_seed(0xDECAF);

        for step in 0..4000 {
            let k = key((rng.next_u64() % 256) as usize);
            match rng.next_u64() % 4 {
                // Insert if absent.
                0 | 1 => {
                    if model.insert(k) {
                        tree.insert_elem(k);
                    }
                }
                // Remove a specific key.
                2 => {
                    let mut path = tree.get_root_path();
                    let found = tree.find(&mut path, k);
                    assert_eq!(found, model.contains(&k));
                    if found {
                        tree.remove_path(&mut path);
                        model.remove(&k);
                    }
                }
                // Remove an extreme.
                _ => {
                    if rng.next_u64() % 2 == 0 {
                        let expect = model.iter().next().copied().unwrap_or(0);
                        assert_eq!(tree.remove_min(), expect);
                        model.remove(&expect);
                    } else {
                        let expect = model.iter().next_back().copied().unwrap_or(0);
                        assert_eq!(tree.remove_max(), expect);
                        model.remove(&expect);
                    }
                }
            }

            if step % 32 == 0 {
                assert!(tree.invariant(), "invariant broken at step {step}");
            }
            assert_eq!(tree.is_empty(), model.is_empty());
        }

        // Drain and compare the full order.
        while let Some(&expect) = model.iter().next() {
            assert_eq!(tree.remove_min(), expect);
            model.remove(&expect);
        }
        assert!(tree.is_empty());
    }
}
