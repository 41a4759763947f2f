//! Free-list signing tests.

#[cfg(test)]
mod tests {
    use stratalloc::config::{MIN_CHUNK_SIZE, SLAB_SIZE};
    use stratalloc::mem::freelist::initial_key;
    use stratalloc::mem::LocalEntropy;
    use stratalloc::mem::{different_slab, global_key, FreeListBuilder, FreeListIter, FreeObject};

    use crate::mock::memory;
    use rusty_fork::rusty_fork_test;

    #[test]
    fn default_global_key_is_the_well_known_pattern() {
        assert_eq!(global_key(), 0x9999_9999_9999_9999);
    }

    #[test]
    fn store_then_read_round_trips() {
        let mut rng = LocalEntropy::from_seed(0xF00D);
        let mut word: usize = 0;
        let obj = &mut word as *mut usize as usize;

        for _ in 0..64 {
            let key = rng.next_u64() as usize;
            let next = (rng.next_u64() as usize) & !0xF;
            unsafe {
                FreeObject::store_next(obj, next, key);
                assert_eq!(FreeObject::read_next(obj, key), next);
            }
        }
    }

    #[test]
    fn wrong_key_lands_outside_the_slab() {
        let mut rng = LocalEntropy::from_seed(0xBEEF);
        for _ in 0..64 {
            let k1 = rng.next_u64() as usize;
            let k2 = rng.next_u64() as usize;
            let next = 0x7000_0040_usize;

            let forged = FreeObject::encode(k2, FreeObject::encode(k1, next));
            assert!(
                different_slab(next, forged),
                "cross-key decode stayed in the slab: {forged:#x}"
            );
        }
    }

    #[test]
    fn builder_and_iterator_walk_the_same_sequence() {
        let slab = memory::fresh_chunk(MIN_CHUNK_SIZE);
        let objects = [slab + 0x40, slab + 0x80, slab + 0xC0];

        let mut builder = FreeListBuilder::new();
        builder.open(objects[0]);
        builder.add(objects[1]);
        builder.add(objects[2]);

        let mut iter = FreeListIter::new();
        builder.close(&mut iter);
        assert!(builder.is_empty());

        for &expected in &objects {
            assert!(!iter.is_empty());
            assert_eq!(iter.take(), expected);
        }
        assert!(iter.is_empty());
    }

    #[test]
    fn iterator_insert_pushes_on_the_front() {
        let slab = memory::fresh_chunk(MIN_CHUNK_SIZE);

        let mut builder = FreeListBuilder::new();
        builder.open(slab + 0x80);
        builder.add(slab + 0xC0);
        let mut iter = FreeListIter::new();
        builder.close(&mut iter);

        iter.insert(slab + 0x40);
        assert_eq!(iter.take(), slab + 0x40);
        assert_eq!(iter.take(), slab + 0x80);
        assert_eq!(iter.take(), slab + 0xC0);
        assert!(iter.is_empty());
    }

    #[test]
    #[should_panic(expected = "heap corruption")]
    fn injected_foreign_pointer_is_fatal() {
        let slab = memory::fresh_chunk(MIN_CHUNK_SIZE);
        let other_slab = memory::fresh_chunk(MIN_CHUNK_SIZE);
        assert!(different_slab(slab, other_slab));

        let objects = [slab + 0x40, slab + 0x80, slab + 0xC0];
        let mut builder = FreeListBuilder::new();
        builder.open(objects[0]);
        builder.add(objects[1]);
        builder.add(objects[2]);
        let mut iter = FreeListIter::new();
        builder.close(&mut iter);

        // An attacker smashes the middle link with a raw pointer into
        // another slab (a forgery without knowledge of the keys).
        unsafe {
            core::ptr::write((slab + 0x80) as *mut usize, other_slab + 0x40);
        }

        assert_eq!(iter.take(), objects[0]);
        // Walking onto the forged link must die, not dereference it.
        let _ = iter.take();
        let _ = iter.take();
    }

    #[test]
    fn keys_chain_along_the_list() {
        // The signature of each link depends on the previous object, so
        // decoding any link with the head key alone must fail the window
        // check (this is what makes splicing two valid lists detectable).
        let slab = memory::fresh_chunk(MIN_CHUNK_SIZE);
        let a = slab + 0x40;
        let b = slab + 0x80;
        let c = slab + 0xC0;

        let mut builder = FreeListBuilder::new();
        builder.open(a);
        builder.add(b);
        builder.add(c);
        builder.terminate();

        unsafe {
            // Correct chain: key(initial(a)) for a's link, key(a) for b's.
            assert_eq!(FreeObject::read_next(a, initial_key(a)), b);
            assert_eq!(FreeObject::read_next(b, a), c);
            // Reading b's link with a's head key decodes to junk.
            let forged = FreeObject::read_next(b, initial_key(a));
            assert!(forged == c || different_slab(forged, b));
        }
    }

    #[test]
    fn slab_window_matches_configuration() {
        assert!(!different_slab(0x10000, 0x10000 + SLAB_SIZE - 1));
        assert!(different_slab(0x10000, 0x10000 + SLAB_SIZE));
    }

    // Reseeding the global key invalidates every signed link in the
    // process, so it runs in a forked child where no other list exists.
    rusty_fork_test! {
        #[test]
        fn global_key_reseed_is_process_local() {
            stratalloc::mem::freelist::init_global_key(0xABCD_EF01_2345_6789);
            assert_eq!(stratalloc::mem::global_key(), 0xABCD_EF01_2345_6789);

            // Lists built under the new key still verify.
            let slab = crate::mock::memory::fresh_chunk(MIN_CHUNK_SIZE);
            let mut builder = FreeListBuilder::new();
            builder.open(slab + 0x40);
            builder.add(slab + 0x80);
            let mut iter = FreeListIter::new();
            builder.close(&mut iter);
            assert_eq!(iter.take(), slab + 0x40);
            assert_eq!(iter.take(), slab + 0x80);
        }
    }
}
