//! Pagemap tests: initialization, registration, reserved-bit discipline.

#[cfg(test)]
mod tests {
    use stratalloc::backend::RED_BIT;
    use stratalloc::config::MIN_CHUNK_SIZE;
    use stratalloc::pagemap::{self, MetaEntry, Word, RESERVED_MASK};

    use crate::mock::memory::{self, MockPal};

    #[test]
    fn init_is_once_only() {
        memory::ensure_pagemap();
        let err = pagemap::init::<MockPal>(memory::arena_base(), MIN_CHUNK_SIZE);
        assert!(err.is_err());
    }

    #[test]
    fn registration_requires_coverage() {
        memory::ensure_pagemap();
        // Far below the arena: not covered.
        assert!(pagemap::register_range(0x10000, MIN_CHUNK_SIZE).is_err());
    }

    #[test]
    fn registration_sets_only_the_first_chunk_boundary() {
        let base = memory::fresh_chunk(4 * MIN_CHUNK_SIZE);
        assert!(pagemap::get_metaentry(base).is_boundary());
        assert!(!pagemap::get_metaentry(base + MIN_CHUNK_SIZE).is_boundary());
        assert!(!pagemap::get_metaentry(base + 3 * MIN_CHUNK_SIZE).is_boundary());
    }

    #[test]
    fn backend_words_preserve_reserved_bits() {
        let base = memory::fresh_chunk(MIN_CHUNK_SIZE);
        let entry = pagemap::get_metaentry(base);

        // The chunk starts a registered range, so bit 0 of word one is set
        // and must survive arbitrary backend traffic.
        assert!(entry.is_boundary());
        entry.backend_set(Word::One, 0xAB00);
        entry.backend_set(Word::Two, 0xCD00);
        assert!(entry.is_boundary());
        assert_eq!(entry.backend_get(Word::One), 0xAB00);
        assert_eq!(entry.backend_get(Word::Two), 0xCD00);

        entry.backend_set(Word::One, 0);
        entry.backend_set(Word::Two, 0);
        assert!(entry.is_boundary());
    }

    #[test]
    fn red_bit_is_backend_territory() {
        assert!(MetaEntry::is_backend_allowed_value(Word::One, RED_BIT));
        assert!(MetaEntry::is_backend_allowed_value(Word::Two, RED_BIT));
        assert!(RED_BIT > RESERVED_MASK);
        assert!(RED_BIT < MIN_CHUNK_SIZE);
    }

    #[test]
    fn distinct_chunks_have_distinct_entries() {
        let base = memory::fresh_chunk(2 * MIN_CHUNK_SIZE);
        let a = pagemap::get_metaentry(base);
        let b = pagemap::get_metaentry(base + MIN_CHUNK_SIZE);
        assert!(!core::ptr::eq(a, b));

        // Same chunk, any offset: same entry.
        let a2 = pagemap::get_metaentry(base + MIN_CHUNK_SIZE - 1);
        assert!(core::ptr::eq(a, a2));
    }
}
