use proptest::prelude::*;
use std::cmp::Ordering;

use audit_types::{compare_urls, Digest, Timestamp, VoteBlock, VoteBlockVersion};

proptest! {
    /// Canonical order is antisymmetric.
    #[test]
    fn compare_urls_antisymmetric(a in "[a-z/.]{0,12}", b in "[a-z/.]{0,12}") {
        prop_assert_eq!(compare_urls(&a, &b), compare_urls(&b, &a).reverse());
    }

    /// Canonical order agrees with equality.
    #[test]
    fn compare_urls_equal_iff_same(a in "[a-z/.]{0,12}", b in "[a-z/.]{0,12}") {
        prop_assert_eq!(compare_urls(&a, &b) == Ordering::Equal, a == b);
    }

    /// Sorting with the canonical order is transitive enough to be stable.
    #[test]
    fn compare_urls_sort_is_consistent(mut urls in prop::collection::vec("[ab/.]{0,6}", 0..20)) {
        urls.sort_by(|a, b| compare_urls(a, b));
        for pair in urls.windows(2) {
            prop_assert_ne!(compare_urls(&pair[0], &pair[1]), Ordering::Greater);
        }
    }

    /// Timestamp ordering: from_millis(a) <= from_millis(b) iff a <= b.
    #[test]
    fn timestamp_ordering(a in 0u64..u64::MAX, b in 0u64..u64::MAX) {
        let ta = Timestamp::from_millis(a);
        let tb = Timestamp::from_millis(b);
        prop_assert_eq!(ta <= tb, a <= b);
    }

    /// VoteBlock bincode serialization preserves every version field.
    #[test]
    fn vote_block_bincode_roundtrip(
        plain in prop::collection::vec(any::<u8>(), 0..32),
        nonced in prop::collection::vec(any::<u8>(), 0..32),
        err in any::<bool>(),
        len in any::<u64>(),
    ) {
        let mut v = VoteBlockVersion::new(Digest::new(plain), Digest::new(nonced))
            .with_lengths(len, len / 2);
        v.hash_error = err;
        let vb = VoteBlock::with_versions("http://x.org/a", vec![v]);
        let encoded = bincode::serialize(&vb).unwrap();
        let decoded: VoteBlock = bincode::deserialize(&encoded).unwrap();
        prop_assert_eq!(decoded, vb);
    }
}
