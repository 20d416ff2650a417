//! Property-based tests for the hash-determinism and retry-bound
//! invariants (spec P9, P10), run against the crate's public `io` API.

use lifeos_rename_engine::io::{hash_bytes, write_file_with_retry_using};
use proptest::prelude::*;
use std::sync::atomic::{AtomicU32, Ordering};
use tempfile::tempdir;

proptest! {
    /// P9: hashing identical bytes always produces the same digest,
    /// regardless of how many times it is computed.
    #[test]
    fn hash_is_deterministic_for_arbitrary_content(bytes in proptest::collection::vec(any::<u8>(), 0..4096)) {
        let h1 = hash_bytes(&bytes);
        let h2 = hash_bytes(&bytes);
        prop_assert_eq!(h1, h2);
    }

    /// P9 (contrapositive): any single changed byte changes the digest.
    #[test]
    fn hash_changes_when_a_single_byte_differs(
        bytes in proptest::collection::vec(any::<u8>(), 1..4096),
        flip_at in any::<usize>(),
    ) {
        let idx = flip_at % bytes.len();
        let mut mutated = bytes.clone();
        mutated[idx] = mutated[idx].wrapping_add(1);
        prop_assume!(mutated != bytes);
        prop_assert_ne!(hash_bytes(&bytes), hash_bytes(&mutated));
    }

    /// P10: a persistently failing write is retried exactly three times
    /// (four attempts total) before giving up, no matter the payload.
    #[test]
    fn retry_always_stops_at_three_retries(bytes in proptest::collection::vec(any::<u8>(), 0..256)) {
        let dir = tempdir().unwrap();
        let unwritable = dir.path().join("no-such-dir").join("leaf.md");
        let calls = AtomicU32::new(0);

        let result = write_file_with_retry_using(
            &unwritable,
            &bytes,
            |_e, _attempt| true,
            |_ms| {
                calls.fetch_add(1, Ordering::SeqCst);
            },
        );

        prop_assert!(result.is_err());
        prop_assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
