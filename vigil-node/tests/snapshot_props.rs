//! Property tests for the sealed snapshot format: any single-bit
//! corruption anywhere in the blob must fail the restore outright.

use proptest::prelude::*;

use vigil_node::crypto::{derive_key, open, seal, KdfParams, SealedBlob};

fn test_key() -> vigil_node::crypto::DerivedKey {
    derive_key("prop-secret", b"prop-salt-16byte", &KdfParams::fast()).unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn seal_open_round_trips(plaintext in proptest::collection::vec(any::<u8>(), 0..2048)) {
        let key = test_key();
        let blob = seal(&key, &plaintext).unwrap();
        let opened = open(&key, &blob).unwrap();
        prop_assert_eq!(opened, plaintext);
    }

    #[test]
    fn any_bit_flip_fails_closed(
        plaintext in proptest::collection::vec(any::<u8>(), 1..512),
        flip_byte in any::<prop::sample::Index>(),
        flip_bit in 0u8..8,
    ) {
        let key = test_key();
        let blob = seal(&key, &plaintext).unwrap();

        let mut bytes = blob.to_bytes();
        let index = flip_byte.index(bytes.len());
        bytes[index] ^= 1 << flip_bit;

        // Either the blob no longer parses, or the AEAD tag check
        // rejects it. Corrupted snapshots never yield plaintext.
        if let Ok(corrupted) = SealedBlob::from_bytes(&bytes) {
            prop_assert!(open(&key, &corrupted).is_err());
        }
    }

    #[test]
    fn wrong_key_never_opens(plaintext in proptest::collection::vec(any::<u8>(), 1..512)) {
        let key = test_key();
        let other = derive_key("other-secret", b"prop-salt-16byte", &KdfParams::fast()).unwrap();
        let blob = seal(&key, &plaintext).unwrap();
        prop_assert!(open(&other, &blob).is_err());
    }
}
