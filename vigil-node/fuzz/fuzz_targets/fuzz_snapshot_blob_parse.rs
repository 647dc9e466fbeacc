#![no_main]

use libfuzzer_sys::fuzz_target;
use vigil_node::crypto::{derive_key, open, KdfParams, SealedBlob};

// Snapshot blobs are operator-supplied on restore. Parsing and the
// fail-closed open path must be panic-free on arbitrary bytes.

fuzz_target!(|data: &[u8]| {
    if let Ok(blob) = SealedBlob::from_bytes(data) {
        let key = derive_key("fuzz-secret", b"fuzz-salt-16byte", &KdfParams::fast())
            .expect("key derivation with fixed params");
        let _ = open(&key, &blob);
    }
});
