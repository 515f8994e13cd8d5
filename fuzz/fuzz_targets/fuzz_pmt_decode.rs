#![no_main]

use libfuzzer_sys::fuzz_target;
use ps_crypto::PartialMerkleTree;

// Declared hash counts come from the peer; a huge count must be rejected
// before anything is allocated for it.
fuzz_target!(|data: &[u8]| {
    if let Ok(tree) = PartialMerkleTree::from_bytes(data) {
        assert!(tree.hashes.len() * 32 <= data.len());
        let reparsed = PartialMerkleTree::from_bytes(&tree.to_bytes());
        assert_eq!(reparsed.ok(), Some(tree));
    }
    if let Ok(s) = std::str::from_utf8(data) {
        let _ = PartialMerkleTree::from_hex(s);
    }
});
