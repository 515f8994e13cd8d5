//! SHA-256 and double SHA-256.

use ps_types::{Hash256, TxId};
use sha2::{Digest, Sha256};

/// Single SHA-256.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&Sha256::digest(data));
    out
}

/// Double SHA-256, the chain's hash for transactions, entries and merkle nodes.
pub fn sha256d(data: &[u8]) -> Hash256 {
    Hash256::new(sha256(&sha256(data)))
}

/// Double SHA-256 over several slices without concatenating them.
pub fn sha256d_multi(parts: &[&[u8]]) -> Hash256 {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    let first = hasher.finalize();
    Hash256::new(sha256(&first))
}

/// Txid of a serialized transaction.
pub fn hash_transaction(raw: &[u8]) -> TxId {
    sha256d(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256d_of_empty_matches_known_vector() {
        // sha256d("") = 5df6e0e2761359d30a8275058e299fcc0381534545f55cf43e41983f5d4c9456
        let h = sha256d(b"");
        assert_eq!(
            h.to_hex(),
            "5df6e0e2761359d30a8275058e299fcc0381534545f55cf43e41983f5d4c9456"
        );
    }

    #[test]
    fn multi_equals_concatenation() {
        let joined = sha256d(b"hello world");
        let parts = sha256d_multi(&[b"hello", b" ", b"world"]);
        assert_eq!(joined, parts);
    }
}
