//! Partial merkle tree as sent with server-side masternode diffs.
//!
//! Only the flat hash list is consumed: the coinbase commitment is the first
//! hash and the remaining hashes form its merkle branch.

use ps_types::codec::Reader;
use ps_types::Hash256;

use crate::error::CryptoError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartialMerkleTree {
    pub total_transactions: u32,
    pub hashes: Vec<Hash256>,
    pub flags: Vec<u8>,
}

impl PartialMerkleTree {
    pub fn from_bytes(raw: &[u8]) -> Result<Self, CryptoError> {
        let err = |e: ps_types::TypesError| CryptoError::MalformedMerkleTree(e.to_string());
        let mut r = Reader::new(raw);
        let total_transactions = r.read_u32().map_err(err)?;
        let n_hashes = r.read_compact_size().map_err(err)?;
        if n_hashes as usize > r.remaining() / 32 {
            return Err(CryptoError::MalformedMerkleTree(format!(
                "{} hashes declared, {} bytes left",
                n_hashes,
                r.remaining()
            )));
        }
        let mut hashes = Vec::with_capacity(n_hashes as usize);
        for _ in 0..n_hashes {
            hashes.push(r.read_hash().map_err(err)?);
        }
        let flags = r.read_var_bytes().map_err(err)?;
        Ok(Self { total_transactions, hashes, flags })
    }

    pub fn from_hex(s: &str) -> Result<Self, CryptoError> {
        let raw = decode_hex(s).ok_or_else(|| CryptoError::MalformedMerkleTree("bad hex".into()))?;
        Self::from_bytes(&raw)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = ps_types::codec::Writer::new();
        w.write_u32(self.total_transactions);
        w.write_compact_size(self.hashes.len() as u64);
        for h in &self.hashes {
            w.write_hash(h);
        }
        w.write_var_bytes(&self.flags);
        w.into_inner()
    }
}

fn decode_hex(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(s.get(i..i + 2)?, 16).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_serialized_tree() {
        let pmt = PartialMerkleTree {
            total_transactions: 3,
            hashes: vec![Hash256::new([1u8; 32]), Hash256::new([2u8; 32])],
            flags: vec![0x1d],
        };
        let parsed = PartialMerkleTree::from_bytes(&pmt.to_bytes()).unwrap();
        assert_eq!(parsed, pmt);
    }

    #[test]
    fn truncated_tree_rejected() {
        let mut raw = PartialMerkleTree {
            total_transactions: 1,
            hashes: vec![Hash256::new([1u8; 32])],
            flags: vec![1],
        }
        .to_bytes();
        raw.truncate(20);
        assert!(PartialMerkleTree::from_bytes(&raw).is_err());
    }

    #[test]
    fn huge_hash_count_rejected_without_allocating() {
        let raw = [1, 0, 0, 0, 0xfe, 0xff, 0xff, 0xff, 0x0f];
        assert!(matches!(
            PartialMerkleTree::from_bytes(&raw),
            Err(CryptoError::MalformedMerkleTree(_))
        ));
    }

    #[test]
    fn odd_hex_rejected() {
        assert!(PartialMerkleTree::from_hex("abc").is_err());
    }
}
