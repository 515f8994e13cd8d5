//! Merkle checks tying a diff to the chain.
//!
//! Masternode entries are committed in key order (internal byte order of the
//! ProRegTx hash); quorum commitments in order of their own content hash.

use std::collections::BTreeMap;

use ps_crypto::{calc_merkle_root, hash_merkle_branch, PartialMerkleTree};
use ps_types::{Hash256, ProTxHash};

use crate::chain::ChainHeaders;
use crate::diff::{CbTxPayload, CoinbaseTx, CommitmentProof};
use crate::entry::QuorumKey;
use crate::error::VerificationError;

pub fn sml_merkle_root(sml_hashes: &BTreeMap<ProTxHash, Hash256>) -> Hash256 {
    let ordered: Vec<Hash256> = sml_hashes.values().copied().collect();
    calc_merkle_root(&ordered)
}

pub fn llmq_merkle_root(llmq_hashes: &BTreeMap<QuorumKey, Hash256>) -> Hash256 {
    let mut ordered: Vec<Hash256> = llmq_hashes.values().copied().collect();
    ordered.sort();
    calc_merkle_root(&ordered)
}

pub fn check_sml_merkle_root(
    sml_hashes: &BTreeMap<ProTxHash, Hash256>,
    payload: &CbTxPayload,
) -> Result<(), VerificationError> {
    if sml_merkle_root(sml_hashes) != payload.merkle_root_mn_list {
        return Err(VerificationError::MnListRootMismatch);
    }
    Ok(())
}

pub fn check_llmq_merkle_root(
    llmq_hashes: &BTreeMap<QuorumKey, Hash256>,
    payload: &CbTxPayload,
) -> Result<(), VerificationError> {
    let expected = payload
        .merkle_root_quorums
        .ok_or(VerificationError::MissingPayload)?;
    if llmq_merkle_root(llmq_hashes) != expected {
        return Err(VerificationError::QuorumRootMismatch);
    }
    Ok(())
}

/// Check that the coinbase is the first transaction of the block at the
/// payload height.
pub fn check_cbtx_merkle_root(
    cb_tx: &CoinbaseTx,
    proof: &CommitmentProof,
    chain: &dyn ChainHeaders,
) -> Result<(), VerificationError> {
    let payload = cb_tx.payload.as_ref().ok_or(VerificationError::MissingPayload)?;
    let hashes = match proof {
        CommitmentProof::PartialTree(raw) => {
            PartialMerkleTree::from_bytes(raw)
                .map_err(|e| VerificationError::MalformedProof(e.to_string()))?
                .hashes
        }
        CommitmentProof::Hashes(h) => h.clone(),
    };
    let (first, branch) = hashes
        .split_first()
        .ok_or_else(|| VerificationError::MalformedProof("empty hash list".into()))?;
    if *first != cb_tx.txid {
        return Err(VerificationError::CbTxNotFirst);
    }
    let root = hash_merkle_branch(branch, cb_tx.txid, 0);

    let header = chain
        .read_header(payload.height)
        .ok_or(VerificationError::HeaderUnavailable(payload.height))?;
    if header.merkle_root != root {
        return Err(VerificationError::CbTxRootMismatch);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::BlockHeader;
    use crate::entry::tests::{entry, quorum};
    use ps_crypto::{sha256d, sha256d_multi};

    struct OneHeader(BlockHeader);

    impl ChainHeaders for OneHeader {
        fn read_header(&self, height: u32) -> Option<BlockHeader> {
            (height == self.0.height).then_some(self.0)
        }
        fn local_height(&self) -> u32 {
            self.0.height
        }
        fn server_height(&self) -> u32 {
            self.0.height
        }
    }

    fn cbtx(height: u32) -> CoinbaseTx {
        CoinbaseTx {
            txid: sha256d(b"cbtx"),
            version: 3,
            tx_type: 5,
            payload: Some(CbTxPayload {
                version: 2,
                height,
                merkle_root_mn_list: Hash256::ZERO,
                merkle_root_quorums: Some(Hash256::ZERO),
            }),
        }
    }

    #[test]
    fn sml_root_follows_key_order() {
        let mut hashes = BTreeMap::new();
        let a = entry(2, true);
        let b = entry(1, true);
        hashes.insert(a.pro_reg_tx_hash, a.content_hash());
        hashes.insert(b.pro_reg_tx_hash, b.content_hash());
        let expected = sha256d_multi(&[b.content_hash().as_bytes(), a.content_hash().as_bytes()]);
        assert_eq!(sml_merkle_root(&hashes), expected);
    }

    #[test]
    fn empty_sml_root_is_zero_leaf() {
        let payload = cbtx(10).payload.unwrap();
        assert!(check_sml_merkle_root(&BTreeMap::new(), &payload).is_ok());
    }

    #[test]
    fn llmq_root_sorts_by_hash_value() {
        let q1 = quorum(1, 1);
        let q2 = quorum(2, 1);
        let mut hashes = BTreeMap::new();
        hashes.insert(q1.key(), q1.content_hash());
        hashes.insert(q2.key(), q2.content_hash());
        let mut values = vec![q1.content_hash(), q2.content_hash()];
        values.sort();
        assert_eq!(llmq_merkle_root(&hashes), calc_merkle_root(&values));
    }

    #[test]
    fn llmq_root_mismatch_detected() {
        let q = quorum(1, 1);
        let mut hashes = BTreeMap::new();
        hashes.insert(q.key(), q.content_hash());
        let payload = cbtx(10).payload.unwrap();
        assert_eq!(
            check_llmq_merkle_root(&hashes, &payload),
            Err(VerificationError::QuorumRootMismatch)
        );
    }

    #[test]
    fn cbtx_alone_is_its_own_root() {
        let tx = cbtx(10);
        let chain = OneHeader(BlockHeader { height: 10, merkle_root: tx.txid });
        let proof = CommitmentProof::Hashes(vec![tx.txid]);
        assert!(check_cbtx_merkle_root(&tx, &proof, &chain).is_ok());
    }

    #[test]
    fn cbtx_branch_rolls_up_to_header() {
        let tx = cbtx(10);
        let sibling = sha256d(b"other tx");
        let root = sha256d_multi(&[tx.txid.as_bytes(), sibling.as_bytes()]);
        let chain = OneHeader(BlockHeader { height: 10, merkle_root: root });
        let pmt = PartialMerkleTree {
            total_transactions: 2,
            hashes: vec![tx.txid, sibling],
            flags: vec![0x1d],
        };
        let proof = CommitmentProof::PartialTree(pmt.to_bytes());
        assert!(check_cbtx_merkle_root(&tx, &proof, &chain).is_ok());
    }

    #[test]
    fn cbtx_must_lead_proof() {
        let tx = cbtx(10);
        let chain = OneHeader(BlockHeader { height: 10, merkle_root: tx.txid });
        let proof = CommitmentProof::Hashes(vec![Hash256::new([1u8; 32]), tx.txid]);
        assert_eq!(
            check_cbtx_merkle_root(&tx, &proof, &chain),
            Err(VerificationError::CbTxNotFirst)
        );
    }

    #[test]
    fn missing_header_fails() {
        let tx = cbtx(11);
        let chain = OneHeader(BlockHeader { height: 10, merkle_root: tx.txid });
        let proof = CommitmentProof::Hashes(vec![tx.txid]);
        assert_eq!(
            check_cbtx_merkle_root(&tx, &proof, &chain),
            Err(VerificationError::HeaderUnavailable(11))
        );
    }
}
