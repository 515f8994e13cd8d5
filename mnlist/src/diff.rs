//! Incremental masternode list diffs and their coinbase commitment.

use ps_types::codec::{Reader, Writer};
use ps_types::{Hash256, ProTxHash, TxId, TypesError};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::entry::{MasternodeEntry, QuorumCommitment, QuorumKey};

/// Special transaction type of a coinbase carrying list commitments.
pub const CBTX_TYPE: u16 = 5;

/// Highest coinbase payload version understood here.
pub const MAX_CBTX_PAYLOAD_VERSION: u16 = 2;

/// Source of a diff; each has its own single pending-request slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DiffKind {
    /// Server `protx.diff`: masternodes only, commitment proven by a partial merkle tree.
    ProTx,
    /// Peer `mnlistdiff`: masternodes and quorums, commitment proven by a hash list.
    MnListDiff,
}

impl fmt::Display for DiffKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ProTx => f.write_str("protx.diff"),
            Self::MnListDiff => f.write_str("mnlistdiff"),
        }
    }
}

/// Extra payload of a type-5 coinbase.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CbTxPayload {
    pub version: u16,
    pub height: u32,
    pub merkle_root_mn_list: Hash256,
    /// Present from payload version 2.
    pub merkle_root_quorums: Option<Hash256>,
}

impl CbTxPayload {
    pub fn from_bytes(raw: &[u8]) -> Result<Self, TypesError> {
        let mut r = Reader::new(raw);
        let version = r.read_u16()?;
        let height = r.read_u32()?;
        let merkle_root_mn_list = r.read_hash()?;
        let merkle_root_quorums = if version >= 2 { Some(r.read_hash()?) } else { None };
        Ok(Self { version, height, merkle_root_mn_list, merkle_root_quorums })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.write_u16(self.version);
        w.write_u32(self.height);
        w.write_hash(&self.merkle_root_mn_list);
        if let Some(q) = &self.merkle_root_quorums {
            w.write_hash(q);
        }
        w.into_inner()
    }
}

/// The decoded coinbase transaction shipped with a diff.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CoinbaseTx {
    pub txid: TxId,
    pub version: u16,
    /// 0 for a classical coinbase.
    pub tx_type: u16,
    pub payload: Option<CbTxPayload>,
}

impl CoinbaseTx {
    pub fn is_classical(&self) -> bool {
        self.tx_type == 0
    }
}

/// Proof that the coinbase is part of the block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommitmentProof {
    /// Serialized partial merkle tree.
    PartialTree(Vec<u8>),
    /// Coinbase txid followed by its merkle branch.
    Hashes(Vec<Hash256>),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MnListDiff {
    pub base_block_hash: Hash256,
    pub block_hash: Hash256,
    pub cb_tx: CoinbaseTx,
    pub proof: CommitmentProof,
    pub deleted_mns: Vec<ProTxHash>,
    pub mn_list: Vec<MasternodeEntry>,
    pub deleted_quorums: Vec<QuorumKey>,
    pub new_quorums: Vec<QuorumCommitment>,
}

/// An issued request awaiting its response.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffRequest {
    pub kind: DiffKind,
    pub base_height: u32,
    pub height: u32,
}

/// Single-slot queue of outstanding requests for one diff kind.
#[derive(Clone, Debug, Default)]
pub struct PendingSlot {
    pending: Option<(u32, u32)>,
}

/// What a response found in the pending slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotMatch {
    Matched,
    /// A request was pending but with other params; the slot is consumed.
    Mismatch,
    Empty,
}

impl PendingSlot {
    pub fn is_occupied(&self) -> bool {
        self.pending.is_some()
    }

    /// Record a request. Fails if one is already in flight.
    pub fn try_put(&mut self, base_height: u32, height: u32) -> bool {
        if self.pending.is_some() {
            return false;
        }
        self.pending = Some((base_height, height));
        true
    }

    /// Consume the slot, reporting whether it matched `(base_height, height)`.
    pub fn take_matching(&mut self, base_height: u32, height: u32) -> SlotMatch {
        match self.pending.take() {
            None => SlotMatch::Empty,
            Some(p) if p == (base_height, height) => SlotMatch::Matched,
            Some(_) => SlotMatch::Mismatch,
        }
    }

    pub fn clear(&mut self) {
        self.pending = None;
    }
}

/// Height a diff request starting at `base_height` may reach in one chunk.
///
/// A zero chunk is treated as one block; heights saturate at `u32::MAX`.
pub fn calc_max_height(base_height: u32, chunk_size: u32) -> u32 {
    let chunk = chunk_size.max(1);
    let Some(next) = base_height.checked_add(chunk) else {
        return u32::MAX;
    };
    if base_height.saturating_add(1) % chunk == 0 {
        next
    } else {
        (next / chunk) * chunk - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_height_stops_at_chunk_boundary() {
        assert_eq!(calc_max_height(1, 2016), 2015);
        assert_eq!(calc_max_height(2015, 2016), 4031);
        assert_eq!(calc_max_height(2016, 2016), 4031);
        assert_eq!(calc_max_height(4030, 2016), 4031);
    }

    #[test]
    fn degenerate_chunks_do_not_panic() {
        assert_eq!(calc_max_height(5, 0), 6);
        assert_eq!(calc_max_height(u32::MAX - 1, 2016), u32::MAX);
        assert_eq!(calc_max_height(u32::MAX, 1), u32::MAX);
    }

    #[test]
    fn slot_holds_one_request() {
        let mut slot = PendingSlot::default();
        assert!(slot.try_put(1, 10));
        assert!(!slot.try_put(1, 20));
        assert_eq!(slot.take_matching(1, 10), SlotMatch::Matched);
        assert_eq!(slot.take_matching(1, 10), SlotMatch::Empty);
    }

    #[test]
    fn mismatched_response_consumes_slot() {
        let mut slot = PendingSlot::default();
        slot.try_put(1, 10);
        assert_eq!(slot.take_matching(1, 11), SlotMatch::Mismatch);
        assert!(!slot.is_occupied());
    }

    #[test]
    fn payload_v1_has_no_quorum_root() {
        let p = CbTxPayload {
            version: 1,
            height: 100,
            merkle_root_mn_list: Hash256::new([1u8; 32]),
            merkle_root_quorums: None,
        };
        let raw = p.to_bytes();
        assert_eq!(raw.len(), 2 + 4 + 32);
        assert_eq!(CbTxPayload::from_bytes(&raw).unwrap(), p);
    }

    #[test]
    fn payload_v2_carries_quorum_root() {
        let p = CbTxPayload {
            version: 2,
            height: 100,
            merkle_root_mn_list: Hash256::new([1u8; 32]),
            merkle_root_quorums: Some(Hash256::new([2u8; 32])),
        };
        assert_eq!(CbTxPayload::from_bytes(&p.to_bytes()).unwrap(), p);
    }
}
