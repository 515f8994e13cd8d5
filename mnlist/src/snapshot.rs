//! The in-memory masternode list and its persisted hex form.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use ps_types::{Hash256, ProTxHash, TypesError};

use crate::entry::{MasternodeEntry, QuorumCommitment, QuorumKey};

/// Masternodes and quorums as of `protx_height` / `llmq_height`.
///
/// `sml_hashes` always has exactly the keys of `masternodes`, and
/// `llmq_hashes` exactly the keys of `quorums`. Both pairs are replaced
/// together by the engine, never edited one side at a time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MnListSnapshot {
    pub protx_height: u32,
    pub llmq_height: u32,
    pub masternodes: BTreeMap<ProTxHash, MasternodeEntry>,
    pub sml_hashes: BTreeMap<ProTxHash, Hash256>,
    pub quorums: BTreeMap<QuorumKey, QuorumCommitment>,
    pub llmq_hashes: BTreeMap<QuorumKey, Hash256>,
}

impl Default for MnListSnapshot {
    fn default() -> Self {
        Self {
            protx_height: 1,
            llmq_height: 1,
            masternodes: BTreeMap::new(),
            sml_hashes: BTreeMap::new(),
            quorums: BTreeMap::new(),
            llmq_hashes: BTreeMap::new(),
        }
    }
}

impl MnListSnapshot {
    pub fn to_stored(&self) -> StoredSnapshot {
        StoredSnapshot {
            protx_height: self.protx_height,
            llmq_height: self.llmq_height,
            protx_mns: self
                .masternodes
                .iter()
                .map(|(k, v)| (k.to_string(), hex::encode(v.serialize())))
                .collect(),
            sml_hashes: self
                .sml_hashes
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_rev_hex()))
                .collect(),
            quorums: self
                .quorums
                .iter()
                .map(|(k, v)| (k.to_string(), hex::encode(v.serialize())))
                .collect(),
            llmq_hashes: self
                .llmq_hashes
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_rev_hex()))
                .collect(),
        }
    }

    pub fn from_stored(stored: &StoredSnapshot) -> Result<Self, TypesError> {
        let mut snap = Self {
            protx_height: stored.protx_height,
            llmq_height: stored.llmq_height,
            ..Self::default()
        };
        for (k, v) in &stored.protx_mns {
            let raw = hex::decode(v).map_err(|e| TypesError::InvalidHex(e.to_string()))?;
            snap.masternodes.insert(k.parse()?, MasternodeEntry::from_bytes(&raw)?);
        }
        for (k, v) in &stored.sml_hashes {
            snap.sml_hashes.insert(k.parse()?, Hash256::from_rev_hex(v)?);
        }
        for (k, v) in &stored.quorums {
            let raw = hex::decode(v).map_err(|e| TypesError::InvalidHex(e.to_string()))?;
            snap.quorums.insert(k.parse()?, QuorumCommitment::from_bytes(&raw)?);
        }
        for (k, v) in &stored.llmq_hashes {
            snap.llmq_hashes.insert(k.parse()?, Hash256::from_rev_hex(v)?);
        }
        if !snap.is_index_consistent() {
            return Err(TypesError::Other("content hashes do not match entries".into()));
        }
        Ok(snap)
    }

    pub fn is_index_consistent(&self) -> bool {
        self.masternodes.keys().eq(self.sml_hashes.keys())
            && self.quorums.keys().eq(self.llmq_hashes.keys())
    }

    pub fn valid_count(&self) -> usize {
        self.masternodes.values().filter(|e| e.is_valid).count()
    }
}

/// On-disk form of [`MnListSnapshot`]: entries as hex of their wire
/// serialization, content hashes byte-reversed.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoredSnapshot {
    pub protx_height: u32,
    pub llmq_height: u32,
    pub protx_mns: BTreeMap<String, String>,
    pub sml_hashes: BTreeMap<String, String>,
    pub quorums: BTreeMap<String, String>,
    pub llmq_hashes: BTreeMap<String, String>,
}
