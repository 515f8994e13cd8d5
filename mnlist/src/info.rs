//! Cache of `protx info` results with a collateral back-mapping.

use std::collections::{BTreeMap, HashMap};

use serde_json::Value;

use ps_types::{OutPoint, ProTxHash, Timestamp};

use crate::entry::collateral_outpoint;
use crate::error::MnListError;

#[derive(Debug, Default)]
pub struct ProTxInfoCache {
    info: BTreeMap<ProTxHash, Value>,
    by_outpoint: HashMap<OutPoint, ProTxHash>,
    last_saved: Option<Timestamp>,
}

impl ProTxInfoCache {
    pub fn from_map(info: BTreeMap<ProTxHash, Value>) -> Self {
        let mut cache = Self { info, ..Self::default() };
        cache.rebuild_back_mapping();
        cache
    }

    pub fn as_map(&self) -> &BTreeMap<ProTxHash, Value> {
        &self.info
    }

    pub fn len(&self) -> usize {
        self.info.len()
    }

    pub fn is_empty(&self) -> bool {
        self.info.is_empty()
    }

    pub fn get(&self, hash: &ProTxHash) -> Option<&Value> {
        self.info.get(hash)
    }

    pub fn hash_by_outpoint(&self, outpoint: &OutPoint) -> Option<ProTxHash> {
        self.by_outpoint.get(outpoint).copied()
    }

    /// Store one info result, returning its ProTx hash.
    pub fn insert(&mut self, info: Value) -> Result<ProTxHash, MnListError> {
        let hash: ProTxHash = info
            .get("proTxHash")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| MnListError::InvalidInfo("empty result".into()))?
            .parse()?;
        if let Some(outpoint) = collateral_outpoint(&info) {
            self.by_outpoint.insert(outpoint, hash);
        }
        self.info.insert(hash, info);
        Ok(hash)
    }

    pub fn remove(&mut self, hash: &ProTxHash) {
        if self.info.remove(hash).is_some() {
            self.by_outpoint.retain(|_, h| h != hash);
        }
    }

    pub fn clear(&mut self) {
        self.info.clear();
        self.by_outpoint.clear();
    }

    pub fn rebuild_back_mapping(&mut self) {
        self.by_outpoint = self
            .info
            .iter()
            .filter_map(|(hash, info)| collateral_outpoint(info).map(|op| (op, *hash)))
            .collect();
    }

    /// Whether a save is due given the throttle window.
    pub fn save_due(&self, now: Timestamp, throttle_secs: u64, force: bool) -> bool {
        force
            || self
                .last_saved
                .map_or(true, |t| t.has_expired(throttle_secs, now))
    }

    pub fn mark_saved(&mut self, now: Timestamp) {
        self.last_saved = Some(now);
    }
}
