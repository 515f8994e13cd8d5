//! Incremental, verified masternode list.
//!
//! Each diff kind has a single pending-request slot. A response is applied
//! only if it answers the outstanding request and starts from the height the
//! list is currently at; anything else is dropped without a trace beyond a
//! debug line. Verified changes are built on copies of the maps and swapped
//! in only after every merkle check passes.

use std::collections::BTreeMap;
use std::sync::Arc;

use rand::seq::IteratorRandom;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use ps_crypto::sha256d_multi;
use ps_types::{Dip3State, Hash256, NetworkId, OutPoint, ProTxHash, PsParams, Timestamp};
use ps_utils::stats::{DIFFS_APPLIED, DIFFS_IGNORED, DIFFS_REJECTED};
use ps_utils::{EventBus, StatsCounter};

use crate::chain::ChainHeaders;
use crate::diff::{
    calc_max_height, DiffKind, DiffRequest, MnListDiff, PendingSlot, SlotMatch, CBTX_TYPE,
    MAX_CBTX_PAYLOAD_VERSION,
};
use crate::entry::{MasternodeEntry, QuorumCommitment, QuorumKey};
use crate::error::{MnListError, VerificationError};
use crate::event::MnListEvent;
use crate::info::ProTxInfoCache;
use crate::snapshot::MnListSnapshot;
use crate::store::MnListStore;
use crate::verify::{check_cbtx_merkle_root, check_llmq_merkle_root, check_sml_merkle_root};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MnListConfig {
    pub network: NetworkId,
    pub params: PsParams,
    /// Track masternodes at all (quorums alone otherwise).
    pub load_mns: bool,
    /// Fetch `mnlistdiff` from peers instead of `protx.diff` from the server.
    pub use_p2p_diffs: bool,
}

impl Default for MnListConfig {
    fn default() -> Self {
        Self {
            network: NetworkId::Mainnet,
            params: PsParams::default(),
            load_mns: true,
            use_p2p_diffs: false,
        }
    }
}

type MnMaps = (BTreeMap<ProTxHash, MasternodeEntry>, BTreeMap<ProTxHash, Hash256>);
type QuorumMaps = (BTreeMap<QuorumKey, QuorumCommitment>, BTreeMap<QuorumKey, Hash256>);

/// Everything a verified diff changes, applied in one step.
#[derive(Default)]
struct VerifiedUpdate {
    protx_height: Option<u32>,
    llmq_height: Option<u32>,
    masternodes: Option<MnMaps>,
    quorums: Option<QuorumMaps>,
    state: Option<Dip3State>,
    deleted: Vec<ProTxHash>,
    added: Vec<ProTxHash>,
}

pub struct MnListDiffEngine {
    config: MnListConfig,
    store: MnListStore,
    chain: Arc<dyn ChainHeaders>,
    events: EventBus<MnListEvent>,
    stats: Option<Arc<StatsCounter>>,
    snapshot: MnListSnapshot,
    info: ProTxInfoCache,
    state: Dip3State,
    protx_slot: PendingSlot,
    llmq_slot: PendingSlot,
}

impl MnListDiffEngine {
    /// Create the engine from whatever is on disk.
    pub fn new(
        config: MnListConfig,
        store: MnListStore,
        chain: Arc<dyn ChainHeaders>,
        events: EventBus<MnListEvent>,
    ) -> Self {
        let snapshot = store.load_snapshot();
        let info = ProTxInfoCache::from_map(store.load_info());
        info!(
            protx_height = snapshot.protx_height,
            llmq_height = snapshot.llmq_height,
            masternodes = snapshot.masternodes.len(),
            quorums = snapshot.quorums.len(),
            "masternode list loaded"
        );
        Self {
            config,
            store,
            chain,
            events,
            stats: None,
            snapshot,
            info,
            state: Dip3State::Unknown,
            protx_slot: PendingSlot::default(),
            llmq_slot: PendingSlot::default(),
        }
    }

    pub fn with_stats(mut self, stats: Arc<StatsCounter>) -> Self {
        self.stats = Some(stats);
        self
    }

    pub fn config(&self) -> &MnListConfig {
        &self.config
    }

    pub fn snapshot(&self) -> &MnListSnapshot {
        &self.snapshot
    }

    pub fn state(&self) -> Dip3State {
        self.state
    }

    pub fn events(&self) -> &EventBus<MnListEvent> {
        &self.events
    }

    pub fn protx_height(&self) -> u32 {
        self.snapshot.protx_height
    }

    pub fn llmq_height(&self) -> u32 {
        self.snapshot.llmq_height
    }

    /// Highest height quorums are loaded up to.
    pub fn llmq_tip(&self) -> u32 {
        self.chain.local_height().saturating_sub(self.config.params.llmq_offset)
    }

    // ── Readiness ──────────────────────────────────────────────────────────

    pub fn protx_loading(&self) -> bool {
        self.config.load_mns && self.chain.local_height() > self.snapshot.protx_height
    }

    pub fn llmq_loading(&self) -> bool {
        self.config.use_p2p_diffs && self.llmq_tip() > self.snapshot.llmq_height
    }

    fn is_fresh(&self, list_height: u32, lag: u32, has_entries: bool) -> bool {
        let server = self.chain.server_height();
        if server <= self.config.network.dip3_activation_height() {
            return false;
        }
        server.saturating_sub(list_height) <= lag && has_entries
    }

    pub fn protx_ready(&self) -> bool {
        self.is_fresh(
            self.snapshot.protx_height,
            self.config.params.list_ready_lag,
            !self.snapshot.masternodes.is_empty(),
        )
    }

    pub fn llmq_ready(&self) -> bool {
        let p = &self.config.params;
        self.is_fresh(
            self.snapshot.llmq_height,
            p.list_ready_lag + p.llmq_offset,
            !self.snapshot.quorums.is_empty(),
        )
    }

    pub fn list_completeness(&self) -> f64 {
        let server = self.chain.server_height();
        let act = self.config.network.dip3_activation_height();
        if server <= act {
            return 0.0;
        }
        let done = self.snapshot.protx_height.saturating_sub(act) as f64;
        (done / (server - act) as f64).min(1.0)
    }

    pub fn info_completeness(&self) -> f64 {
        let mns = self.snapshot.masternodes.len();
        if mns == 0 {
            return 0.0;
        }
        (self.info.len() as f64 / mns as f64).min(1.0)
    }

    /// Quorum height as shown to users, which is offset from the tip.
    pub fn llmq_human_height(&self) -> u32 {
        match self.snapshot.llmq_height {
            0 => 0,
            h => h + self.config.params.llmq_offset,
        }
    }

    // ── Requests ───────────────────────────────────────────────────────────

    /// Kind of diff the list currently needs, if any.
    pub fn request_due(&self) -> Option<DiffKind> {
        if self.config.use_p2p_diffs {
            (self.llmq_loading() || self.protx_loading()).then_some(DiffKind::MnListDiff)
        } else {
            self.protx_loading().then_some(DiffKind::ProTx)
        }
    }

    fn slot_mut(&mut self, kind: DiffKind) -> &mut PendingSlot {
        match kind {
            DiffKind::ProTx => &mut self.protx_slot,
            DiffKind::MnListDiff => &mut self.llmq_slot,
        }
    }

    /// Plan and record the next request of `kind`.
    ///
    /// `None` when a request of that kind is already in flight or there is
    /// nothing to load.
    pub fn next_request(&mut self, kind: DiffKind) -> Option<DiffRequest> {
        let chunk = self.config.params.chunk_size;
        let (base_height, target) = match kind {
            DiffKind::ProTx if self.protx_loading() => {
                (self.snapshot.protx_height, self.chain.local_height())
            }
            DiffKind::MnListDiff if self.llmq_loading() => (self.snapshot.llmq_height, self.llmq_tip()),
            DiffKind::MnListDiff if self.protx_loading() => {
                (self.snapshot.protx_height, self.chain.local_height())
            }
            _ => return None,
        };
        let height = calc_max_height(base_height, chunk).min(target);
        if !self.slot_mut(kind).try_put(base_height, height) {
            return None;
        }
        debug!(%kind, base_height, height, "requesting diff");
        Some(DiffRequest { kind, base_height, height })
    }

    /// The transport failed to answer a request.
    pub fn on_request_failed(&mut self, request: DiffRequest, error: &str) {
        if self.slot_mut(request.kind).take_matching(request.base_height, request.height)
            != SlotMatch::Matched
        {
            debug!(kind = %request.kind, "ignoring failure of unknown request");
            return;
        }
        info!(
            kind = %request.kind,
            base_height = request.base_height,
            height = request.height,
            error,
            "diff request failed"
        );
        self.events.emit(&MnListEvent::NetworkError {
            kind: request.kind,
            error: error.to_string(),
        });
    }

    // ── Diff application ───────────────────────────────────────────────────

    /// Apply a diff answering the request `(base_height, height)` of `kind`.
    ///
    /// `Ok(false)` means the response was stale or unsolicited and dropped.
    /// On `Err` nothing was changed; the caller should request again.
    pub fn apply_diff(
        &mut self,
        kind: DiffKind,
        base_height: u32,
        height: u32,
        diff: &MnListDiff,
    ) -> Result<bool, VerificationError> {
        match self.slot_mut(kind).take_matching(base_height, height) {
            SlotMatch::Matched => {}
            SlotMatch::Mismatch => {
                debug!(%kind, base_height, height, "diff params differ from pending request");
                self.count(DIFFS_IGNORED);
                return Ok(false);
            }
            SlotMatch::Empty => {
                debug!(%kind, base_height, height, "ignoring unsolicited diff");
                self.count(DIFFS_IGNORED);
                return Ok(false);
            }
        }

        if !self.base_matches(kind, base_height) {
            debug!(%kind, base_height, "diff base no longer matches list height");
            self.count(DIFFS_IGNORED);
            return Ok(false);
        }

        match self.verify(kind, base_height, height, diff) {
            Ok(update) => {
                self.commit(update);
                self.count(DIFFS_APPLIED);
                Ok(true)
            }
            Err(e) => {
                info!(%kind, base_height, height, error = %e, "diff rejected");
                self.count(DIFFS_REJECTED);
                Err(e)
            }
        }
    }

    fn base_matches(&self, kind: DiffKind, base_height: u32) -> bool {
        let protx_height = self.snapshot.protx_height;
        match kind {
            // protx.diff starts counting at 1 where mnlistdiff uses 0
            DiffKind::ProTx => {
                base_height == protx_height || (protx_height == 0 && base_height == 1)
            }
            DiffKind::MnListDiff => {
                base_height == self.snapshot.llmq_height || base_height == protx_height
            }
        }
    }

    fn verify(
        &self,
        kind: DiffKind,
        base_height: u32,
        height: u32,
        diff: &MnListDiff,
    ) -> Result<VerifiedUpdate, VerificationError> {
        let cb_tx = &diff.cb_tx;
        if cb_tx.is_classical() {
            return Ok(self.disabled_update(kind, height));
        }
        let payload = cb_tx.payload.as_ref().ok_or(VerificationError::MissingPayload)?;
        if cb_tx.tx_type != CBTX_TYPE || payload.version > MAX_CBTX_PAYLOAD_VERSION {
            return Err(VerificationError::UnsupportedCbTx {
                tx_type: cb_tx.tx_type,
                version: payload.version,
            });
        }

        let apply_mns = match kind {
            DiffKind::ProTx => true,
            DiffKind::MnListDiff => {
                self.config.load_mns && base_height == self.snapshot.protx_height
            }
        };
        let apply_quorums = kind == DiffKind::MnListDiff
            && base_height == self.snapshot.llmq_height
            && height <= self.llmq_tip();

        let mut update = VerifiedUpdate::default();

        if apply_mns {
            let mut masternodes = self.snapshot.masternodes.clone();
            let mut sml_hashes = self.snapshot.sml_hashes.clone();
            for hash in &diff.deleted_mns {
                masternodes.remove(hash);
                sml_hashes.remove(hash);
            }
            for entry in &diff.mn_list {
                sml_hashes.insert(entry.pro_reg_tx_hash, entry.content_hash());
                masternodes.insert(entry.pro_reg_tx_hash, entry.clone());
            }
            check_sml_merkle_root(&sml_hashes, payload)?;
            update.masternodes = Some((masternodes, sml_hashes));
            update.protx_height = Some(payload.height);
            update.state = Some(Dip3State::Enabled);
            update.deleted = diff.deleted_mns.clone();
            update.added = diff.mn_list.iter().map(|e| e.pro_reg_tx_hash).collect();
        }

        if apply_quorums {
            let mut quorums = self.snapshot.quorums.clone();
            let mut llmq_hashes = self.snapshot.llmq_hashes.clone();
            for key in &diff.deleted_quorums {
                quorums.remove(key);
                llmq_hashes.remove(key);
            }
            for q in &diff.new_quorums {
                llmq_hashes.insert(q.key(), q.content_hash());
                quorums.insert(q.key(), q.clone());
            }
            if payload.version > 1 {
                check_llmq_merkle_root(&llmq_hashes, payload)?;
            }
            update.quorums = Some((quorums, llmq_hashes));
            update.llmq_height = Some(payload.height);
        }

        check_cbtx_merkle_root(cb_tx, &diff.proof, self.chain.as_ref())?;
        Ok(update)
    }

    /// A classical coinbase: masternode features are not active yet.
    fn disabled_update(&self, kind: DiffKind, height: u32) -> VerifiedUpdate {
        let mut update = VerifiedUpdate::default();
        if kind == DiffKind::ProTx || self.config.load_mns {
            update.protx_height = Some(height);
            update.state = Some(Dip3State::Disabled);
        }
        if kind == DiffKind::MnListDiff {
            update.llmq_height = Some(height);
        }
        update
    }

    fn commit(&mut self, update: VerifiedUpdate) {
        if let Some(h) = update.protx_height {
            self.snapshot.protx_height = h;
        }
        if let Some(h) = update.llmq_height {
            self.snapshot.llmq_height = h;
        }
        if let Some((masternodes, sml_hashes)) = update.masternodes {
            self.snapshot.masternodes = masternodes;
            self.snapshot.sml_hashes = sml_hashes;
        }
        if let Some((quorums, llmq_hashes)) = update.quorums {
            self.snapshot.quorums = quorums;
            self.snapshot.llmq_hashes = llmq_hashes;
        }
        if let Some(state) = update.state {
            self.state = state;
        }

        // info for removed or re-registered masternodes is stale now
        for hash in update.deleted.iter().chain(update.added.iter()) {
            self.info.remove(hash);
        }

        self.save_snapshot();
        debug!(
            protx_height = self.snapshot.protx_height,
            llmq_height = self.snapshot.llmq_height,
            deleted = update.deleted.len(),
            added = update.added.len(),
            "masternode list updated"
        );
        self.events.emit(&MnListEvent::DiffUpdated {
            state: self.state,
            deleted: update.deleted,
            added: update.added,
        });
    }

    /// Drop all list state and start loading from height 1.
    pub fn reset(&mut self) {
        self.snapshot = MnListSnapshot::default();
        self.info.clear();
        self.protx_slot.clear();
        self.llmq_slot.clear();
        self.state = Dip3State::Unknown;
        self.save_snapshot();
        if let Err(e) = self.store.save_info(self.info.as_map()) {
            warn!(error = %e, "failed to save protx info");
        }
        info!("masternode list reset");
        self.events.emit(&MnListEvent::DiffUpdated {
            state: self.state,
            deleted: Vec::new(),
            added: Vec::new(),
        });
    }

    fn save_snapshot(&self) {
        if let Err(e) = self.store.save_snapshot(&self.snapshot) {
            warn!(error = %e, "failed to save masternode list");
        }
    }

    fn count(&self, name: &str) {
        if let Some(stats) = &self.stats {
            stats.increment(name);
        }
    }

    // ── Lookups ────────────────────────────────────────────────────────────

    pub fn get_mn(&self, hash: &ProTxHash) -> Option<&MasternodeEntry> {
        self.snapshot.masternodes.get(hash)
    }

    pub fn get_mn_by_outpoint(&self, outpoint: &OutPoint) -> Option<&MasternodeEntry> {
        self.info
            .hash_by_outpoint(outpoint)
            .and_then(|h| self.snapshot.masternodes.get(&h))
    }

    pub fn random_valid_mn(&self) -> Option<&MasternodeEntry> {
        self.snapshot
            .masternodes
            .values()
            .filter(|e| e.is_valid)
            .choose(&mut rand::thread_rng())
    }

    /// The quorum of `llmq_type` responsible for signing `request_id`.
    pub fn calc_responsible_quorum(
        &self,
        llmq_type: u8,
        request_id: &Hash256,
    ) -> Option<&QuorumCommitment> {
        self.snapshot
            .quorums
            .values()
            .filter(|q| q.llmq_type == llmq_type)
            .min_by_key(|q| {
                sha256d_multi(&[&[q.llmq_type], q.quorum_hash.as_bytes(), request_id.as_bytes()])
            })
    }

    // ── ProTx info ─────────────────────────────────────────────────────────

    pub fn protx_info(&self, hash: &ProTxHash) -> Option<&serde_json::Value> {
        self.info.get(hash)
    }

    /// Masternodes for which no info has been fetched yet.
    pub fn hashes_missing_info(&self) -> Vec<ProTxHash> {
        self.snapshot
            .masternodes
            .keys()
            .filter(|h| self.info.get(h).is_none())
            .copied()
            .collect()
    }

    pub fn on_protx_info(
        &mut self,
        value: serde_json::Value,
        now: Timestamp,
    ) -> Result<ProTxHash, MnListError> {
        let hash = self.info.insert(value)?;
        let force = self.info_completeness() >= 1.0;
        let throttle = self.config.params.info_save_throttle_secs;
        if self.info.save_due(now, throttle, force) {
            match self.store.save_info(self.info.as_map()) {
                Ok(()) => self.info.mark_saved(now),
                Err(e) => warn!(error = %e, "failed to save protx info"),
            }
        }
        self.events.emit(&MnListEvent::InfoUpdated { pro_tx_hash: hash });
        Ok(hash)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::chain::BlockHeader;
    use crate::diff::{CbTxPayload, CoinbaseTx, CommitmentProof};
    use crate::entry::tests::{entry, quorum};
    use crate::verify::{llmq_merkle_root, sml_merkle_root};
    use ps_crypto::sha256d;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct TestChain {
        pub local: u32,
        pub server: u32,
        pub headers: Mutex<HashMap<u32, BlockHeader>>,
    }

    impl ChainHeaders for TestChain {
        fn read_header(&self, height: u32) -> Option<BlockHeader> {
            self.headers.lock().unwrap().get(&height).copied()
        }
        fn local_height(&self) -> u32 {
            self.local
        }
        fn server_height(&self) -> u32 {
            self.server
        }
    }

    /// Build a diff whose commitments match `snapshot` after applying it.
    pub fn valid_diff(
        chain: &TestChain,
        engine: &MnListDiffEngine,
        height: u32,
        deleted: Vec<ProTxHash>,
        added: Vec<MasternodeEntry>,
        new_quorums: Vec<QuorumCommitment>,
    ) -> MnListDiff {
        let mut sml = engine.snapshot().sml_hashes.clone();
        for h in &deleted {
            sml.remove(h);
        }
        for e in &added {
            sml.insert(e.pro_reg_tx_hash, e.content_hash());
        }
        let mut llmq = engine.snapshot().llmq_hashes.clone();
        for q in &new_quorums {
            llmq.insert(q.key(), q.content_hash());
        }
        let txid = sha256d(&height.to_le_bytes());
        chain
            .headers
            .lock()
            .unwrap()
            .insert(height, BlockHeader { height, merkle_root: txid });
        MnListDiff {
            base_block_hash: Hash256::ZERO,
            block_hash: Hash256::new([height as u8; 32]),
            cb_tx: CoinbaseTx {
                txid,
                version: 3,
                tx_type: CBTX_TYPE,
                payload: Some(CbTxPayload {
                    version: 2,
                    height,
                    merkle_root_mn_list: sml_merkle_root(&sml),
                    merkle_root_quorums: Some(llmq_merkle_root(&llmq)),
                }),
            },
            proof: CommitmentProof::Hashes(vec![txid]),
            deleted_mns: deleted,
            mn_list: added,
            deleted_quorums: Vec::new(),
            new_quorums,
        }
    }

    fn engine_with(
        chain: Arc<TestChain>,
        dir: &std::path::Path,
        use_p2p: bool,
    ) -> (MnListDiffEngine, Arc<Mutex<Vec<MnListEvent>>>) {
        let config = MnListConfig {
            network: NetworkId::Regtest,
            use_p2p_diffs: use_p2p,
            ..Default::default()
        };
        let events = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        let sub = events.subscribe(move |e: &MnListEvent| s.lock().unwrap().push(e.clone()));
        std::mem::forget(sub);
        let engine = MnListDiffEngine::new(config, MnListStore::new(dir), chain, events)
            .with_stats(Arc::new(StatsCounter::mixing()));
        (engine, seen)
    }

    fn chain_at(local: u32) -> Arc<TestChain> {
        Arc::new(TestChain { local, server: local, ..Default::default() })
    }

    #[test]
    fn verified_protx_diff_is_committed() {
        let dir = tempfile::tempdir().unwrap();
        let chain = chain_at(1000);
        let (mut engine, seen) = engine_with(Arc::clone(&chain), dir.path(), false);

        let req = engine.next_request(DiffKind::ProTx).unwrap();
        assert_eq!((req.base_height, req.height), (1, 1000));
        let diff = valid_diff(&chain, &engine, 1000, vec![], vec![entry(1, true), entry(2, true)], vec![]);
        assert_eq!(engine.apply_diff(DiffKind::ProTx, 1, 1000, &diff), Ok(true));

        assert_eq!(engine.protx_height(), 1000);
        assert_eq!(engine.state(), Dip3State::Enabled);
        assert_eq!(engine.snapshot().masternodes.len(), 2);
        assert!(engine.snapshot().is_index_consistent());
        assert!(engine.protx_ready());
        assert!(!engine.protx_loading());

        let events = seen.lock().unwrap();
        match events.last() {
            Some(MnListEvent::DiffUpdated { added, .. }) => assert_eq!(added.len(), 2),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn unsolicited_diff_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let chain = chain_at(1000);
        let (mut engine, _) = engine_with(Arc::clone(&chain), dir.path(), false);
        let diff = valid_diff(&chain, &engine, 1000, vec![], vec![entry(1, true)], vec![]);
        let before = engine.snapshot().clone();
        assert_eq!(engine.apply_diff(DiffKind::ProTx, 1, 1000, &diff), Ok(false));
        assert_eq!(engine.snapshot(), &before);
    }

    #[test]
    fn mismatched_params_consume_slot() {
        let dir = tempfile::tempdir().unwrap();
        let chain = chain_at(1000);
        let (mut engine, _) = engine_with(Arc::clone(&chain), dir.path(), false);
        engine.next_request(DiffKind::ProTx).unwrap();
        let diff = valid_diff(&chain, &engine, 999, vec![], vec![entry(1, true)], vec![]);
        assert_eq!(engine.apply_diff(DiffKind::ProTx, 1, 999, &diff), Ok(false));
        assert!(engine.next_request(DiffKind::ProTx).is_some());
    }

    #[test]
    fn one_request_in_flight_per_kind() {
        let dir = tempfile::tempdir().unwrap();
        let (mut engine, _) = engine_with(chain_at(5000), dir.path(), false);
        let first = engine.next_request(DiffKind::ProTx).unwrap();
        assert_eq!(first.height, 2015);
        assert!(engine.next_request(DiffKind::ProTx).is_none());
        engine.on_request_failed(first, "timeout");
        assert!(engine.next_request(DiffKind::ProTx).is_some());
    }

    #[test]
    fn root_mismatch_leaves_list_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let chain = chain_at(1000);
        let (mut engine, _) = engine_with(Arc::clone(&chain), dir.path(), false);
        engine.next_request(DiffKind::ProTx).unwrap();
        let mut diff = valid_diff(&chain, &engine, 1000, vec![], vec![entry(1, true)], vec![]);
        diff.mn_list.push(entry(2, true));
        let before = engine.snapshot().clone();
        assert_eq!(
            engine.apply_diff(DiffKind::ProTx, 1, 1000, &diff),
            Err(VerificationError::MnListRootMismatch)
        );
        assert_eq!(engine.snapshot(), &before);
    }

    #[test]
    fn unsupported_payload_version_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let chain = chain_at(1000);
        let (mut engine, _) = engine_with(Arc::clone(&chain), dir.path(), false);
        engine.next_request(DiffKind::ProTx).unwrap();
        let mut diff = valid_diff(&chain, &engine, 1000, vec![], vec![], vec![]);
        if let Some(p) = diff.cb_tx.payload.as_mut() {
            p.version = 3;
        }
        assert!(matches!(
            engine.apply_diff(DiffKind::ProTx, 1, 1000, &diff),
            Err(VerificationError::UnsupportedCbTx { tx_type: 5, version: 3 })
        ));
    }

    #[test]
    fn classical_coinbase_advances_without_entries() {
        let dir = tempfile::tempdir().unwrap();
        let chain = chain_at(300);
        let (mut engine, _) = engine_with(Arc::clone(&chain), dir.path(), false);
        engine.next_request(DiffKind::ProTx).unwrap();
        let mut diff = valid_diff(&chain, &engine, 300, vec![], vec![entry(1, true)], vec![]);
        diff.cb_tx.tx_type = 0;
        diff.cb_tx.payload = None;
        assert_eq!(engine.apply_diff(DiffKind::ProTx, 1, 300, &diff), Ok(true));
        assert_eq!(engine.protx_height(), 300);
        assert_eq!(engine.state(), Dip3State::Disabled);
        assert!(engine.snapshot().masternodes.is_empty());
    }

    #[test]
    fn mnlistdiff_loads_quorums_below_tip() {
        let dir = tempfile::tempdir().unwrap();
        let chain = chain_at(1000);
        let (mut engine, _) = engine_with(Arc::clone(&chain), dir.path(), true);
        assert_eq!(engine.request_due(), Some(DiffKind::MnListDiff));
        let req = engine.next_request(DiffKind::MnListDiff).unwrap();
        assert_eq!((req.base_height, req.height), (1, 992));
        let diff = valid_diff(&chain, &engine, 992, vec![], vec![entry(1, true)], vec![quorum(1, 1), quorum(2, 1)]);
        assert_eq!(engine.apply_diff(DiffKind::MnListDiff, 1, 992, &diff), Ok(true));
        assert_eq!(engine.llmq_height(), 992);
        assert_eq!(engine.protx_height(), 992);
        assert_eq!(engine.snapshot().quorums.len(), 2);
        assert_eq!(engine.llmq_human_height(), 1000);
        assert!(engine.llmq_ready());
        assert!(!engine.llmq_loading());
        assert!(engine.protx_loading());
    }

    #[test]
    fn deletions_drop_entries_and_info() {
        let dir = tempfile::tempdir().unwrap();
        let chain = chain_at(1000);
        let (mut engine, _) = engine_with(Arc::clone(&chain), dir.path(), false);
        engine.next_request(DiffKind::ProTx).unwrap();
        let diff = valid_diff(&chain, &engine, 1000, vec![], vec![entry(1, true), entry(2, true)], vec![]);
        engine.apply_diff(DiffKind::ProTx, 1, 1000, &diff).unwrap();

        let gone = entry(1, true).pro_reg_tx_hash;
        engine
            .on_protx_info(serde_json::json!({"proTxHash": gone.to_string()}), Timestamp::new(10))
            .unwrap();
        assert_eq!(engine.hashes_missing_info(), vec![entry(2, true).pro_reg_tx_hash]);

        let chain2 = Arc::new(TestChain { local: 1010, server: 1010, ..Default::default() });
        engine.chain = Arc::clone(&chain2) as Arc<dyn ChainHeaders>;
        engine.next_request(DiffKind::ProTx).unwrap();
        let diff = valid_diff(&chain2, &engine, 1010, vec![gone], vec![], vec![]);
        assert_eq!(engine.apply_diff(DiffKind::ProTx, 1000, 1010, &diff), Ok(true));
        assert!(engine.get_mn(&gone).is_none());
        assert!(engine.protx_info(&gone).is_none());
    }

    #[test]
    fn lookup_by_collateral_outpoint() {
        let dir = tempfile::tempdir().unwrap();
        let chain = chain_at(1000);
        let (mut engine, seen) = engine_with(Arc::clone(&chain), dir.path(), false);
        engine.next_request(DiffKind::ProTx).unwrap();
        let diff = valid_diff(&chain, &engine, 1000, vec![], vec![entry(3, true)], vec![]);
        engine.apply_diff(DiffKind::ProTx, 1, 1000, &diff).unwrap();

        let hash = entry(3, true).pro_reg_tx_hash;
        let collateral = Hash256::new([0xcc; 32]);
        engine
            .on_protx_info(
                serde_json::json!({
                    "proTxHash": hash.to_string(),
                    "collateralHash": collateral.to_string(),
                    "collateralIndex": 1,
                }),
                Timestamp::new(10),
            )
            .unwrap();
        let mn = engine.get_mn_by_outpoint(&OutPoint::new(collateral, 1)).unwrap();
        assert_eq!(mn.pro_reg_tx_hash, hash);
        assert_eq!(engine.info_completeness(), 1.0);
        assert!(matches!(
            seen.lock().unwrap().last(),
            Some(MnListEvent::InfoUpdated { .. })
        ));
    }

    #[test]
    fn random_mn_is_valid() {
        let dir = tempfile::tempdir().unwrap();
        let chain = chain_at(1000);
        let (mut engine, _) = engine_with(Arc::clone(&chain), dir.path(), false);
        assert!(engine.random_valid_mn().is_none());
        engine.next_request(DiffKind::ProTx).unwrap();
        let diff = valid_diff(&chain, &engine, 1000, vec![], vec![entry(1, false), entry(2, true)], vec![]);
        engine.apply_diff(DiffKind::ProTx, 1, 1000, &diff).unwrap();
        for _ in 0..10 {
            assert!(engine.random_valid_mn().unwrap().is_valid);
        }
    }

    #[test]
    fn responsible_quorum_minimises_sort_hash() {
        let dir = tempfile::tempdir().unwrap();
        let chain = chain_at(1000);
        let (mut engine, _) = engine_with(Arc::clone(&chain), dir.path(), true);
        engine.next_request(DiffKind::MnListDiff).unwrap();
        let qs = vec![quorum(1, 1), quorum(2, 1), quorum(3, 2)];
        let diff = valid_diff(&chain, &engine, 992, vec![], vec![], qs.clone());
        engine.apply_diff(DiffKind::MnListDiff, 1, 992, &diff).unwrap();

        let request_id = Hash256::new([9u8; 32]);
        let expected = qs[..2]
            .iter()
            .min_by_key(|q| sha256d_multi(&[&[1u8], q.quorum_hash.as_bytes(), request_id.as_bytes()]))
            .unwrap();
        let chosen = engine.calc_responsible_quorum(1, &request_id).unwrap();
        assert_eq!(chosen.quorum_hash, expected.quorum_hash);
        assert!(engine.calc_responsible_quorum(7, &request_id).is_none());
    }

    #[test]
    fn reset_returns_to_height_one() {
        let dir = tempfile::tempdir().unwrap();
        let chain = chain_at(1000);
        let (mut engine, _) = engine_with(Arc::clone(&chain), dir.path(), false);
        engine.next_request(DiffKind::ProTx).unwrap();
        let diff = valid_diff(&chain, &engine, 1000, vec![], vec![entry(1, true)], vec![]);
        engine.apply_diff(DiffKind::ProTx, 1, 1000, &diff).unwrap();
        engine.reset();
        assert_eq!(engine.snapshot(), &MnListSnapshot::default());
        assert_eq!(engine.state(), Dip3State::Unknown);

        let reloaded = engine_with(chain, dir.path(), false).0;
        assert_eq!(reloaded.snapshot(), &MnListSnapshot::default());
    }

    #[test]
    fn committed_list_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let chain = chain_at(1000);
        let (mut engine, _) = engine_with(Arc::clone(&chain), dir.path(), false);
        engine.next_request(DiffKind::ProTx).unwrap();
        let diff = valid_diff(&chain, &engine, 1000, vec![], vec![entry(1, true)], vec![]);
        engine.apply_diff(DiffKind::ProTx, 1, 1000, &diff).unwrap();
        let reloaded = engine_with(chain, dir.path(), false).0;
        assert_eq!(reloaded.snapshot(), engine.snapshot());
    }

    #[test]
    fn not_ready_before_activation() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, _) = engine_with(chain_at(100), dir.path(), false);
        assert!(!engine.protx_ready());
        assert_eq!(engine.list_completeness(), 0.0);
    }
}
