//! Workflow engine: creates, broadcasts, tracks and rolls back the
//! transactions mixing produces.
//!
//! There is one slot per [`WorkflowKind`] and any number of denominate
//! workflows. Every mutation takes `&mut self`, so the owner serializes
//! access (the session keeps the engine behind an async mutex). A slot
//! handed out by [`WorkflowEngine::begin_broadcast`] stays guarded until its
//! result comes back: cleanup and confirmations for it queue up and run in
//! [`WorkflowEngine::finish_broadcast`]. Slots and the ledger are persisted
//! after each change; a failed save is logged and retried on the next change.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};
use uuid::Uuid;

use ps_store::{PsDataStore, PsDataStoreExt};
use ps_types::{
    is_collateral_val, is_denom, Address, Clock, Duffs, KpType, OutPoint, PsParams, PsTxType,
    Timestamp, Transaction, TxHeight, TxId, TxOut, COLLATERAL_VAL, CREATE_COLLATERAL_VAL,
};
use ps_utils::stats::{
    StatsCounter, BROADCAST_FAILURES, TXS_BROADCAST, WORKFLOWS_CLEANED, WORKFLOWS_CREATED,
};

use crate::balance::funding_coins;
use crate::error::MixingError;
use crate::fees::{min_new_collateral_from_coins_val, min_new_denoms_from_coins_val};
use crate::keypairs::{calc_need_new_keypairs_cnt, KeypairNeeds, KeypairPlan};
use crate::ledger::CoinRoundsLedger;
use crate::planner::{plan_total, DenominationPlanner, Holdings, PlanTarget};
use crate::selection::{selection_for, CoinSelection};
use crate::untracked::{self, UntrackedReport};
use crate::wallet::{Broadcaster, BuildRequest, Coin, KeySource, TxBuilder, TxSigner, WalletBackend};
use crate::workflow::{
    denominate_key, PsDenominateWorkflow, PsTxWorkflow, WorkflowKind, DENOMINATE_KEY_PREFIX,
};

pub const LAST_MIX_STOP_KEY: &str = "last_mix_stop_time";
pub const LAST_DENOMS_TX_KEY: &str = "last_denoms_tx_time";

/// Engine settings derived from the mixing configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineConfig {
    pub params: PsParams,
    pub mix_rounds: u32,
    pub fee_per_kb: Duffs,
    pub target: PlanTarget,
    /// Cooldown after mixing stops during which PS coins are not spent.
    pub wait_for_mn_txs_secs: u64,
    pub broadcast_timeout_secs: u64,
    pub group_origin_coins_by_addr: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            params: PsParams::default(),
            mix_rounds: 4,
            fee_per_kb: crate::fees::DEFAULT_FEE_PER_KB,
            target: PlanTarget::default(),
            wait_for_mn_txs_secs: 60,
            broadcast_timeout_secs: 30,
            group_origin_coins_by_addr: false,
        }
    }
}

/// External collaborators of the engine.
#[derive(Clone)]
pub struct EngineDeps {
    pub wallet: Arc<dyn WalletBackend>,
    pub builder: Arc<dyn TxBuilder>,
    pub signer: Arc<dyn TxSigner>,
    pub broadcaster: Arc<dyn Broadcaster>,
    pub store: Arc<dyn PsDataStore>,
    pub clock: Arc<dyn Clock>,
}

pub struct WorkflowEngine {
    config: EngineConfig,
    wallet: Arc<dyn WalletBackend>,
    builder: Arc<dyn TxBuilder>,
    signer: Arc<dyn TxSigner>,
    broadcaster: Arc<dyn Broadcaster>,
    store: Arc<dyn PsDataStore>,
    clock: Arc<dyn Clock>,
    planner: DenominationPlanner,
    selection: Box<dyn CoinSelection>,
    stats: Option<Arc<StatsCounter>>,
    ledger: CoinRoundsLedger,
    slots: HashMap<WorkflowKind, PsTxWorkflow>,
    denominate: BTreeMap<String, PsDenominateWorkflow>,
    mixing: bool,
    last_mix_stop: Option<Timestamp>,
    last_denoms_tx: Option<Timestamp>,
    in_flight: HashSet<WorkflowKind>,
    deferred_cleanup: HashMap<WorkflowKind, bool>,
    deferred_txs: HashMap<WorkflowKind, Vec<TxId>>,
}

/// A workflow transaction out for broadcast.
#[derive(Debug)]
pub struct PendingBroadcast {
    pub kind: WorkflowKind,
    pub txid: TxId,
    pub tx: Transaction,
    pub timeout: Duration,
    started: Timestamp,
}

impl WorkflowEngine {
    /// Restore the ledger and every workflow from the store.
    pub fn load(config: EngineConfig, deps: EngineDeps) -> Result<Self, MixingError> {
        let store = deps.store;
        let ledger = CoinRoundsLedger::load(store.as_ref(), config.mix_rounds)?;

        let mut slots = HashMap::new();
        for kind in WorkflowKind::ALL {
            if let Some(wfl) = store.get_typed::<PsTxWorkflow>(kind.store_key())? {
                slots.insert(kind, wfl);
            }
        }
        let mut denominate = BTreeMap::new();
        for key in store.keys_with_prefix(DENOMINATE_KEY_PREFIX)? {
            if let Some(wfl) = store.get_typed::<PsDenominateWorkflow>(&key)? {
                denominate.insert(wfl.uuid.clone(), wfl);
            }
        }
        let last_mix_stop = store.get_typed::<Timestamp>(LAST_MIX_STOP_KEY)?;
        let last_denoms_tx = store.get_typed::<Timestamp>(LAST_DENOMS_TX_KEY)?;

        info!(
            denoms = ledger.denoms().len(),
            collaterals = ledger.collaterals().len(),
            workflows = slots.len(),
            denominate = denominate.len(),
            "mixing state loaded"
        );

        Ok(Self {
            planner: DenominationPlanner::new(
                config.params.max_denoms_per_tier,
                config.fee_per_kb,
                config.target.clone(),
            ),
            selection: selection_for(config.group_origin_coins_by_addr),
            config,
            wallet: deps.wallet,
            builder: deps.builder,
            signer: deps.signer,
            broadcaster: deps.broadcaster,
            store,
            clock: deps.clock,
            stats: None,
            ledger,
            slots,
            denominate,
            mixing: false,
            last_mix_stop,
            last_denoms_tx,
            in_flight: HashSet::new(),
            deferred_cleanup: HashMap::new(),
            deferred_txs: HashMap::new(),
        })
    }

    pub fn with_stats(mut self, stats: Arc<StatsCounter>) -> Self {
        self.stats = Some(stats);
        self
    }

    fn bump(&self, name: &str) {
        if let Some(stats) = &self.stats {
            stats.increment(name);
        }
    }

    // ── Accessors and settings ─────────────────────────────────────────

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn ledger(&self) -> &CoinRoundsLedger {
        &self.ledger
    }

    /// Direct ledger access; edits are saved with the next engine change or
    /// an explicit [`WorkflowEngine::save_ledger`].
    pub fn ledger_mut(&mut self) -> &mut CoinRoundsLedger {
        &mut self.ledger
    }

    pub fn save_ledger(&self) {
        self.persist_ledger();
    }

    pub fn planner(&self) -> &DenominationPlanner {
        &self.planner
    }

    pub fn wallet(&self) -> &Arc<dyn WalletBackend> {
        &self.wallet
    }

    pub fn workflow(&self, kind: WorkflowKind) -> Option<&PsTxWorkflow> {
        self.slots.get(&kind)
    }

    /// Replace a slot, persisting it. `None` clears the slot.
    pub fn set_workflow(&mut self, kind: WorkflowKind, wfl: Option<PsTxWorkflow>) {
        match wfl {
            Some(w) => {
                self.slots.insert(kind, w);
            }
            None => {
                self.slots.remove(&kind);
            }
        }
        self.persist_slot(kind);
    }

    pub fn denominate_workflows(&self) -> &BTreeMap<String, PsDenominateWorkflow> {
        &self.denominate
    }

    /// Any slot or denominate workflow still in flight.
    pub fn has_active_workflows(&self) -> bool {
        !self.slots.is_empty() || !self.denominate.is_empty()
    }

    pub fn last_denoms_tx_time(&self) -> Option<Timestamp> {
        self.last_denoms_tx
    }

    pub fn set_mix_rounds(&mut self, mix_rounds: u32) {
        self.config.mix_rounds = mix_rounds;
        self.ledger.set_mix_rounds(mix_rounds);
    }

    pub fn set_target(&mut self, target: PlanTarget) {
        self.config.target = target.clone();
        self.planner.set_target(target);
    }

    pub fn set_group_origin_coins_by_addr(&mut self, on: bool) {
        self.config.group_origin_coins_by_addr = on;
        self.selection = selection_for(on);
    }

    // ── Persistence ────────────────────────────────────────────────────

    fn persist_slot(&self, kind: WorkflowKind) {
        let res = match self.slots.get(&kind) {
            Some(wfl) => self.store.set_typed(kind.store_key(), wfl),
            None => self.store.pop_ps_data(kind.store_key()).map(|_| ()),
        };
        if let Err(e) = res {
            warn!(%kind, error = %e, "failed to persist workflow");
        }
    }

    fn persist_denominate(&self, uuid: &str) {
        let key = denominate_key(uuid);
        let res = match self.denominate.get(uuid) {
            Some(wfl) => self.store.set_typed(&key, wfl),
            None => self.store.pop_ps_data(&key).map(|_| ()),
        };
        if let Err(e) = res {
            warn!(uuid, error = %e, "failed to persist denominate workflow");
        }
    }

    fn persist_ledger(&self) {
        if let Err(e) = self.ledger.save(self.store.as_ref()) {
            warn!(error = %e, "failed to persist coin ledger");
        }
    }

    fn persist_time(&self, key: &str, value: Timestamp) {
        if let Err(e) = self.store.set_typed(key, &value) {
            warn!(key, error = %e, "failed to persist timestamp");
        }
    }

    // ── Planning inputs ────────────────────────────────────────────────

    /// Holdings as seen by the planner when `coins` fund the next plan.
    pub fn holdings(&self, coins: &[Coin]) -> Holdings {
        Holdings {
            denom_counts: self.ledger.denom_counts().clone(),
            denoms_value: self.ledger.denoms_value(),
            need_collateral: self.ledger.collaterals().is_empty(),
            available: coins.iter().map(|c| c.value).sum(),
            n_inputs: coins.len() as u64,
        }
    }

    fn selected_coins(&self, min_value: Duffs) -> (Vec<Coin>, Duffs) {
        let funding = funding_coins(self.wallet.as_ref(), &self.ledger);
        let total = funding.iter().map(|c| c.value).sum();
        (self.selection.next_coins(funding, min_value), total)
    }

    /// The whole gap to the configured target, ignoring available funds.
    pub fn full_plan(&self) -> Vec<Vec<Duffs>> {
        let (coins, _) = self.selected_coins(min_new_denoms_from_coins_val(self.config.fee_per_kb));
        self.planner.calc_need_denoms_amounts(&self.holdings(&coins), true)
    }

    pub fn keypair_needs(&self) -> KeypairNeeds {
        calc_need_new_keypairs_cnt(&self.ledger, &self.full_plan(), self.config.params.entry_max_size)
    }

    /// Unused, unreserved wallet addresses, creating new ones when short.
    fn unused_pool(
        &self,
        count: usize,
        for_change: bool,
        skip: &BTreeSet<Address>,
    ) -> Result<Vec<Address>, MixingError> {
        let mut out: Vec<Address> = self
            .wallet
            .unused_addresses(for_change)
            .into_iter()
            .filter(|a| !self.ledger.is_reserved(a) && !skip.contains(a))
            .take(count)
            .collect();
        let mut attempts = count.saturating_mul(2) + 1;
        while out.len() < count && attempts > 0 {
            attempts -= 1;
            let a = self.wallet.create_new_address(for_change).map_err(MixingError::Other)?;
            if !self.ledger.is_reserved(&a) && !skip.contains(&a) && !out.contains(&a) {
                out.push(a);
            }
        }
        if out.len() < count {
            return Err(MixingError::NotEnoughKeypairs(format!(
                "wanted {} fresh addresses, got {}",
                count,
                out.len()
            )));
        }
        Ok(out)
    }

    /// Addresses whose keys mixing will need, grouped into cache buckets.
    pub fn keypair_plan(&self) -> Result<KeypairPlan, MixingError> {
        let mut plan = KeypairPlan::new();
        for a in self.ledger.select_reserved(None, Some(false)) {
            plan.push(KpType::Incoming, a);
        }
        let full = self.full_plan();
        let outputs = full.iter().map(Vec::len).sum::<usize>();
        let needs = calc_need_new_keypairs_cnt(&self.ledger, &full, self.config.params.entry_max_size);

        let mut taken = BTreeSet::new();
        let fresh = self.unused_pool(outputs + needs.ps_coins as usize, false, &taken)?;
        for (i, a) in fresh.into_iter().enumerate() {
            taken.insert(a.clone());
            let kp_type = if i < outputs { KpType::Incoming } else { KpType::PsCoins };
            plan.push(kp_type, a);
        }

        for a in self.spendable_addresses() {
            plan.push(KpType::Spendable, a);
        }
        for coin in self.ledger.denoms().values().chain(self.ledger.collaterals().values()) {
            plan.push(KpType::PsSpendable, coin.address.clone());
        }

        let change_cnt = (needs.ps_change + needs.small_mix_funds) as usize;
        for a in self.unused_pool(change_cnt, true, &taken)? {
            plan.push(KpType::PsChange, a);
        }
        Ok(plan)
    }

    /// Addresses of coins that can still fund new denoms or collateral,
    /// plus reserved change addresses of in-flight chains.
    pub fn spendable_addresses(&self) -> BTreeSet<Address> {
        let min = min_new_collateral_from_coins_val(self.config.fee_per_kb);
        let mut out: BTreeSet<Address> = funding_coins(self.wallet.as_ref(), &self.ledger)
            .into_iter()
            .filter(|c| c.value >= min)
            .map(|c| c.address)
            .collect();
        out.extend(self.ledger.select_reserved(None, Some(true)));
        out
    }

    // ── Building helpers ───────────────────────────────────────────────

    fn reserve_addresses(
        &mut self,
        count: usize,
        for_change: bool,
        tag: &str,
    ) -> Result<Vec<Address>, MixingError> {
        let addrs = self.unused_pool(count, for_change, &BTreeSet::new())?;
        for a in &addrs {
            self.ledger.reserve(a.clone(), tag, for_change);
        }
        Ok(addrs)
    }

    fn reserve_one(&mut self, for_change: bool, tag: &str) -> Result<Address, MixingError> {
        self.reserve_addresses(1, for_change, tag)?
            .into_iter()
            .next()
            .ok_or_else(|| MixingError::NotEnoughKeypairs("no fresh address".into()))
    }

    fn build_signed(
        &self,
        request: &BuildRequest,
        keys: &dyn KeySource,
        store_local: bool,
    ) -> Result<Transaction, MixingError> {
        let tx = self.builder.build(request).map_err(MixingError::Build)?;
        let tx = self.signer.sign(tx, keys).map_err(MixingError::Signing)?;
        if store_local {
            self.wallet.add_transaction(&tx).map_err(MixingError::Other)?;
        }
        Ok(tx)
    }

    fn start_workflow(&mut self, kind: WorkflowKind) -> String {
        let uuid = Uuid::new_v4().to_string();
        self.slots.insert(kind, PsTxWorkflow::new(uuid.clone()));
        self.persist_slot(kind);
        self.bump(WORKFLOWS_CREATED);
        debug!(%kind, %uuid, "workflow started");
        uuid
    }

    fn append_tx(&mut self, kind: WorkflowKind, tx: &Transaction) {
        if let Some(wfl) = self.slots.get_mut(&kind) {
            wfl.add_tx(tx.txid, kind.tx_type(), Some(tx.raw_hex()));
        }
        self.persist_slot(kind);
    }

    fn finish_workflow(&mut self, kind: WorkflowKind) {
        if let Some(wfl) = self.slots.get_mut(&kind) {
            wfl.completed = true;
            info!(%kind, uuid = %wfl.uuid, txs = wfl.tx_order.len(), "workflow completed");
        }
        self.persist_slot(kind);
        self.persist_ledger();
    }

    fn settle(
        &mut self,
        kind: WorkflowKind,
        built: Result<(), MixingError>,
    ) -> Result<Option<&PsTxWorkflow>, MixingError> {
        match built {
            Ok(()) => {
                self.finish_workflow(kind);
                Ok(self.slots.get(&kind))
            }
            Err(e) => {
                warn!(%kind, error = %e, "workflow failed, rolling back");
                self.cleanup_wfl(kind, true);
                Err(e)
            }
        }
    }

    // ── Workflow creation ──────────────────────────────────────────────

    /// Create a collateral coin from regular funds.
    ///
    /// An occupied slot is returned unchanged.
    pub fn create_new_collateral_wfl(
        &mut self,
        keys: &dyn KeySource,
    ) -> Result<Option<&PsTxWorkflow>, MixingError> {
        let kind = WorkflowKind::NewCollateral;
        if self.slots.contains_key(&kind) {
            return Ok(self.slots.get(&kind));
        }
        let min_value = min_new_collateral_from_coins_val(self.config.fee_per_kb);
        let (coins, available) = self.selected_coins(min_value);
        if coins.is_empty() {
            return Err(MixingError::InsufficientFunds { needed: min_value, available });
        }
        let uuid = self.start_workflow(kind);
        let built = self.build_new_collateral(&uuid, coins, keys);
        self.settle(kind, built)
    }

    fn build_new_collateral(
        &mut self,
        uuid: &str,
        coins: Vec<Coin>,
        keys: &dyn KeySource,
    ) -> Result<(), MixingError> {
        let out_addr = self.reserve_one(false, uuid)?;
        let change = self.reserve_one(true, uuid)?;
        let request = BuildRequest {
            inputs: coins,
            outputs: vec![TxOut::new(out_addr, CREATE_COLLATERAL_VAL)],
            change_address: Some(change),
            fee_per_kb: self.config.fee_per_kb,
        };
        let tx = self.build_signed(&request, keys, true)?;
        self.append_tx(WorkflowKind::NewCollateral, &tx);
        Ok(())
    }

    /// Create the chain of new-denoms transactions for the current plan.
    ///
    /// Returns `Ok(None)` when holdings already meet the target.
    pub fn create_new_denoms_wfl(
        &mut self,
        keys: &dyn KeySource,
    ) -> Result<Option<&PsTxWorkflow>, MixingError> {
        let kind = WorkflowKind::NewDenoms;
        if self.slots.contains_key(&kind) {
            return Ok(self.slots.get(&kind));
        }
        let min_value = min_new_denoms_from_coins_val(self.config.fee_per_kb);
        let (coins, available) = self.selected_coins(min_value);
        let holdings = self.holdings(&coins);
        let full = self.planner.calc_need_denoms_amounts(&holdings, true);
        if full.is_empty() {
            return Ok(None);
        }
        let plan = self.planner.calc_need_denoms_amounts(&holdings, false);
        if coins.is_empty() || plan.is_empty() {
            let needed = plan_total(&full).max(min_value);
            return Err(MixingError::InsufficientFunds { needed, available });
        }
        let uuid = self.start_workflow(kind);
        let built = self.build_denoms_chain(&uuid, coins, &plan, keys);
        self.settle(kind, built)
    }

    fn build_denoms_chain(
        &mut self,
        uuid: &str,
        coins: Vec<Coin>,
        plan: &[Vec<Duffs>],
        keys: &dyn KeySource,
    ) -> Result<(), MixingError> {
        let mut inputs = coins;
        for (i, values) in plan.iter().enumerate() {
            let addrs = self.reserve_addresses(values.len(), false, uuid)?;
            let change = self.reserve_one(true, uuid)?;
            let outputs = addrs.into_iter().zip(values).map(|(a, v)| TxOut::new(a, *v)).collect();
            let request = BuildRequest {
                inputs,
                outputs,
                change_address: Some(change.clone()),
                fee_per_kb: self.config.fee_per_kb,
            };
            let tx = self.build_signed(&request, keys, true)?;
            self.append_tx(WorkflowKind::NewDenoms, &tx);

            let is_last = i + 1 == plan.len();
            let next = tx
                .outpoints()
                .find(|(_, out)| out.address == change)
                .map(|(op, out)| Coin::new(op, out.address.clone(), out.value, TxHeight::Local));
            match next {
                Some(coin) => inputs = vec![coin],
                None if is_last => break,
                None => {
                    return Err(MixingError::Build(format!(
                        "transaction {} left no change to fund the next one",
                        tx.txid
                    )))
                }
            }
        }
        Ok(())
    }

    /// Prepare the collateral payment handed to the mixing masternode.
    ///
    /// Returns `Ok(None)` when no free collateral coin exists.
    pub fn prepare_pay_collateral_wfl(
        &mut self,
        keys: &dyn KeySource,
    ) -> Result<Option<&PsTxWorkflow>, MixingError> {
        let kind = WorkflowKind::PayCollateral;
        if self.slots.contains_key(&kind) {
            return Ok(self.slots.get(&kind));
        }
        let Some(outpoint) = self.ledger.free_collateral().map(|(op, _)| op) else {
            debug!("no free collateral");
            return Ok(None);
        };
        let Some(coin) = self.wallet.coins().into_iter().find(|c| c.outpoint == outpoint) else {
            debug!(%outpoint, "collateral not among wallet coins");
            return Ok(None);
        };
        let uuid = self.start_workflow(kind);
        let built = self.build_pay_collateral(&uuid, coin, keys);
        self.settle(kind, built)
    }

    fn build_pay_collateral(
        &mut self,
        uuid: &str,
        coin: Coin,
        keys: &dyn KeySource,
    ) -> Result<(), MixingError> {
        self.ledger.add_spending_collateral(coin.outpoint, uuid);
        let change_value = coin.value.saturating_sub(COLLATERAL_VAL);
        let outputs = if change_value > 0 {
            vec![TxOut::new(self.reserve_one(true, uuid)?, change_value)]
        } else {
            Vec::new()
        };
        let request = BuildRequest {
            inputs: vec![coin],
            outputs,
            change_address: None,
            fee_per_kb: self.config.fee_per_kb,
        };
        let tx = self.build_signed(&request, keys, false)?;
        self.append_tx(WorkflowKind::PayCollateral, &tx);
        Ok(())
    }

    /// Raw hex of the prepared collateral payment.
    pub fn pay_collateral_raw(&self) -> Option<String> {
        let wfl = self.slots.get(&WorkflowKind::PayCollateral)?;
        if !wfl.completed {
            return None;
        }
        wfl.tx_order.first().and_then(|t| wfl.tx_data.get(t)).and_then(|d| d.raw_tx.clone())
    }

    // ── Broadcast ──────────────────────────────────────────────────────

    /// Hand out the next due transaction of a slot for broadcast.
    ///
    /// The slot is guarded until [`WorkflowEngine::finish_broadcast`]: a
    /// second call returns `None` and cleanup of the slot waits, so the
    /// owner may release its lock for the network call.
    pub fn begin_broadcast(&mut self, kind: WorkflowKind) -> Option<PendingBroadcast> {
        if !kind.is_broadcast() || self.in_flight.contains(&kind) {
            return None;
        }
        let now = self.clock.now();
        let wallet = Arc::clone(&self.wallet);
        let txid = self
            .slots
            .get(&kind)
            .filter(|w| w.completed)
            .and_then(|w| w.next_to_send(|t| wallet.tx_height(t), now))?;
        let Some(tx) = wallet.get_transaction(&txid) else {
            warn!(%kind, %txid, "workflow transaction missing from wallet");
            return None;
        };
        self.in_flight.insert(kind);
        Some(PendingBroadcast {
            kind,
            txid,
            tx,
            timeout: Duration::from_secs(self.config.broadcast_timeout_secs),
            started: now,
        })
    }

    /// Record the outcome of a broadcast and run any cleanup of the slot
    /// that was requested meanwhile. Returns the txid when it was sent.
    pub fn finish_broadcast(
        &mut self,
        pending: PendingBroadcast,
        result: Result<(), String>,
    ) -> Option<TxId> {
        let PendingBroadcast { kind, txid, started, .. } = pending;
        self.in_flight.remove(&kind);

        let params = self.config.params.clone();
        let sent = match self.slots.get_mut(&kind).and_then(|w| w.tx_data.get_mut(&txid)) {
            None => None,
            Some(data) => Some(match result {
                Ok(()) => {
                    data.record_sent(started);
                    info!(%kind, %txid, "workflow transaction broadcast");
                    true
                }
                Err(e) => {
                    data.record_failure(started, &params);
                    warn!(
                        %kind,
                        %txid,
                        failures = data.send_failures,
                        retry_at = ?data.next_retry_at,
                        error = %e,
                        "broadcast failed"
                    );
                    false
                }
            }),
        };
        if sent.is_some() {
            self.persist_slot(kind);
            self.bump(if sent == Some(true) { TXS_BROADCAST } else { BROADCAST_FAILURES });
        }
        if sent == Some(true) && kind == WorkflowKind::NewDenoms {
            self.last_denoms_tx = Some(started);
            self.persist_time(LAST_DENOMS_TX_KEY, started);
        }
        for txid in self.deferred_txs.remove(&kind).unwrap_or_default() {
            self.on_wallet_tx(&txid);
        }
        if let Some(force) = self.deferred_cleanup.remove(&kind) {
            debug!(%kind, force, "running cleanup deferred by broadcast");
            self.cleanup_wfl(kind, force);
        }
        sent.filter(|s| *s).map(|_| txid)
    }

    /// Broadcast the next due transaction of a slot.
    ///
    /// A failed broadcast is rescheduled with backoff and reported as
    /// `Ok(None)`; only the chain order is enforced here.
    pub async fn broadcast_wfl(&mut self, kind: WorkflowKind) -> Result<Option<TxId>, MixingError> {
        let Some(pending) = self.begin_broadcast(kind) else {
            return Ok(None);
        };
        let result = self.broadcaster.broadcast(&pending.tx, pending.timeout).await;
        Ok(self.finish_broadcast(pending, result))
    }

    pub fn broadcaster(&self) -> &Arc<dyn Broadcaster> {
        &self.broadcaster
    }

    /// Every slot with a transaction due, guarded as by
    /// [`WorkflowEngine::begin_broadcast`].
    pub fn begin_broadcasts(&mut self) -> Vec<PendingBroadcast> {
        WorkflowKind::ALL.into_iter().filter_map(|k| self.begin_broadcast(k)).collect()
    }

    /// One broadcast attempt per broadcastable slot.
    pub async fn broadcast_all(&mut self) -> Vec<TxId> {
        let mut sent = Vec::new();
        for kind in WorkflowKind::ALL {
            if let Ok(Some(txid)) = self.broadcast_wfl(kind).await {
                sent.push(txid);
            }
        }
        sent
    }

    // ── Cleanup ────────────────────────────────────────────────────────

    /// Roll back an unfinished (or, with `force`, any) workflow.
    ///
    /// A completed workflow without `force` only forgets transactions the
    /// wallet has dropped, and goes away once none remain.
    pub fn cleanup_wfl(&mut self, kind: WorkflowKind, force: bool) {
        if self.in_flight.contains(&kind) {
            *self.deferred_cleanup.entry(kind).or_insert(false) |= force;
            return;
        }
        let Some(wfl) = self.slots.get(&kind).cloned() else { return };

        if wfl.completed && !force {
            // a prepared collateral payment lives outside the wallet until used
            if !kind.is_broadcast() {
                return;
            }
            let gone: Vec<TxId> = wfl
                .tx_order
                .iter()
                .filter(|t| self.wallet.tx_height(t).is_none())
                .copied()
                .collect();
            if gone.is_empty() {
                return;
            }
            let emptied = match self.slots.get_mut(&kind) {
                Some(slot) => {
                    for txid in &gone {
                        slot.pop_tx(txid);
                    }
                    slot.is_empty()
                }
                None => false,
            };
            if emptied {
                self.discard(kind, &wfl.uuid);
            } else {
                self.persist_slot(kind);
            }
            return;
        }

        for txid in wfl.tx_order.iter().rev() {
            if self.wallet.tx_height(txid) == Some(TxHeight::Local) {
                self.wallet.remove_transaction(txid);
            }
        }
        self.discard(kind, &wfl.uuid);
    }

    fn discard(&mut self, kind: WorkflowKind, uuid: &str) {
        let released = self.ledger.release_tagged(uuid);
        let unlocked = self.ledger.clear_spending_for(uuid);
        self.slots.remove(&kind);
        self.persist_slot(kind);
        self.persist_ledger();
        self.bump(WORKFLOWS_CLEANED);
        info!(%kind, uuid, released = released.len(), unlocked = unlocked.len(), "workflow cleaned up");
    }

    /// Cleanup pass over every slot, used at startup and after errors.
    pub fn cleanup_all(&mut self, force: bool) {
        for kind in WorkflowKind::ALL {
            self.cleanup_wfl(kind, force);
        }
        let stale: Vec<String> = self.denominate.keys().cloned().collect();
        for uuid in stale {
            self.cleanup_denominate_wfl(&uuid, force);
        }
    }

    // ── Processing observed transactions ───────────────────────────────

    /// React to a wallet transaction: settle the workflow that made it, or
    /// classify it as a foreign PS transaction.
    pub fn on_wallet_tx(&mut self, txid: &TxId) -> Option<PsTxType> {
        let height = self.wallet.tx_height(txid)?;
        if height.is_local() {
            return None;
        }
        let tx = self.wallet.get_transaction(txid)?;

        if let Some(kind) = WorkflowKind::ALL
            .into_iter()
            .find(|k| self.slots.get(k).is_some_and(|w| w.contains(txid)))
        {
            if self.in_flight.contains(&kind) {
                self.deferred_txs.entry(kind).or_default().push(*txid);
            } else {
                self.process_by_wfl(kind, &tx);
            }
            return Some(kind.tx_type());
        }
        let inputs: BTreeSet<OutPoint> = tx.input_outpoints().copied().collect();
        if let Some(uuid) = self
            .denominate
            .values()
            .find(|w| w.inputs.iter().any(|op| inputs.contains(op)))
            .map(|w| w.uuid.clone())
        {
            self.process_by_denominate_wfl(&uuid, &tx);
            return Some(PsTxType::Denominate);
        }
        if self.ledger.ps_tx(txid).is_some() {
            return None;
        }
        let tx_type = untracked::classify_tx(self.wallet.as_ref(), &self.ledger, &tx)?;
        untracked::apply_ps_tx(self.wallet.as_ref(), &mut self.ledger, &tx, tx_type);
        self.persist_ledger();
        info!(%txid, ?tx_type, "tracked PS transaction");
        Some(tx_type)
    }

    /// A transaction left the wallet (reorg or user removal).
    pub fn on_wallet_tx_removed(&mut self, txid: &TxId) {
        if let Some(kind) =
            WorkflowKind::ALL.into_iter().find(|k| self.slots.get(k).is_some_and(|w| w.contains(txid)))
        {
            self.cleanup_wfl(kind, false);
        }
        if let Some(record) = self.ledger.unregister_ps_tx(txid) {
            let vouts: Vec<OutPoint> = self
                .ledger
                .denoms()
                .keys()
                .chain(self.ledger.collaterals().keys())
                .chain(self.ledger.others().keys())
                .filter(|op| op.txid == *txid)
                .copied()
                .collect();
            for op in &vouts {
                self.ledger.pop_denom(op);
                self.ledger.pop_collateral(op);
                self.ledger.pop_other(op);
            }
            self.persist_ledger();
            info!(%txid, tx_type = ?record.tx_type, dropped = vouts.len(), "PS transaction removed");
        }
    }

    fn process_by_wfl(&mut self, kind: WorkflowKind, tx: &Transaction) {
        let Some(uuid) = self.slots.get(&kind).map(|w| w.uuid.clone()) else { return };

        if kind == WorkflowKind::PayCollateral {
            for op in tx.input_outpoints() {
                if let Some(coin) = self.ledger.pop_collateral(op) {
                    self.ledger.add_spent_collateral(*op, coin);
                }
                self.ledger.pop_spending_collateral(op);
            }
        }

        for (op, out) in tx.outpoints() {
            let Some(reservation) = self.ledger.reservation(&out.address).cloned() else { continue };
            if reservation.tag != uuid {
                continue;
            }
            match kind {
                WorkflowKind::NewDenoms if !reservation.for_change && is_denom(out.value) => {
                    self.ledger.add_denom(op, out.address.clone(), out.value, 0);
                }
                WorkflowKind::PayCollateral if is_collateral_val(out.value) => {
                    self.ledger.add_collateral(op, out.address.clone(), out.value);
                }
                _ if !reservation.for_change && is_collateral_val(out.value) => {
                    self.ledger.add_collateral(op, out.address.clone(), out.value);
                }
                _ => {}
            }
            self.ledger.release(&out.address);
        }

        self.ledger.register_ps_tx(tx.txid, kind.tx_type(), true);
        let emptied = match self.slots.get_mut(&kind) {
            Some(wfl) => {
                wfl.pop_tx(&tx.txid);
                wfl.is_empty() && wfl.completed
            }
            None => false,
        };
        if emptied {
            self.slots.remove(&kind);
            self.ledger.release_tagged(&uuid);
        }
        self.persist_slot(kind);
        self.persist_ledger();
        info!(%kind, txid = %tx.txid, finished = emptied, "workflow transaction processed");
    }

    // ── Denominate workflows ───────────────────────────────────────────

    /// Lock up to `entry_max_size` denoms of the lowest unmixed round for a
    /// mixing session. `denom` restricts the value; otherwise the value with
    /// the most coins in that round is used.
    pub fn create_denominate_wfl(
        &mut self,
        denom: Option<Duffs>,
    ) -> Result<Option<PsDenominateWorkflow>, MixingError> {
        let mix_rounds = self.ledger.mix_rounds();
        let Some(round) = (0..mix_rounds).find(|r| !self.ledger.denoms_of_round(*r, denom).is_empty())
        else {
            return Ok(None);
        };
        let candidates = self.ledger.denoms_of_round(round, denom);
        let value = match denom {
            Some(v) => v,
            None => {
                let mut by_value: BTreeMap<Duffs, usize> = BTreeMap::new();
                for (_, c) in &candidates {
                    *by_value.entry(c.value).or_default() += 1;
                }
                match by_value.into_iter().max_by_key(|(v, n)| (*n, *v)) {
                    Some((v, _)) => v,
                    None => return Ok(None),
                }
            }
        };
        let inputs: Vec<OutPoint> = candidates
            .into_iter()
            .filter(|(_, c)| c.value == value)
            .map(|(op, _)| op)
            .take(self.config.params.entry_max_size as usize)
            .collect();

        let uuid = Uuid::new_v4().to_string();
        let outputs = match self.reserve_addresses(inputs.len(), false, &uuid) {
            Ok(a) => a,
            Err(e) => {
                self.ledger.release_tagged(&uuid);
                return Err(e);
            }
        };
        for op in &inputs {
            self.ledger.add_spending_denom(*op, &uuid);
        }
        let mut wfl = PsDenominateWorkflow::new(uuid.clone());
        wfl.denom = value;
        wfl.rounds = round;
        wfl.inputs = inputs;
        wfl.outputs = outputs;
        self.denominate.insert(uuid.clone(), wfl.clone());
        self.persist_denominate(&uuid);
        self.persist_ledger();
        self.bump(WORKFLOWS_CREATED);
        info!(%uuid, denom = value, round, inputs = wfl.inputs.len(), "denominate workflow started");
        Ok(Some(wfl))
    }

    /// The masternode accepted our entry; wait for the final transaction.
    pub fn complete_denominate_wfl(&mut self, uuid: &str) -> bool {
        let now = self.clock.now();
        let Some(wfl) = self.denominate.get_mut(uuid) else { return false };
        wfl.completed = Some(now);
        self.persist_denominate(uuid);
        true
    }

    fn process_by_denominate_wfl(&mut self, uuid: &str, tx: &Transaction) {
        let Some(wfl) = self.denominate.remove(uuid) else { return };
        let spent: BTreeSet<OutPoint> = tx.input_outpoints().copied().collect();
        for op in wfl.inputs.iter().filter(|op| spent.contains(op)) {
            if let Some(coin) = self.ledger.pop_denom(op) {
                self.ledger.add_spent_denom(*op, coin);
            }
        }
        self.ledger.clear_spending_for(uuid);
        for (op, out) in tx.outpoints() {
            if wfl.outputs.contains(&out.address) && is_denom(out.value) {
                self.ledger.add_denom(op, out.address.clone(), out.value, wfl.rounds + 1);
            }
        }
        self.ledger.release_tagged(uuid);
        self.ledger.register_ps_tx(tx.txid, PsTxType::Denominate, true);
        self.persist_denominate(uuid);
        self.persist_ledger();
        info!(uuid, txid = %tx.txid, round = wfl.rounds + 1, "denominate workflow processed");
    }

    /// Drop a denominate workflow that never completed, or any with `force`.
    pub fn cleanup_denominate_wfl(&mut self, uuid: &str, force: bool) -> bool {
        let Some(wfl) = self.denominate.get(uuid) else { return false };
        if wfl.completed.is_some() && !force {
            return false;
        }
        self.denominate.remove(uuid);
        let unlocked = self.ledger.clear_spending_for(uuid);
        self.ledger.release_tagged(uuid);
        self.persist_denominate(uuid);
        self.persist_ledger();
        self.bump(WORKFLOWS_CLEANED);
        info!(uuid, unlocked = unlocked.len(), "denominate workflow cleaned up");
        true
    }

    /// Force-clean completed denominate workflows whose final transaction
    /// never showed up within the masternode wait.
    pub fn cleanup_stale_denominate_wfls(&mut self) -> usize {
        let now = self.clock.now();
        let wait = self.config.wait_for_mn_txs_secs;
        let stale: Vec<String> = self
            .denominate
            .values()
            .filter(|w| w.completed.is_some_and(|t| t.has_expired(wait, now)))
            .map(|w| w.uuid.clone())
            .collect();
        for uuid in &stale {
            self.cleanup_denominate_wfl(uuid, true);
        }
        stale.len()
    }

    // ── Double-spend guard ─────────────────────────────────────────────

    pub fn is_mixing(&self) -> bool {
        self.mixing
    }

    /// Record mixing start/stop; the stop time is persisted.
    pub fn set_mixing(&mut self, mixing: bool) {
        if self.mixing && !mixing {
            let now = self.clock.now();
            self.last_mix_stop = Some(now);
            self.persist_time(LAST_MIX_STOP_KEY, now);
        }
        self.mixing = mixing;
    }

    /// Warning text while spending PS coins could race masternode
    /// transactions.
    pub fn double_spend_warn(&self) -> Option<String> {
        if self.mixing {
            return Some("mixing is running, PS coins may be spent by masternode transactions".into());
        }
        let now = self.clock.now();
        let stop = self.last_mix_stop?;
        let wait = self.config.wait_for_mn_txs_secs;
        if stop.has_expired(wait, now) {
            return None;
        }
        let left = wait.saturating_sub(stop.elapsed_since(now));
        Some(format!("mixing stopped recently, wait {}s for masternode transactions", left))
    }

    /// Broadcast a user transaction. While the double-spend warning is live,
    /// spending a PS coin or a coin locked by a workflow is refused.
    pub async fn broadcast_transaction(&self, tx: &Transaction) -> Result<(), MixingError> {
        if let Some(warning) = self.double_spend_warn() {
            let risky = tx
                .input_outpoints()
                .any(|op| self.ledger.is_spending(op) || self.ledger.rounds_of(op).is_some());
            if risky {
                return Err(MixingError::PossibleDoubleSpend(warning));
            }
        }
        let timeout = Duration::from_secs(self.config.broadcast_timeout_secs);
        self.broadcaster.broadcast(tx, timeout).await.map_err(MixingError::Broadcast)
    }

    // ── Untracked transactions ─────────────────────────────────────────

    /// Scan wallet history for PS transactions the ledger has not seen.
    pub fn find_untracked_ps_txs(&mut self) -> UntrackedReport {
        let report = untracked::find_untracked_ps_txs(self.wallet.as_ref(), &mut self.ledger);
        if report.found > 0 {
            self.persist_ledger();
        }
        report
    }

    /// Forget every PS record, e.g. after the keystore was replaced.
    pub fn clear_ps_data(&mut self) {
        self.cleanup_all(true);
        self.ledger.clear();
        self.persist_ledger();
        for key in [LAST_MIX_STOP_KEY, LAST_DENOMS_TX_KEY] {
            if let Err(e) = self.store.pop_ps_data(key) {
                warn!(key, error = %e, "failed to drop mixing timestamp");
            }
        }
        self.last_mix_stop = None;
        self.last_denoms_tx = None;
    }
}
