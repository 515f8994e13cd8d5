//! Coin rounds bookkeeping.
//!
//! Tracks every PS coin (denoms, collaterals, others) by outpoint together
//! with its round, the coins currently locked by in-flight workflows, address
//! reservations and the registry of known PS transactions.
//!
//! The "to mix" view (denoms below the round target that are not locked) is
//! maintained incrementally: each mutation touches only the affected entries.
//! Per-tier denom counts and the total denom value are kept the same way.
//! Only [`CoinRoundsLedger::rebuild_cache`] walks the whole denom set, and it
//! is reserved for loading and bulk discovery.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use ps_store::{PsDataStore, PsDataStoreExt, StoreError};
use ps_types::{
    empty_denom_counts, Address, CoinRounds, DenomCounts, Duffs, OutPoint, PsTxType, TxId,
};

/// Store key of the persisted ledger.
pub const LEDGER_KEY: &str = "ps_ledger";

/// Tag used for addresses reserved outside any workflow.
pub const TMP_RESERVATION: &str = "tmp";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PsCoin {
    pub address: Address,
    pub value: Duffs,
    pub rounds: CoinRounds,
}

impl PsCoin {
    pub fn new(address: Address, value: Duffs, rounds: CoinRounds) -> Self {
        Self { address, value, rounds }
    }
}

/// Why an address is held back from the unused pool.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    /// Owning workflow uuid or [`TMP_RESERVATION`].
    pub tag: String,
    pub for_change: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PsTxRecord {
    pub tx_type: PsTxType,
    pub completed: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
struct LedgerData {
    denoms: BTreeMap<OutPoint, PsCoin>,
    spent_denoms: BTreeMap<OutPoint, PsCoin>,
    collaterals: BTreeMap<OutPoint, PsCoin>,
    spent_collaterals: BTreeMap<OutPoint, PsCoin>,
    others: BTreeMap<OutPoint, PsCoin>,
    spending_denoms: BTreeMap<OutPoint, String>,
    spending_collaterals: BTreeMap<OutPoint, String>,
    reserved: BTreeMap<Address, Reservation>,
    ps_txs: BTreeMap<TxId, PsTxRecord>,
    ps_txs_removed: BTreeMap<TxId, PsTxRecord>,
}

pub struct CoinRoundsLedger {
    data: LedgerData,
    mix_rounds: u32,
    denoms_by_round: BTreeMap<u32, BTreeSet<OutPoint>>,
    to_mix: BTreeMap<OutPoint, PsCoin>,
    denom_counts: DenomCounts,
    denoms_total: Duffs,
}

impl CoinRoundsLedger {
    pub fn new(mix_rounds: u32) -> Self {
        Self {
            data: LedgerData::default(),
            mix_rounds,
            denoms_by_round: BTreeMap::new(),
            to_mix: BTreeMap::new(),
            denom_counts: empty_denom_counts(),
            denoms_total: 0,
        }
    }

    pub fn load(store: &dyn PsDataStore, mix_rounds: u32) -> Result<Self, StoreError> {
        let mut ledger = Self::new(mix_rounds);
        if let Some(data) = store.get_typed::<LedgerData>(LEDGER_KEY)? {
            ledger.data = data;
            ledger.rebuild_cache();
        }
        Ok(ledger)
    }

    pub fn save(&self, store: &dyn PsDataStore) -> Result<(), StoreError> {
        store.set_typed(LEDGER_KEY, &self.data)
    }

    /// Drop every record.
    pub fn clear(&mut self) {
        self.data = LedgerData::default();
        self.denoms_by_round.clear();
        self.to_mix.clear();
        self.denom_counts = empty_denom_counts();
        self.denoms_total = 0;
    }

    // ── Round target and the to-mix view ───────────────────────────────

    pub fn mix_rounds(&self) -> u32 {
        self.mix_rounds
    }

    /// Change the round target, adjusting only denoms in the affected rounds.
    pub fn set_mix_rounds(&mut self, mix_rounds: u32) {
        let old = self.mix_rounds;
        self.mix_rounds = mix_rounds;
        if mix_rounds > old {
            let ops: Vec<OutPoint> = self
                .denoms_by_round
                .range(old..mix_rounds)
                .flat_map(|(_, ops)| ops.iter().copied())
                .collect();
            for op in ops {
                self.cache_if_eligible(&op);
            }
        } else if mix_rounds < old {
            for (_, ops) in self.denoms_by_round.range(mix_rounds..old) {
                for op in ops {
                    self.to_mix.remove(op);
                }
            }
        }
    }

    /// Full rescan of the to-mix view, the round index and the aggregates.
    pub fn rebuild_cache(&mut self) {
        self.denoms_by_round.clear();
        self.to_mix.clear();
        self.denom_counts = empty_denom_counts();
        self.denoms_total = 0;
        let ops: Vec<OutPoint> = self.data.denoms.keys().copied().collect();
        for op in ops {
            self.index_denom(&op);
            self.cache_if_eligible(&op);
            if let Some(value) = self.data.denoms.get(&op).map(|c| c.value) {
                self.count_denom(value, true);
            }
        }
    }

    fn count_denom(&mut self, value: Duffs, added: bool) {
        if added {
            self.denoms_total = self.denoms_total.saturating_add(value);
            if let Some(cnt) = self.denom_counts.get_mut(&value) {
                *cnt += 1;
            }
        } else {
            self.denoms_total = self.denoms_total.saturating_sub(value);
            if let Some(cnt) = self.denom_counts.get_mut(&value) {
                *cnt = cnt.saturating_sub(1);
            }
        }
    }

    fn index_denom(&mut self, op: &OutPoint) {
        if let Some(round) = self.data.denoms.get(op).and_then(|c| c.rounds.round()) {
            self.denoms_by_round.entry(round).or_default().insert(*op);
        }
    }

    fn unindex_denom(&mut self, op: &OutPoint, round: u32) {
        if let Some(ops) = self.denoms_by_round.get_mut(&round) {
            ops.remove(op);
            if ops.is_empty() {
                self.denoms_by_round.remove(&round);
            }
        }
    }

    fn cache_if_eligible(&mut self, op: &OutPoint) {
        if self.data.spending_denoms.contains_key(op) {
            return;
        }
        if let Some(coin) = self.data.denoms.get(op) {
            if coin.rounds.round().map_or(false, |r| r < self.mix_rounds) {
                self.to_mix.insert(*op, coin.clone());
            }
        }
    }

    /// Denoms still to be mixed: round below `ceiling` (the round target when
    /// `None`), not locked by a workflow, optionally of one value only.
    pub fn denoms_to_mix(
        &self,
        ceiling: Option<u32>,
        denom_value: Option<Duffs>,
    ) -> BTreeMap<OutPoint, PsCoin> {
        match ceiling {
            None => self
                .to_mix
                .iter()
                .filter(|(_, c)| denom_value.map_or(true, |v| c.value == v))
                .map(|(op, c)| (*op, c.clone()))
                .collect(),
            Some(ceiling) => self
                .denoms_by_round
                .range(..ceiling)
                .flat_map(|(_, ops)| ops.iter())
                .filter(|op| !self.data.spending_denoms.contains_key(*op))
                .filter_map(|op| self.data.denoms.get(op).map(|c| (*op, c)))
                .filter(|(_, c)| denom_value.map_or(true, |v| c.value == v))
                .map(|(op, c)| (op, c.clone()))
                .collect(),
        }
    }

    /// Unlocked denoms of exactly `round`.
    pub fn denoms_of_round(&self, round: u32, denom_value: Option<Duffs>) -> Vec<(OutPoint, PsCoin)> {
        self.denoms_by_round
            .get(&round)
            .into_iter()
            .flatten()
            .filter(|op| !self.data.spending_denoms.contains_key(*op))
            .filter_map(|op| self.data.denoms.get(op).map(|c| (*op, c.clone())))
            .filter(|(_, c)| denom_value.map_or(true, |v| c.value == v))
            .collect()
    }

    pub fn to_mix_len(&self) -> usize {
        self.to_mix.len()
    }

    // ── Denoms ─────────────────────────────────────────────────────────

    pub fn add_denom(&mut self, outpoint: OutPoint, address: Address, value: Duffs, round: u32) {
        if let Some(old) = self.pop_denom(&outpoint) {
            tracing::debug!(%outpoint, old_rounds = %old.rounds, round, "denom replaced");
        }
        let coin = PsCoin::new(address, value, CoinRounds::Round(round));
        self.data.denoms.insert(outpoint, coin);
        self.count_denom(value, true);
        self.index_denom(&outpoint);
        self.cache_if_eligible(&outpoint);
    }

    pub fn pop_denom(&mut self, outpoint: &OutPoint) -> Option<PsCoin> {
        let coin = self.data.denoms.remove(outpoint)?;
        self.count_denom(coin.value, false);
        if let Some(round) = coin.rounds.round() {
            self.unindex_denom(outpoint, round);
        }
        self.to_mix.remove(outpoint);
        Some(coin)
    }

    pub fn denom(&self, outpoint: &OutPoint) -> Option<&PsCoin> {
        self.data.denoms.get(outpoint)
    }

    pub fn denoms(&self) -> &BTreeMap<OutPoint, PsCoin> {
        &self.data.denoms
    }

    pub fn add_spent_denom(&mut self, outpoint: OutPoint, coin: PsCoin) {
        self.data.spent_denoms.insert(outpoint, coin);
    }

    pub fn pop_spent_denom(&mut self, outpoint: &OutPoint) -> Option<PsCoin> {
        self.data.spent_denoms.remove(outpoint)
    }

    pub fn spent_denoms(&self) -> &BTreeMap<OutPoint, PsCoin> {
        &self.data.spent_denoms
    }

    /// Held denoms per ladder tier, locked ones included.
    pub fn denom_counts(&self) -> &DenomCounts {
        &self.denom_counts
    }

    pub fn denoms_value(&self) -> Duffs {
        self.denoms_total
    }

    // ── Collaterals and others ─────────────────────────────────────────

    pub fn add_collateral(&mut self, outpoint: OutPoint, address: Address, value: Duffs) {
        self.data
            .collaterals
            .insert(outpoint, PsCoin::new(address, value, CoinRounds::Collateral));
    }

    pub fn pop_collateral(&mut self, outpoint: &OutPoint) -> Option<PsCoin> {
        self.data.collaterals.remove(outpoint)
    }

    pub fn collaterals(&self) -> &BTreeMap<OutPoint, PsCoin> {
        &self.data.collaterals
    }

    /// First collateral not already locked by a pay-collateral workflow.
    pub fn free_collateral(&self) -> Option<(OutPoint, &PsCoin)> {
        self.data
            .collaterals
            .iter()
            .find(|(op, _)| !self.data.spending_collaterals.contains_key(op))
            .map(|(op, c)| (*op, c))
    }

    pub fn add_spent_collateral(&mut self, outpoint: OutPoint, coin: PsCoin) {
        self.data.spent_collaterals.insert(outpoint, coin);
    }

    pub fn spent_collaterals(&self) -> &BTreeMap<OutPoint, PsCoin> {
        &self.data.spent_collaterals
    }

    pub fn add_other(&mut self, outpoint: OutPoint, address: Address, value: Duffs) {
        self.data
            .others
            .insert(outpoint, PsCoin::new(address, value, CoinRounds::Other));
    }

    pub fn pop_other(&mut self, outpoint: &OutPoint) -> Option<PsCoin> {
        self.data.others.remove(outpoint)
    }

    pub fn others(&self) -> &BTreeMap<OutPoint, PsCoin> {
        &self.data.others
    }

    /// Rounds of a tracked PS coin.
    pub fn rounds_of(&self, outpoint: &OutPoint) -> Option<CoinRounds> {
        self.data
            .denoms
            .get(outpoint)
            .or_else(|| self.data.collaterals.get(outpoint))
            .or_else(|| self.data.others.get(outpoint))
            .map(|c| c.rounds)
    }

    // ── Spending markers ───────────────────────────────────────────────

    pub fn add_spending_denom(&mut self, outpoint: OutPoint, uuid: &str) {
        self.data.spending_denoms.insert(outpoint, uuid.to_string());
        self.to_mix.remove(&outpoint);
    }

    pub fn pop_spending_denom(&mut self, outpoint: &OutPoint) -> Option<String> {
        let uuid = self.data.spending_denoms.remove(outpoint)?;
        self.cache_if_eligible(outpoint);
        Some(uuid)
    }

    pub fn spending_denom(&self, outpoint: &OutPoint) -> Option<&str> {
        self.data.spending_denoms.get(outpoint).map(String::as_str)
    }

    pub fn spending_denoms(&self) -> &BTreeMap<OutPoint, String> {
        &self.data.spending_denoms
    }

    pub fn add_spending_collateral(&mut self, outpoint: OutPoint, uuid: &str) {
        self.data.spending_collaterals.insert(outpoint, uuid.to_string());
    }

    pub fn pop_spending_collateral(&mut self, outpoint: &OutPoint) -> Option<String> {
        self.data.spending_collaterals.remove(outpoint)
    }

    pub fn spending_collateral(&self, outpoint: &OutPoint) -> Option<&str> {
        self.data.spending_collaterals.get(outpoint).map(String::as_str)
    }

    pub fn spending_collaterals(&self) -> &BTreeMap<OutPoint, String> {
        &self.data.spending_collaterals
    }

    pub fn is_spending(&self, outpoint: &OutPoint) -> bool {
        self.data.spending_denoms.contains_key(outpoint)
            || self.data.spending_collaterals.contains_key(outpoint)
    }

    /// Release every coin locked by `uuid`, returning the released outpoints.
    pub fn clear_spending_for(&mut self, uuid: &str) -> Vec<OutPoint> {
        let denoms: Vec<OutPoint> = self
            .data
            .spending_denoms
            .iter()
            .filter(|(_, u)| u.as_str() == uuid)
            .map(|(op, _)| *op)
            .collect();
        let collaterals: Vec<OutPoint> = self
            .data
            .spending_collaterals
            .iter()
            .filter(|(_, u)| u.as_str() == uuid)
            .map(|(op, _)| *op)
            .collect();
        for op in &denoms {
            self.pop_spending_denom(op);
        }
        for op in &collaterals {
            self.data.spending_collaterals.remove(op);
        }
        denoms.into_iter().chain(collaterals).collect()
    }

    // ── Reservations ───────────────────────────────────────────────────

    pub fn reserve(&mut self, address: Address, tag: &str, for_change: bool) {
        self.data
            .reserved
            .insert(address, Reservation { tag: tag.to_string(), for_change });
    }

    pub fn release(&mut self, address: &Address) -> Option<Reservation> {
        self.data.reserved.remove(address)
    }

    /// Release every address reserved under `tag`.
    pub fn release_tagged(&mut self, tag: &str) -> Vec<Address> {
        let addrs = self.select_reserved(Some(tag), None);
        for a in &addrs {
            self.data.reserved.remove(a);
        }
        addrs
    }

    /// Reserved addresses filtered by tag and change flag.
    pub fn select_reserved(&self, tag: Option<&str>, for_change: Option<bool>) -> Vec<Address> {
        self.data
            .reserved
            .iter()
            .filter(|(_, r)| tag.map_or(true, |t| r.tag == t))
            .filter(|(_, r)| for_change.map_or(true, |c| r.for_change == c))
            .map(|(a, _)| a.clone())
            .collect()
    }

    pub fn reservation(&self, address: &Address) -> Option<&Reservation> {
        self.data.reserved.get(address)
    }

    pub fn is_reserved(&self, address: &Address) -> bool {
        self.data.reserved.contains_key(address)
    }

    // ── PS transaction registry ────────────────────────────────────────

    pub fn register_ps_tx(&mut self, txid: TxId, tx_type: PsTxType, completed: bool) {
        self.data.ps_txs_removed.remove(&txid);
        self.data.ps_txs.insert(txid, PsTxRecord { tx_type, completed });
    }

    pub fn ps_tx(&self, txid: &TxId) -> Option<PsTxRecord> {
        self.data.ps_txs.get(txid).copied()
    }

    /// Forget a PS transaction removed from the wallet, keeping a trace of it.
    pub fn unregister_ps_tx(&mut self, txid: &TxId) -> Option<PsTxRecord> {
        let record = self.data.ps_txs.remove(txid)?;
        self.data.ps_txs_removed.insert(*txid, record);
        Some(record)
    }

    pub fn ps_txs(&self) -> &BTreeMap<TxId, PsTxRecord> {
        &self.data.ps_txs
    }

    pub fn removed_ps_txs(&self) -> &BTreeMap<TxId, PsTxRecord> {
        &self.data.ps_txs_removed
    }
}
