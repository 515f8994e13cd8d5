//! Persistent records of mixing workflows.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use ps_types::{Address, Duffs, OutPoint, PsParams, PsTxType, Timestamp, TxHeight, TxId};

/// Kinds with a single workflow slot per wallet.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkflowKind {
    NewCollateral,
    NewDenoms,
    PayCollateral,
}

impl WorkflowKind {
    pub const ALL: [WorkflowKind; 3] =
        [WorkflowKind::NewCollateral, WorkflowKind::NewDenoms, WorkflowKind::PayCollateral];

    /// Store key of the slot.
    pub fn store_key(&self) -> &'static str {
        match self {
            Self::NewCollateral => "new_collateral_wfl",
            Self::NewDenoms => "new_denoms_wfl",
            Self::PayCollateral => "pay_collateral_wfl",
        }
    }

    pub fn tx_type(&self) -> PsTxType {
        match self {
            Self::NewCollateral => PsTxType::NewCollateral,
            Self::NewDenoms => PsTxType::NewDenoms,
            Self::PayCollateral => PsTxType::PayCollateral,
        }
    }

    /// Whether the wallet relays this kind itself. Pay-collateral
    /// transactions are handed to the mixing masternode instead.
    pub fn is_broadcast(&self) -> bool {
        !matches!(self, Self::PayCollateral)
    }
}

impl fmt::Display for WorkflowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.store_key())
    }
}

/// One transaction of a workflow and its broadcast state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PsTxData {
    pub uuid: String,
    pub txid: TxId,
    /// Hex of the signed transaction.
    pub raw_tx: Option<String>,
    pub tx_type: PsTxType,
    pub sent_at: Option<Timestamp>,
    pub next_retry_at: Option<Timestamp>,
    #[serde(default)]
    pub send_failures: u32,
}

impl PsTxData {
    pub fn new(uuid: &str, txid: TxId, tx_type: PsTxType, raw_tx: Option<String>) -> Self {
        Self {
            uuid: uuid.to_string(),
            txid,
            raw_tx,
            tx_type,
            sent_at: None,
            next_retry_at: None,
            send_failures: 0,
        }
    }

    /// Never accepted and not waiting out a retry delay.
    pub fn send_due(&self, now: Timestamp) -> bool {
        self.sent_at.is_none() && self.next_retry_at.map_or(true, |t| t <= now)
    }

    pub fn record_sent(&mut self, now: Timestamp) {
        self.sent_at = Some(now);
        self.next_retry_at = None;
    }

    /// Schedule the next attempt, doubling the delay up to the cap.
    pub fn record_failure(&mut self, now: Timestamp, params: &PsParams) {
        let shift = self.send_failures.min(16);
        let delay = params
            .send_retry_secs
            .saturating_mul(1u64 << shift)
            .min(params.max_send_retry_secs);
        self.send_failures += 1;
        self.next_retry_at = Some(now.plus_secs(delay));
    }
}

/// Chain of transactions with one slot per [`WorkflowKind`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PsTxWorkflow {
    pub uuid: String,
    /// Set once every planned transaction exists.
    pub completed: bool,
    pub tx_order: Vec<TxId>,
    pub tx_data: BTreeMap<TxId, PsTxData>,
}

impl PsTxWorkflow {
    pub fn new(uuid: impl Into<String>) -> Self {
        Self { uuid: uuid.into(), completed: false, tx_order: Vec::new(), tx_data: BTreeMap::new() }
    }

    pub fn add_tx(&mut self, txid: TxId, tx_type: PsTxType, raw_tx: Option<String>) {
        if self.tx_data.contains_key(&txid) {
            return;
        }
        self.tx_order.push(txid);
        self.tx_data.insert(txid, PsTxData::new(&self.uuid, txid, tx_type, raw_tx));
    }

    pub fn pop_tx(&mut self, txid: &TxId) -> Option<PsTxData> {
        let data = self.tx_data.remove(txid)?;
        self.tx_order.retain(|t| t != txid);
        Some(data)
    }

    pub fn contains(&self, txid: &TxId) -> bool {
        self.tx_data.contains_key(txid)
    }

    pub fn is_empty(&self) -> bool {
        self.tx_order.is_empty()
    }

    /// Next transaction to broadcast, if it is due.
    ///
    /// A transaction the server already knows (mempool or mined) or that was
    /// accepted earlier is skipped. The first remaining one is the candidate;
    /// while it waits out a retry delay nothing later in the chain is sent.
    pub fn next_to_send(
        &self,
        height_of: impl Fn(&TxId) -> Option<TxHeight>,
        now: Timestamp,
    ) -> Option<TxId> {
        for txid in &self.tx_order {
            let Some(data) = self.tx_data.get(txid) else { continue };
            if data.sent_at.is_some() || height_of(txid) != Some(TxHeight::Local) {
                continue;
            }
            return data.send_due(now).then_some(*txid);
        }
        None
    }
}

/// One collaborative mixing session. Many may run at once, keyed by uuid.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PsDenominateWorkflow {
    pub uuid: String,
    pub denom: Duffs,
    pub rounds: u32,
    pub inputs: Vec<OutPoint>,
    pub outputs: Vec<Address>,
    pub completed: Option<Timestamp>,
}

impl PsDenominateWorkflow {
    pub fn new(uuid: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            denom: 0,
            rounds: 0,
            inputs: Vec::new(),
            outputs: Vec::new(),
            completed: None,
        }
    }

    pub fn store_key(&self) -> String {
        denominate_key(&self.uuid)
    }
}

pub const DENOMINATE_KEY_PREFIX: &str = "denominate_wfl:";

pub fn denominate_key(uuid: &str) -> String {
    format!("{}{}", DENOMINATE_KEY_PREFIX, uuid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ps_types::Hash256;

    fn txid(n: u8) -> TxId {
        Hash256::new([n; 32])
    }

    fn prepared() -> PsTxWorkflow {
        let mut w = PsTxWorkflow::new("uuid");
        for n in 1..=3 {
            w.add_tx(txid(n), PsTxType::NewDenoms, Some("02000000000000000000".into()));
        }
        w.completed = true;
        w
    }

    #[test]
    fn add_and_pop_keep_order_consistent() {
        let mut w = prepared();
        assert_eq!(w.tx_order, vec![txid(1), txid(2), txid(3)]);
        w.add_tx(txid(2), PsTxType::NewDenoms, None);
        assert_eq!(w.tx_order.len(), 3);
        let popped = w.pop_tx(&txid(2)).unwrap();
        assert_eq!(popped.uuid, "uuid");
        assert_eq!(w.tx_order, vec![txid(1), txid(3)]);
        assert_eq!(w.tx_data.len(), 2);
        assert!(w.pop_tx(&txid(2)).is_none());
    }

    #[test]
    fn workflow_survives_json() {
        let w = prepared();
        let json = serde_json::to_value(&w).unwrap();
        let back: PsTxWorkflow = serde_json::from_value(json).unwrap();
        assert_eq!(back, w);
    }

    #[test]
    fn next_to_send_skips_server_known_txs() {
        let w = prepared();
        let now = Timestamp::new(1000);
        assert_eq!(w.next_to_send(|_| Some(TxHeight::Local), now), Some(txid(1)));
        let unconf_parent = |t: &TxId| {
            if *t == txid(1) {
                Some(TxHeight::UnconfParent)
            } else {
                Some(TxHeight::Local)
            }
        };
        assert_eq!(w.next_to_send(unconf_parent, now), Some(txid(2)));
        assert_eq!(w.next_to_send(|_| Some(TxHeight::UnconfParent), now), None);
        assert_eq!(w.next_to_send(|_| None, now), None);
    }

    #[test]
    fn chain_waits_for_failed_parent() {
        let mut w = prepared();
        let now = Timestamp::new(1000);
        w.tx_data.get_mut(&txid(1)).unwrap().record_failure(now, &PsParams::default());
        assert_eq!(w.next_to_send(|_| Some(TxHeight::Local), now), None);
        assert_eq!(w.next_to_send(|_| Some(TxHeight::Local), now.plus_secs(10)), Some(txid(1)));

        w.tx_data.get_mut(&txid(1)).unwrap().record_sent(now);
        assert_eq!(w.next_to_send(|_| Some(TxHeight::Local), now), Some(txid(2)));
    }

    #[test]
    fn retry_delay_escalates_to_cap() {
        let params = PsParams::default();
        let mut d = PsTxData::new("u", txid(1), PsTxType::NewDenoms, None);
        let now = Timestamp::new(1000);
        assert!(d.send_due(now));
        d.record_failure(now, &params);
        assert_eq!(d.next_retry_at, Some(Timestamp::new(1010)));
        assert!(!d.send_due(Timestamp::new(1009)));
        assert!(d.send_due(Timestamp::new(1010)));
        d.record_failure(now, &params);
        assert_eq!(d.next_retry_at, Some(Timestamp::new(1020)));
        for _ in 0..10 {
            d.record_failure(now, &params);
        }
        assert_eq!(d.next_retry_at, Some(Timestamp::new(1300)));
        d.record_sent(now);
        assert!(!d.send_due(Timestamp::new(5000)));
    }

    #[test]
    fn denominate_defaults_and_key() {
        let w = PsDenominateWorkflow::new("abc");
        assert_eq!(w.denom, 0);
        assert_eq!(w.rounds, 0);
        assert!(w.completed.is_none());
        assert_eq!(w.store_key(), "denominate_wfl:abc");
    }

    #[test]
    fn kind_keys() {
        assert_eq!(WorkflowKind::PayCollateral.store_key(), "pay_collateral_wfl");
        assert!(!WorkflowKind::PayCollateral.is_broadcast());
        assert_eq!(WorkflowKind::NewDenoms.tx_type(), PsTxType::NewDenoms);
    }
}
