//! Recognition of PS transactions the ledger has not recorded.
//!
//! Happens after restoring a wallet from seed, after an interrupted
//! session, or when another wallet sharing the keystore mixed coins.
//! Classification only looks at the transaction shape and at what the
//! ledger already tracks, so history is walked in chain order and repeated
//! until a pass finds nothing new.

use std::collections::HashMap;

use tracing::{debug, info};

use ps_types::{is_collateral_val, is_denom, OutPoint, PsTxType, Transaction, TxIn};

use crate::ledger::CoinRoundsLedger;
use crate::wallet::WalletBackend;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UntrackedReport {
    pub found: usize,
    pub by_type: HashMap<PsTxType, usize>,
}

fn is_tracked(ledger: &CoinRoundsLedger, op: &OutPoint) -> bool {
    ledger.denom(op).is_some() || ledger.collaterals().contains_key(op)
}

fn is_ours(wallet: &dyn WalletBackend, input: &TxIn) -> bool {
    input.address.as_ref().is_some_and(|a| wallet.is_mine(a))
}

/// PS type of a wallet transaction, if it has one.
pub fn classify_tx(
    wallet: &dyn WalletBackend,
    ledger: &CoinRoundsLedger,
    tx: &Transaction,
) -> Option<PsTxType> {
    if tx.inputs.is_empty() || (tx.outputs.is_empty() && tx.inputs.len() != 1) {
        return None;
    }
    let our_inputs: Vec<&TxIn> = tx.inputs.iter().filter(|i| is_ours(wallet, i)).collect();
    let tracked_inputs = tx.inputs.iter().filter(|i| is_tracked(ledger, &i.prevout)).count();

    // one tracked collateral paying at most one smaller collateral back
    if tx.inputs.len() == 1
        && ledger.collaterals().contains_key(&tx.inputs[0].prevout)
        && tx.outputs.len() <= 1
        && tx.outputs.iter().all(|o| is_collateral_val(o.value))
    {
        return Some(PsTxType::PayCollateral);
    }

    // equal inputs and outputs, all outputs the same denom, ours among inputs
    if tx.inputs.len() == tx.outputs.len() {
        let value = tx.outputs[0].value;
        let denoms_in = tx
            .inputs
            .iter()
            .filter_map(|i| ledger.denom(&i.prevout))
            .filter(|c| c.value == value)
            .count();
        if is_denom(value) && tx.outputs.iter().all(|o| o.value == value) && denoms_in > 0 {
            return Some(PsTxType::Denominate);
        }
    }

    let all_ours = our_inputs.len() == tx.inputs.len();
    if all_ours && tracked_inputs == 0 {
        let mine = |v: fn(u64) -> bool| {
            tx.outputs.iter().filter(|o| wallet.is_mine(&o.address) && v(o.value)).count()
        };
        let denoms = mine(is_denom);
        let collaterals = mine(is_collateral_val);
        let rest = tx.outputs.len() - denoms - collaterals;
        if denoms > 0 && collaterals <= 1 && rest <= 1 {
            return Some(PsTxType::NewDenoms);
        }
        if denoms == 0 && collaterals == 1 && rest <= 1 {
            return Some(PsTxType::NewCollateral);
        }
    }

    if tracked_inputs > 0 {
        let all_denoms = tx.inputs.iter().all(|i| ledger.denom(&i.prevout).is_some());
        return Some(if all_denoms { PsTxType::PrivateSend } else { PsTxType::SpendPsCoins });
    }

    if our_inputs.is_empty()
        && tx.outputs.iter().any(|o| wallet.is_mine(&o.address) && wallet.is_ps_address(&o.address))
    {
        return Some(PsTxType::OtherPsCoins);
    }
    None
}

fn spend_tracked(ledger: &mut CoinRoundsLedger, op: &OutPoint) {
    if let Some(coin) = ledger.pop_denom(op) {
        ledger.add_spent_denom(*op, coin);
    }
    if let Some(coin) = ledger.pop_collateral(op) {
        ledger.add_spent_collateral(*op, coin);
    }
    ledger.pop_other(op);
    ledger.pop_spending_denom(op);
    ledger.pop_spending_collateral(op);
}

/// Record the coin changes of a classified transaction and register it.
pub fn apply_ps_tx(
    wallet: &dyn WalletBackend,
    ledger: &mut CoinRoundsLedger,
    tx: &Transaction,
    tx_type: PsTxType,
) {
    match tx_type {
        PsTxType::NewDenoms | PsTxType::NewCollateral => {
            for (op, out) in tx.outpoints() {
                if !wallet.is_mine(&out.address) {
                    continue;
                }
                if tx_type == PsTxType::NewDenoms && is_denom(out.value) {
                    ledger.add_denom(op, out.address.clone(), out.value, 0);
                } else if is_collateral_val(out.value) {
                    ledger.add_collateral(op, out.address.clone(), out.value);
                }
            }
        }
        PsTxType::PayCollateral => {
            for op in tx.input_outpoints() {
                spend_tracked(ledger, op);
            }
            for (op, out) in tx.outpoints() {
                if wallet.is_mine(&out.address) && is_collateral_val(out.value) {
                    ledger.add_collateral(op, out.address.clone(), out.value);
                }
            }
        }
        PsTxType::Denominate => {
            // Output i inherits the rounds of input i, plus one.
            let rounds: Vec<u32> = tx
                .inputs
                .iter()
                .filter_map(|i| ledger.denom(&i.prevout))
                .filter_map(|c| c.rounds.round())
                .collect();
            for op in tx.input_outpoints() {
                spend_tracked(ledger, op);
            }
            let ours: Vec<(OutPoint, &ps_types::TxOut)> =
                tx.outpoints().filter(|(_, o)| wallet.is_mine(&o.address)).collect();
            let fallback = rounds.iter().max().copied().unwrap_or(0);
            for (i, (op, out)) in ours.into_iter().enumerate() {
                let round = rounds.get(i).copied().unwrap_or(fallback) + 1;
                ledger.add_denom(op, out.address.clone(), out.value, round);
            }
        }
        PsTxType::PrivateSend | PsTxType::SpendPsCoins => {
            for op in tx.input_outpoints() {
                spend_tracked(ledger, op);
            }
        }
        PsTxType::OtherPsCoins => {
            for (op, out) in tx.outpoints() {
                if wallet.is_mine(&out.address) && wallet.is_ps_address(&out.address) {
                    ledger.add_other(op, out.address.clone(), out.value);
                }
            }
        }
    }
    ledger.register_ps_tx(tx.txid, tx_type, true);
}

/// Classify and record every unregistered PS transaction in history.
pub fn find_untracked_ps_txs(
    wallet: &dyn WalletBackend,
    ledger: &mut CoinRoundsLedger,
) -> UntrackedReport {
    let mut history = wallet.history();
    history.sort_by_key(|(txid, height)| (height.sort_key(), *txid));

    let mut report = UntrackedReport::default();
    // a pass can unlock children of transactions it just recorded
    for _ in 0..=history.len() {
        let mut found = 0;
        for (txid, _) in &history {
            if ledger.ps_tx(txid).is_some() {
                continue;
            }
            let Some(tx) = wallet.get_transaction(txid) else { continue };
            let Some(tx_type) = classify_tx(wallet, ledger, &tx) else { continue };
            debug!(%txid, ?tx_type, "untracked PS transaction");
            apply_ps_tx(wallet, ledger, &tx, tx_type);
            *report.by_type.entry(tx_type).or_default() += 1;
            found += 1;
        }
        report.found += found;
        if found == 0 {
            break;
        }
    }
    if report.found > 0 {
        info!(found = report.found, "recorded untracked PS transactions");
    }
    report
}
