//! Balance and spend-candidate queries over wallet coins.
//!
//! Rounds and frozen status are independent filters: a frozen denom is still
//! a denom, it just never becomes a spend candidate unless asked for.

use serde::Serialize;

use ps_types::{CoinRounds, Duffs, PsTxType, TxHeight};

use crate::error::MixingError;
use crate::ledger::CoinRoundsLedger;
use crate::wallet::{Coin, WalletBackend};

/// A wallet coin with its mixing classification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PsUtxo {
    pub coin: Coin,
    pub rounds: CoinRounds,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Balance {
    pub confirmed: Duffs,
    pub unconfirmed: Duffs,
    /// Local transactions not yet seen by the server.
    pub local: Duffs,
}

impl Balance {
    pub fn total(&self) -> Duffs {
        self.confirmed + self.unconfirmed + self.local
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UtxoQuery {
    /// Include denoms and collaterals alongside regular coins.
    pub include_ps: bool,
    /// Only PS coins at or above this rank; overrides `include_ps`.
    pub min_rounds: Option<CoinRounds>,
    /// Treat coins received on PS addresses from others as usable.
    pub allow_others: bool,
    pub include_frozen: bool,
}

impl UtxoQuery {
    pub fn regular() -> Self {
        Self::default()
    }

    pub fn all() -> Self {
        Self { include_ps: true, ..Self::default() }
    }

    pub fn min_rounds(min_rounds: CoinRounds) -> Self {
        Self { min_rounds: Some(min_rounds), ..Self::default() }
    }
}

/// Classification of a wallet coin.
pub fn coin_rounds(ledger: &CoinRoundsLedger, coin: &Coin) -> CoinRounds {
    if let Some(rounds) = ledger.rounds_of(&coin.outpoint) {
        return rounds;
    }
    match ledger.ps_tx(&coin.outpoint.txid).map(|r| r.tx_type) {
        Some(PsTxType::NewDenoms | PsTxType::NewCollateral | PsTxType::PayCollateral) => {
            CoinRounds::MixOrigin
        }
        _ => CoinRounds::Unknown,
    }
}

fn is_ps_rounds(rounds: CoinRounds) -> bool {
    matches!(rounds, CoinRounds::Round(_) | CoinRounds::Collateral | CoinRounds::Other)
}

pub fn get_utxos(
    wallet: &dyn WalletBackend,
    ledger: &CoinRoundsLedger,
    query: UtxoQuery,
) -> Vec<PsUtxo> {
    wallet
        .coins()
        .into_iter()
        .filter(|c| query.include_frozen || !c.frozen)
        .map(|coin| {
            let rounds = coin_rounds(ledger, &coin);
            PsUtxo { coin, rounds }
        })
        .filter(|u| match (query.min_rounds, u.rounds) {
            (Some(_), CoinRounds::Other) => query.allow_others,
            (Some(min), CoinRounds::Round(_) | CoinRounds::Collateral) => u.rounds >= min,
            (Some(_), _) => false,
            (None, CoinRounds::Other) => query.include_ps || query.allow_others,
            (None, r) => query.include_ps || !is_ps_rounds(r),
        })
        .collect()
}

pub fn get_balance(
    wallet: &dyn WalletBackend,
    ledger: &CoinRoundsLedger,
    query: UtxoQuery,
) -> Balance {
    let mut balance = Balance::default();
    for u in get_utxos(wallet, ledger, query) {
        match u.coin.height {
            TxHeight::Mined(_) => balance.confirmed += u.coin.value,
            TxHeight::Unconfirmed | TxHeight::UnconfParent => balance.unconfirmed += u.coin.value,
            TxHeight::Local => balance.local += u.coin.value,
        }
    }
    balance
}

/// Confirmed regular coins that may fund new denoms or collateral.
///
/// Coins sitting on reserved addresses belong to in-flight workflows.
pub fn funding_coins(wallet: &dyn WalletBackend, ledger: &CoinRoundsLedger) -> Vec<Coin> {
    get_utxos(wallet, ledger, UtxoQuery::regular())
        .into_iter()
        .map(|u| u.coin)
        .filter(|c| c.is_confirmed() && !ledger.is_reserved(&c.address))
        .collect()
}

/// Fail unless every coin reaches `min_rounds`.
pub fn check_min_rounds(
    coins: &[PsUtxo],
    min_rounds: CoinRounds,
    allow_others: bool,
) -> Result<(), MixingError> {
    let ok = coins.iter().all(|u| match u.rounds {
        CoinRounds::Other => allow_others,
        CoinRounds::Round(_) | CoinRounds::Collateral => u.rounds >= min_rounds,
        _ => false,
    });
    if ok {
        Ok(())
    } else {
        Err(MixingError::MinRoundsCheckFailed { min_rounds })
    }
}

/// Percent of the round target reached over all held denoms.
pub fn mixing_progress(ledger: &CoinRoundsLedger) -> u8 {
    let mix_rounds = u64::from(ledger.mix_rounds());
    let denoms = ledger.denoms();
    if denoms.is_empty() || mix_rounds == 0 {
        return 0;
    }
    let done: u64 = denoms
        .values()
        .filter_map(|c| c.rounds.round())
        .map(|r| u64::from(r).min(mix_rounds))
        .sum();
    let pct = done * 100 / (denoms.len() as u64 * mix_rounds);
    u8::try_from(pct).unwrap_or(100)
}
