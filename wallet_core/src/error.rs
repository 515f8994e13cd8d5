use ps_store::StoreError;
use ps_types::{CoinRounds, Duffs};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MixingError {
    #[error("insufficient funds: need {needed}, have {available}")]
    InsufficientFunds { needed: Duffs, available: Duffs },

    #[error("possible double spend: {0}")]
    PossibleDoubleSpend(String),

    #[error("coins do not meet minimum rounds {min_rounds}")]
    MinRoundsCheckFailed { min_rounds: CoinRounds },

    #[error("not enough keypairs: {0}")]
    NotEnoughKeypairs(String),

    #[error("transaction building error: {0}")]
    Build(String),

    #[error("signing error: {0}")]
    Signing(String),

    #[error("broadcast error: {0}")]
    Broadcast(String),

    #[error("keystore error: {0}")]
    Keystore(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("{0}")]
    Other(String),
}
