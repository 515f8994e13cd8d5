//! Fundamental types for the PrivateSend mixing core.
//!
//! This crate defines the types shared by every other crate in the workspace:
//! hashes, outpoints, amounts and the denomination ladder, round counters,
//! the wallet transaction model, timestamps, network ids and state enums.

pub mod address;
pub mod amount;
pub mod codec;
pub mod error;
pub mod hash;
pub mod keys;
pub mod network;
pub mod params;
pub mod rounds;
pub mod state;
pub mod time;
pub mod tx;

pub use address::{Address, OutPoint};
pub use amount::{
    empty_denom_counts, format_coins, is_collateral_val, is_denom, DenomCounts, Duffs, COIN,
    COLLATERAL_VAL, CREATE_COLLATERAL_VAL, CREATE_COLLATERAL_VALS, MIN_DENOM_VAL, PS_DENOMS_VALS,
};
pub use error::TypesError;
pub use hash::{Hash256, ProTxHash, TxId};
pub use keys::{KeyPair, PrivateKey, PublicKey, Signature};
pub use network::NetworkId;
pub use params::PsParams;
pub use rounds::CoinRounds;
pub use state::{DenomsMethod, Dip3State, KpState, KpType, PsState};
pub use time::{Clock, SystemClock, Timestamp};
pub use tx::{PsTxType, Transaction, TxHeight, TxIn, TxOut};
