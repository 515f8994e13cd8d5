//! Wallet-side core of PrivateSend mixing.
//!
//! - Coin rounds accounting for denoms, collateral and foreign PS coins
//! - Denomination planning and fee estimation
//! - Transaction workflows (new collateral, new denoms, pay collateral,
//!   denominate) with persistence, broadcast retry and rollback
//! - Keypair caching and the password-protected PS keystore
//! - Recognition of PS transactions missing from the ledger
//!
//! The host wallet is reached only through the traits in [`wallet`].

pub mod balance;
pub mod engine;
pub mod error;
pub mod fees;
pub mod keypairs;
pub mod keystore;
pub mod ledger;
pub mod planner;
pub mod selection;
pub mod untracked;
pub mod wallet;
pub mod workflow;

pub use balance::{get_balance, get_utxos, Balance, PsUtxo, UtxoQuery};
pub use engine::{EngineConfig, EngineDeps, PendingBroadcast, WorkflowEngine};
pub use error::MixingError;
pub use fees::{calc_tx_fee, calc_tx_size, DEFAULT_FEE_PER_KB};
pub use keypairs::{KeypairCacheManager, KeypairNeeds, KeypairPlan};
pub use keystore::{
    decrypt_keystore, encrypt_keystore, load_keystore, save_keystore, KdfCost, KeystoreFile,
    UnlockedKeystore,
};
pub use ledger::{CoinRoundsLedger, PsCoin};
pub use planner::{DenominationPlanner, Holdings, PlanTarget};
pub use untracked::UntrackedReport;
pub use wallet::{
    Broadcaster, BuildRequest, Coin, KeySource, TxBuilder, TxSigner, WalletBackend, WalletEvent,
};
pub use workflow::{PsDenominateWorkflow, PsTxData, PsTxWorkflow, WorkflowKind};
