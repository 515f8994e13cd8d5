//! Boundaries to the host wallet.
//!
//! The mixing core does not own coins, addresses or the transaction store.
//! It reads them through [`WalletBackend`], builds and signs through
//! [`TxBuilder`] / [`TxSigner`], and relays through [`Broadcaster`].

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use ps_types::{Address, Duffs, KeyPair, OutPoint, Transaction, TxHeight, TxId, TxOut};

/// An unspent wallet output.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coin {
    pub outpoint: OutPoint,
    pub address: Address,
    pub value: Duffs,
    pub height: TxHeight,
    /// Frozen by the user; never selected for spending.
    pub frozen: bool,
}

impl Coin {
    pub fn new(outpoint: OutPoint, address: Address, value: Duffs, height: TxHeight) -> Self {
        Self { outpoint, address, value, height, frozen: false }
    }

    pub fn is_confirmed(&self) -> bool {
        self.height.is_mined()
    }
}

/// Wallet history change the mixing core reacts to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WalletEvent {
    TxAdded(TxId),
    TxRemoved(TxId),
    TxVerified { txid: TxId, height: u32 },
}

// ── Wallet ──────────────────────────────────────────────────────────────

/// Read access to coins and history plus the few mutations mixing needs.
///
/// Implementations use interior mutability; calls never block on the network.
pub trait WalletBackend: Send + Sync {
    /// All unspent outputs, including unconfirmed and local ones.
    fn coins(&self) -> Vec<Coin>;

    /// Every wallet transaction with its height.
    fn history(&self) -> Vec<(TxId, TxHeight)>;

    fn get_transaction(&self, txid: &TxId) -> Option<Transaction>;

    /// `None` when the wallet does not know the transaction.
    fn tx_height(&self, txid: &TxId) -> Option<TxHeight>;

    fn is_mine(&self, address: &Address) -> bool;

    /// Whether the address belongs to the segregated PS keystore.
    fn is_ps_address(&self, address: &Address) -> bool;

    /// Addresses with no history, oldest first.
    fn unused_addresses(&self, for_change: bool) -> Vec<Address>;

    fn create_new_address(&self, for_change: bool) -> Result<Address, String>;

    /// Store a local (not yet broadcast) transaction.
    fn add_transaction(&self, tx: &Transaction) -> Result<(), String>;

    fn remove_transaction(&self, txid: &TxId);
}

// ── Keys ────────────────────────────────────────────────────────────────

/// Provider of signing keys by address.
pub trait KeySource: Send + Sync {
    fn keypair_for(&self, address: &Address) -> Option<KeyPair>;
}

// ── Building, signing, relaying ─────────────────────────────────────────

/// Inputs and outputs handed to the external builder.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BuildRequest {
    pub inputs: Vec<Coin>,
    pub outputs: Vec<TxOut>,
    /// `None` selects the exact-spend path: everything left over is fee.
    pub change_address: Option<Address>,
    pub fee_per_kb: Duffs,
}

/// Builds unsigned transactions with outputs in ascending value order.
pub trait TxBuilder: Send + Sync {
    fn build(&self, request: &BuildRequest) -> Result<Transaction, String>;
}

pub trait TxSigner: Send + Sync {
    fn sign(&self, tx: Transaction, keys: &dyn KeySource) -> Result<Transaction, String>;
}

#[async_trait]
pub trait Broadcaster: Send + Sync {
    async fn broadcast(&self, tx: &Transaction, timeout: Duration) -> Result<(), String>;
}
