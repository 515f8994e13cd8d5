//! Nullable wallet: an in-memory coin set with a toy transaction format.
//!
//! Transactions are JSON bodies; the txid is the double SHA-256 of the
//! body, so signing (which fills in signatures) changes the txid the same
//! way it does on chain.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use ps_crypto::{keypair_from_seed, sha256, sha256d, sign_message};
use ps_types::{Address, Duffs, Hash256, KeyPair, OutPoint, Transaction, TxHeight, TxId, TxIn, TxOut};
use ps_wallet_core::fees::calc_tx_fee;
use ps_wallet_core::{BuildRequest, Coin, KeySource, TxBuilder, TxSigner, WalletBackend};

/// Unused addresses kept ahead of the last used one on each branch.
const GAP_LIMIT: usize = 20;

#[derive(Serialize, Deserialize)]
struct RawBody {
    inputs: Vec<TxIn>,
    outputs: Vec<TxOut>,
    #[serde(default)]
    sigs: Vec<String>,
}

fn encode(inputs: &[TxIn], outputs: &[TxOut], sigs: Vec<String>) -> Result<Transaction, String> {
    let body = RawBody { inputs: inputs.to_vec(), outputs: outputs.to_vec(), sigs };
    let raw = serde_json::to_vec(&body).map_err(|e| e.to_string())?;
    Ok(Transaction { txid: sha256d(&raw), inputs: body.inputs, outputs: body.outputs, raw })
}

#[derive(Default)]
struct Inner {
    txs: BTreeMap<TxId, (Transaction, TxHeight)>,
    branches: [Vec<Address>; 2],
    frozen: BTreeSet<OutPoint>,
    /// Addresses funded from outside; everything else is a PS address.
    regular: BTreeSet<Address>,
    fail_add: bool,
    funded: u32,
}

impl Inner {
    fn used(&self) -> BTreeSet<Address> {
        self.txs.values().flat_map(|(tx, _)| tx.outputs.iter().map(|o| o.address.clone())).collect()
    }

    fn new_address(&mut self, for_change: bool) -> Address {
        let slot = usize::from(for_change);
        let prefix = if for_change { "yNullChange" } else { "yNullRecv" };
        let address = Address::new(format!("{}{}", prefix, self.branches[slot].len()));
        self.branches[slot].push(address.clone());
        address
    }

    fn unused(&mut self, for_change: bool) -> Vec<Address> {
        let used = self.used();
        let slot = usize::from(for_change);
        loop {
            let unused: Vec<Address> =
                self.branches[slot].iter().filter(|a| !used.contains(*a)).cloned().collect();
            if unused.len() >= GAP_LIMIT {
                return unused;
            }
            self.new_address(for_change);
        }
    }

    fn is_mine(&self, address: &Address) -> bool {
        self.branches.iter().any(|b| b.contains(address))
    }
}

/// In-memory wallet whose addresses belong to the PS keystore, except the
/// ones [`NullWallet::fund`] paid into.
#[derive(Default)]
pub struct NullWallet {
    inner: Mutex<Inner>,
}

impl NullWallet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Receive `value` from outside on the next unused receiving address.
    pub fn fund(&self, value: Duffs, height: TxHeight) -> Coin {
        let mut inner = self.inner.lock().unwrap();
        inner.funded += 1;
        let address = inner.unused(false).remove(0);
        inner.regular.insert(address.clone());
        let source = OutPoint::new(Hash256::new(sha256(&inner.funded.to_le_bytes())), 0);
        let input = TxIn { prevout: source, address: None, value: Some(value + 1_000) };
        let tx = encode(&[input], &[TxOut::new(address.clone(), value)], Vec::new())
            .expect("funding transaction encodes");
        let outpoint = tx.outpoint(0);
        inner.txs.insert(tx.txid, (tx, height));
        Coin::new(outpoint, address, value, height)
    }

    /// Add a transaction seen on the network.
    pub fn insert_transaction(&self, tx: Transaction, height: TxHeight) {
        self.inner.lock().unwrap().txs.insert(tx.txid, (tx, height));
    }

    pub fn set_height(&self, txid: &TxId, height: TxHeight) {
        if let Some(entry) = self.inner.lock().unwrap().txs.get_mut(txid) {
            entry.1 = height;
        }
    }

    pub fn freeze(&self, outpoint: OutPoint) {
        self.inner.lock().unwrap().frozen.insert(outpoint);
    }

    /// Make `add_transaction` fail until switched back.
    pub fn fail_add_transaction(&self, fail: bool) {
        self.inner.lock().unwrap().fail_add = fail;
    }

    pub fn tx_count(&self) -> usize {
        self.inner.lock().unwrap().txs.len()
    }
}

impl WalletBackend for NullWallet {
    fn coins(&self) -> Vec<Coin> {
        let inner = self.inner.lock().unwrap();
        let spent: BTreeSet<OutPoint> = inner
            .txs
            .values()
            .flat_map(|(tx, _)| tx.inputs.iter().map(|i| i.prevout))
            .collect();
        inner
            .txs
            .values()
            .flat_map(|(tx, height)| {
                tx.outpoints().map(move |(op, out)| (op, out.clone(), *height)).collect::<Vec<_>>()
            })
            .filter(|(op, out, _)| !spent.contains(op) && inner.is_mine(&out.address))
            .map(|(op, out, height)| {
                let mut coin = Coin::new(op, out.address, out.value, height);
                coin.frozen = inner.frozen.contains(&op);
                coin
            })
            .collect()
    }

    fn history(&self) -> Vec<(TxId, TxHeight)> {
        self.inner.lock().unwrap().txs.iter().map(|(t, (_, h))| (*t, *h)).collect()
    }

    fn get_transaction(&self, txid: &TxId) -> Option<Transaction> {
        self.inner.lock().unwrap().txs.get(txid).map(|(tx, _)| tx.clone())
    }

    fn tx_height(&self, txid: &TxId) -> Option<TxHeight> {
        self.inner.lock().unwrap().txs.get(txid).map(|(_, h)| *h)
    }

    fn is_mine(&self, address: &Address) -> bool {
        self.inner.lock().unwrap().is_mine(address)
    }

    fn is_ps_address(&self, address: &Address) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.is_mine(address) && !inner.regular.contains(address)
    }

    fn unused_addresses(&self, for_change: bool) -> Vec<Address> {
        self.inner.lock().unwrap().unused(for_change)
    }

    fn create_new_address(&self, for_change: bool) -> Result<Address, String> {
        Ok(self.inner.lock().unwrap().new_address(for_change))
    }

    fn add_transaction(&self, tx: &Transaction) -> Result<(), String> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_add {
            return Err("wallet refused transaction".into());
        }
        inner.txs.insert(tx.txid, (tx.clone(), TxHeight::Local));
        Ok(())
    }

    fn remove_transaction(&self, txid: &TxId) {
        self.inner.lock().unwrap().txs.remove(txid);
    }
}

/// Keys for any address, derived from the address text.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullKeys;

impl KeySource for NullKeys {
    fn keypair_for(&self, address: &Address) -> Option<KeyPair> {
        Some(keypair_from_seed(&sha256(address.as_str().as_bytes())))
    }
}

/// Builder producing outputs in ascending value order with change added
/// after the fee.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullTxBuilder;

impl NullTxBuilder {
    /// Parse a transaction produced by this builder (signed or not).
    pub fn decode(raw_hex: &str) -> Result<Transaction, String> {
        let raw = hex::decode(raw_hex).map_err(|e| e.to_string())?;
        let body: RawBody = serde_json::from_slice(&raw).map_err(|e| e.to_string())?;
        Ok(Transaction { txid: sha256d(&raw), inputs: body.inputs, outputs: body.outputs, raw })
    }
}

impl TxBuilder for NullTxBuilder {
    fn build(&self, request: &BuildRequest) -> Result<Transaction, String> {
        if request.inputs.is_empty() {
            return Err("no inputs".into());
        }
        let inputs: Vec<TxIn> = request
            .inputs
            .iter()
            .map(|c| TxIn { prevout: c.outpoint, address: Some(c.address.clone()), value: Some(c.value) })
            .collect();
        let mut outputs = request.outputs.clone();
        let in_total: Duffs = request.inputs.iter().map(|c| c.value).sum();
        let out_total: Duffs = outputs.iter().map(|o| o.value).sum();
        let n_out = outputs.len() as u64 + u64::from(request.change_address.is_some());
        let fee = calc_tx_fee(inputs.len() as u64, n_out, request.fee_per_kb, false);
        if in_total < out_total + fee {
            return Err(format!("insufficient funds: {} < {}", in_total, out_total + fee));
        }
        if let Some(change) = &request.change_address {
            let value = in_total - out_total - fee;
            if value > 0 {
                outputs.push(TxOut::new(change.clone(), value));
            }
        }
        outputs.sort_by_key(|o| o.value);
        encode(&inputs, &outputs, Vec::new())
    }
}

/// Signer requiring a key for every input address.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullTxSigner;

impl TxSigner for NullTxSigner {
    fn sign(&self, tx: Transaction, keys: &dyn KeySource) -> Result<Transaction, String> {
        let mut sigs = Vec::with_capacity(tx.inputs.len());
        for input in &tx.inputs {
            let address = input
                .address
                .as_ref()
                .ok_or_else(|| format!("input {} has no address", input.prevout))?;
            let kp = keys.keypair_for(address).ok_or_else(|| format!("no key for {}", address))?;
            sigs.push(hex::encode(sign_message(tx.txid.as_bytes(), &kp.private).as_bytes()));
        }
        encode(&tx.inputs, &tx.outputs, sigs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn funded_coins_and_spends() {
        let wallet = NullWallet::new();
        let coin = wallet.fund(50_000, TxHeight::Mined(1));
        assert_eq!(wallet.coins(), vec![coin.clone()]);
        assert!(wallet.is_mine(&coin.address));
        assert!(!wallet.is_ps_address(&coin.address));
        assert!(!wallet.unused_addresses(false).contains(&coin.address));

        let request = BuildRequest {
            inputs: vec![coin.clone()],
            outputs: vec![TxOut::new(Address::new("shop"), 20_000)],
            change_address: Some(wallet.unused_addresses(true)[0].clone()),
            fee_per_kb: 1000,
        };
        let tx = NullTxSigner.sign(NullTxBuilder.build(&request).unwrap(), &NullKeys).unwrap();
        assert_eq!(tx.outputs[0].value, 20_000);
        assert_eq!(tx.fee(), Some(calc_tx_fee(1, 2, 1000, false)));
        wallet.add_transaction(&tx).unwrap();
        assert_eq!(wallet.tx_height(&tx.txid), Some(TxHeight::Local));

        let coins = wallet.coins();
        assert_eq!(coins.len(), 1);
        assert!(coins[0].address.as_str().starts_with("yNullChange"));
    }

    #[test]
    fn decode_recovers_signed_tx() {
        let wallet = NullWallet::new();
        let coin = wallet.fund(40_000, TxHeight::Mined(1));
        let request = BuildRequest {
            inputs: vec![coin],
            outputs: vec![TxOut::new(Address::new("x"), 30_000)],
            change_address: None,
            fee_per_kb: 1000,
        };
        let unsigned = NullTxBuilder.build(&request).unwrap();
        let signed = NullTxSigner.sign(unsigned.clone(), &NullKeys).unwrap();
        assert_ne!(signed.txid, unsigned.txid);
        assert_eq!(NullTxBuilder::decode(&signed.raw_hex()).unwrap(), signed);
    }

    #[test]
    fn builder_rejects_overspend() {
        let wallet = NullWallet::new();
        let coin = wallet.fund(10_000, TxHeight::Mined(1));
        let request = BuildRequest {
            inputs: vec![coin],
            outputs: vec![TxOut::new(Address::new("x"), 10_000)],
            change_address: None,
            fee_per_kb: 1000,
        };
        assert!(NullTxBuilder.build(&request).is_err());
    }
}
