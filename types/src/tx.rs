//! Wallet-level transaction model.
//!
//! The mixing core never serializes full transactions itself; the external
//! builder hands back a [`Transaction`] with its raw bytes and a decoded view
//! of inputs and outputs that the bookkeeping works from.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::address::{Address, OutPoint};
use crate::amount::Duffs;
use crate::hash::TxId;

/// Transaction input with the funding output's data when it is known.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxIn {
    pub prevout: OutPoint,
    pub address: Option<Address>,
    pub value: Option<Duffs>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxOut {
    pub address: Address,
    pub value: Duffs,
}

impl TxOut {
    pub fn new(address: Address, value: Duffs) -> Self {
        Self { address, value }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub txid: TxId,
    pub inputs: Vec<TxIn>,
    pub outputs: Vec<TxOut>,
    #[serde(with = "hex_bytes")]
    pub raw: Vec<u8>,
}

impl Transaction {
    pub fn outpoint(&self, vout: u32) -> OutPoint {
        OutPoint::new(self.txid, vout)
    }

    pub fn input_outpoints(&self) -> impl Iterator<Item = &OutPoint> {
        self.inputs.iter().map(|i| &i.prevout)
    }

    /// `(outpoint, output)` for every output.
    pub fn outpoints(&self) -> impl Iterator<Item = (OutPoint, &TxOut)> {
        self.outputs
            .iter()
            .enumerate()
            .map(move |(i, o)| (OutPoint::new(self.txid, i as u32), o))
    }

    pub fn output_value(&self) -> Duffs {
        self.outputs.iter().map(|o| o.value).sum()
    }

    /// Sum of input values, `None` if any input value is unknown.
    pub fn input_value(&self) -> Option<Duffs> {
        self.inputs.iter().map(|i| i.value).sum()
    }

    pub fn fee(&self) -> Option<Duffs> {
        self.input_value()
            .map(|v| v.saturating_sub(self.output_value()))
    }

    pub fn raw_hex(&self) -> String {
        hex::encode(&self.raw)
    }
}

/// Role of a transaction in the mixing process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PsTxType {
    NewDenoms,
    NewCollateral,
    PayCollateral,
    Denominate,
    /// Regular send funded exclusively by mixed denoms.
    PrivateSend,
    /// Regular send spending PS coins together with others.
    SpendPsCoins,
    /// Incoming coins sent to PS addresses by someone else.
    OtherPsCoins,
}

impl fmt::Display for PsTxType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NewDenoms => "New Denoms",
            Self::NewCollateral => "New Collateral",
            Self::PayCollateral => "Pay Collateral",
            Self::Denominate => "Denominate",
            Self::PrivateSend => "PrivateSend",
            Self::SpendPsCoins => "Spend PS Coins",
            Self::OtherPsCoins => "Other PS Coins",
        };
        f.write_str(s)
    }
}

/// Where a wallet transaction stands relative to the chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TxHeight {
    /// Only known locally, never seen by the server.
    Local,
    /// In mempool with an unconfirmed parent.
    UnconfParent,
    /// In mempool.
    Unconfirmed,
    Mined(u32),
}

impl TxHeight {
    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local)
    }

    pub fn is_mined(&self) -> bool {
        matches!(self, Self::Mined(_))
    }

    /// Sort key placing mined transactions first by height, mempool last.
    pub fn sort_key(&self) -> u64 {
        match self {
            Self::Mined(h) => u64::from(*h),
            Self::Unconfirmed => u64::from(u32::MAX) + 1,
            Self::UnconfParent => u64::from(u32::MAX) + 2,
            Self::Local => u64::from(u32::MAX) + 3,
        }
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}
