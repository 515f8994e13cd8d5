//! State enums for the mixing session, keypair cache and masternode list.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Per-wallet mixing session state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PsState {
    /// Wallet type cannot mix (e.g. watch-only).
    Unsupported,
    /// Mixing is switched off for this wallet.
    Disabled,
    /// Loading persisted data and waiting for sync.
    Initializing,
    /// Idle and able to start mixing.
    Ready,
    StartMixing,
    Mixing,
    StopMixing,
    /// Scanning wallet history for mixing transactions.
    FindingUntracked,
    /// An unrecoverable error occurred; user action needed.
    Errored,
    /// Wiping mixing data.
    Cleaning,
}

impl PsState {
    /// Whether workflows may be created or advanced in this state.
    pub fn is_mixing_running(&self) -> bool {
        matches!(self, Self::StartMixing | Self::Mixing)
    }

    /// Whether the wallet can be switched into mixing from this state.
    pub fn can_start(&self) -> bool {
        matches!(self, Self::Ready)
    }
}

impl fmt::Display for PsState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unsupported => "Unsupported",
            Self::Disabled => "Disabled",
            Self::Initializing => "Initializing",
            Self::Ready => "Ready",
            Self::StartMixing => "Start Mixing",
            Self::Mixing => "Mixing",
            Self::StopMixing => "Stop Mixing",
            Self::FindingUntracked => "Finding Untracked",
            Self::Errored => "Errored",
            Self::Cleaning => "Cleaning",
        };
        f.write_str(s)
    }
}

/// Lifecycle of the keypair cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KpState {
    Empty,
    /// Cache is missing entries and should be (re)built.
    NeedCache,
    Caching,
    Ready,
    /// Mixing stopped; cache is kept until the idle timeout.
    Unused,
}

/// The five disjoint keypair cache buckets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum KpType {
    /// Addresses receiving outputs of the next planned transactions.
    Incoming,
    /// Non-PS coins that fund new denoms / collateral.
    Spendable,
    /// PS coins already held (denoms and collateral).
    PsSpendable,
    /// Future denominate output addresses.
    PsCoins,
    /// Future change addresses for pay-collateral.
    PsChange,
}

impl KpType {
    pub const ALL: [KpType; 5] = [
        KpType::Incoming,
        KpType::Spendable,
        KpType::PsSpendable,
        KpType::PsCoins,
        KpType::PsChange,
    ];
}

/// Deterministic masternode list availability.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Dip3State {
    #[default]
    Unknown,
    /// Chain has not activated deterministic lists yet.
    Disabled,
    Enabled,
}

/// How the target denominated amount is computed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DenomsMethod {
    /// Mix enough coins to hold `keep_amount`.
    #[default]
    KeepAmount,
    /// Hold an explicit count per denomination.
    Absolute,
}
