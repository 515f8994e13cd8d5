//! Mixing round counters with sentinel values.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// How many times a coin went through mixing, or what kind of PS coin it is.
///
/// Ordering follows the rank: `Unknown < Other < MixOrigin < Collateral < Round(0) < Round(1) ..`,
/// so a `min_rounds` filter of `Collateral` matches collateral and every denom.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CoinRounds {
    Unknown,
    /// Coin the user chose to treat as mixed without proof.
    Other,
    MixOrigin,
    Collateral,
    Round(u32),
}

impl CoinRounds {
    pub fn rank(&self) -> i64 {
        match self {
            Self::Unknown => -1_000_000_000,
            Self::Other => -3,
            Self::MixOrigin => -2,
            Self::Collateral => -1,
            Self::Round(n) => i64::from(*n),
        }
    }

    /// Round count for denominated coins.
    pub fn round(&self) -> Option<u32> {
        match self {
            Self::Round(n) => Some(*n),
            _ => None,
        }
    }
}

impl PartialOrd for CoinRounds {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CoinRounds {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl fmt::Display for CoinRounds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => f.write_str("Unknown"),
            Self::Other => f.write_str("Other"),
            Self::MixOrigin => f.write_str("Mix Origin"),
            Self::Collateral => f.write_str("Collateral"),
            Self::Round(n) => write!(f, "{}", n),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_strings() {
        assert_eq!(CoinRounds::Unknown.to_string(), "Unknown");
        assert_eq!(CoinRounds::Other.to_string(), "Other");
        assert_eq!(CoinRounds::MixOrigin.to_string(), "Mix Origin");
        assert_eq!(CoinRounds::Collateral.to_string(), "Collateral");
        assert_eq!(CoinRounds::Round(3).to_string(), "3");
    }

    #[test]
    fn ordering_by_rank() {
        assert!(CoinRounds::Other < CoinRounds::Collateral);
        assert!(CoinRounds::Collateral < CoinRounds::Round(0));
        assert!(CoinRounds::Round(1) < CoinRounds::Round(2));
        assert!(CoinRounds::Unknown < CoinRounds::Other);
    }
}
