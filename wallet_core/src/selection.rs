//! Choice of the coins funding new denoms and new collateral.

use std::collections::BTreeMap;

use ps_types::{Address, Duffs};

use crate::wallet::Coin;

/// Picks the coins the next funding transaction spends.
pub trait CoinSelection: Send + Sync {
    fn name(&self) -> &'static str;

    /// Coins to spend, or empty if nothing worth at least `min_value` qualifies.
    fn next_coins(&self, candidates: Vec<Coin>, min_value: Duffs) -> Vec<Coin>;
}

/// Spend every candidate together.
#[derive(Clone, Copy, Debug, Default)]
pub struct AllCoins;

impl CoinSelection for AllCoins {
    fn name(&self) -> &'static str {
        "all_coins"
    }

    fn next_coins(&self, candidates: Vec<Coin>, min_value: Duffs) -> Vec<Coin> {
        let total: Duffs = candidates.iter().map(|c| c.value).sum();
        if total < min_value {
            return Vec::new();
        }
        candidates
    }
}

/// Spend the coins of a single origin address, richest address first, so
/// funds from different addresses are never linked.
#[derive(Clone, Copy, Debug, Default)]
pub struct GroupByAddress;

impl CoinSelection for GroupByAddress {
    fn name(&self) -> &'static str {
        "group_by_address"
    }

    fn next_coins(&self, candidates: Vec<Coin>, min_value: Duffs) -> Vec<Coin> {
        let mut groups: BTreeMap<Address, Vec<Coin>> = BTreeMap::new();
        for coin in candidates {
            groups.entry(coin.address.clone()).or_default().push(coin);
        }
        groups
            .into_values()
            .map(|g| (g.iter().map(|c| c.value).sum::<Duffs>(), g))
            .filter(|(total, _)| *total >= min_value)
            .max_by_key(|(total, _)| *total)
            .map(|(_, g)| g)
            .unwrap_or_default()
    }
}

/// Strategy for the `group_origin_coins_by_addr` setting.
pub fn selection_for(group_by_addr: bool) -> Box<dyn CoinSelection> {
    if group_by_addr {
        Box::new(GroupByAddress)
    } else {
        Box::new(AllCoins)
    }
}
