//! Amounts and the fixed PrivateSend denomination ladder.
//!
//! Amounts are integer duffs (1 coin = 100_000_000 duffs). Every mixed output
//! carries one of the five ladder values; collateral coins use a separate
//! small range so they never collide with a denomination.

use std::collections::BTreeMap;

/// Integer amount in duffs.
pub type Duffs = u64;

/// Duffs per coin.
pub const COIN: Duffs = 100_000_000;

/// Denomination ladder, ascending.
pub const PS_DENOMS_VALS: [Duffs; 5] = [100_001, 1_000_010, 10_000_100, 100_001_000, 1_000_010_000];

/// Smallest denomination.
pub const MIN_DENOM_VAL: Duffs = PS_DENOMS_VALS[0];

/// Fee paid to a mixing coordinator per session.
pub const COLLATERAL_VAL: Duffs = 10_000;

/// Value of a freshly created collateral coin (four sessions worth).
pub const CREATE_COLLATERAL_VAL: Duffs = COLLATERAL_VAL * 4;

/// Accepted collateral coin values: 10000..=100000 in 10000 steps.
pub const CREATE_COLLATERAL_VALS: [Duffs; 10] = [
    10_000, 20_000, 30_000, 40_000, 50_000, 60_000, 70_000, 80_000, 90_000, 100_000,
];

/// Per-denomination coin counts keyed by ladder value.
pub type DenomCounts = BTreeMap<Duffs, u32>;

/// Whether `value` is one of the ladder denominations.
pub fn is_denom(value: Duffs) -> bool {
    PS_DENOMS_VALS.contains(&value)
}

/// Whether `value` is an acceptable collateral coin value.
pub fn is_collateral_val(value: Duffs) -> bool {
    CREATE_COLLATERAL_VALS.contains(&value)
}

/// Empty counts map with every ladder tier present.
pub fn empty_denom_counts() -> DenomCounts {
    PS_DENOMS_VALS.iter().map(|d| (*d, 0)).collect()
}

/// Format duffs as a decimal coin string (`1.00001`).
pub fn format_coins(value: Duffs) -> String {
    let whole = value / COIN;
    let frac = value % COIN;
    if frac == 0 {
        return whole.to_string();
    }
    let frac = format!("{:08}", frac);
    format!("{}.{}", whole, frac.trim_end_matches('0'))
}
