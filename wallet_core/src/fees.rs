//! Size and fee estimates for mixing transactions.
//!
//! Sizes assume P2PKH inputs. The average-size variant trims one byte per
//! input for the usual 71-byte DER signature; the max-size variant keeps it.

use ps_types::{Duffs, COLLATERAL_VAL, MIN_DENOM_VAL};

/// Fixed part: version, type and locktime.
const TX_OVERHEAD: u64 = 8;
/// Serialized P2PKH input with a 72-byte signature.
const INPUT_MAX_SIZE: u64 = 149;
/// Serialized P2PKH output.
const OUTPUT_SIZE: u64 = 34;

pub const DEFAULT_FEE_PER_KB: Duffs = 1000;

/// Bytes taken by a compact-size integer.
fn compact_size_len(n: u64) -> u64 {
    match n {
        0..=0xfc => 1,
        0xfd..=0xffff => 3,
        0x1_0000..=0xffff_ffff => 5,
        _ => 9,
    }
}

/// Estimated serialized size of a transaction.
pub fn calc_tx_size(in_cnt: u64, out_cnt: u64, max_size: bool) -> u64 {
    let size = TX_OVERHEAD
        + compact_size_len(in_cnt)
        + in_cnt * INPUT_MAX_SIZE
        + compact_size_len(out_cnt)
        + out_cnt * OUTPUT_SIZE;
    if max_size {
        size
    } else {
        size - in_cnt
    }
}

/// Fee for a transaction of the given shape, rounded to the nearest duff.
pub fn calc_tx_fee(in_cnt: u64, out_cnt: u64, fee_per_kb: Duffs, max_size: bool) -> Duffs {
    let size = calc_tx_size(in_cnt, out_cnt, max_size);
    (size * fee_per_kb + 500) / 1000
}

/// Smallest coin value a one-input new-denoms transaction can be funded from.
pub fn min_new_denoms_from_coins_val(fee_per_kb: Duffs) -> Duffs {
    MIN_DENOM_VAL + COLLATERAL_VAL + calc_tx_fee(1, 2, fee_per_kb, true)
}

/// Smallest coin value a one-input new-collateral transaction can be funded from.
pub fn min_new_collateral_from_coins_val(fee_per_kb: Duffs) -> Duffs {
    COLLATERAL_VAL + calc_tx_fee(1, 1, fee_per_kb, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_of_small_and_huge_txs() {
        assert_eq!(calc_tx_size(1, 1, false), 192);
        assert_eq!(calc_tx_size(1, 1, true), 193);
        assert_eq!(calc_tx_size(1, 2, false), 226);
        assert_eq!(calc_tx_size(1, 2, true), 227);
        assert_eq!(calc_tx_size(1000, 1000, false), 182_014);
        assert_eq!(calc_tx_size(1000, 1000, true), 183_014);
    }

    #[test]
    fn fee_scales_with_fee_rate() {
        assert_eq!(calc_tx_fee(1, 1, DEFAULT_FEE_PER_KB, false), 192);
        assert_eq!(calc_tx_fee(1, 1, DEFAULT_FEE_PER_KB, true), 193);
        assert_eq!(calc_tx_fee(1000, 1000, DEFAULT_FEE_PER_KB, false), 182_014);
        assert_eq!(calc_tx_fee(1000, 1000, DEFAULT_FEE_PER_KB, true), 183_014);
        assert_eq!(calc_tx_fee(1, 1, 10_000, true), 1930);
    }

    #[test]
    fn minimal_funding_values() {
        assert_eq!(min_new_denoms_from_coins_val(DEFAULT_FEE_PER_KB), 110_228);
        assert_eq!(min_new_collateral_from_coins_val(DEFAULT_FEE_PER_KB), 10_193);
    }

    #[test]
    fn compact_size_boundaries() {
        assert_eq!(compact_size_len(0xfc), 1);
        assert_eq!(compact_size_len(0xfd), 3);
        assert_eq!(compact_size_len(0x1_0000), 5);
    }
}
