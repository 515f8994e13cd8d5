//! Denomination planning.
//!
//! A plan is a list of output-value lists, one per chained new-denoms
//! transaction. Each list is ascending; when a collateral coin must be
//! created as well, its value is the first output of the first transaction.

use ps_types::{
    empty_denom_counts, DenomCounts, DenomsMethod, Duffs, COIN, COLLATERAL_VAL,
    CREATE_COLLATERAL_VAL, CREATE_COLLATERAL_VALS, MIN_DENOM_VAL, PS_DENOMS_VALS,
};

use crate::fees::{calc_tx_fee, min_new_denoms_from_coins_val};

/// New-collateral transactions the capped plan leaves funds for.
const COLLATERAL_REFILLS_KEPT: Duffs = 5;

/// What the user wants to hold in denoms.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlanTarget {
    pub method: DenomsMethod,
    /// Whole coins to keep denominated in keep-amount mode.
    pub keep_amount: u64,
    /// Wanted count per ladder tier in absolute mode.
    pub abs_denoms_cnt: DenomCounts,
}

impl Default for PlanTarget {
    fn default() -> Self {
        Self {
            method: DenomsMethod::KeepAmount,
            keep_amount: 2,
            abs_denoms_cnt: empty_denom_counts(),
        }
    }
}

/// Current PS holdings and the funds available to extend them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Holdings {
    pub denom_counts: DenomCounts,
    pub denoms_value: Duffs,
    /// No collateral coin exists yet, so the plan must create one.
    pub need_collateral: bool,
    /// Total value of the coins that would fund the plan.
    pub available: Duffs,
    /// Number of coins funding the first transaction.
    pub n_inputs: u64,
}

impl Holdings {
    pub fn empty() -> Self {
        Self {
            denom_counts: empty_denom_counts(),
            denoms_value: 0,
            need_collateral: false,
            available: 0,
            n_inputs: 0,
        }
    }
}

#[derive(Clone, Debug)]
pub struct DenominationPlanner {
    max_per_tier: u32,
    fee_per_kb: Duffs,
    target: PlanTarget,
}

impl DenominationPlanner {
    pub fn new(max_per_tier: u32, fee_per_kb: Duffs, target: PlanTarget) -> Self {
        Self { max_per_tier: max_per_tier.max(1), fee_per_kb, target }
    }

    pub fn target(&self) -> &PlanTarget {
        &self.target
    }

    pub fn set_target(&mut self, target: PlanTarget) {
        self.target = target;
    }

    pub fn fee_per_kb(&self) -> Duffs {
        self.fee_per_kb
    }

    /// Outputs of the largest transaction a plan can produce.
    fn max_outputs(&self) -> u64 {
        PS_DENOMS_VALS.len() as u64 * u64::from(self.max_per_tier) + 2
    }

    /// Ascending passes over the ladder taking up to `max_per_tier` of each
    /// value while it still fits; one pass per transaction. Returns the
    /// batches and what could not be covered.
    fn fill_by_value(&self, mut remaining: Duffs) -> (Vec<Vec<Duffs>>, Duffs) {
        let mut batches = Vec::new();
        loop {
            let mut batch = Vec::new();
            for &denom in PS_DENOMS_VALS.iter() {
                let mut taken = 0;
                while taken < self.max_per_tier && denom <= remaining {
                    batch.push(denom);
                    remaining -= denom;
                    taken += 1;
                }
            }
            if batch.is_empty() {
                break;
            }
            batches.push(batch);
        }
        (batches, remaining)
    }

    /// Denoms covering at least `need`, overshooting by at most one smallest
    /// denomination.
    pub fn find_denoms_approx(&self, need: Duffs) -> Vec<Vec<Duffs>> {
        let (mut batches, remaining) = self.fill_by_value(need);
        if remaining == 0 {
            return batches;
        }
        let cap = self.max_per_tier as usize;
        match batches.last_mut() {
            Some(last) => {
                let smallest = last.iter().take_while(|v| **v == MIN_DENOM_VAL).count();
                if smallest < cap {
                    last.insert(smallest, MIN_DENOM_VAL);
                } else {
                    batches.push(vec![MIN_DENOM_VAL]);
                }
            }
            None => batches.push(vec![MIN_DENOM_VAL]),
        }
        batches
    }

    /// Plan reaching `target` from nothing, funded by coins of the given values.
    pub fn plan_amounts(&self, target: Duffs, available: &[Duffs]) -> Vec<Vec<Duffs>> {
        let holdings = Holdings {
            available: available.iter().sum(),
            n_inputs: available.len() as u64,
            ..Holdings::empty()
        };
        let batches = self.value_plan(target, &holdings);
        self.cap_to_available(batches, &holdings)
    }

    /// Plan for the configured target.
    ///
    /// With `on_keep_amount` the plan describes the whole gap to the target;
    /// otherwise it is cut down to what `holdings.available` can fund.
    pub fn calc_need_denoms_amounts(
        &self,
        holdings: &Holdings,
        on_keep_amount: bool,
    ) -> Vec<Vec<Duffs>> {
        let batches = match self.target.method {
            DenomsMethod::KeepAmount => {
                self.value_plan(self.target.keep_amount.saturating_mul(COIN), holdings)
            }
            DenomsMethod::Absolute => self.absolute_plan(holdings),
        };
        if on_keep_amount {
            batches
        } else {
            self.cap_to_available(batches, holdings)
        }
    }

    fn value_plan(&self, target: Duffs, holdings: &Holdings) -> Vec<Vec<Duffs>> {
        let mut need = target.saturating_sub(holdings.denoms_value);
        if need < MIN_DENOM_VAL {
            return Vec::new();
        }
        if holdings.need_collateral {
            need += CREATE_COLLATERAL_VAL;
        }
        let mut batches = self.find_denoms_approx(need);
        if holdings.need_collateral {
            if let Some(first) = batches.first_mut() {
                first.insert(0, CREATE_COLLATERAL_VAL);
            }
        }
        batches
    }

    fn absolute_plan(&self, holdings: &Holdings) -> Vec<Vec<Duffs>> {
        let mut left: Vec<(Duffs, u32)> = PS_DENOMS_VALS
            .iter()
            .map(|d| {
                let want = self.target.abs_denoms_cnt.get(d).copied().unwrap_or(0);
                let have = holdings.denom_counts.get(d).copied().unwrap_or(0);
                (*d, want.saturating_sub(have))
            })
            .collect();
        let mut batches = Vec::new();
        loop {
            let mut batch = Vec::new();
            for (denom, cnt) in left.iter_mut() {
                let take = (*cnt).min(self.max_per_tier);
                batch.extend(std::iter::repeat(*denom).take(take as usize));
                *cnt -= take;
            }
            if batch.is_empty() {
                break;
            }
            batches.push(batch);
        }
        if holdings.need_collateral {
            if let Some(first) = batches.first_mut() {
                first.insert(0, CREATE_COLLATERAL_VAL);
            }
        }
        batches
    }

    /// Funds left undenominated when the plan is cut to what coins can pay
    /// for, so the collateral coin can still be replenished.
    pub fn collateral_refill_reserve(&self) -> Duffs {
        COLLATERAL_REFILLS_KEPT
            * (CREATE_COLLATERAL_VAL + calc_tx_fee(1, 2, self.fee_per_kb, true))
    }

    /// Keep outputs in plan order while they and the chain fees fit the funds
    /// minus the refill reserve. An output that does not fit is skipped, so
    /// smaller values further down the plan still get a chance.
    fn cap_to_available(&self, batches: Vec<Vec<Duffs>>, holdings: &Holdings) -> Vec<Vec<Duffs>> {
        let budget = holdings.available.saturating_sub(self.collateral_refill_reserve());
        let mut used: Duffs = 0;
        let mut capped = Vec::new();
        for (i, batch) in batches.into_iter().enumerate() {
            let in_cnt = if i == 0 { holdings.n_inputs.max(1) } else { 1 };
            let mut kept = Vec::new();
            let mut sum: Duffs = 0;
            for (j, value) in batch.into_iter().enumerate() {
                let fee = calc_tx_fee(in_cnt, kept.len() as u64 + 2, self.fee_per_kb, true);
                if used + sum + value + fee > budget {
                    if i == 0 && j == 0 && holdings.need_collateral {
                        // denoms without a collateral coin cannot be mixed
                        return Vec::new();
                    }
                    continue;
                }
                kept.push(value);
                sum += value;
            }
            if !kept.is_empty() {
                used += sum + calc_tx_fee(in_cnt, kept.len() as u64 + 1, self.fee_per_kb, true);
                capped.push(kept);
            }
        }
        // a collateral output alone is a new-collateral job, not new denoms
        if capped.len() == 1 && capped[0] == [CREATE_COLLATERAL_VAL] && holdings.need_collateral {
            capped.clear();
        }
        capped
    }

    /// Split arbitrary coins into denoms, keeping the leftover as a collateral.
    ///
    /// The first transaction spends all `values`; later ones spend the change
    /// of their predecessor.
    pub fn calc_need_denoms_amounts_from_coins(&self, values: &[Duffs]) -> Vec<Vec<Duffs>> {
        let total: Duffs = values.iter().sum();
        if total < min_new_denoms_from_coins_val(self.fee_per_kb) {
            return Vec::new();
        }
        let n_in = values.len() as u64;
        let reserve = COLLATERAL_VAL + calc_tx_fee(n_in, self.max_outputs(), self.fee_per_kb, true);
        let (mut batches, _) = self.fill_by_value(total.saturating_sub(reserve));
        if batches.is_empty() {
            return batches;
        }
        let fees: Duffs = batches
            .iter()
            .enumerate()
            .map(|(i, b)| {
                let in_cnt = if i == 0 { n_in } else { 1 };
                calc_tx_fee(in_cnt, b.len() as u64 + 1, self.fee_per_kb, true)
            })
            .sum();
        let denoms: Duffs = batches.iter().flatten().sum();
        let leftover = total.saturating_sub(denoms + fees);
        if let Some(collateral) = CREATE_COLLATERAL_VALS.iter().rev().find(|v| **v <= leftover) {
            batches[0].insert(0, *collateral);
        }
        batches
    }
}

/// Sum of every output of a plan.
pub fn plan_total(plan: &[Vec<Duffs>]) -> Duffs {
    plan.iter().flatten().sum()
}

/// At least five coins of each of the two smallest denominations.
pub fn check_enough_sm_denoms(counts: &DenomCounts) -> bool {
    PS_DENOMS_VALS[..2]
        .iter()
        .all(|d| counts.get(d).copied().unwrap_or(0) >= 5)
}

/// Any coin above the smallest denomination is held.
pub fn check_big_denoms_presented(counts: &DenomCounts) -> bool {
    PS_DENOMS_VALS[1..]
        .iter()
        .any(|d| counts.get(d).copied().unwrap_or(0) > 0)
}
