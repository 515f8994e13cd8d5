//! Keypair cache for unattended mixing.
//!
//! Mixing signs transactions long after the user unlocked the wallet. Before
//! it starts, every key it may need is copied into five disjoint buckets
//! (see [`KpType`]); signing then reads from the cache through
//! [`KeySource`]. The cache is dropped after mixing stops and the idle
//! timeout passes.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info};

use ps_types::{is_denom, Address, Duffs, KeyPair, KpState, KpType, PrivateKey, Timestamp};

use crate::error::MixingError;
use crate::ledger::CoinRoundsLedger;
use crate::wallet::KeySource;

/// Addresses wanted in each bucket.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KeypairPlan {
    buckets: BTreeMap<KpType, Vec<Address>>,
}

impl KeypairPlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an address unless some bucket already holds it.
    pub fn push(&mut self, kp_type: KpType, address: Address) -> bool {
        if self.contains(&address) {
            return false;
        }
        self.buckets.entry(kp_type).or_default().push(address);
        true
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.buckets.values().any(|b| b.contains(address))
    }

    pub fn addresses(&self, kp_type: KpType) -> &[Address] {
        self.buckets.get(&kp_type).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = (KpType, &Address)> {
        self.buckets.iter().flat_map(|(t, addrs)| addrs.iter().map(move |a| (*t, a)))
    }

    pub fn len(&self) -> usize {
        self.buckets.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Fresh addresses mixing will consume.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct KeypairNeeds {
    /// Denominate outputs over all remaining rounds.
    pub ps_coins: u64,
    /// Pay-collateral change outputs, one per mixing session.
    pub ps_change: u64,
    /// Collateral funding, one new collateral per four sessions.
    pub small_mix_funds: u64,
}

/// Estimate the fresh addresses needed to finish mixing.
///
/// Every held denom below the target needs one output address per missing
/// round; every planned denom needs the full target.
pub fn calc_need_new_keypairs_cnt(
    ledger: &CoinRoundsLedger,
    plan: &[Vec<Duffs>],
    entry_max_size: u32,
) -> KeypairNeeds {
    let mix_rounds = u64::from(ledger.mix_rounds());
    let held: u64 = ledger
        .denoms_to_mix(None, None)
        .values()
        .filter_map(|c| c.rounds.round())
        .map(|r| mix_rounds.saturating_sub(u64::from(r)))
        .sum();
    let planned = plan.iter().flatten().filter(|v| is_denom(**v)).count() as u64;
    let ps_coins = held + planned * mix_rounds;
    let sessions = ps_coins.div_ceil(u64::from(entry_max_size.max(1)));
    KeypairNeeds { ps_coins, ps_change: sessions, small_mix_funds: sessions.div_ceil(4) }
}

fn copy_keypair(kp: &KeyPair) -> KeyPair {
    KeyPair { public: kp.public.clone(), private: PrivateKey(kp.private.0) }
}

pub struct KeypairCacheManager {
    state: KpState,
    buckets: BTreeMap<KpType, BTreeMap<Address, KeyPair>>,
    idle_timeout_secs: u64,
    unused_since: Option<Timestamp>,
}

impl KeypairCacheManager {
    pub fn new(idle_timeout_secs: u64) -> Self {
        Self {
            state: KpState::Empty,
            buckets: BTreeMap::new(),
            idle_timeout_secs,
            unused_since: None,
        }
    }

    pub fn state(&self) -> KpState {
        self.state
    }

    pub fn len(&self) -> usize {
        self.buckets.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn bucket_len(&self, kp_type: KpType) -> usize {
        self.buckets.get(&kp_type).map_or(0, BTreeMap::len)
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.buckets.values().any(|b| b.contains_key(address))
    }

    /// Planned addresses with no cached key.
    pub fn find_addrs_not_in_keypairs(&self, plan: &KeypairPlan) -> BTreeSet<Address> {
        plan.iter().filter(|(_, a)| !self.contains(a)).map(|(_, a)| a.clone()).collect()
    }

    /// Whether the cache must be (re)built, and the state it was in when a
    /// transition to `NeedCache` happened.
    pub fn check_need_new_keypairs(&mut self, plan: &KeypairPlan) -> (bool, Option<KpState>) {
        match self.state {
            KpState::Empty => {
                self.state = KpState::NeedCache;
                (true, Some(KpState::Empty))
            }
            KpState::NeedCache => (true, None),
            KpState::Caching => (false, None),
            KpState::Ready | KpState::Unused => {
                let prev = self.state;
                if self.find_addrs_not_in_keypairs(plan).is_empty() {
                    self.state = KpState::Ready;
                    self.unused_since = None;
                    (false, None)
                } else {
                    self.state = KpState::NeedCache;
                    (true, Some(prev))
                }
            }
        }
    }

    /// Copy the keys of every planned address into the cache.
    ///
    /// Returns the number of newly cached keys. A missing key leaves the
    /// cache in `NeedCache` with whatever was copied so far.
    pub fn cache(&mut self, keys: &dyn KeySource, plan: &KeypairPlan) -> Result<usize, MixingError> {
        self.state = KpState::Caching;
        let mut added = 0;
        for (kp_type, address) in plan.iter() {
            if self.contains(address) {
                continue;
            }
            let Some(kp) = keys.keypair_for(address) else {
                self.state = KpState::NeedCache;
                return Err(MixingError::NotEnoughKeypairs(format!("no key for {}", address)));
            };
            self.buckets.entry(kp_type).or_default().insert(address.clone(), kp);
            added += 1;
        }
        self.state = KpState::Ready;
        self.unused_since = None;
        info!(added, total = self.len(), "keypair cache ready");
        Ok(added)
    }

    /// Drop spendable keys whose coins are gone.
    pub fn cleanup_unused_spendable(&mut self, live: &BTreeSet<Address>) -> usize {
        let Some(bucket) = self.buckets.get_mut(&KpType::Spendable) else { return 0 };
        let before = bucket.len();
        bucket.retain(|a, _| live.contains(a));
        let removed = before - bucket.len();
        if removed > 0 {
            debug!(removed, "dropped spendable keypairs");
        }
        removed
    }

    /// Move a copied key to another bucket, e.g. an incoming address that
    /// now holds a denom.
    pub fn move_to(&mut self, address: &Address, kp_type: KpType) -> bool {
        let found = self.buckets.values_mut().find_map(|b| b.remove(address));
        match found {
            Some(kp) => {
                self.buckets.entry(kp_type).or_default().insert(address.clone(), kp);
                true
            }
            None => false,
        }
    }

    /// Mixing stopped; start the idle countdown.
    pub fn mark_unused(&mut self, now: Timestamp) {
        if matches!(self.state, KpState::Empty) {
            return;
        }
        self.state = KpState::Unused;
        self.unused_since = Some(now);
    }

    /// Clear the cache once it has been unused for the idle timeout.
    pub fn clean_on_timeout(&mut self, now: Timestamp) -> bool {
        let expired = matches!(self.state, KpState::Unused)
            && self.unused_since.map_or(false, |t| t.has_expired(self.idle_timeout_secs, now));
        if expired {
            info!("keypair cache idle timeout");
            self.cleanup_all();
        }
        expired
    }

    pub fn cleanup_all(&mut self) {
        self.buckets.clear();
        self.state = KpState::Empty;
        self.unused_since = None;
    }
}

impl KeySource for KeypairCacheManager {
    fn keypair_for(&self, address: &Address) -> Option<KeyPair> {
        self.buckets.values().find_map(|b| b.get(address)).map(copy_keypair)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ps_crypto::{derive_address, derive_child_keypair};
    use ps_types::{Hash256, NetworkId, OutPoint};

    struct Seeded(BTreeMap<Address, u32>);

    impl Seeded {
        fn with(n: u32) -> (Self, Vec<Address>) {
            let mut map = BTreeMap::new();
            let mut addrs = Vec::new();
            for i in 0..n {
                let kp = derive_child_keypair(&[9u8; 32], 0, i).unwrap();
                let a = derive_address(&kp.public, NetworkId::Regtest);
                map.insert(a.clone(), i);
                addrs.push(a);
            }
            (Self(map), addrs)
        }
    }

    impl KeySource for Seeded {
        fn keypair_for(&self, address: &Address) -> Option<KeyPair> {
            let i = self.0.get(address)?;
            derive_child_keypair(&[9u8; 32], 0, *i).ok()
        }
    }

    fn plan_of(addrs: &[Address]) -> KeypairPlan {
        let mut plan = KeypairPlan::new();
        plan.push(KpType::Incoming, addrs[0].clone());
        plan.push(KpType::Spendable, addrs[1].clone());
        plan.push(KpType::PsCoins, addrs[2].clone());
        plan
    }

    #[test]
    fn plan_buckets_are_disjoint() {
        let (_, addrs) = Seeded::with(2);
        let mut plan = KeypairPlan::new();
        assert!(plan.push(KpType::Incoming, addrs[0].clone()));
        assert!(!plan.push(KpType::PsCoins, addrs[0].clone()));
        assert!(plan.push(KpType::PsCoins, addrs[1].clone()));
        assert_eq!(plan.len(), 2);
        assert_eq!(plan.addresses(KpType::PsChange), &[] as &[Address]);
    }

    #[test]
    fn state_transitions() {
        let (keys, addrs) = Seeded::with(4);
        let plan = plan_of(&addrs);
        let mut cache = KeypairCacheManager::new(60);

        assert_eq!(cache.check_need_new_keypairs(&plan), (true, Some(KpState::Empty)));
        assert_eq!(cache.state(), KpState::NeedCache);
        assert_eq!(cache.check_need_new_keypairs(&plan), (true, None));

        assert_eq!(cache.cache(&keys, &plan).unwrap(), 3);
        assert_eq!(cache.state(), KpState::Ready);
        assert_eq!(cache.check_need_new_keypairs(&plan), (false, None));

        let mut bigger = plan.clone();
        bigger.push(KpType::PsChange, addrs[3].clone());
        assert_eq!(cache.check_need_new_keypairs(&bigger), (true, Some(KpState::Ready)));
        assert_eq!(cache.cache(&keys, &bigger).unwrap(), 1);

        cache.mark_unused(Timestamp::new(100));
        assert_eq!(cache.state(), KpState::Unused);
        assert_eq!(cache.check_need_new_keypairs(&bigger), (false, None));
        assert_eq!(cache.state(), KpState::Ready);
    }

    #[test]
    fn missing_key_fails_caching() {
        let (keys, addrs) = Seeded::with(3);
        let mut plan = plan_of(&addrs);
        plan.push(KpType::PsChange, Address::new("yForeign"));
        let mut cache = KeypairCacheManager::new(60);
        let err = cache.cache(&keys, &plan).unwrap_err();
        assert!(matches!(err, MixingError::NotEnoughKeypairs(_)));
        assert_eq!(cache.state(), KpState::NeedCache);
        assert_eq!(cache.find_addrs_not_in_keypairs(&plan).len(), 1);
    }

    #[test]
    fn cached_keys_sign_like_originals() {
        let (keys, addrs) = Seeded::with(3);
        let mut cache = KeypairCacheManager::new(60);
        cache.cache(&keys, &plan_of(&addrs)).unwrap();
        let cached = cache.keypair_for(&addrs[1]).unwrap();
        let original = keys.keypair_for(&addrs[1]).unwrap();
        assert_eq!(cached.public, original.public);
        assert_eq!(cached.private.0, original.private.0);
        assert!(cache.keypair_for(&Address::new("nope")).is_none());
    }

    #[test]
    fn spendable_cleanup_and_moves() {
        let (keys, addrs) = Seeded::with(3);
        let mut cache = KeypairCacheManager::new(60);
        cache.cache(&keys, &plan_of(&addrs)).unwrap();
        assert!(cache.move_to(&addrs[0], KpType::PsSpendable));
        assert_eq!(cache.bucket_len(KpType::Incoming), 0);
        assert_eq!(cache.bucket_len(KpType::PsSpendable), 1);

        assert_eq!(cache.cleanup_unused_spendable(&BTreeSet::new()), 1);
        assert_eq!(cache.bucket_len(KpType::Spendable), 0);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn idle_timeout_clears() {
        let (keys, addrs) = Seeded::with(3);
        let mut cache = KeypairCacheManager::new(60);
        cache.cache(&keys, &plan_of(&addrs)).unwrap();
        assert!(!cache.clean_on_timeout(Timestamp::new(1000)));
        cache.mark_unused(Timestamp::new(1000));
        assert!(!cache.clean_on_timeout(Timestamp::new(1059)));
        assert!(cache.clean_on_timeout(Timestamp::new(1060)));
        assert!(cache.is_empty());
        assert_eq!(cache.state(), KpState::Empty);
    }

    #[test]
    fn needs_count_remaining_rounds() {
        let mut ledger = CoinRoundsLedger::new(4);
        let op = |n: u8| OutPoint::new(Hash256::new([n; 32]), 0);
        ledger.add_denom(op(1), Address::new("a"), 100_001, 0);
        ledger.add_denom(op(2), Address::new("b"), 100_001, 3);
        ledger.add_denom(op(3), Address::new("c"), 100_001, 4);
        let plan = vec![vec![10_000, 100_001, 100_001]];
        let needs = calc_need_new_keypairs_cnt(&ledger, &plan, 9);
        assert_eq!(needs.ps_coins, 4 + 1 + 2 * 4);
        assert_eq!(needs.ps_change, 2);
        assert_eq!(needs.small_mix_funds, 1);

        let none = calc_need_new_keypairs_cnt(&CoinRoundsLedger::new(4), &[], 9);
        assert_eq!(none, KeypairNeeds::default());
    }
}
