//! Signing keys available to a mixing session.

use std::path::PathBuf;
use std::sync::Arc;

use ps_types::{Address, KeyPair};
use ps_wallet_core::{load_keystore, KeySource, KeypairCacheManager, MixingError, UnlockedKeystore};

/// Turns the user's password into a key source for the wallet's addresses.
pub trait KeyUnlocker: Send + Sync {
    fn unlock(&self, password: &str) -> Result<Arc<dyn KeySource>, MixingError>;
}

/// Unlocks the PS keystore file and re-derives its addresses.
pub struct KeystoreUnlocker {
    path: PathBuf,
    receiving: u32,
    change: u32,
}

impl KeystoreUnlocker {
    /// `receiving` and `change` are the address counts already handed out
    /// on each branch.
    pub fn new(path: impl Into<PathBuf>, receiving: u32, change: u32) -> Self {
        Self { path: path.into(), receiving, change }
    }
}

impl KeyUnlocker for KeystoreUnlocker {
    fn unlock(&self, password: &str) -> Result<Arc<dyn KeySource>, MixingError> {
        let file = load_keystore(&self.path)?;
        let mut keystore = UnlockedKeystore::unlock(&file, password)?;
        keystore.derive_up_to(self.receiving, self.change)?;
        Ok(Arc::new(keystore))
    }
}

/// The keypair cache backed by the unlocked keys of a running session.
///
/// Addresses picked after the cache was filled (fresh change of a chained
/// transaction, say) still resolve while the session holds its keys.
pub(crate) struct SessionKeys<'a> {
    pub cache: &'a KeypairCacheManager,
    pub unlocked: Option<&'a dyn KeySource>,
}

impl KeySource for SessionKeys<'_> {
    fn keypair_for(&self, address: &Address) -> Option<KeyPair> {
        self.cache
            .keypair_for(address)
            .or_else(|| self.unlocked.and_then(|k| k.keypair_for(address)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ps_types::NetworkId;
    use ps_wallet_core::save_keystore;

    #[test]
    fn keystore_unlocker_derives_addresses() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ps_keystore.json");
        let (mut created, file) = UnlockedKeystore::create("pw", NetworkId::Regtest).unwrap();
        save_keystore(&file, &path).unwrap();
        let first = created.derive_next(false).unwrap();
        let change = created.derive_next(true).unwrap();

        let unlocker = KeystoreUnlocker::new(&path, 1, 1);
        let keys = unlocker.unlock("pw").unwrap();
        assert!(keys.keypair_for(&first).is_some());
        assert!(keys.keypair_for(&change).is_some());
        assert!(keys.keypair_for(&Address::new("elsewhere")).is_none());

        assert!(matches!(unlocker.unlock("nope"), Err(MixingError::Keystore(_))));
    }

    #[test]
    fn session_keys_fall_back_to_unlocked() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ps_keystore.json");
        let (mut created, file) = UnlockedKeystore::create("pw", NetworkId::Regtest).unwrap();
        save_keystore(&file, &path).unwrap();
        let addr = created.derive_next(false).unwrap();
        let unlocked = KeystoreUnlocker::new(&path, 1, 0).unlock("pw").unwrap();

        let cache = KeypairCacheManager::new(600);
        let without = SessionKeys { cache: &cache, unlocked: None };
        assert!(without.keypair_for(&addr).is_none());
        let with = SessionKeys { cache: &cache, unlocked: Some(unlocked.as_ref()) };
        assert!(with.keypair_for(&addr).is_some());
    }
}
