//! Password-protected PS seed file.
//!
//! Mixing keys live apart from the main wallet keys. The seed is sealed with
//! AES-256-GCM under a key stretched from the password by Argon2id, and the
//! file keeps everything needed to open it again except the password.
//! Opening it yields an [`UnlockedKeystore`] that derives child keys per
//! (branch, index) and serves them as a [`KeySource`].

use std::collections::BTreeMap;
use std::path::Path;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use ps_crypto::{derive_address, derive_child_keypair, generate_seed};
use ps_types::{Address, KeyPair, NetworkId};

use crate::error::MixingError;
use crate::wallet::KeySource;

const FORMAT_VERSION: u32 = 1;
const SEED_LEN: usize = 32;
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;

pub const RECEIVING_BRANCH: u32 = 0;
pub const CHANGE_BRANCH: u32 = 1;

/// Argon2id cost, stored with the file so it can be raised later without
/// locking out existing keystores.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfCost {
    pub mem_kib: u32,
    pub passes: u32,
    pub lanes: u32,
}

impl Default for KdfCost {
    fn default() -> Self {
        Self { mem_kib: 64 * 1024, passes: 3, lanes: 1 }
    }
}

/// On-disk form of the PS seed. Byte fields are hex.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KeystoreFile {
    pub version: u32,
    pub network: NetworkId,
    pub kdf: KdfCost,
    pub salt: String,
    pub nonce: String,
    pub sealed_seed: String,
}

fn keystore_err(msg: impl std::fmt::Display) -> MixingError {
    MixingError::Keystore(msg.to_string())
}

fn seed_cipher(password: &str, salt: &[u8], cost: KdfCost) -> Result<Aes256Gcm, MixingError> {
    let params = Params::new(cost.mem_kib, cost.passes, cost.lanes, Some(SEED_LEN))
        .map_err(|e| keystore_err(format_args!("bad kdf cost: {}", e)))?;
    let mut key = Zeroizing::new([0u8; SEED_LEN]);
    Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
        .hash_password_into(password.as_bytes(), salt, &mut key[..])
        .map_err(|e| keystore_err(format_args!("key stretching failed: {}", e)))?;
    Aes256Gcm::new_from_slice(&key[..]).map_err(keystore_err)
}

fn unhex(field: &str, value: &str) -> Result<Vec<u8>, MixingError> {
    hex::decode(value).map_err(|e| keystore_err(format_args!("{} is not hex: {}", field, e)))
}

/// Seal `seed` under `password` with the default cost.
pub fn encrypt_keystore(
    seed: &[u8; SEED_LEN],
    password: &str,
    network: NetworkId,
) -> Result<KeystoreFile, MixingError> {
    let mut salt = [0u8; SALT_LEN];
    let mut nonce = [0u8; NONCE_LEN];
    let mut rng = rand::thread_rng();
    rng.fill_bytes(&mut salt);
    rng.fill_bytes(&mut nonce);

    let kdf = KdfCost::default();
    let sealed = seed_cipher(password, &salt, kdf)?
        .encrypt(Nonce::from_slice(&nonce), seed.as_slice())
        .map_err(|_| keystore_err("sealing the seed failed"))?;

    Ok(KeystoreFile {
        version: FORMAT_VERSION,
        network,
        kdf,
        salt: hex::encode(salt),
        nonce: hex::encode(nonce),
        sealed_seed: hex::encode(sealed),
    })
}

/// Open a keystore. A wrong password and a tampered file are
/// indistinguishable and both fail authentication.
pub fn decrypt_keystore(
    file: &KeystoreFile,
    password: &str,
) -> Result<Zeroizing<[u8; SEED_LEN]>, MixingError> {
    if file.version != FORMAT_VERSION {
        return Err(keystore_err(format_args!("keystore version {} not supported", file.version)));
    }
    let salt = unhex("salt", &file.salt)?;
    let nonce = unhex("nonce", &file.nonce)?;
    let sealed = unhex("sealed_seed", &file.sealed_seed)?;
    if nonce.len() != NONCE_LEN {
        return Err(keystore_err(format_args!("nonce is {} bytes", nonce.len())));
    }

    let opened = Zeroizing::new(
        seed_cipher(password, &salt, file.kdf)?
            .decrypt(Nonce::from_slice(&nonce), sealed.as_slice())
            .map_err(|_| keystore_err("wrong password or corrupted keystore"))?,
    );
    let seed: [u8; SEED_LEN] = opened
        .as_slice()
        .try_into()
        .map_err(|_| keystore_err(format_args!("seed is {} bytes", opened.len())))?;
    Ok(Zeroizing::new(seed))
}

pub fn save_keystore(file: &KeystoreFile, path: &Path) -> Result<(), MixingError> {
    let json = serde_json::to_vec_pretty(file).map_err(keystore_err)?;
    std::fs::write(path, json)
        .map_err(|e| keystore_err(format_args!("writing {}: {}", path.display(), e)))
}

pub fn load_keystore(path: &Path) -> Result<KeystoreFile, MixingError> {
    let raw = std::fs::read(path)
        .map_err(|e| keystore_err(format_args!("reading {}: {}", path.display(), e)))?;
    serde_json::from_slice(&raw).map_err(keystore_err)
}

/// Decrypted PS seed with the addresses derived from it so far.
pub struct UnlockedKeystore {
    seed: Zeroizing<[u8; SEED_LEN]>,
    network: NetworkId,
    index: BTreeMap<Address, (u32, u32)>,
    next_index: [u32; 2],
}

impl UnlockedKeystore {
    /// Fresh keystore with a random seed, returned with its encrypted form.
    pub fn create(password: &str, network: NetworkId) -> Result<(Self, KeystoreFile), MixingError> {
        let seed = Zeroizing::new(generate_seed());
        let file = encrypt_keystore(&seed, password, network)?;
        Ok((Self::from_seed(seed, network), file))
    }

    pub fn unlock(file: &KeystoreFile, password: &str) -> Result<Self, MixingError> {
        let seed = decrypt_keystore(file, password)?;
        Ok(Self::from_seed(seed, file.network))
    }

    fn from_seed(seed: Zeroizing<[u8; SEED_LEN]>, network: NetworkId) -> Self {
        Self { seed, network, index: BTreeMap::new(), next_index: [0, 0] }
    }

    /// Derive the next unused address of a branch.
    pub fn derive_next(&mut self, for_change: bool) -> Result<Address, MixingError> {
        let branch = if for_change { CHANGE_BRANCH } else { RECEIVING_BRANCH };
        let slot = branch as usize;
        let index = self.next_index[slot];
        let kp = derive_child_keypair(&self.seed, branch, index)
            .map_err(|e| keystore_err(e.to_string()))?;
        let address = derive_address(&kp.public, self.network);
        self.index.insert(address.clone(), (branch, index));
        self.next_index[slot] = index + 1;
        Ok(address)
    }

    /// Re-derive `count` addresses per branch, e.g. after a restart.
    pub fn derive_up_to(&mut self, receiving: u32, change: u32) -> Result<(), MixingError> {
        while self.next_index[RECEIVING_BRANCH as usize] < receiving {
            self.derive_next(false)?;
        }
        while self.next_index[CHANGE_BRANCH as usize] < change {
            self.derive_next(true)?;
        }
        Ok(())
    }

    pub fn addresses(&self) -> impl Iterator<Item = &Address> {
        self.index.keys()
    }

    pub fn owns(&self, address: &Address) -> bool {
        self.index.contains_key(address)
    }
}

impl KeySource for UnlockedKeystore {
    fn keypair_for(&self, address: &Address) -> Option<KeyPair> {
        let (branch, index) = self.index.get(address)?;
        derive_child_keypair(&self.seed, *branch, *index).ok()
    }
}
