//! Ed25519 key generation and per-index child derivation.

use hmac::{Hmac, Mac};
use ed25519_dalek::SigningKey;
use ps_types::{KeyPair, PrivateKey, PublicKey};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;

use crate::error::CryptoError;

type HmacSha256 = Hmac<Sha256>;

/// Fresh random 32-byte seed for a new PS keystore.
pub fn generate_seed() -> [u8; 32] {
    let mut seed = [0u8; 32];
    OsRng.fill_bytes(&mut seed);
    seed
}

/// Derive a key pair from a 32-byte seed (deterministic).
pub fn keypair_from_seed(seed: &[u8; 32]) -> KeyPair {
    let signing_key = SigningKey::from_bytes(seed);
    let verifying_key = signing_key.verifying_key();
    KeyPair {
        public: PublicKey(verifying_key.to_bytes()),
        private: PrivateKey(signing_key.to_bytes()),
    }
}

/// Derive the public key from a private key.
pub fn public_from_private(private: &PrivateKey) -> PublicKey {
    let signing_key = SigningKey::from_bytes(&private.0);
    PublicKey(signing_key.verifying_key().to_bytes())
}

/// Child seed for a (branch, index) pair: `HMAC-SHA256(master, branch || index)`.
///
/// Branch 0 holds receiving addresses, branch 1 change addresses.
pub fn derive_child_seed(
    master: &[u8; 32],
    branch: u32,
    index: u32,
) -> Result<[u8; 32], CryptoError> {
    let mut mac = HmacSha256::new_from_slice(master)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    mac.update(&branch.to_be_bytes());
    mac.update(&index.to_be_bytes());
    let mut out = [0u8; 32];
    out.copy_from_slice(&mac.finalize().into_bytes());
    Ok(out)
}

/// Child key pair at (branch, index).
pub fn derive_child_keypair(
    master: &[u8; 32],
    branch: u32,
    index: u32,
) -> Result<KeyPair, CryptoError> {
    Ok(keypair_from_seed(&derive_child_seed(master, branch, index)?))
}
