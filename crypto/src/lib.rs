//! Cryptographic primitives for the PrivateSend mixing core.
//!
//! - **SHA-256d** for entry hashes, txids and merkle nodes
//! - Merkle roots and branch roll-up for coinbase commitment checks
//! - Partial merkle tree decoding
//! - **Ed25519** keys for the PS keystore, derived per address index via HMAC-SHA256

pub mod address;
pub mod error;
pub mod hash;
pub mod keys;
pub mod merkle;
pub mod pmt;
pub mod sign;

pub use address::{decode_address, derive_address, validate_address};
pub use error::CryptoError;
pub use hash::{hash_transaction, sha256, sha256d, sha256d_multi};
pub use keys::{
    derive_child_keypair, derive_child_seed, generate_seed, keypair_from_seed, public_from_private,
};
pub use merkle::{calc_merkle_root, hash_merkle_branch};
pub use pmt::PartialMerkleTree;
pub use sign::{sign_message, verify_signature};
