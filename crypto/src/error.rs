use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("malformed partial merkle tree: {0}")]
    MalformedMerkleTree(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("address checksum mismatch")]
    ChecksumMismatch,
}
