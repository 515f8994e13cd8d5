use ps_store::StoreError;
use ps_types::TypesError;
use thiserror::Error;

/// Why a diff was rejected. Never fatal: the diff is dropped and re-requested.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VerificationError {
    #[error("unsupported coinbase: type {tx_type}, payload version {version}")]
    UnsupportedCbTx { tx_type: u16, version: u16 },

    #[error("coinbase payload missing")]
    MissingPayload,

    #[error("masternode list merkle root mismatch")]
    MnListRootMismatch,

    #[error("quorum merkle root mismatch")]
    QuorumRootMismatch,

    #[error("coinbase hash is not the first proof hash")]
    CbTxNotFirst,

    #[error("coinbase is not committed to by block merkle root")]
    CbTxRootMismatch,

    #[error("no header at height {0}")]
    HeaderUnavailable(u32),

    #[error("malformed merkle proof: {0}")]
    MalformedProof(String),
}

#[derive(Debug, Error)]
pub enum MnListError {
    #[error("verification failed: {0}")]
    Verification(#[from] VerificationError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("decode error: {0}")]
    Decode(#[from] TypesError),

    #[error("invalid protx info: {0}")]
    InvalidInfo(String),

    #[error("network error: {0}")]
    Network(String),
}
