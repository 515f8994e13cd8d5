//! Deterministic masternode list and quorum set.
//!
//! The list is rebuilt incrementally from diffs fetched from the server
//! (`protx.diff`) or from peers (`mnlistdiff`). Every diff is checked
//! against the merkle roots in the block's coinbase before it replaces the
//! current list.

pub mod chain;
pub mod diff;
pub mod engine;
pub mod entry;
pub mod error;
pub mod event;
pub mod info;
pub mod snapshot;
pub mod store;
pub mod verify;

pub use chain::{BlockHeader, ChainHeaders, DiffClient};
pub use diff::{
    calc_max_height, CbTxPayload, CoinbaseTx, CommitmentProof, DiffKind, DiffRequest, MnListDiff,
};
pub use engine::{MnListConfig, MnListDiffEngine};
pub use entry::{BitSet, MasternodeEntry, QuorumCommitment, QuorumKey};
pub use error::{MnListError, VerificationError};
pub use event::MnListEvent;
pub use info::ProTxInfoCache;
pub use snapshot::{MnListSnapshot, StoredSnapshot};
pub use store::MnListStore;
pub use verify::{check_cbtx_merkle_root, check_llmq_merkle_root, check_sml_merkle_root};
