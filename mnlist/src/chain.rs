//! Collaborators the diff engine reads from but does not own.

use async_trait::async_trait;
use ps_types::{Hash256, ProTxHash};

use crate::diff::{DiffRequest, MnListDiff};

/// The part of a block header the engine needs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockHeader {
    pub height: u32,
    pub merkle_root: Hash256,
}

/// Read access to the wallet's header chain.
pub trait ChainHeaders: Send + Sync {
    fn read_header(&self, height: u32) -> Option<BlockHeader>;

    /// Height of the local header chain.
    fn local_height(&self) -> u32;

    /// Height reported by the connected server.
    fn server_height(&self) -> u32;
}

/// Request/response transport for diffs and ProTx info.
#[async_trait]
pub trait DiffClient: Send + Sync {
    async fn request_diff(&self, request: DiffRequest) -> Result<MnListDiff, String>;

    async fn request_protx_info(&self, pro_tx_hash: ProTxHash) -> Result<serde_json::Value, String>;
}
