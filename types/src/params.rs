//! Empirical constants of the mixing deployment.
//!
//! These are tuned against the live network rather than derived, so they are
//! kept together as configuration instead of being scattered as literals.

use serde::{Deserialize, Serialize};

/// Tunable mixing and masternode-list constants.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PsParams {
    /// A list is ready when it trails the server tip by at most this many blocks.
    pub list_ready_lag: u32,

    /// Quorum diffs are requested this many blocks behind the local tip.
    pub llmq_offset: u32,

    /// Maximum outputs of one denomination per new-denoms transaction.
    pub max_denoms_per_tier: u32,

    /// Height chunk used to split diff requests.
    pub chunk_size: u32,

    /// Maximum inputs contributed to a single denominate session.
    pub entry_max_size: u32,

    /// First retry delay after a failed broadcast.
    pub send_retry_secs: u64,

    /// Upper bound of the escalating retry delay.
    pub max_send_retry_secs: u64,

    /// Minimum spacing of ProTx info saves while info is still loading.
    pub info_save_throttle_secs: u64,
}

impl Default for PsParams {
    fn default() -> Self {
        Self {
            list_ready_lag: 24,
            llmq_offset: 8,
            max_denoms_per_tier: 11,
            chunk_size: 2016,
            entry_max_size: 9,
            send_retry_secs: 10,
            max_send_retry_secs: 300,
            info_save_throttle_secs: 10,
        }
    }
}
