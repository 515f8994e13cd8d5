use ps_types::{Dip3State, ProTxHash};

use crate::diff::DiffKind;

/// Notifications published by the masternode list engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MnListEvent {
    /// A verified diff was committed, or the list was reset.
    DiffUpdated {
        state: Dip3State,
        deleted: Vec<ProTxHash>,
        added: Vec<ProTxHash>,
    },
    InfoUpdated { pro_tx_hash: ProTxHash },
    NetworkError { kind: DiffKind, error: String },
}
