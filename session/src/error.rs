use ps_types::PsState;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("mixing error: {0}")]
    Mixing(#[from] ps_wallet_core::MixingError),

    #[error("masternode list error: {0}")]
    MnList(#[from] ps_mnlist::MnListError),

    #[error("store error: {0}")]
    Store(#[from] ps_store::StoreError),

    #[error("config error: {0}")]
    Config(String),

    #[error("cannot {action} while {state}")]
    InvalidState { action: &'static str, state: PsState },

    #[error("masternode list is not ready")]
    MnListNotReady,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
