//! PrivateSend mixing session for one wallet.
//!
//! - [`MixingSession`] gates the workflow engine and the masternode list
//!   on the session state and drives them from a periodic tick
//! - [`MixingConfig`] is the TOML configuration
//! - Structured logging and graceful shutdown for hosts running the loop

pub mod config;
pub mod error;
pub mod keys;
pub mod logging;
pub mod orchestrator;
pub mod shutdown;

pub use config::MixingConfig;
pub use error::SessionError;
pub use keys::{KeyUnlocker, KeystoreUnlocker};
pub use logging::{init_logging, LogFormat};
pub use orchestrator::{MixingSession, SessionDeps, TickReport};
pub use shutdown::{ShutdownController, ShutdownReason};
