//! Nullable infrastructure for deterministic testing.
//!
//! Every collaborator the mixing core talks to (wallet, header chain,
//! diff transport, broadcaster, clock, storage) has a stand-in here that:
//! - Returns deterministic values
//! - Can be steered programmatically (queued responses, injected failures)
//! - Never touches the filesystem or network
//!
//! Usage: swap real implementations for nullables in tests.

pub mod chain;
pub mod clock;
pub mod network;
pub mod store;
pub mod wallet;

pub use chain::NullChain;
pub use clock::NullClock;
pub use network::{NullBroadcaster, NullDiffClient};
pub use store::MemoryPsDataStore;
pub use wallet::{NullKeys, NullTxBuilder, NullTxSigner, NullWallet};
