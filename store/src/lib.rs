//! Persistence for the PrivateSend mixing core.
//!
//! Two mechanisms: whole-file gzip JSON blobs (masternode list snapshots)
//! and the [`PsDataStore`] key/value contract the wallet provides for
//! mixing bookkeeping. The rest of the codebase depends only on these.

pub mod blob;
pub mod error;
pub mod ps_data;

pub use blob::{read_compressed_json, read_compressed_json_or_default, write_compressed_json};
pub use error::StoreError;
pub use ps_data::{FilePsDataStore, PsDataStore, PsDataStoreExt};
