//! Snapshot and info files in the data directory.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::warn;

use ps_store::{read_compressed_json_or_default, write_compressed_json, StoreError};
use ps_types::ProTxHash;

use crate::snapshot::{MnListSnapshot, StoredSnapshot};

pub const RECENT_LIST_FILE: &str = "recent_protx_list.gz";
pub const PROTX_INFO_FILE: &str = "protx_info.gz";

#[derive(Clone, Debug)]
pub struct MnListStore {
    dir: PathBuf,
}

impl MnListStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn recent_list_path(&self) -> PathBuf {
        self.dir.join(RECENT_LIST_FILE)
    }

    fn info_path(&self) -> PathBuf {
        self.dir.join(PROTX_INFO_FILE)
    }

    /// Load the snapshot; any failure yields an empty list at height 1.
    pub fn load_snapshot(&self) -> MnListSnapshot {
        let path = self.recent_list_path();
        if !path.exists() {
            return MnListSnapshot::default();
        }
        let stored: StoredSnapshot = read_compressed_json_or_default(&path);
        match MnListSnapshot::from_stored(&stored) {
            Ok(snap) => snap,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "discarding unreadable masternode list");
                MnListSnapshot::default()
            }
        }
    }

    pub fn save_snapshot(&self, snapshot: &MnListSnapshot) -> Result<(), StoreError> {
        write_compressed_json(&self.recent_list_path(), &snapshot.to_stored())
    }

    pub fn load_info(&self) -> BTreeMap<ProTxHash, Value> {
        read_compressed_json_or_default(&self.info_path())
    }

    pub fn save_info(&self, info: &BTreeMap<ProTxHash, Value>) -> Result<(), StoreError> {
        write_compressed_json(&self.info_path(), info)
    }
}
