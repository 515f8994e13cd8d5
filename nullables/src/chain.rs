//! Nullable header chain.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use ps_mnlist::{BlockHeader, ChainHeaders};
use ps_types::Hash256;

/// Headers held in memory with settable local and server tips.
#[derive(Default)]
pub struct NullChain {
    headers: Mutex<BTreeMap<u32, BlockHeader>>,
    local_height: AtomicU32,
    server_height: AtomicU32,
}

impl NullChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a header and move both tips up to it if they are lower.
    pub fn add_header(&self, height: u32, merkle_root: Hash256) {
        self.headers.lock().unwrap().insert(height, BlockHeader { height, merkle_root });
        self.local_height.fetch_max(height, Ordering::SeqCst);
        self.server_height.fetch_max(height, Ordering::SeqCst);
    }

    pub fn set_heights(&self, local: u32, server: u32) {
        self.local_height.store(local, Ordering::SeqCst);
        self.server_height.store(server, Ordering::SeqCst);
    }
}

impl ChainHeaders for NullChain {
    fn read_header(&self, height: u32) -> Option<BlockHeader> {
        self.headers.lock().unwrap().get(&height).copied()
    }

    fn local_height(&self) -> u32 {
        self.local_height.load(Ordering::SeqCst)
    }

    fn server_height(&self) -> u32 {
        self.server_height.load(Ordering::SeqCst)
    }
}
