//! Nullable network: record broadcasts and serve queued diff responses.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use ps_mnlist::{DiffClient, DiffRequest, MnListDiff};
use ps_types::{ProTxHash, Transaction};
use ps_wallet_core::Broadcaster;

/// A broadcaster that records transactions instead of relaying them.
#[derive(Default)]
pub struct NullBroadcaster {
    sent: Mutex<Vec<Transaction>>,
    fail_next: AtomicU32,
}

impl NullBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject the next `n` broadcasts.
    pub fn fail_next(&self, n: u32) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Get all accepted transactions (for assertions).
    pub fn sent(&self) -> Vec<Transaction> {
        self.sent.lock().unwrap().clone()
    }

    pub fn reset(&self) {
        self.sent.lock().unwrap().clear();
        self.fail_next.store(0, Ordering::SeqCst);
    }
}

#[async_trait]
impl Broadcaster for NullBroadcaster {
    async fn broadcast(&self, tx: &Transaction, _timeout: Duration) -> Result<(), String> {
        let failing = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(format!("transaction {} rejected", tx.txid));
        }
        self.sent.lock().unwrap().push(tx.clone());
        Ok(())
    }
}

/// A diff transport answering from a queue.
#[derive(Default)]
pub struct NullDiffClient {
    responses: Mutex<VecDeque<Result<MnListDiff, String>>>,
    requests: Mutex<Vec<DiffRequest>>,
    protx_info: Mutex<HashMap<ProTxHash, serde_json::Value>>,
}

impl NullDiffClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue the response to the next diff request.
    pub fn enqueue(&self, response: Result<MnListDiff, String>) {
        self.responses.lock().unwrap().push_back(response);
    }

    pub fn set_protx_info(&self, pro_tx_hash: ProTxHash, info: serde_json::Value) {
        self.protx_info.lock().unwrap().insert(pro_tx_hash, info);
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<DiffRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl DiffClient for NullDiffClient {
    async fn request_diff(&self, request: DiffRequest) -> Result<MnListDiff, String> {
        self.requests.lock().unwrap().push(request);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err("no response queued".into()))
    }

    async fn request_protx_info(&self, pro_tx_hash: ProTxHash) -> Result<serde_json::Value, String> {
        self.protx_info
            .lock()
            .unwrap()
            .get(&pro_tx_hash)
            .cloned()
            .ok_or_else(|| format!("unknown protx {}", pro_tx_hash))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ps_mnlist::DiffKind;
    use ps_types::Hash256;

    #[tokio::test]
    async fn broadcaster_failure_injection() {
        let b = NullBroadcaster::new();
        let tx = Transaction { txid: Hash256::new([1; 32]), inputs: vec![], outputs: vec![], raw: vec![] };
        b.fail_next(1);
        assert!(b.broadcast(&tx, Duration::from_secs(1)).await.is_err());
        assert!(b.broadcast(&tx, Duration::from_secs(1)).await.is_ok());
        assert_eq!(b.sent().len(), 1);
    }

    #[tokio::test]
    async fn diff_client_records_requests() {
        let c = NullDiffClient::new();
        let req = DiffRequest { kind: DiffKind::ProTx, base_height: 1, height: 10 };
        assert!(c.request_diff(req).await.is_err());
        assert_eq!(c.requests(), vec![req]);
        let h = Hash256::new([3; 32]);
        c.set_protx_info(h, serde_json::json!({"service": "1.2.3.4:9999"}));
        assert!(c.request_protx_info(h).await.is_ok());
        assert!(c.request_protx_info(Hash256::new([4; 32])).await.is_err());
    }
}
