use std::sync::Arc;

use ps_mnlist::DiffKind;
use ps_nullables::{
    MemoryPsDataStore, NullBroadcaster, NullChain, NullClock, NullDiffClient, NullKeys,
    NullTxBuilder, NullTxSigner, NullWallet,
};
use ps_session::{
    KeyUnlocker, MixingConfig, MixingSession, SessionDeps, SessionError, ShutdownController,
};
use ps_types::{KpState, PsState, TxHeight, COIN};
use ps_utils::EventBus;
use ps_wallet_core::{
    EngineDeps, KeySource, MixingError, UtxoQuery, WalletBackend, WalletEvent, WorkflowKind,
};

const PASSWORD: &str = "secret";

struct TestUnlocker;

impl KeyUnlocker for TestUnlocker {
    fn unlock(&self, password: &str) -> Result<Arc<dyn KeySource>, MixingError> {
        if password == PASSWORD {
            Ok(Arc::new(NullKeys))
        } else {
            Err(MixingError::Keystore("wrong password".into()))
        }
    }
}

struct Harness {
    _dir: tempfile::TempDir,
    wallet: Arc<NullWallet>,
    broadcaster: Arc<NullBroadcaster>,
    chain: Arc<NullChain>,
    diffs: Arc<NullDiffClient>,
    clock: Arc<NullClock>,
    events: EventBus<WalletEvent>,
    session: MixingSession,
}

fn harness_with(load_mns: bool) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let wallet = Arc::new(NullWallet::new());
    let broadcaster = Arc::new(NullBroadcaster::new());
    let chain = Arc::new(NullChain::new());
    let diffs = Arc::new(NullDiffClient::new());
    let clock = Arc::new(NullClock::new(1_000_000));
    let events = EventBus::new();
    let config = MixingConfig {
        network: ps_types::NetworkId::Regtest,
        data_dir: dir.path().to_path_buf(),
        load_mns,
        ..Default::default()
    };
    let deps = SessionDeps {
        engine: EngineDeps {
            wallet: wallet.clone(),
            builder: Arc::new(NullTxBuilder),
            signer: Arc::new(NullTxSigner),
            broadcaster: broadcaster.clone(),
            store: Arc::new(MemoryPsDataStore::new()),
            clock: clock.clone(),
        },
        chain: chain.clone(),
        diff_client: diffs.clone(),
        unlocker: Arc::new(TestUnlocker),
        wallet_events: events.clone(),
    };
    let session = MixingSession::new(config, deps).unwrap();
    Harness { _dir: dir, wallet, broadcaster, chain, diffs, clock, events, session }
}

async fn ready(value: u64) -> Harness {
    let h = harness_with(false);
    h.wallet.fund(value, TxHeight::Mined(100));
    h.session.tick().await;
    assert_eq!(h.session.state().await, PsState::Ready);
    h
}

async fn mixing(value: u64) -> Harness {
    let h = ready(value).await;
    h.session.start_mixing(PASSWORD).await.unwrap();
    h
}

#[tokio::test]
async fn first_tick_scans_history_then_ready() {
    let h = harness_with(false);
    assert_eq!(h.session.state().await, PsState::Initializing);
    let err = h.session.start_mixing(PASSWORD).await.unwrap_err();
    assert!(matches!(err, SessionError::InvalidState { state: PsState::Initializing, .. }));

    h.session.tick().await;
    assert_eq!(h.session.state().await, PsState::Ready);
}

#[tokio::test]
async fn wrong_password_leaves_session_ready() {
    let h = ready(COIN).await;
    let err = h.session.start_mixing("guess").await.unwrap_err();
    assert!(matches!(err, SessionError::Mixing(MixingError::Keystore(_))));
    assert_eq!(h.session.state().await, PsState::Ready);
    assert!(h.session.double_spend_warn().await.is_none());
}

#[tokio::test]
async fn start_caches_keypairs_and_warns() {
    let h = mixing(3 * COIN).await;
    assert_eq!(h.session.state().await, PsState::Mixing);
    assert_eq!(h.session.keypairs_state().await, KpState::Ready);
    assert!(h.session.double_spend_warn().await.is_some());
    assert!(h.session.is_waiting().await);
}

#[tokio::test]
async fn ticks_create_then_broadcast_denoms() {
    let h = mixing(3 * COIN).await;

    let first = h.session.tick().await;
    assert_eq!(first.created, vec![WorkflowKind::NewDenoms]);
    assert!(first.broadcast.is_empty());
    assert!(!h.session.is_waiting().await);

    let second = h.session.tick().await;
    assert_eq!(second.broadcast.len(), 1);
    assert_eq!(h.broadcaster.sent().len(), 1);
    assert_eq!(h.broadcaster.sent()[0].txid, second.broadcast[0]);
}

#[tokio::test]
async fn wallet_events_settle_workflow() {
    let h = mixing(3 * COIN).await;
    h.session.tick().await;
    let txids = {
        let engine = h.session.engine().lock().await;
        engine.workflow(WorkflowKind::NewDenoms).unwrap().tx_order.clone()
    };
    for txid in &txids {
        h.wallet.set_height(txid, TxHeight::Mined(101));
        h.events.emit(&WalletEvent::TxVerified { txid: *txid, height: 101 });
    }

    let report = h.session.tick().await;
    assert_eq!(report.events, txids.len());
    let engine = h.session.engine().lock().await;
    assert!(engine.workflow(WorkflowKind::NewDenoms).is_none());
    assert!(!engine.ledger().denoms().is_empty());
    assert_eq!(engine.ledger().collaterals().len(), 1);
    drop(engine);
    assert_eq!(h.session.mixing_progress().await, 0);

    let ps = h.session.balance(UtxoQuery::all()).await;
    assert!(ps.confirmed >= 2 * COIN - 1_000_010);
}

#[tokio::test]
async fn stop_mixing_unsubscribes_and_starts_cooldown() {
    let h = mixing(3 * COIN).await;
    h.session.tick().await;
    h.session.stop_mixing().await.unwrap();

    assert_eq!(h.session.state().await, PsState::Ready);
    assert_eq!(h.session.keypairs_state().await, KpState::Unused);
    assert!(h.session.stop_reason().await.is_none());
    assert!(h.session.double_spend_warn().await.is_some());

    let txid = h.wallet.history()[0].0;
    h.events.emit(&WalletEvent::TxAdded(txid));
    assert_eq!(h.session.tick().await.events, 0);

    h.clock.advance(120);
    assert!(h.session.double_spend_warn().await.is_none());

    h.clock.advance(600);
    h.session.tick().await;
    assert_eq!(h.session.keypairs_state().await, KpState::Empty);
}

#[tokio::test]
async fn stop_requires_running_session() {
    let h = ready(COIN).await;
    let err = h.session.stop_mixing().await.unwrap_err();
    assert!(matches!(err, SessionError::InvalidState { state: PsState::Ready, .. }));
}

#[tokio::test]
async fn param_change_recaches_keypairs() {
    let h = mixing(3 * COIN).await;
    h.session.set_keep_amount(5).await.unwrap();
    assert_eq!(h.session.keypairs_state().await, KpState::Empty);
    assert_eq!(h.session.config().await.keep_amount, 5);

    h.session.tick().await;
    assert_eq!(h.session.keypairs_state().await, KpState::Ready);
    assert_eq!(h.session.state().await, PsState::Mixing);

    assert!(matches!(h.session.set_mix_rounds(1).await, Err(SessionError::Config(_))));
    h.session.set_mix_rounds(6).await.unwrap();
    assert_eq!(h.session.engine().lock().await.ledger().mix_rounds(), 6);
}

#[tokio::test]
async fn clear_ps_data_only_when_idle() {
    let h = mixing(3 * COIN).await;
    h.session.tick().await;
    assert!(matches!(
        h.session.clear_ps_data().await,
        Err(SessionError::InvalidState { action: "clear PS data", .. })
    ));
    h.session.stop_mixing().await.unwrap();
    h.session.clear_ps_data().await.unwrap();
    assert_eq!(h.session.state().await, PsState::Ready);
    assert_eq!(h.session.keypairs_state().await, KpState::Empty);
    assert!(h.session.engine().lock().await.ledger().denoms().is_empty());
}

#[tokio::test]
async fn unready_mn_list_blocks_mixing() {
    let h = harness_with(true);
    h.chain.set_heights(500, 500);
    h.session.tick().await;
    assert_eq!(h.session.state().await, PsState::Ready);

    let requests = h.diffs.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].kind, DiffKind::ProTx);
    assert!(!h.session.mn_list_ready().await);

    let err = h.session.start_mixing(PASSWORD).await.unwrap_err();
    assert!(matches!(err, SessionError::MnListNotReady));
}

#[tokio::test]
async fn failed_diff_request_is_retried() {
    let h = harness_with(true);
    h.chain.set_heights(500, 500);
    h.session.tick().await;
    h.session.tick().await;
    let requests = h.diffs.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0], requests[1]);
}

#[tokio::test]
async fn run_stops_mixing_on_shutdown() {
    let h = mixing(COIN).await;
    let controller = ShutdownController::new();
    let rx = controller.subscribe();
    controller.shutdown();
    h.session.run(rx).await;
    assert_eq!(h.session.state().await, PsState::Ready);
    assert!(!h.session.engine().lock().await.is_mixing());
}
