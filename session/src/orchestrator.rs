//! Per-wallet mixing session.
//!
//! The session owns the workflow engine, the masternode list and the
//! keypair cache, and decides when each of them acts. All periodic work
//! happens in [`MixingSession::tick`], which [`MixingSession::run`] drives
//! from a tokio interval until shutdown.
//!
//! Lock order is state, engine, keypairs, keys. The masternode list lock is
//! never held together with the engine lock, and no lock is held across a
//! network call.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tracing::{debug, info, warn};

use ps_mnlist::{ChainHeaders, DiffClient, MnListDiffEngine, MnListEvent, MnListStore};
use ps_types::{Clock, KpState, KpType, PsState, PsTxType, TxId};
use ps_utils::{EventBus, StatsCounter, Subscription};
use ps_wallet_core::balance::{get_balance, mixing_progress};
use ps_wallet_core::{
    Balance, EngineDeps, KeySource, KeypairCacheManager, MixingError, UtxoQuery,
    WalletEvent, WorkflowEngine, WorkflowKind,
};

use crate::config::{MixingConfig, MAX_KEEP_AMOUNT, MAX_MIX_ROUNDS, MIN_KEEP_AMOUNT, MIN_MIX_ROUNDS};
use crate::keys::{KeyUnlocker, SessionKeys};
use crate::shutdown::ShutdownReason;
use crate::SessionError;

/// External collaborators of a session.
#[derive(Clone)]
pub struct SessionDeps {
    pub engine: EngineDeps,
    pub chain: Arc<dyn ChainHeaders>,
    pub diff_client: Arc<dyn DiffClient>,
    pub unlocker: Arc<dyn KeyUnlocker>,
    pub wallet_events: EventBus<WalletEvent>,
}

/// Notifications queued by the bus listeners and handled on the next tick.
#[derive(Debug)]
enum SessionEvent {
    Wallet(WalletEvent),
    MnList(MnListEvent),
}

/// What one tick did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub events: usize,
    pub diffs_applied: usize,
    pub broadcast: Vec<TxId>,
    pub created: Vec<WorkflowKind>,
}

pub struct MixingSession {
    config: RwLock<MixingConfig>,
    state: Mutex<PsState>,
    stop_reason: Mutex<Option<String>>,
    engine: Arc<Mutex<WorkflowEngine>>,
    mnlist: Arc<Mutex<MnListDiffEngine>>,
    keypairs: Mutex<KeypairCacheManager>,
    keys: Mutex<Option<Arc<dyn KeySource>>>,
    unlocker: Arc<dyn KeyUnlocker>,
    diff_client: Arc<dyn DiffClient>,
    clock: Arc<dyn Clock>,
    stats: Arc<StatsCounter>,
    wallet_events: EventBus<WalletEvent>,
    mn_events: EventBus<MnListEvent>,
    subscriptions: Mutex<Vec<Subscription>>,
    event_tx: mpsc::UnboundedSender<SessionEvent>,
    event_rx: Mutex<mpsc::UnboundedReceiver<SessionEvent>>,
}

impl MixingSession {
    /// Restore the engine and the masternode list from disk.
    pub fn new(config: MixingConfig, deps: SessionDeps) -> Result<Self, SessionError> {
        config.validate()?;
        let stats = Arc::new(StatsCounter::mixing());
        let clock = Arc::clone(&deps.engine.clock);
        let engine = WorkflowEngine::load(config.to_engine_config(), deps.engine)?
            .with_stats(Arc::clone(&stats));
        let mn_events = EventBus::new();
        let mnlist = MnListDiffEngine::new(
            config.to_mnlist_config(),
            MnListStore::new(&config.data_dir),
            deps.chain,
            mn_events.clone(),
        )
        .with_stats(Arc::clone(&stats));
        let keypairs = KeypairCacheManager::new(config.keypairs_idle_timeout_secs);
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        info!(network = ?config.network, mix_rounds = config.mix_rounds, "mixing session created");
        Ok(Self {
            config: RwLock::new(config),
            state: Mutex::new(PsState::Initializing),
            stop_reason: Mutex::new(None),
            engine: Arc::new(Mutex::new(engine)),
            mnlist: Arc::new(Mutex::new(mnlist)),
            keypairs: Mutex::new(keypairs),
            keys: Mutex::new(None),
            unlocker: deps.unlocker,
            diff_client: deps.diff_client,
            clock,
            stats,
            wallet_events: deps.wallet_events,
            mn_events,
            subscriptions: Mutex::new(Vec::new()),
            event_tx,
            event_rx: Mutex::new(event_rx),
        })
    }

    // ── Accessors ──────────────────────────────────────────────────────

    pub async fn state(&self) -> PsState {
        *self.state.lock().await
    }

    pub async fn config(&self) -> MixingConfig {
        self.config.read().await.clone()
    }

    /// Why mixing last stopped on its own, if it did.
    pub async fn stop_reason(&self) -> Option<String> {
        self.stop_reason.lock().await.clone()
    }

    pub fn engine(&self) -> &Arc<Mutex<WorkflowEngine>> {
        &self.engine
    }

    pub fn mnlist(&self) -> &Arc<Mutex<MnListDiffEngine>> {
        &self.mnlist
    }

    pub fn stats(&self) -> &Arc<StatsCounter> {
        &self.stats
    }

    pub async fn keypairs_state(&self) -> KpState {
        self.keypairs.lock().await.state()
    }

    pub async fn double_spend_warn(&self) -> Option<String> {
        self.engine.lock().await.double_spend_warn()
    }

    pub async fn mixing_progress(&self) -> u8 {
        mixing_progress(self.engine.lock().await.ledger())
    }

    /// Balance honouring the configured `allow_others` setting.
    pub async fn balance(&self, mut query: UtxoQuery) -> Balance {
        query.allow_others = self.config.read().await.allow_others;
        let engine = self.engine.lock().await;
        get_balance(engine.wallet().as_ref(), engine.ledger(), query)
    }

    /// Mixing is running but nothing is in flight.
    pub async fn is_waiting(&self) -> bool {
        if *self.state.lock().await != PsState::Mixing {
            return false;
        }
        !self.engine.lock().await.has_active_workflows()
    }

    /// Whether the masternode list is current enough to mix.
    pub async fn mn_list_ready(&self) -> bool {
        let use_p2p = self.config.read().await.use_p2p_diffs;
        let mnlist = self.mnlist.lock().await;
        if use_p2p {
            mnlist.llmq_ready()
        } else {
            mnlist.protx_ready()
        }
    }

    // ── Start / stop ───────────────────────────────────────────────────

    /// Unlock keys, fill the keypair cache and begin mixing.
    pub async fn start_mixing(&self, password: &str) -> Result<(), SessionError> {
        {
            let mut state = self.state.lock().await;
            if !state.can_start() {
                return Err(SessionError::InvalidState { action: "start mixing", state: *state });
            }
            if self.config.read().await.load_mns && !self.mn_list_ready().await {
                return Err(SessionError::MnListNotReady);
            }
            *state = PsState::StartMixing;
        }
        *self.stop_reason.lock().await = None;

        if let Err(e) = self.prepare_mixing(password).await {
            warn!(error = %e, "failed to start mixing");
            *self.keys.lock().await = None;
            *self.state.lock().await = PsState::Ready;
            return Err(e);
        }
        self.subscribe_events().await;
        *self.state.lock().await = PsState::Mixing;
        info!("mixing started");
        Ok(())
    }

    async fn prepare_mixing(&self, password: &str) -> Result<(), SessionError> {
        let keys = self.unlocker.unlock(password)?;
        let mut engine = self.engine.lock().await;
        let report = engine.find_untracked_ps_txs();
        if report.found > 0 {
            info!(found = report.found, "tracked PS transactions before mixing");
        }
        let plan = engine.keypair_plan()?;
        {
            let mut keypairs = self.keypairs.lock().await;
            keypairs.check_need_new_keypairs(&plan);
            keypairs.cache(keys.as_ref(), &plan)?;
        }
        engine.set_mixing(true);
        *self.keys.lock().await = Some(keys);
        Ok(())
    }

    fn queue(&self) -> mpsc::UnboundedSender<SessionEvent> {
        self.event_tx.clone()
    }

    async fn subscribe_events(&self) {
        let wallet_tx = self.queue();
        let wallet_sub = self.wallet_events.subscribe(move |e: &WalletEvent| {
            let _ = wallet_tx.send(SessionEvent::Wallet(e.clone()));
        });
        let mn_tx = self.queue();
        let mn_sub = self.mn_events.subscribe(move |e: &MnListEvent| {
            let _ = mn_tx.send(SessionEvent::MnList(e.clone()));
        });
        let mut subs = self.subscriptions.lock().await;
        subs.push(wallet_sub);
        subs.push(mn_sub);
    }

    pub async fn stop_mixing(&self) -> Result<(), SessionError> {
        self.stop_with(None).await
    }

    async fn stop_with(&self, reason: Option<String>) -> Result<(), SessionError> {
        let mut state = self.state.lock().await;
        if !state.is_mixing_running() {
            return Err(SessionError::InvalidState { action: "stop mixing", state: *state });
        }
        *state = PsState::StopMixing;
        self.subscriptions.lock().await.clear();

        {
            let mut engine = self.engine.lock().await;
            engine.cleanup_wfl(WorkflowKind::PayCollateral, true);
            let uuids: Vec<String> = engine.denominate_workflows().keys().cloned().collect();
            for uuid in uuids {
                engine.cleanup_denominate_wfl(&uuid, false);
            }
            engine.set_mixing(false);
            self.keypairs.lock().await.mark_unused(self.clock.now());
        }
        *self.keys.lock().await = None;

        match &reason {
            Some(r) => warn!(reason = %r, "mixing stopped"),
            None => info!("mixing stopped"),
        }
        *self.stop_reason.lock().await = reason;
        *state = PsState::Ready;
        Ok(())
    }

    // ── Settings ───────────────────────────────────────────────────────

    pub async fn set_mix_rounds(&self, mix_rounds: u32) -> Result<(), SessionError> {
        if !(MIN_MIX_ROUNDS..=MAX_MIX_ROUNDS).contains(&mix_rounds) {
            return Err(SessionError::Config(format!("mix_rounds out of range: {}", mix_rounds)));
        }
        self.config.write().await.mix_rounds = mix_rounds;
        self.engine.lock().await.set_mix_rounds(mix_rounds);
        self.on_params_changed().await;
        Ok(())
    }

    pub async fn set_keep_amount(&self, keep_amount: u64) -> Result<(), SessionError> {
        if !(MIN_KEEP_AMOUNT..=MAX_KEEP_AMOUNT).contains(&keep_amount) {
            return Err(SessionError::Config(format!("keep_amount out of range: {}", keep_amount)));
        }
        let target = {
            let mut config = self.config.write().await;
            config.keep_amount = keep_amount;
            config.plan_target()
        };
        self.engine.lock().await.set_target(target);
        self.on_params_changed().await;
        Ok(())
    }

    pub async fn set_group_origin_coins_by_addr(&self, on: bool) {
        self.config.write().await.group_origin_coins_by_addr = on;
        self.engine.lock().await.set_group_origin_coins_by_addr(on);
        self.on_params_changed().await;
    }

    /// Drop cached keypairs sized for the old target while mixing; the next
    /// tick caches them again for the new one.
    pub async fn on_params_changed(&self) {
        if self.state.lock().await.is_mixing_running() {
            self.keypairs.lock().await.cleanup_all();
            info!("mixing parameters changed, keypair cache cleared");
        }
    }

    // ── Maintenance ────────────────────────────────────────────────────

    /// Forget all PS data. Only allowed while idle.
    pub async fn clear_ps_data(&self) -> Result<(), SessionError> {
        let mut state = self.state.lock().await;
        if *state != PsState::Ready {
            return Err(SessionError::InvalidState { action: "clear PS data", state: *state });
        }
        *state = PsState::Cleaning;
        self.engine.lock().await.clear_ps_data();
        self.keypairs.lock().await.cleanup_all();
        *state = PsState::Ready;
        info!("PS data cleared");
        Ok(())
    }

    /// Drop the masternode list and load it again from height 1.
    pub async fn reset_mnlist(&self) {
        self.mnlist.lock().await.reset();
    }

    // ── Periodic work ──────────────────────────────────────────────────

    pub async fn tick(&self) -> TickReport {
        let mut report = TickReport { events: self.drain_events().await, ..Default::default() };
        report.diffs_applied = self.step_mnlist().await;

        let state = *self.state.lock().await;
        match state {
            PsState::Initializing => self.find_untracked_on_init().await,
            PsState::Mixing => self.step_mixing(&mut report).await,
            _ => {
                if self.keypairs.lock().await.clean_on_timeout(self.clock.now()) {
                    debug!("idle keypairs dropped");
                }
            }
        }
        report
    }

    /// Tick until a shutdown signal arrives, then stop mixing.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<ShutdownReason>) {
        let period = Duration::from_millis(self.config.read().await.tick_interval_ms.max(1));
        let mut interval = tokio::time::interval(period);
        loop {
            tokio::select! {
                biased;
                res = shutdown.recv() => {
                    match res {
                        Ok(reason) => info!(%reason, "mixing session shutting down"),
                        Err(e) => info!(error = %e, "shutdown channel gone, stopping session"),
                    }
                    break;
                }
                _ = interval.tick() => {
                    self.tick().await;
                }
            }
        }
        if self.state.lock().await.is_mixing_running() {
            if let Err(e) = self.stop_mixing().await {
                warn!(error = %e, "failed to stop mixing on shutdown");
            }
        }
    }

    async fn drain_events(&self) -> usize {
        let mut events = Vec::new();
        {
            let mut rx = self.event_rx.lock().await;
            while let Ok(event) = rx.try_recv() {
                events.push(event);
            }
        }
        for event in &events {
            match event {
                SessionEvent::Wallet(e) => self.on_wallet_event(e).await,
                SessionEvent::MnList(MnListEvent::DiffUpdated { state, deleted, added }) => {
                    debug!(?state, deleted = deleted.len(), added = added.len(), "masternode list updated");
                }
                SessionEvent::MnList(MnListEvent::InfoUpdated { pro_tx_hash }) => {
                    debug!(%pro_tx_hash, "protx info updated");
                }
                SessionEvent::MnList(MnListEvent::NetworkError { kind, error }) => {
                    debug!(%kind, %error, "masternode list request failed");
                }
            }
        }
        events.len()
    }

    async fn on_wallet_event(&self, event: &WalletEvent) {
        let mut engine = self.engine.lock().await;
        let txid = match event {
            WalletEvent::TxRemoved(txid) => {
                engine.on_wallet_tx_removed(txid);
                return;
            }
            WalletEvent::TxAdded(txid) | WalletEvent::TxVerified { txid, .. } => *txid,
        };
        let Some(tx_type) = engine.on_wallet_tx(&txid) else { return };
        if !matches!(tx_type, PsTxType::NewDenoms | PsTxType::NewCollateral | PsTxType::Denominate)
        {
            return;
        }
        let Some(tx) = engine.wallet().get_transaction(&txid) else { return };
        let mut keypairs = self.keypairs.lock().await;
        for (outpoint, out) in tx.outpoints() {
            if engine.ledger().rounds_of(&outpoint).is_some() {
                keypairs.move_to(&out.address, KpType::PsSpendable);
            }
        }
    }

    /// Request the next due diff and, once the list is ready, missing
    /// ProTx info. Locks are released across network calls.
    async fn step_mnlist(&self) -> usize {
        let request = {
            let mut mnlist = self.mnlist.lock().await;
            mnlist.request_due().and_then(|kind| mnlist.next_request(kind))
        };
        let mut applied = 0;
        if let Some(request) = request {
            let response = self.diff_client.request_diff(request).await;
            let mut mnlist = self.mnlist.lock().await;
            match response {
                Ok(diff) => {
                    match mnlist.apply_diff(request.kind, request.base_height, request.height, &diff) {
                        Ok(true) => applied += 1,
                        Ok(false) => {}
                        Err(e) => debug!(error = %e, "diff will be requested again"),
                    }
                }
                Err(e) => mnlist.on_request_failed(request, &e),
            }
        }

        let missing = {
            let mnlist = self.mnlist.lock().await;
            if mnlist.config().load_mns && mnlist.protx_ready() {
                mnlist.hashes_missing_info().into_iter().next()
            } else {
                None
            }
        };
        if let Some(hash) = missing {
            match self.diff_client.request_protx_info(hash).await {
                Ok(info) => {
                    let now = self.clock.now();
                    if let Err(e) = self.mnlist.lock().await.on_protx_info(info, now) {
                        debug!(%hash, error = %e, "protx info rejected");
                    }
                }
                Err(e) => debug!(%hash, error = %e, "protx info request failed"),
            }
        }
        applied
    }

    async fn find_untracked_on_init(&self) {
        {
            let mut state = self.state.lock().await;
            if *state != PsState::Initializing {
                return;
            }
            *state = PsState::FindingUntracked;
        }
        let report = self.engine.lock().await.find_untracked_ps_txs();
        info!(found = report.found, "initial scan for PS transactions done");
        *self.state.lock().await = PsState::Ready;
    }

    /// One mixing step. The engine lock is released while transactions are
    /// out for broadcast; their slots stay guarded by the engine meanwhile.
    async fn step_mixing(&self, report: &mut TickReport) {
        let (pending, broadcaster) = {
            let mut engine = self.engine.lock().await;
            let stale = engine.cleanup_stale_denominate_wfls();
            if stale > 0 {
                debug!(stale, "dropped stale denominate workflows");
            }

            if let Err(e) = self.ensure_keypairs(&engine).await {
                drop(engine);
                if let Err(e) = self.stop_with(Some(e.to_string())).await {
                    warn!(error = %e, "failed to stop mixing");
                }
                return;
            }
            (engine.begin_broadcasts(), Arc::clone(engine.broadcaster()))
        };

        let mut results = Vec::with_capacity(pending.len());
        for p in pending {
            let result = broadcaster.broadcast(&p.tx, p.timeout).await;
            results.push((p, result));
        }

        let mut engine = self.engine.lock().await;
        for (p, result) in results {
            if let Some(txid) = engine.finish_broadcast(p, result) {
                report.broadcast.push(txid);
            }
        }

        let keypairs = self.keypairs.lock().await;
        let unlocked = self.keys.lock().await.clone();
        let keys = SessionKeys { cache: &keypairs, unlocked: unlocked.as_deref() };

        let ledger = engine.ledger();
        let want_collateral = ledger.collaterals().is_empty()
            && !ledger.denoms().is_empty()
            && engine.workflow(WorkflowKind::NewDenoms).is_none()
            && engine.workflow(WorkflowKind::NewCollateral).is_none();
        if want_collateral {
            let created = engine.create_new_collateral_wfl(&keys).map(|w| w.is_some());
            record(&mut report.created, WorkflowKind::NewCollateral, created);
        }
        if engine.workflow(WorkflowKind::NewDenoms).is_none() {
            let created = engine.create_new_denoms_wfl(&keys).map(|w| w.is_some());
            record(&mut report.created, WorkflowKind::NewDenoms, created);
        }
        let want_pay = engine.workflow(WorkflowKind::PayCollateral).is_none()
            && engine.ledger().free_collateral().is_some()
            && engine.ledger().to_mix_len() > 0;
        if want_pay {
            let created = engine.prepare_pay_collateral_wfl(&keys).map(|w| w.is_some());
            record(&mut report.created, WorkflowKind::PayCollateral, created);
        }
        drop(keys);
        drop(keypairs);

        let live = engine.spendable_addresses();
        self.keypairs.lock().await.cleanup_unused_spendable(&live);
    }

    /// Re-fill the cache when the plan needs keys it does not hold.
    async fn ensure_keypairs(&self, engine: &WorkflowEngine) -> Result<(), MixingError> {
        let plan = engine.keypair_plan()?;
        let mut keypairs = self.keypairs.lock().await;
        let (need, _) = keypairs.check_need_new_keypairs(&plan);
        if !need {
            return Ok(());
        }
        let keys = self.keys.lock().await.clone();
        let Some(keys) = keys else {
            return Err(MixingError::NotEnoughKeypairs("keys are locked".into()));
        };
        keypairs.cache(keys.as_ref(), &plan)?;
        Ok(())
    }
}

fn record(created: &mut Vec<WorkflowKind>, kind: WorkflowKind, result: Result<bool, MixingError>) {
    match result {
        Ok(true) => created.push(kind),
        Ok(false) => {}
        Err(MixingError::InsufficientFunds { needed, available }) => {
            debug!(%kind, needed, available, "not enough funds for workflow");
        }
        Err(e) => warn!(%kind, error = %e, "workflow creation failed"),
    }
}
