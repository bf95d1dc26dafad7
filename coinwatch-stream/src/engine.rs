//! Engine orchestration.
//!
//! Owns the pieces the rest of the crate plugs into: the shared state handle,
//! the synchronous per-tick pipeline, the persistence worker consuming the
//! bounded job queue, and the driving run loop that cycles
//! bootstrap -> session -> backoff -> (re-bootstrap).

use crate::{
    alert::AlertEngine,
    config::EngineConfig,
    connection::{self, Backoff, ConnectionState, SessionEnd},
    error::BootstrapError,
    persist::{HighOfDayAlertRow, PersistenceGateway, PriceHistoryRow, TopGainerRow},
    protocol::TickUpdate,
    store::{Analytics, ApiLimits, Coverage, MarketDataStore, MarketSnapshot},
    subscription::{ActiveSubscriptions, SubscriptionScheduler},
    universe::{self, Universe},
};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// State shared between the session loop, the subscription scheduler, and the
/// caller-facing handle.
pub struct Shared {
    pub store: RwLock<MarketDataStore>,
    pub subs: ActiveSubscriptions,
    pub(crate) alerts: AlertEngine,
    status: RwLock<ConnectionState>,
    last_message: Mutex<DateTime<Utc>>,
    universe_size: AtomicUsize,
    last_error: Mutex<Option<String>>,
}

impl Shared {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            store: RwLock::new(MarketDataStore::new(
                config.quote.clone(),
                config.price_history_len,
                config.volume_history_len,
            )),
            subs: ActiveSubscriptions::default(),
            alerts: AlertEngine::new(config),
            status: RwLock::new(ConnectionState::Disconnected),
            last_message: Mutex::new(Utc::now()),
            universe_size: AtomicUsize::new(0),
            last_error: Mutex::new(None),
        }
    }

    pub fn status(&self) -> ConnectionState {
        *self.status.read()
    }

    pub(crate) fn set_status(&self, status: ConnectionState) {
        *self.status.write() = status;
    }

    pub fn last_message(&self) -> DateTime<Utc> {
        *self.last_message.lock()
    }

    pub(crate) fn touch_last_message(&self, at: DateTime<Utc>) {
        *self.last_message.lock() = at;
    }

    pub fn universe_size(&self) -> usize {
        self.universe_size.load(Ordering::Relaxed)
    }

    fn set_universe_size(&self, size: usize) {
        self.universe_size.store(size, Ordering::Relaxed);
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    fn set_last_error(&self, error: String) {
        *self.last_error.lock() = Some(error);
    }
}

/// Work handed from the ingestion path to the persistence worker. Ingestion
/// never awaits storage; it enqueues and moves on.
#[derive(Debug, Clone)]
pub enum PersistJob {
    /// Record a price sample and evaluate the running-up window against the
    /// persisted history.
    Tick {
        symbol: String,
        price: f64,
        volume_24h: f64,
        time: DateTime<Utc>,
    },
    /// Insert a high-of-day alert (after the dedup read).
    HighOfDay(HighOfDayAlertRow),
    /// Upsert the top-gainer summary row.
    TopGainer(TopGainerRow),
}

fn enqueue(persist_tx: &mpsc::Sender<PersistJob>, job: PersistJob) {
    match persist_tx.try_send(job) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(job)) => {
            warn!(?job, "persistence queue full, dropping job");
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            debug!("persistence worker gone, dropping job");
        }
    }
}

/// Per-tick pipeline: merge into the store, run the in-memory detectors, and
/// enqueue persistence work. Synchronous so the read loop never yields
/// mid-tick; storage happens on the worker.
pub(crate) fn process_tick(
    shared: &Shared,
    persist_tx: &mpsc::Sender<PersistJob>,
    tick: &TickUpdate,
    now: DateTime<Utc>,
) {
    let (snapshot, high_of_day, top_gainer) = {
        let mut store = shared.store.write();
        let snapshot = store.apply_tick(tick, now);
        let high_of_day = shared.alerts.check_high_of_day(
            &mut store,
            &tick.symbol,
            snapshot.price,
            snapshot.volume_24h,
            now,
        );
        let top_gainer = shared.alerts.check_top_gainer(&store, &tick.symbol, now);
        (snapshot, high_of_day, top_gainer)
    };

    enqueue(
        persist_tx,
        PersistJob::Tick {
            symbol: tick.symbol.clone(),
            price: snapshot.price,
            volume_24h: snapshot.volume_24h,
            time: now,
        },
    );
    if let Some(row) = high_of_day {
        enqueue(persist_tx, PersistJob::HighOfDay(row));
    }
    if let Some(row) = top_gainer {
        enqueue(persist_tx, PersistJob::TopGainer(row));
    }
}

/// Consume the persistence queue until every sender is gone. Gateway failures
/// are logged and swallowed; a failed dedup read skips the insert rather than
/// inserting blindly.
async fn persist_worker(
    config: EngineConfig,
    gateway: Arc<dyn PersistenceGateway>,
    alerts: AlertEngine,
    mut persist_rx: mpsc::Receiver<PersistJob>,
) {
    let window = chrono::Duration::from_std(config.running_up_window)
        .unwrap_or_else(|_| chrono::Duration::minutes(10));

    while let Some(job) = persist_rx.recv().await {
        match job {
            PersistJob::Tick {
                symbol,
                price,
                volume_24h,
                time,
            } => {
                let coin_id = symbol.to_lowercase();
                let row = PriceHistoryRow {
                    coin_id: coin_id.clone(),
                    price,
                    volume_24h,
                    timestamp: time,
                };
                if let Err(error) = gateway.insert_price_history(&row).await {
                    warn!(%error, symbol, "failed to store price sample");
                }

                match gateway.query_price_before(&coin_id, time - window).await {
                    // Cold start: the sample above becomes the future reference.
                    Ok(None) => {}
                    Ok(Some(initial)) => {
                        if let Some(alert) =
                            alerts.evaluate_running_up(&symbol, price, volume_24h, &initial, time)
                        {
                            if let Err(error) = gateway.insert_running_up(&alert).await {
                                warn!(%error, symbol, "failed to store running-up alert");
                            }
                        }
                    }
                    Err(error) => {
                        warn!(%error, symbol, "running-up reference lookup failed");
                    }
                }
            }
            PersistJob::HighOfDay(row) => {
                match gateway
                    .high_of_day_exists(&row.coin_id, row.previous_high)
                    .await
                {
                    Ok(false) => {
                        if let Err(error) = gateway.insert_high_of_day(&row).await {
                            warn!(%error, coin_id = %row.coin_id, "failed to store high-of-day alert");
                        }
                    }
                    Ok(true) => {
                        debug!(coin_id = %row.coin_id, "high-of-day alert already recorded");
                    }
                    Err(error) => {
                        warn!(%error, coin_id = %row.coin_id, "high-of-day dedup read failed, skipping insert");
                    }
                }
            }
            PersistJob::TopGainer(row) => {
                if let Err(error) = gateway.upsert_top_gainer(&row).await {
                    warn!(%error, coin_id = %row.coin_id, "failed to upsert top gainer");
                }
            }
        }
    }
    debug!("persistence queue closed, worker exiting");
}

/// Sleep that aborts early on a stop signal. Returns true when stopping.
async fn wait_or_stop(delay: std::time::Duration, stop_rx: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => false,
        _ = stop_rx.changed() => true,
    }
}

fn seed_store(shared: &Shared, universe: &Universe) {
    let now = Utc::now();
    let mut store = shared.store.write();
    for seed in &universe.seeds {
        store.seed_pair(seed, now);
    }
    info!(pairs = store.len(), "store seeded from universe");
}

/// The driving loop. One iteration of the outer loop is a bootstrap cycle;
/// the inner loop runs sessions with backoff until the reconnect budget is
/// spent, then falls back to a fresh bootstrap.
async fn run(
    config: EngineConfig,
    shared: Arc<Shared>,
    scheduler: Arc<SubscriptionScheduler>,
    persist_tx: mpsc::Sender<PersistJob>,
    mut stop_rx: watch::Receiver<bool>,
    mut universe: Universe,
) {
    'bootstrap: loop {
        shared.set_universe_size(universe.symbols.len());
        seed_store(&shared, &universe);

        let mut backoff = Backoff::new(&config);
        let mut attempts: u32 = 0;

        loop {
            // Re-partition from the full intended universe before every
            // session, so a partially subscribed previous session never
            // shrinks coverage.
            scheduler.prepare_batches(
                &universe.symbols,
                &config.quote,
                config.effective_batch_size(),
            );

            match connection::run_session(&config, &shared, &scheduler, &persist_tx, &mut stop_rx)
                .await
            {
                Ok(SessionEnd::Stopped) => break 'bootstrap,
                Ok(SessionEnd::Reconnect) => {
                    // The connect itself succeeded, so the budget resets.
                    backoff.reset();
                    attempts = 0;
                    shared.set_status(ConnectionState::Reconnecting);
                    let delay = backoff.next();
                    info!(?delay, "link lost, reconnecting");
                    if wait_or_stop(delay, &mut stop_rx).await {
                        break 'bootstrap;
                    }
                }
                Err(error) if !error.is_retryable() => {
                    shared.set_last_error(error.to_string());
                    shared.set_status(ConnectionState::Disconnected);
                    error!(%error, "terminal stream error, engine halted");
                    break 'bootstrap;
                }
                Err(error) => {
                    attempts += 1;
                    shared.set_last_error(error.to_string());
                    if attempts >= config.max_reconnect_attempts {
                        warn!(attempts, "reconnect budget exhausted, re-bootstrapping");
                        shared.set_status(ConnectionState::Disconnected);
                        if wait_or_stop(config.rebootstrap_pause, &mut stop_rx).await {
                            break 'bootstrap;
                        }
                        match universe::fetch_universe(&config).await {
                            Ok(fresh) => {
                                shared.store.write().clear();
                                universe = fresh;
                                continue 'bootstrap;
                            }
                            Err(error) => {
                                error!(%error, "re-bootstrap failed, resuming session retries");
                                backoff.reset();
                                attempts = 0;
                            }
                        }
                    } else {
                        shared.set_status(ConnectionState::Reconnecting);
                        let delay = backoff.next();
                        warn!(%error, attempt = attempts, ?delay, "connect failed, backing off");
                        if wait_or_stop(delay, &mut stop_rx).await {
                            break 'bootstrap;
                        }
                    }
                }
            }
        }
    }

    shared.set_status(ConnectionState::Disconnected);
    info!("engine run loop exited");
}

/// The streaming engine entry point.
pub struct Engine;

impl Engine {
    /// Bootstrap the universe and start the engine. The first bootstrap runs
    /// inline so configuration and upstream problems surface to the caller;
    /// everything after that recovers internally.
    pub async fn start(
        config: EngineConfig,
        gateway: Arc<dyn PersistenceGateway>,
    ) -> Result<EngineHandle, BootstrapError> {
        let universe = universe::fetch_universe(&config).await?;

        let shared = Arc::new(Shared::new(&config));
        let scheduler = Arc::new(SubscriptionScheduler::new(&config));
        let (persist_tx, persist_rx) = mpsc::channel(config.persist_queue_capacity);
        let (stop_tx, stop_rx) = watch::channel(false);

        let worker = tokio::spawn(persist_worker(
            config.clone(),
            gateway,
            AlertEngine::new(&config),
            persist_rx,
        ));
        let runner = tokio::spawn(run(
            config.clone(),
            Arc::clone(&shared),
            Arc::clone(&scheduler),
            persist_tx,
            stop_rx,
            universe,
        ));

        Ok(EngineHandle {
            config,
            shared,
            stop_tx,
            runner,
            worker,
        })
    }
}

/// Caller-facing handle: snapshots, analytics, status, and shutdown.
pub struct EngineHandle {
    config: EngineConfig,
    shared: Arc<Shared>,
    stop_tx: watch::Sender<bool>,
    runner: tokio::task::JoinHandle<()>,
    worker: tokio::task::JoinHandle<()>,
}

impl EngineHandle {
    /// Current snapshots for every monitored pair, highest 24h volume first.
    pub fn stream_data(&self) -> Vec<MarketSnapshot> {
        self.shared.store.read().stream_data()
    }

    pub fn status(&self) -> ConnectionState {
        self.shared.status()
    }

    pub fn last_error(&self) -> Option<String> {
        self.shared.last_error()
    }

    /// Coverage and limit metrics for the presentation layer.
    pub fn analytics(&self) -> Analytics {
        let monitored = self.shared.store.read().monitored_pairs();
        let current = self.shared.subs.len();
        let max_pairs = self.config.max_pairs;

        Analytics {
            total_pairs: self.shared.universe_size(),
            active_pairs: current,
            monitored_pairs: monitored,
            api_limits: ApiLimits {
                max_requests_per_second: self.config.rate_limit,
                max_pairs_allowed: max_pairs,
                current_pairs_monitored: current,
            },
            last_update: self.shared.last_message(),
            connection_status: self.shared.status(),
            coverage: Coverage {
                total: max_pairs,
                current,
                percentage: if max_pairs > 0 {
                    current as f64 / max_pairs as f64 * 100.0
                } else {
                    0.0
                },
            },
        }
    }

    /// Signal the run loop to stop. Idempotent.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    /// Stop and wait for the run loop and persistence worker to finish.
    pub async fn shutdown(self) {
        self.stop();
        let _ = self.runner.await;
        let _ = self.worker.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::MemoryGateway;

    fn tick(symbol: &str, price: f64, volume: f64, pct_24h: f64) -> TickUpdate {
        TickUpdate {
            symbol: symbol.to_string(),
            price,
            volume_24h: Some(volume),
            change_pct_24h: Some(pct_24h),
            change_pct_1h: None,
            high_24h: None,
        }
    }

    #[tokio::test]
    async fn test_process_tick_enqueues_sample_and_top_gainer() {
        let config = EngineConfig::default();
        let shared = Shared::new(&config);
        let (persist_tx, mut persist_rx) = mpsc::channel(16);

        // Price 0.5 keeps the volume/marketcap ratio above threshold.
        process_tick(&shared, &persist_tx, &tick("SOL", 0.5, 600_000.0, 8.0), Utc::now());

        let first = persist_rx.try_recv().unwrap();
        assert!(matches!(
            first,
            PersistJob::Tick { ref symbol, price, .. } if symbol == "SOL" && price == 0.5
        ));
        let second = persist_rx.try_recv().unwrap();
        assert!(matches!(
            second,
            PersistJob::TopGainer(ref row) if row.coin_id == "sol"
        ));
        assert!(persist_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_process_tick_emits_high_of_day_on_breakout() {
        let config = EngineConfig::default();
        let shared = Shared::new(&config);
        let (persist_tx, mut persist_rx) = mpsc::channel(16);
        let now = Utc::now();

        // First tick initialises the daily high, no alert.
        process_tick(&shared, &persist_tx, &tick("BTC", 100.0, 5_000.0, 1.0), now);
        assert!(matches!(
            persist_rx.try_recv().unwrap(),
            PersistJob::Tick { .. }
        ));
        assert!(persist_rx.try_recv().is_err());

        // 1.5% above the stored high with qualifying volume.
        process_tick(&shared, &persist_tx, &tick("BTC", 101.5, 5_000.0, 1.0), now);
        assert!(matches!(
            persist_rx.try_recv().unwrap(),
            PersistJob::Tick { .. }
        ));
        let job = persist_rx.try_recv().unwrap();
        match job {
            PersistJob::HighOfDay(row) => {
                assert_eq!(row.previous_high, 100.0);
                assert!((row.percentage_above_high - 1.5).abs() < 1e-9);
            }
            other => panic!("expected high-of-day job, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_full_queue_drops_jobs_without_blocking() {
        let config = EngineConfig::default();
        let shared = Shared::new(&config);
        let (persist_tx, _persist_rx) = mpsc::channel(1);

        // Second enqueue hits a full queue; the pipeline must not block.
        process_tick(&shared, &persist_tx, &tick("BTC", 100.0, 5_000.0, 1.0), Utc::now());
        process_tick(&shared, &persist_tx, &tick("BTC", 100.1, 5_000.0, 1.0), Utc::now());
    }

    #[tokio::test]
    async fn test_worker_records_samples_and_running_up() {
        let config = EngineConfig::default();
        let gateway = Arc::new(MemoryGateway::new());
        let (persist_tx, persist_rx) = mpsc::channel(16);
        let worker = tokio::spawn(persist_worker(
            config.clone(),
            gateway.clone() as Arc<dyn PersistenceGateway>,
            AlertEngine::new(&config),
            persist_rx,
        ));

        let now = Utc::now();
        // Seed a reference sample older than the lookback window.
        gateway
            .insert_price_history(&PriceHistoryRow {
                coin_id: "sol".to_string(),
                price: 50.0,
                volume_24h: 700_000.0,
                timestamp: now - chrono::Duration::minutes(11),
            })
            .await
            .unwrap();

        persist_tx
            .send(PersistJob::Tick {
                symbol: "SOL".to_string(),
                price: 51.0,
                volume_24h: 700_000.0,
                time: now,
            })
            .await
            .unwrap();
        drop(persist_tx);
        worker.await.unwrap();

        assert_eq!(gateway.price_history().len(), 2);
        let alerts = gateway.running_up_alerts();
        assert_eq!(alerts.len(), 1);
        assert!((alerts[0].price_change_percent - 2.0).abs() < 1e-9);
        assert_eq!(alerts[0].time_frame, "10m");
    }

    #[tokio::test]
    async fn test_worker_deduplicates_high_of_day() {
        let config = EngineConfig::default();
        let gateway = Arc::new(MemoryGateway::new());
        let (persist_tx, persist_rx) = mpsc::channel(16);
        let worker = tokio::spawn(persist_worker(
            config.clone(),
            gateway.clone() as Arc<dyn PersistenceGateway>,
            AlertEngine::new(&config),
            persist_rx,
        ));

        let row = HighOfDayAlertRow {
            coin_id: "btc".to_string(),
            symbol: "btc".to_string(),
            name: "BTC".to_string(),
            current_price: 101.5,
            previous_high: 100.0,
            percentage_above_high: 1.5,
            volume_24h: 5_000.0,
            market_cap: 101.5 * 5_000.0,
            alert_time: Utc::now(),
            is_confirmed: true,
        };
        persist_tx
            .send(PersistJob::HighOfDay(row.clone()))
            .await
            .unwrap();
        persist_tx.send(PersistJob::HighOfDay(row)).await.unwrap();
        drop(persist_tx);
        worker.await.unwrap();

        assert_eq!(gateway.high_of_day_alerts().len(), 1);
    }

    #[test]
    fn test_shared_status_and_error_tracking() {
        let shared = Shared::new(&EngineConfig::default());
        assert_eq!(shared.status(), ConnectionState::Disconnected);

        shared.set_status(ConnectionState::Connected);
        assert_eq!(shared.status(), ConnectionState::Connected);

        assert_eq!(shared.last_error(), None);
        shared.set_last_error("authentication rejected".to_string());
        assert_eq!(
            shared.last_error().as_deref(),
            Some("authentication rejected")
        );
    }
}
