//! Monitor orchestration.
//!
//! Startup order: resolve the symbol universe, backfill every series over
//! REST with bounded concurrency, connect the transport, register one
//! consumer per stream, then subscribe in paced batches per timeframe.
//!
//! The monitor owns the set of streams that should be live. After every
//! reconnect the transport reports `Connected { reconnect: true }` and the
//! resubscribe task replays that set; the transport keeps no subscription
//! state of its own. Series added while the transport is down are recorded
//! and go out with the next replay, or with startup for series requested
//! before the first connection. Every change to the set is serialized so a
//! replay never misses a concurrent addition.

use crate::config::MonitorConfig;
use crate::consumer::SeriesConsumer;
use crate::error::{MonitorError, MonitorResult};
use klmon_core::{Alert, Features, Kline, SeriesKey, Symbol, Timeframe};
use klmon_feed::{FeatureEngine, FeaturePipeline, HistoryStore};
use klmon_filter::AdaptiveFilter;
use klmon_registry::{MarketDataClient, MarketDataSource};
use klmon_telemetry::Metrics;
use klmon_ws::{
    init_crypto, ActiveStreams, ConnectionEvent, ConnectionManager, StreamRouter,
    SubscriptionBatcher, WsError,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex as AsyncMutex, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

type Batcher = SubscriptionBatcher<Arc<ConnectionManager>>;

/// Result of [`Monitor::get_current_klines`].
#[derive(Debug, Clone, PartialEq)]
pub enum KlineSeries {
    /// Series is subscribed and kept current by the stream.
    Live(Vec<Kline>),
    /// Fetched once over REST; the live subscription starts now.
    FetchedOnce(Vec<Kline>),
    /// No data for this series.
    Unavailable,
}

impl KlineSeries {
    pub fn klines(&self) -> &[Kline] {
        match self {
            Self::Live(klines) | Self::FetchedOnce(klines) => klines,
            Self::Unavailable => &[],
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self, Self::Live(_))
    }
}

/// Outcome of startup backfill.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackfillReport {
    pub succeeded: usize,
    /// Series that start empty and fill from live data.
    pub failed: usize,
}

/// Kline stream monitor.
pub struct Monitor<S> {
    config: MonitorConfig,
    timeframes: Vec<Timeframe>,
    source: Arc<S>,
    transport: Arc<ConnectionManager>,
    router: Arc<StreamRouter>,
    batcher: Arc<Batcher>,
    active: Arc<ActiveStreams>,
    subscribe_lock: Arc<AsyncMutex<()>>,
    history: Arc<HistoryStore>,
    pipeline: Arc<FeaturePipeline>,
    filter: Arc<AdaptiveFilter>,
    consumer: SeriesConsumer,
    events: Mutex<Option<mpsc::Receiver<ConnectionEvent>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    cancel: CancellationToken,
    started: AtomicBool,
    running: AtomicBool,
    closed: AtomicBool,
}

impl Monitor<MarketDataClient> {
    /// Monitor backed by the exchange REST API at `config.rest_url`.
    pub fn with_rest_client(
        config: MonitorConfig,
        engine: Arc<dyn FeatureEngine>,
    ) -> MonitorResult<Self> {
        let client = MarketDataClient::new(config.rest_url.clone())?;
        Self::new(config, client, engine)
    }
}

impl<S: MarketDataSource> Monitor<S> {
    /// Build a monitor. Nothing connects until [`Monitor::start`].
    pub fn new(
        config: MonitorConfig,
        source: S,
        engine: Arc<dyn FeatureEngine>,
    ) -> MonitorResult<Self> {
        config.validate()?;
        let timeframes = config.resolved_timeframes()?;

        let router = Arc::new(StreamRouter::new());
        let (event_tx, event_rx) = mpsc::channel(config.websocket.event_buffer);
        let transport = Arc::new(ConnectionManager::new(
            config.connection_config(),
            router.clone(),
            event_tx,
        ));
        let batcher = Arc::new(SubscriptionBatcher::new(
            transport.clone(),
            config.batcher_config(),
        ));

        let history = Arc::new(HistoryStore::new(config.history.capacity));
        let pipeline = Arc::new(FeaturePipeline::new(engine, config.pipeline_config()));
        let filter = Arc::new(AdaptiveFilter::new(config.filter.clone())?);
        let consumer = SeriesConsumer::new(history.clone(), pipeline.clone(), filter.clone());

        Ok(Self {
            config,
            timeframes,
            source: Arc::new(source),
            transport,
            router,
            batcher,
            active: Arc::new(ActiveStreams::new()),
            subscribe_lock: Arc::new(AsyncMutex::new(())),
            history,
            pipeline,
            filter,
            consumer,
            events: Mutex::new(Some(event_rx)),
            tasks: Mutex::new(Vec::new()),
            cancel: CancellationToken::new(),
            started: AtomicBool::new(false),
            running: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }

    /// Resolve the universe, backfill, connect and subscribe.
    ///
    /// Fails when the universe cannot be resolved, the first connection
    /// cannot be established or a subscription batch fails. Backfill
    /// failures are reported, not fatal. A failed start may be retried;
    /// series whose batch failed are not active and get subscribed again.
    pub async fn start(&self) -> MonitorResult<BackfillReport> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(MonitorError::Closed);
        }
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(MonitorError::AlreadyStarted);
        }

        let result = self.run_startup().await;
        if let Err(e) = &result {
            error!(error = %e, "Monitor start failed");
            self.started.store(false, Ordering::SeqCst);
        }
        result
    }

    async fn run_startup(&self) -> MonitorResult<BackfillReport> {
        init_crypto();

        let universe = self.resolve_universe().await?;
        info!(
            symbols = universe.len(),
            timeframes = ?self.timeframes,
            "Starting monitor"
        );

        let report = self.backfill(&universe).await;
        info!(
            succeeded = report.succeeded,
            failed = report.failed,
            "Backfill complete"
        );

        self.transport.connect().await?;
        self.spawn_resubscriber();

        {
            let _guard = self.subscribe_lock.lock().await;
            let deferred = replay(&self.active, &self.batcher).await?;
            if deferred > 0 {
                info!(streams = deferred, "Sent deferred subscriptions");
            }
        }

        for &timeframe in &self.timeframes {
            self.subscribe_series(timeframe, &universe).await?;
        }

        let maintenance = self
            .filter
            .clone()
            .spawn_maintenance(self.cancel.child_token());
        self.tasks.lock().push(maintenance);

        self.running.store(true, Ordering::SeqCst);
        info!(streams = self.active.len(), "Monitor running");
        Ok(report)
    }

    async fn resolve_universe(&self) -> MonitorResult<Vec<Symbol>> {
        if let Some(symbols) = self.config.explicit_symbols()? {
            debug!(count = symbols.len(), "Using configured symbols");
            return Ok(symbols);
        }
        let symbols = self.source.fetch_tradable_symbols().await.map_err(|e| {
            error!(error = %e, "Failed to fetch instrument catalog");
            e
        })?;
        if symbols.is_empty() {
            warn!("Instrument catalog yielded no symbols");
        }
        Ok(symbols)
    }

    /// Seed every (symbol, timeframe) series from REST.
    async fn backfill(&self, symbols: &[Symbol]) -> BackfillReport {
        let semaphore = Arc::new(Semaphore::new(self.config.history.backfill_concurrency));
        let limit = self.config.history.backfill_limit;
        let mut fetches = JoinSet::new();

        for &timeframe in &self.timeframes {
            for symbol in symbols {
                let key = SeriesKey::new(symbol.clone(), timeframe);
                let semaphore = semaphore.clone();
                let source = self.source.clone();
                let history = self.history.clone();

                fetches.spawn(async move {
                    let Ok(_permit) = semaphore.acquire_owned().await else {
                        return false;
                    };
                    match source
                        .fetch_recent_klines(&key.symbol, key.timeframe, limit)
                        .await
                    {
                        Ok(klines) => {
                            let stored = history.seed(&key, klines);
                            debug!(series = %key, stored, "Backfilled");
                            true
                        }
                        Err(e) => {
                            warn!(series = %key, error = %e, "Backfill failed, series starts empty");
                            false
                        }
                    }
                });
            }
        }

        let mut report = BackfillReport::default();
        while let Some(joined) = fetches.join_next().await {
            let ok = matches!(joined, Ok(true));
            Metrics::backfill(ok);
            if ok {
                report.succeeded += 1;
            } else {
                report.failed += 1;
            }
        }
        report
    }

    /// Register consumers for the symbols not yet active and subscribe them.
    ///
    /// While the transport is down the symbols are only recorded; the next
    /// replay sends them. Symbols of a failed batch, and of every batch
    /// after it, are rolled back so a later call subscribes them again.
    async fn subscribe_series(&self, timeframe: Timeframe, symbols: &[Symbol]) -> MonitorResult<usize> {
        let _guard = self.subscribe_lock.lock().await;
        let added = self.active.record(timeframe, symbols);
        if added.is_empty() {
            return Ok(0);
        }

        {
            let mut tasks = self.tasks.lock();
            for symbol in &added {
                let key = SeriesKey::new(symbol.clone(), timeframe);
                let rx = self
                    .router
                    .add_subscriber(key.stream_id(), self.config.subscription.subscriber_buffer);
                tasks.push(self.consumer.spawn(key, rx));
            }
        }

        if !self.transport.is_connected() {
            debug!(
                timeframe = %timeframe,
                symbols = added.len(),
                "Transport not connected, subscription deferred"
            );
            return Ok(added.len());
        }

        if let Err(e) = self.batcher.subscribe_all(&added, timeframe).await {
            let sent = match &e {
                WsError::BatchFailed { index, .. } => index * self.batcher.config().batch_size,
                _ => 0,
            };
            self.forget(timeframe, &added[sent.min(added.len())..]);
            return Err(e.into());
        }
        Ok(added.len())
    }

    /// Drop series from the active set and close their consumers.
    fn forget(&self, timeframe: Timeframe, symbols: &[Symbol]) {
        for symbol in symbols {
            let key = SeriesKey::new(symbol.clone(), timeframe);
            self.active.remove(&key);
            self.router.remove_subscriber(key.stream_id().as_str());
        }
        debug!(timeframe = %timeframe, symbols = symbols.len(), "Rolled back subscriptions");
    }

    async fn subscribe_dynamic(&self, key: &SeriesKey) {
        match self
            .subscribe_series(key.timeframe, std::slice::from_ref(&key.symbol))
            .await
        {
            Ok(0) => {}
            Ok(_) => info!(series = %key, "Series added to live set"),
            Err(e) => warn!(series = %key, error = %e, "Dynamic subscription failed"),
        }
    }

    fn spawn_resubscriber(&self) {
        let Some(mut events) = self.events.lock().take() else {
            return;
        };
        let active = self.active.clone();
        let batcher = self.batcher.clone();
        let subscribe_lock = self.subscribe_lock.clone();
        let cancel = self.cancel.child_token();

        let handle = tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = events.recv() => event,
                };
                match event {
                    Some(ConnectionEvent::Connected { reconnect: true }) => {
                        let _guard = subscribe_lock.lock().await;
                        match replay(&active, &batcher).await {
                            Ok(streams) => info!(streams, "Resubscribed active streams"),
                            Err(e) => error!(error = %e, "Resubscription failed"),
                        }
                    }
                    Some(ConnectionEvent::Connected { reconnect: false }) => {}
                    Some(ConnectionEvent::Disconnected { reason }) => {
                        debug!(%reason, "Transport disconnected, awaiting reconnect");
                    }
                    None => break,
                }
            }
            debug!("Resubscribe task stopped");
        });
        self.tasks.lock().push(handle);
    }

    /// Current kline series.
    ///
    /// A series that is not held yet is fetched once over REST, stored and
    /// subscribed from now on; that first answer is `FetchedOnce`. Until
    /// the monitor runs, held series are answered as `FetchedOnce` too.
    pub async fn get_current_klines(
        &self,
        symbol: &str,
        timeframe: &str,
    ) -> MonitorResult<KlineSeries> {
        let key = SeriesKey::new(Symbol::new(symbol)?, Timeframe::parse(timeframe)?);
        let closed = self.closed.load(Ordering::SeqCst);

        if self.active.contains(&key) && self.running.load(Ordering::SeqCst) {
            let klines = self.history.get(&key).unwrap_or_default();
            return Ok(KlineSeries::Live(klines));
        }
        if let Some(klines) = self.history.get(&key) {
            if !closed && !self.active.contains(&key) {
                self.subscribe_dynamic(&key).await;
            }
            return Ok(KlineSeries::FetchedOnce(klines));
        }
        if closed {
            return Ok(KlineSeries::Unavailable);
        }

        let fetched = self
            .source
            .fetch_recent_klines(&key.symbol, key.timeframe, self.config.history.fallback_limit)
            .await?;
        if fetched.is_empty() {
            debug!(series = %key, "No history available");
            return Ok(KlineSeries::Unavailable);
        }
        self.history.seed(&key, fetched);
        self.subscribe_dynamic(&key).await;

        let klines = self.history.get(&key).unwrap_or_default();
        Ok(KlineSeries::FetchedOnce(klines))
    }

    /// Stop streaming a series and drop its history.
    ///
    /// Returns `false` when the series was not active. The series leaves the
    /// replay set even when sending UNSUBSCRIBE fails; that error is
    /// returned.
    pub async fn unsubscribe(&self, symbol: &str, timeframe: &str) -> MonitorResult<bool> {
        let key = SeriesKey::new(Symbol::new(symbol)?, Timeframe::parse(timeframe)?);
        let _guard = self.subscribe_lock.lock().await;
        if !self.active.remove(&key) {
            return Ok(false);
        }

        let stream = key.stream_id();
        self.router.remove_subscriber(stream.as_str());
        self.history.remove(&key);
        if self.transport.is_connected() {
            self.transport.unsubscribe(vec![stream]).await?;
        }
        info!(series = %key, "Unsubscribed");
        Ok(true)
    }

    /// Latest feature snapshot of a symbol.
    pub fn get_current_features(&self, symbol: &Symbol) -> Option<Features> {
        self.pipeline.features(symbol)
    }

    pub fn get_all_features(&self) -> HashMap<Symbol, Features> {
        self.pipeline.all_features()
    }

    /// Symbols of the latest published ranking, highest score first.
    pub fn get_filtered_top_symbols(&self) -> Vec<Symbol> {
        self.filter.filtered_top_symbols()
    }

    /// Alert stream. Only the first call returns it.
    pub fn take_alert_receiver(&self) -> Option<mpsc::Receiver<Alert>> {
        self.pipeline.take_alert_receiver()
    }

    pub fn pipeline(&self) -> &Arc<FeaturePipeline> {
        &self.pipeline
    }

    pub fn filter(&self) -> &Arc<AdaptiveFilter> {
        &self.filter
    }

    pub fn transport(&self) -> &Arc<ConnectionManager> {
        &self.transport
    }

    /// Streams that are subscribed and replayed on reconnect.
    pub fn active_streams(&self) -> usize {
        self.active.len()
    }

    /// Stop everything.
    ///
    /// Idempotent. Stops reconnection, closes the transport and with it
    /// every stream channel, waits for the consumers to drain and closes
    /// the alert channel.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Monitor close requested");
        self.running.store(false, Ordering::SeqCst);
        self.cancel.cancel();
        self.transport.close().await;

        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Monitor task ended abnormally");
            }
        }

        self.pipeline.close();
        info!("Monitor closed");
    }
}

/// Resend SUBSCRIBE for every active stream. Returns the stream count.
async fn replay(active: &ActiveStreams, batcher: &Batcher) -> MonitorResult<usize> {
    let mut streams = 0;
    for (timeframe, symbols) in active.replay_plan() {
        batcher.subscribe_all(&symbols, timeframe).await?;
        streams += symbols.len();
    }
    Ok(streams)
}
