// src/tracker/scheduler.rs
//
// Drives the refresh loop: every cycle each configured token is fetched with
// bounded retries, failures fall back to the last known snapshot, results are
// aggregated and, if anything was usable, published. Then sleep with jitter
// and repeat until stopped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use rand::Rng;
use serde::Serialize;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info, warn};

use super::{LastKnownCache, PortfolioAggregator, Publisher, ResolvedSnapshot, SnapshotSource};
use crate::api::dexscreener::MarketDataSource;
use crate::error::PriceTrackerError;
use crate::models::{MarketSnapshot, PortfolioSnapshot, TokenConfig};

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Per-token retry budget within a single cycle.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total fetch attempts, including the first
    pub max_attempts: u32,
    /// Delay after the first failed attempt; doubles for each further retry
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Fixed part of the delay between cycles
    pub base_interval: Duration,
    /// Upper bound of the random delay added on top of `base_interval`
    pub max_jitter: Duration,
    pub retry: RetryPolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            base_interval: Duration::from_secs(3),
            max_jitter: Duration::from_secs(2),
            retry: RetryPolicy::default(),
        }
    }
}

impl SchedulerConfig {
    /// Next inter-cycle delay: base plus uniform jitter in `[0, max_jitter]`.
    pub fn next_delay(&self) -> Duration {
        let max_jitter_ms = self.max_jitter.as_millis().min(u64::MAX as u128) as u64;
        let jitter_ms = rand::thread_rng().gen_range(0..=max_jitter_ms);
        self.base_interval.saturating_add(Duration::from_millis(jitter_ms))
    }
}

// ============================================================================
// STATE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    #[default]
    Idle,
    FetchingCycle,
    Aggregating,
    Publishing,
    Sleeping,
    Stopped,
}

/// Shared, read-only view of the scheduler for the web layer.
#[derive(Debug, Clone, Default)]
pub struct SchedulerStatus {
    state: Arc<RwLock<SchedulerState>>,
    cycles_completed: Arc<AtomicU64>,
}

impl SchedulerStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn state(&self) -> SchedulerState {
        *self.state.read().await
    }

    pub fn cycles_completed(&self) -> u64 {
        self.cycles_completed.load(Ordering::Relaxed)
    }

    async fn set_state(&self, state: SchedulerState) {
        *self.state.write().await = state;
    }
}

/// Outcome of a single cycle, by symbol.
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub fresh: Vec<String>,
    pub degraded: Vec<String>,
    pub skipped: Vec<String>,
    /// Set when the cycle produced something worth publishing
    pub snapshot: Option<PortfolioSnapshot>,
}

impl CycleReport {
    pub fn published(&self) -> bool {
        self.snapshot.is_some()
    }
}

// ============================================================================
// REFRESH SCHEDULER
// ============================================================================

/// The only consumer of the market data source, the cache's writer and the
/// publisher's caller. Runs on its own task, independent of request handling.
pub struct RefreshScheduler {
    config: SchedulerConfig,
    tokens: Arc<Vec<TokenConfig>>,
    source: Arc<dyn MarketDataSource>,
    cache: LastKnownCache,
    publisher: Arc<dyn Publisher>,
    status: SchedulerStatus,
    /// Running flag
    running: AtomicBool,
    /// Shutdown signal, observed by every sleep and between tokens
    shutdown_tx: watch::Sender<bool>,
    task_handle: Mutex<Option<JoinHandle<()>>>,
}

impl RefreshScheduler {
    pub fn new(
        config: SchedulerConfig,
        tokens: Arc<Vec<TokenConfig>>,
        source: Arc<dyn MarketDataSource>,
        cache: LastKnownCache,
        publisher: Arc<dyn Publisher>,
        status: SchedulerStatus,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            config,
            tokens,
            source,
            cache,
            publisher,
            status,
            running: AtomicBool::new(false),
            shutdown_tx,
            task_handle: Mutex::new(None),
        }
    }

    pub fn status(&self) -> &SchedulerStatus {
        &self.status
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Spawn the refresh loop on the current Tokio runtime.
    ///
    /// Fails if there is no runtime to spawn on or the loop is already
    /// running. Nothing that happens inside the loop is reported here.
    pub fn start(self: &Arc<Self>) -> Result<(), PriceTrackerError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| PriceTrackerError::Startup(format!("No async runtime for refresh loop: {}", e)))?;

        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(PriceTrackerError::Startup("Refresh scheduler is already running".to_string()));
        }

        info!(
            "Starting refresh scheduler: {} tokens, interval {:?} + up to {:?} jitter, {} attempts per token",
            self.tokens.len(),
            self.config.base_interval,
            self.config.max_jitter,
            self.config.retry.max_attempts
        );

        self.shutdown_tx.send_replace(false);
        let scheduler = self.clone();
        let handle = runtime.spawn(async move { scheduler.run().await });

        *self.task_handle.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
        Ok(())
    }

    /// Signal the loop to exit and wait for it to finish. An in-flight cycle
    /// stops retrying and, if tokens remain, is abandoned without publishing.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            warn!("Refresh scheduler stop requested but not running.");
            return;
        }

        info!("Stopping refresh scheduler...");
        self.shutdown_tx.send_replace(true);

        let handle = self.task_handle.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("Refresh loop task ended abnormally: {:?}", e);
            }
        }
        info!("Refresh scheduler stopped.");
    }

    fn stop_requested(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Sleep for `delay` unless shutdown is requested first. Returns false if
    /// the sleep was cut short.
    async fn sleep_unless_stopped(&self, delay: Duration) -> bool {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        if *shutdown_rx.borrow_and_update() {
            return false;
        }

        tokio::select! {
            _ = shutdown_rx.changed() => false,
            _ = sleep(delay) => true,
        }
    }

    async fn run(&self) {
        info!("Refresh loop started.");

        while self.running.load(Ordering::SeqCst) {
            let report = self.run_cycle().await;
            debug!(
                "Cycle finished: {} fresh, {} degraded, {} skipped",
                report.fresh.len(),
                report.degraded.len(),
                report.skipped.len()
            );

            let delay = self.config.next_delay();
            self.status.set_state(SchedulerState::Sleeping).await;
            debug!("Next refresh in {:?}", delay);

            if !self.sleep_unless_stopped(delay).await {
                info!("Refresh loop received shutdown signal");
                break;
            }
        }

        self.status.set_state(SchedulerState::Stopped).await;
        info!("Refresh loop finished.");
    }

    /// Run one full cycle: refresh every token in configuration order,
    /// aggregate, and publish unless nothing at all was available.
    pub async fn run_cycle(&self) -> CycleReport {
        self.status.set_state(SchedulerState::FetchingCycle).await;

        let mut report = CycleReport::default();
        let mut resolved: HashMap<String, ResolvedSnapshot> = HashMap::new();

        for token in self.tokens.iter() {
            if self.stop_requested() {
                info!("Shutdown requested mid-cycle; abandoning cycle without broadcast");
                return report;
            }

            match self.refresh_token(token).await {
                Some(snapshot) => {
                    match snapshot.source {
                        SnapshotSource::Fresh => report.fresh.push(token.symbol.clone()),
                        SnapshotSource::Cached => report.degraded.push(token.symbol.clone()),
                    }
                    resolved.insert(token.symbol.clone(), snapshot);
                }
                None => report.skipped.push(token.symbol.clone()),
            }
        }

        self.status.cycles_completed.fetch_add(1, Ordering::Relaxed);

        if resolved.is_empty() {
            warn!("No token prices available this cycle; skipping broadcast");
            return report;
        }

        self.status.set_state(SchedulerState::Aggregating).await;
        let portfolio = PortfolioAggregator::aggregate(&self.tokens, &resolved, Utc::now());

        if portfolio.is_empty() {
            warn!("Every available token was excluded during aggregation; skipping broadcast");
            return report;
        }

        for valuation in portfolio.valuations.values() {
            info!(
                "{}: Price=${:.8}, Value=${:.2}{}",
                valuation.symbol,
                valuation.snapshot.price,
                valuation.value,
                if valuation.degraded { " (cached)" } else { "" }
            );
        }

        self.status.set_state(SchedulerState::Publishing).await;
        info!(
            "Broadcasting update to clients. Total value: ${:.2} ({} tokens, {} cached)",
            portfolio.total_value,
            portfolio.valuations.len(),
            portfolio.degraded_count()
        );
        self.publisher.broadcast(portfolio.clone()).await;

        report.snapshot = Some(portfolio);
        report
    }

    /// Fresh snapshot if the fetch succeeds within budget, else the cached
    /// one, else nothing.
    async fn refresh_token(&self, token: &TokenConfig) -> Option<ResolvedSnapshot> {
        match self.fetch_with_retry(token).await {
            Ok(snapshot) => {
                self.cache.put(&token.symbol, snapshot.clone()).await;
                Some(ResolvedSnapshot::fresh(snapshot))
            }
            Err(e) => match self.cache.get(&token.symbol).await {
                Some(cached) => {
                    warn!(
                        "{}: refresh failed ({}); using cached price ${:.8} from {}",
                        token.symbol, e, cached.price, cached.observed_at
                    );
                    Some(ResolvedSnapshot::cached(cached))
                }
                None => {
                    warn!("{}: refresh failed ({}) and no cached price; excluding this cycle", token.symbol, e);
                    None
                }
            },
        }
    }

    async fn fetch_with_retry(&self, token: &TokenConfig) -> Result<MarketSnapshot, PriceTrackerError> {
        let max_attempts = self.config.retry.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            debug!("Fetching price for {} ({}), attempt {}/{}", token.symbol, token.address, attempt, max_attempts);

            match self.source.fetch(&token.address).await {
                Ok(snapshot) => return Ok(snapshot),
                Err(e) => {
                    if e.is_unavailable() {
                        warn!("{}: attempt {}/{} failed: {}", token.symbol, attempt, max_attempts, e);
                    } else {
                        error!("{}: attempt {}/{} failed unexpectedly: {}", token.symbol, attempt, max_attempts, e);
                    }

                    if attempt >= max_attempts {
                        return Err(e);
                    }

                    if !self.sleep_unless_stopped(self.config.retry.delay_after(attempt)).await {
                        debug!("{}: retries abandoned on shutdown", token.symbol);
                        return Err(e);
                    }
                    attempt += 1;
                }
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use tokio::sync::Mutex as AsyncMutex;
    use tokio::time::Instant;

    fn snapshot(price: f64) -> MarketSnapshot {
        MarketSnapshot {
            price,
            price_change_24h: 1.0,
            volume_24h: 100.0,
            liquidity: 1000.0,
            fdv: 0.0,
            source_id: "raydium".to_string(),
            pair_address: "pair".to_string(),
            observed_at: Utc::now(),
        }
    }

    /// Scripted market data: each address pops its next response, `None` is
    /// a failure. An exhausted script fails.
    #[derive(Default)]
    struct ScriptedSource {
        scripts: AsyncMutex<HashMap<String, VecDeque<Option<f64>>>>,
        calls: AsyncMutex<Vec<(String, Instant)>>,
    }

    impl ScriptedSource {
        async fn script(&self, address: &str, responses: &[Option<f64>]) {
            self.scripts
                .lock()
                .await
                .entry(address.to_string())
                .or_default()
                .extend(responses.iter().copied());
        }

        async fn calls_for(&self, address: &str) -> Vec<Instant> {
            self.calls
                .lock()
                .await
                .iter()
                .filter(|(a, _)| a == address)
                .map(|(_, at)| *at)
                .collect()
        }
    }

    #[async_trait]
    impl MarketDataSource for ScriptedSource {
        async fn fetch(&self, address: &str) -> Result<MarketSnapshot, PriceTrackerError> {
            self.calls.lock().await.push((address.to_string(), Instant::now()));
            let next = self
                .scripts
                .lock()
                .await
                .get_mut(address)
                .and_then(|q| q.pop_front())
                .flatten();
            next.map(snapshot).ok_or_else(|| PriceTrackerError::NoPairs(address.to_string()))
        }
    }

    #[derive(Default)]
    struct RecordingPublisher {
        published: AsyncMutex<Vec<PortfolioSnapshot>>,
    }

    impl RecordingPublisher {
        async fn count(&self) -> usize {
            self.published.lock().await.len()
        }
    }

    #[async_trait]
    impl Publisher for RecordingPublisher {
        async fn broadcast(&self, snapshot: PortfolioSnapshot) {
            self.published.lock().await.push(snapshot);
        }
    }

    struct Harness {
        scheduler: Arc<RefreshScheduler>,
        source: Arc<ScriptedSource>,
        publisher: Arc<RecordingPublisher>,
        cache: LastKnownCache,
    }

    fn harness(tokens: Vec<TokenConfig>) -> Harness {
        let source = Arc::new(ScriptedSource::default());
        let publisher = Arc::new(RecordingPublisher::default());
        let cache = LastKnownCache::new();
        let scheduler = Arc::new(RefreshScheduler::new(
            SchedulerConfig::default(),
            Arc::new(tokens),
            source.clone(),
            cache.clone(),
            publisher.clone(),
            SchedulerStatus::new(),
        ));
        Harness { scheduler, source, publisher, cache }
    }

    fn two_tokens() -> Vec<TokenConfig> {
        vec![
            TokenConfig::new("X", "addr-x", 10.0),
            TokenConfig::new("Y", "addr-y", 2.0),
        ]
    }

    #[test]
    fn test_retry_policy_backoff() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.delay_after(1), Duration::from_secs(2));
        assert_eq!(policy.delay_after(2), Duration::from_secs(4));
        assert_eq!(policy.delay_after(3), Duration::from_secs(8));
    }

    #[test]
    fn test_next_delay_within_jitter_bounds() {
        let config = SchedulerConfig::default();
        for _ in 0..200 {
            let delay = config.next_delay();
            assert!(delay >= Duration::from_secs(3));
            assert!(delay <= Duration::from_secs(5));
        }

        let no_jitter = SchedulerConfig { max_jitter: Duration::ZERO, ..SchedulerConfig::default() };
        assert_eq!(no_jitter.next_delay(), Duration::from_secs(3));
    }

    #[test]
    fn test_next_delay_saturates_on_huge_interval() {
        let config = SchedulerConfig { base_interval: Duration::MAX, ..SchedulerConfig::default() };
        assert_eq!(config.next_delay(), Duration::MAX);
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_fetch_updates_cache() {
        let h = harness(two_tokens());
        h.source.script("addr-x", &[Some(2.5)]).await;
        h.source.script("addr-y", &[Some(4.0)]).await;

        let report = h.scheduler.run_cycle().await;

        assert_eq!(report.fresh, vec!["X".to_string(), "Y".to_string()]);
        assert_eq!(h.cache.get("X").await.unwrap().price, 2.5);
        assert_eq!(h.cache.get("Y").await.unwrap().price, 4.0);
        let portfolio = report.snapshot.unwrap();
        assert_eq!(portfolio.total_value, 33.0);
        assert_eq!(h.publisher.count().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_token_uses_cached_price() {
        let h = harness(two_tokens());
        h.cache.put("X", snapshot(1.5)).await;
        h.source.script("addr-x", &[None, None, None]).await;
        h.source.script("addr-y", &[Some(4.0)]).await;

        let report = h.scheduler.run_cycle().await;

        assert_eq!(report.degraded, vec!["X".to_string()]);
        let portfolio = report.snapshot.unwrap();
        let x = portfolio.get("X").unwrap();
        assert!(x.degraded);
        assert_eq!(x.snapshot.price, 1.5);
        assert_eq!(x.value, 15.0);
        assert_eq!(portfolio.total_value, 23.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_token_without_cache_is_excluded() {
        let h = harness(two_tokens());
        h.source.script("addr-y", &[Some(4.0)]).await;

        let report = h.scheduler.run_cycle().await;

        assert_eq!(report.skipped, vec!["X".to_string()]);
        let portfolio = report.snapshot.unwrap();
        assert!(portfolio.get("X").is_none());
        assert_eq!(portfolio.valuations.len(), 1);
        assert_eq!(portfolio.total_value, 8.0);
        assert!(h.cache.get("X").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_total_failure_skips_broadcast() {
        let h = harness(two_tokens());

        let report = h.scheduler.run_cycle().await;

        assert!(!report.published());
        assert_eq!(report.skipped.len(), 2);
        assert_eq!(h.publisher.count().await, 0);
        assert_eq!(h.scheduler.status().cycles_completed(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_budget_and_delay() {
        let h = harness(vec![TokenConfig::new("X", "addr-x", 10.0)]);

        h.scheduler.run_cycle().await;

        let calls = h.source.calls_for("addr-x").await;
        assert_eq!(calls.len(), 3);
        assert!(calls[1] - calls[0] >= Duration::from_secs(2));
        assert!(calls[2] - calls[1] >= Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_on_later_attempt() {
        let h = harness(vec![TokenConfig::new("X", "addr-x", 10.0)]);
        h.source.script("addr-x", &[None, Some(2.0)]).await;

        let report = h.scheduler.run_cycle().await;

        assert_eq!(h.source.calls_for("addr-x").await.len(), 2);
        assert_eq!(report.fresh, vec!["X".to_string()]);
        assert!(!report.snapshot.unwrap().get("X").unwrap().degraded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_price_change_across_cycles() {
        let h = harness(vec![TokenConfig::new("X", "addr-x", 10.0)]);
        h.source.script("addr-x", &[Some(2.5), Some(3.0)]).await;

        let first = h.scheduler.run_cycle().await.snapshot.unwrap();
        assert_eq!(first.get("X").unwrap().value, 25.0);

        let second = h.scheduler.run_cycle().await.snapshot.unwrap();
        assert_eq!(second.get("X").unwrap().value, 30.0);
        assert_eq!(h.cache.get("X").await.unwrap().price, 3.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_publishes_until_stopped() {
        let h = harness(vec![TokenConfig::new("X", "addr-x", 10.0)]);
        h.source.script("addr-x", &[Some(1.0), Some(2.0), Some(3.0), Some(4.0)]).await;

        h.scheduler.start().unwrap();
        assert!(h.scheduler.is_running());
        assert!(matches!(h.scheduler.start(), Err(PriceTrackerError::Startup(_))));

        while h.publisher.count().await < 2 {
            sleep(Duration::from_millis(100)).await;
        }

        h.scheduler.stop().await;
        assert!(!h.scheduler.is_running());
        assert_eq!(h.scheduler.status().state().await, SchedulerState::Stopped);

        let published = h.publisher.published.lock().await;
        assert_eq!(published[0].total_value, 10.0);
        assert_eq!(published[1].total_value, 20.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_interrupts_retry_backoff() {
        let h = harness(two_tokens());
        let started = Instant::now();

        h.scheduler.start().unwrap();
        while h.source.calls_for("addr-x").await.is_empty() {
            sleep(Duration::from_millis(10)).await;
        }
        h.scheduler.stop().await;

        assert_eq!(h.source.calls_for("addr-x").await.len(), 1);
        assert!(h.source.calls_for("addr-y").await.is_empty());
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(h.publisher.count().await, 0);
        assert_eq!(h.scheduler.status().state().await, SchedulerState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_after_stop() {
        let h = harness(vec![TokenConfig::new("X", "addr-x", 10.0)]);
        h.source.script("addr-x", &[Some(1.0), Some(2.0)]).await;

        h.scheduler.start().unwrap();
        while h.publisher.count().await < 1 {
            sleep(Duration::from_millis(100)).await;
        }
        h.scheduler.stop().await;

        h.scheduler.start().unwrap();
        while h.publisher.count().await < 2 {
            sleep(Duration::from_millis(100)).await;
        }
        h.scheduler.stop().await;

        assert_eq!(h.publisher.published.lock().await[1].total_value, 20.0);
    }

    #[test]
    fn test_start_without_runtime_fails() {
        let h = harness(two_tokens());
        let result = h.scheduler.start();
        assert!(matches!(result, Err(PriceTrackerError::Startup(_))));
        assert!(!h.scheduler.is_running());
    }
}
