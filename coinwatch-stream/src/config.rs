//! Engine configuration.
//!
//! Every detector threshold and timing constant is a field with the
//! production value as its default, so deployments can tune them without
//! touching detector code.

use std::time::Duration;

/// Default streaming endpoint (api key is appended as a query parameter).
pub const DEFAULT_WS_URL: &str = "wss://streamer.cryptocompare.com/v2";

/// Default REST endpoint for the top-volume symbol universe fetch.
pub const DEFAULT_REST_URL: &str = "https://min-api.cryptocompare.com/data/top/totalvolfull";

/// Full engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// WebSocket endpoint for the upstream tick feed.
    pub ws_url: String,
    /// REST endpoint used to bootstrap the symbol universe.
    pub rest_url: String,
    /// Upstream API key, sent in the authentication message.
    pub api_key: String,
    /// Quote currency every pair is monitored against.
    pub quote: String,

    /// Maximum number of pairs the engine monitors.
    pub max_pairs: usize,
    /// Configured cap on symbols per subscription batch.
    pub batch_size: usize,
    /// Upstream request rate limit (requests per second budget).
    pub rate_limit: usize,

    /// Interval between outbound heartbeat messages.
    pub heartbeat_interval: Duration,
    /// Interval between staleness-watchdog checks.
    pub watchdog_interval: Duration,
    /// Age beyond which the link (or a pair) counts as stale.
    pub stale_after: Duration,
    /// Abort a connection attempt that has not opened within this window.
    pub connect_timeout: Duration,
    /// Delay between socket open and the first subscription drain.
    pub settle_delay: Duration,

    /// First reconnect delay.
    pub initial_reconnect_delay: Duration,
    /// Reconnect delay ceiling.
    pub max_reconnect_delay: Duration,
    /// Multiplier applied to the reconnect delay on each failed attempt.
    pub backoff_multiplier: f64,
    /// Upper bound on the random jitter added per reconnect attempt.
    pub max_jitter: Duration,
    /// Failed attempts before the engine re-bootstraps from scratch.
    pub max_reconnect_attempts: u32,
    /// Pause before re-bootstrapping once the attempt budget is exhausted.
    pub rebootstrap_pause: Duration,

    /// Base delay for subscription drain retries (scaled by retry count).
    pub subscription_retry_delay: Duration,
    /// Drain retries before escalating to a full reconnect.
    pub max_subscription_retries: u32,
    /// Enforced delay between subscription batches.
    pub batch_delay: Duration,

    /// Ring buffer capacity for per-pair price history.
    pub price_history_len: usize,
    /// Ring buffer capacity for per-pair (time, volume) history.
    pub volume_history_len: usize,

    /// High-of-day: minimum increase over the stored high, in percent.
    pub hod_min_price_increase_pct: f64,
    /// High-of-day: minimum 24h volume for an alert to qualify.
    pub hod_min_volume: f64,
    /// High-of-day: stored highs older than this are reset, not compared.
    pub high_expiry: Duration,

    /// Running-up: lookback window for the persisted reference sample.
    pub running_up_window: Duration,
    /// Running-up: minimum percentage change over the window.
    pub running_up_min_pct: f64,
    /// Timeframe tag stamped on running-up alert rows.
    pub running_up_timeframe: String,

    /// Top-gainer: minimum 24h percentage change.
    pub top_gainer_min_pct_24h: f64,
    /// Top-gainer: minimum 24h volume.
    pub top_gainer_min_volume: f64,
    /// Top-gainer: minimum volume-to-marketcap ratio.
    pub top_gainer_min_volume_mcap_ratio: f64,
    /// RSI lookback periods for the top-gainer summary row.
    pub rsi_periods: usize,

    /// Timeout for each bootstrap REST request.
    pub bootstrap_request_timeout: Duration,
    /// Pause between bootstrap pages (stays under the REST rate limit).
    pub bootstrap_page_delay: Duration,
    /// Fixed wait after an HTTP 429 before retrying the page.
    pub rate_limit_retry_delay: Duration,
    /// Retries per bootstrap page before surfacing the fetch failure.
    pub rate_limit_max_retries: u32,

    /// Capacity of the bounded persistence job queue.
    pub persist_queue_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ws_url: DEFAULT_WS_URL.to_string(),
            rest_url: DEFAULT_REST_URL.to_string(),
            api_key: String::new(),
            quote: "USD".to_string(),

            max_pairs: 1_000,
            batch_size: 25,
            rate_limit: 30,

            heartbeat_interval: Duration::from_secs(5),
            watchdog_interval: Duration::from_secs(10),
            stale_after: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(15),
            settle_delay: Duration::from_secs(1),

            initial_reconnect_delay: Duration::from_millis(1_000),
            max_reconnect_delay: Duration::from_millis(30_000),
            backoff_multiplier: 1.5,
            max_jitter: Duration::from_millis(1_000),
            max_reconnect_attempts: 15,
            rebootstrap_pause: Duration::from_secs(5),

            subscription_retry_delay: Duration::from_secs(3),
            max_subscription_retries: 5,
            batch_delay: Duration::from_secs(1),

            price_history_len: 300,
            volume_history_len: 60,

            hod_min_price_increase_pct: 1.0,
            hod_min_volume: 1_000.0,
            high_expiry: Duration::from_secs(24 * 60 * 60),

            running_up_window: Duration::from_secs(10 * 60),
            running_up_min_pct: 1.0,
            running_up_timeframe: "10m".to_string(),

            top_gainer_min_pct_24h: 7.0,
            top_gainer_min_volume: 500_000.0,
            top_gainer_min_volume_mcap_ratio: 0.01,
            rsi_periods: 24,

            bootstrap_request_timeout: Duration::from_secs(10),
            bootstrap_page_delay: Duration::from_secs(1),
            rate_limit_retry_delay: Duration::from_secs(2),
            rate_limit_max_retries: 3,

            persist_queue_capacity: 1_024,
        }
    }
}

impl EngineConfig {
    /// Create a configuration with the given API key and all defaults.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            ..Default::default()
        }
    }

    /// Set the WebSocket endpoint.
    pub fn with_ws_url(mut self, url: impl Into<String>) -> Self {
        self.ws_url = url.into();
        self
    }

    /// Set the bootstrap REST endpoint.
    pub fn with_rest_url(mut self, url: impl Into<String>) -> Self {
        self.rest_url = url.into();
        self
    }

    /// Set the monitored-pairs cap.
    pub fn with_max_pairs(mut self, max_pairs: usize) -> Self {
        self.max_pairs = max_pairs;
        self
    }

    /// Set the subscription batch cap.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Effective subscription batch size: the configured cap, bounded by half
    /// the rate-limit budget so a drain can never exhaust the limit alone.
    pub fn effective_batch_size(&self) -> usize {
        self.batch_size.min(self.rate_limit / 2).max(1)
    }
}
