//! Upstream connection management.
//!
//! Models the link as an explicit state machine driven by a single loop:
//! `Disconnected -> Connecting -> Connected -> Reconnecting -> Disconnected`.
//! A session covers one socket lifetime: connect with timeout, authenticate,
//! heartbeat, staleness watchdog, and idempotent teardown. Backoff between
//! sessions is owned by the engine run loop.

use crate::{
    config::EngineConfig,
    engine::{self, Shared},
    error::StreamError,
    protocol::{self, ClientMessage, ServerEvent},
    subscription::SubscriptionScheduler,
};
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::{mpsc, watch},
    time::{interval, timeout},
};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

/// Status of the upstream link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
        };
        f.write_str(label)
    }
}

/// Exponential reconnect backoff with random jitter.
///
/// `delay(n) = min(delay(n-1) * multiplier + jitter, max)`, starting from the
/// configured initial delay and reset to it on any successful connect.
#[derive(Debug)]
pub struct Backoff {
    current: Duration,
    initial: Duration,
    max: Duration,
    multiplier: f64,
    max_jitter: Duration,
}

impl Backoff {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            current: config.initial_reconnect_delay,
            initial: config.initial_reconnect_delay,
            max: config.max_reconnect_delay,
            multiplier: config.backoff_multiplier,
            max_jitter: config.max_jitter,
        }
    }

    /// Next delay to wait before the upcoming attempt.
    pub fn next(&mut self) -> Duration {
        let jitter = if self.max_jitter.is_zero() {
            Duration::ZERO
        } else {
            let jitter_ms = rand::random_range(0.0..self.max_jitter.as_millis() as f64);
            Duration::from_millis(jitter_ms as u64)
        };
        self.advance(jitter)
    }

    /// Advance the schedule with an explicit jitter (deterministic in tests).
    pub fn advance(&mut self, jitter: Duration) -> Duration {
        let scaled = self.current.mul_f64(self.multiplier) + jitter;
        self.current = scaled.min(self.max);
        self.current
    }

    /// Reset to the initial delay after a successful connect.
    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

/// How a session ended, for sessions that got past the connect phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The link died or went stale; the run loop should back off and retry.
    Reconnect,
    /// The engine was asked to stop.
    Stopped,
}

/// Control messages from auxiliary tasks back into the session loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SessionControl {
    /// Subscription retries exhausted; force a full reconnect.
    ForceReconnect,
}

/// Handles for the tasks a session spawns. Teardown is idempotent: a second
/// `cleanup` call finds nothing left to abort.
struct SessionTasks {
    writer: Option<tokio::task::JoinHandle<()>>,
    drain: Option<tokio::task::JoinHandle<()>>,
}

impl SessionTasks {
    fn cleanup(&mut self, shared: &Shared) {
        if let Some(writer) = self.writer.take() {
            writer.abort();
        }
        if let Some(drain) = self.drain.take() {
            drain.abort();
        }
        shared.subs.clear();
        shared.set_status(ConnectionState::Disconnected);
    }
}

impl Drop for SessionTasks {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.take() {
            writer.abort();
        }
        if let Some(drain) = self.drain.take() {
            drain.abort();
        }
    }
}

/// Run one connection session: connect, authenticate, subscribe, and pump
/// inbound messages until the link dies, goes stale, or the engine stops.
///
/// Errors are only returned for failures before the link was usable (connect
/// timeout/refusal) and for authentication rejection, which is non-retryable
/// for the attempt. Everything after a successful connect resolves to a
/// [`SessionEnd`].
pub(crate) async fn run_session(
    config: &EngineConfig,
    shared: &Arc<Shared>,
    scheduler: &Arc<SubscriptionScheduler>,
    persist_tx: &mpsc::Sender<engine::PersistJob>,
    stop_rx: &mut watch::Receiver<bool>,
) -> Result<SessionEnd, StreamError> {
    let url = format!("{}?api_key={}", config.ws_url, config.api_key);

    shared.set_status(ConnectionState::Connecting);
    info!(url = %config.ws_url, "connecting to upstream feed");

    let (ws_stream, _) = match timeout(config.connect_timeout, connect_async(&url)).await {
        Ok(Ok(connected)) => connected,
        Ok(Err(error)) => {
            shared.set_status(ConnectionState::Disconnected);
            return Err(StreamError::from(error));
        }
        Err(_) => {
            shared.set_status(ConnectionState::Disconnected);
            return Err(StreamError::ConnectTimeout(config.connect_timeout));
        }
    };

    info!("connected to upstream feed");
    let (mut sink, mut read) = ws_stream.split();

    // Writer task owns the sink; everything outbound goes through one queue
    // so auth, heartbeats, and subscription batches never interleave frames.
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Message>(64);
    let writer = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            if let Err(error) = sink.send(message).await {
                debug!(%error, "outbound write failed, writer shutting down");
                break;
            }
        }
    });

    let (ctrl_tx, mut ctrl_rx) = mpsc::channel::<SessionControl>(4);

    // Subscription drain starts after a short settle delay, re-prepared from
    // the full intended universe on every connect.
    let drain = tokio::spawn({
        let scheduler = Arc::clone(scheduler);
        let shared = Arc::clone(shared);
        let outbound_tx = outbound_tx.clone();
        let ctrl_tx = ctrl_tx.clone();
        let settle_delay = config.settle_delay;
        async move {
            tokio::time::sleep(settle_delay).await;
            scheduler.drain(&shared, outbound_tx, ctrl_tx).await;
        }
    });

    let mut tasks = SessionTasks {
        writer: Some(writer),
        drain: Some(drain),
    };

    let auth = ClientMessage::AuthenticationRequest {
        api_key: config.api_key.clone(),
    };
    if outbound_tx.send(Message::text(auth.to_text())).await.is_err() {
        tasks.cleanup(shared);
        return Err(StreamError::Transport("failed to send authentication".into()));
    }

    shared.set_status(ConnectionState::Connected);
    shared.touch_last_message(Utc::now());

    let mut heartbeat = interval(config.heartbeat_interval);
    heartbeat.tick().await; // first tick resolves immediately
    let mut watchdog = interval(config.watchdog_interval);
    watchdog.tick().await;

    loop {
        tokio::select! {
            inbound = read.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        let now = Utc::now();
                        shared.touch_last_message(now);
                        match protocol::parse_frame(&text) {
                            ServerEvent::Tick(tick) => {
                                engine::process_tick(shared, persist_tx, &tick, now);
                            }
                            ServerEvent::AuthRejected => {
                                error!("upstream rejected API key");
                                tasks.cleanup(shared);
                                return Err(StreamError::AuthRejected);
                            }
                            ServerEvent::InvalidSub(channel) => {
                                // Localised: drop the offending channel, keep
                                // the connection and every other subscription.
                                match channel {
                                    Some(key) => {
                                        warn!(channel = %key, "subscription rejected, dropping");
                                        shared.subs.remove(&key);
                                    }
                                    None => warn!("subscription rejected without channel key"),
                                }
                            }
                            ServerEvent::Other => {}
                        }
                    }
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                        shared.touch_last_message(Utc::now());
                    }
                    Some(Ok(Message::Close(frame))) => {
                        warn!(?frame, "upstream closed the connection");
                        tasks.cleanup(shared);
                        return Ok(SessionEnd::Reconnect);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(error)) => {
                        error!(%error, "socket error");
                        tasks.cleanup(shared);
                        return Ok(SessionEnd::Reconnect);
                    }
                    None => {
                        warn!("upstream stream ended");
                        tasks.cleanup(shared);
                        return Ok(SessionEnd::Reconnect);
                    }
                }
            }
            _ = heartbeat.tick() => {
                let frame = Message::text(ClientMessage::Heartbeat.to_text());
                if outbound_tx.send(frame).await.is_err() {
                    warn!("heartbeat failed, writer gone");
                    tasks.cleanup(shared);
                    return Ok(SessionEnd::Reconnect);
                }
                debug!("heartbeat sent");
            }
            _ = watchdog.tick() => {
                if link_is_stale(config, shared) {
                    warn!("no recent messages, connection appears stale, forcing reconnect");
                    tasks.cleanup(shared);
                    return Ok(SessionEnd::Reconnect);
                }
            }
            control = ctrl_rx.recv() => {
                if let Some(SessionControl::ForceReconnect) = control {
                    warn!("subscription retries exhausted, forcing reconnect");
                    tasks.cleanup(shared);
                    return Ok(SessionEnd::Reconnect);
                }
            }
            _ = stop_rx.changed() => {
                info!("stop requested, closing session");
                tasks.cleanup(shared);
                return Ok(SessionEnd::Stopped);
            }
        }
    }
}

/// Zombie-connection check: the link counts as stale when nothing inbound has
/// arrived within the stale window and at least one pair's last update is
/// equally old (or the writer has died), even if the socket reports open.
fn link_is_stale(config: &EngineConfig, shared: &Shared) -> bool {
    let now = Utc::now();
    let stale_after = chrono::Duration::from_std(config.stale_after)
        .unwrap_or_else(|_| chrono::Duration::seconds(10));

    if now - shared.last_message() <= stale_after {
        return false;
    }

    let store = shared.store.read();
    store.is_empty() || store.any_pair_stale(now, stale_after)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::TickUpdate;

    fn backoff() -> Backoff {
        Backoff::new(&EngineConfig::default())
    }

    fn tick(symbol: &str, price: f64) -> TickUpdate {
        TickUpdate {
            symbol: symbol.to_string(),
            price,
            volume_24h: None,
            change_pct_24h: None,
            change_pct_1h: None,
            high_24h: None,
        }
    }

    #[test]
    fn test_backoff_recurrence() {
        let mut backoff = backoff();

        // delay(0) = 1000; delay(n) = min(delay(n-1) * 1.5 + jitter, 30000)
        let mut expected = 1_000.0_f64;
        for _ in 0..10 {
            let jitter = Duration::from_millis(250);
            let delay = backoff.advance(jitter);
            expected = (expected * 1.5 + 250.0).min(30_000.0);
            assert_eq!(delay, Duration::from_millis(expected as u64));
        }

        // Saturates at the 30s cap.
        assert_eq!(expected, 30_000.0);
    }

    #[test]
    fn test_backoff_resets_after_successful_connect() {
        let mut backoff = backoff();
        backoff.advance(Duration::ZERO);
        backoff.advance(Duration::ZERO);
        backoff.reset();
        assert_eq!(backoff.advance(Duration::ZERO), Duration::from_millis(1_500));
    }

    #[test]
    fn test_backoff_jitter_bounded() {
        let mut backoff = backoff();
        let first = backoff.next();
        // 1000 * 1.5 + jitter in [0, 1000)
        assert!(first >= Duration::from_millis(1_500));
        assert!(first < Duration::from_millis(2_500));
    }

    #[test]
    fn test_backoff_with_zero_jitter_configured() {
        let mut config = EngineConfig::default();
        config.max_jitter = Duration::ZERO;
        let mut backoff = Backoff::new(&config);

        assert_eq!(backoff.next(), Duration::from_millis(1_500));
        assert_eq!(backoff.next(), Duration::from_millis(2_250));
    }

    #[test]
    fn test_link_is_stale_fresh_link() {
        let config = EngineConfig::default();
        let shared = Shared::new(&config);
        shared.touch_last_message(Utc::now());

        // Recent inbound traffic: never stale, even with an empty store.
        assert!(!link_is_stale(&config, &shared));
    }

    #[test]
    fn test_link_is_stale_quiet_link_empty_store() {
        let config = EngineConfig::default();
        let shared = Shared::new(&config);
        shared.touch_last_message(Utc::now() - chrono::Duration::seconds(30));

        assert!(link_is_stale(&config, &shared));
    }

    #[test]
    fn test_link_is_stale_quiet_link_fresh_pairs() {
        let config = EngineConfig::default();
        let shared = Shared::new(&config);
        let now = Utc::now();
        shared.touch_last_message(now - chrono::Duration::seconds(30));
        shared.store.write().apply_tick(&tick("BTC", 100.0), now);

        // Every pair updated recently: the quiet link is not yet a zombie.
        assert!(!link_is_stale(&config, &shared));
    }

    #[test]
    fn test_link_is_stale_quiet_link_stale_pair() {
        let config = EngineConfig::default();
        let shared = Shared::new(&config);
        let now = Utc::now();
        shared.touch_last_message(now - chrono::Duration::seconds(30));
        shared.store.write().apply_tick(&tick("BTC", 100.0), now);
        shared
            .store
            .write()
            .apply_tick(&tick("ETH", 2_000.0), now - chrono::Duration::seconds(30));

        assert!(link_is_stale(&config, &shared));
    }

    #[test]
    fn test_connection_state_labels() {
        assert_eq!(ConnectionState::Connected.to_string(), "connected");
        assert_eq!(ConnectionState::Reconnecting.to_string(), "reconnecting");
        assert_eq!(
            serde_json::to_string(&ConnectionState::Disconnected).unwrap(),
            r#""disconnected""#
        );
    }
}
