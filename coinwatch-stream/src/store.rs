//! In-memory per-pair market state.
//!
//! Single source of truth for "current state": latest snapshot per pair,
//! bounded price/volume history ring buffers, and the rolling daily highs the
//! high-of-day detector compares against. All bounding/eviction invariants
//! are enforced here, never by callers.

use crate::{connection::ConnectionState, protocol::TickUpdate, universe::PairSeed};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};

/// Latest known state of a monitored pair.
#[derive(Debug, Clone, Serialize)]
pub struct MarketSnapshot {
    /// Pair label, e.g. `BTC/USD`.
    pub pair: String,
    pub price: f64,
    pub volume_24h: f64,
    pub change_pct_24h: f64,
    pub change_pct_1h: f64,
    pub high_24h: f64,
    pub last_updated: DateTime<Utc>,
}

/// Rolling high-water mark for the high-of-day detector.
#[derive(Debug, Clone, PartialEq)]
pub struct DailyHigh {
    pub price: f64,
    pub timestamp: DateTime<Utc>,
    pub volume_24h: f64,
}

/// Coverage metrics exposed to the presentation layer.
#[derive(Debug, Clone, Serialize)]
pub struct Analytics {
    pub total_pairs: usize,
    pub active_pairs: usize,
    pub monitored_pairs: usize,
    pub api_limits: ApiLimits,
    pub last_update: DateTime<Utc>,
    pub connection_status: ConnectionState,
    pub coverage: Coverage,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApiLimits {
    pub max_requests_per_second: usize,
    pub max_pairs_allowed: usize,
    pub current_pairs_monitored: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct Coverage {
    pub total: usize,
    pub current: usize,
    pub percentage: f64,
}

/// Per-pair snapshot plus bounded history buffers.
#[derive(Debug)]
pub struct MarketDataStore {
    quote: String,
    price_capacity: usize,
    volume_capacity: usize,
    snapshots: HashMap<String, MarketSnapshot>,
    price_history: HashMap<String, VecDeque<f64>>,
    volume_history: HashMap<String, VecDeque<(DateTime<Utc>, f64)>>,
    daily_highs: HashMap<String, DailyHigh>,
    last_update: HashMap<String, DateTime<Utc>>,
}

impl MarketDataStore {
    pub fn new(quote: impl Into<String>, price_capacity: usize, volume_capacity: usize) -> Self {
        Self {
            quote: quote.into(),
            price_capacity,
            volume_capacity,
            snapshots: HashMap::new(),
            price_history: HashMap::new(),
            volume_history: HashMap::new(),
            daily_highs: HashMap::new(),
            last_update: HashMap::new(),
        }
    }

    fn pair_label(&self, symbol: &str) -> String {
        format!("{symbol}/{}", self.quote)
    }

    /// Seed a pair from the bootstrap universe fetch: one snapshot, a
    /// one-element history in each buffer, and an initial daily high.
    pub fn seed_pair(&mut self, seed: &PairSeed, now: DateTime<Utc>) {
        let symbol = seed.symbol.clone();
        let high = seed.high_24h.unwrap_or(seed.price);

        self.snapshots.insert(
            symbol.clone(),
            MarketSnapshot {
                pair: self.pair_label(&symbol),
                price: seed.price,
                volume_24h: seed.volume_24h,
                change_pct_24h: seed.change_pct_24h,
                change_pct_1h: seed.change_pct_1h,
                high_24h: high,
                last_updated: now,
            },
        );
        self.price_history
            .insert(symbol.clone(), VecDeque::from([seed.price]));
        self.volume_history
            .insert(symbol.clone(), VecDeque::from([(now, seed.volume_24h)]));
        self.daily_highs.insert(
            symbol.clone(),
            DailyHigh {
                price: high,
                timestamp: now,
                volume_24h: seed.volume_24h,
            },
        );
        self.last_update.insert(symbol, now);
    }

    /// Merge a partial tick into the pair's snapshot and append to its
    /// history buffers. Missing fields inherit prior values; `high_24h` is
    /// the max of the previous high, any high reported on the tick, and the
    /// tick's price. Returns the merged snapshot.
    pub fn apply_tick(&mut self, tick: &TickUpdate, now: DateTime<Utc>) -> MarketSnapshot {
        let pair = self.pair_label(&tick.symbol);
        let entry = self
            .snapshots
            .entry(tick.symbol.clone())
            .or_insert_with(|| MarketSnapshot {
                pair,
                price: 0.0,
                volume_24h: 0.0,
                change_pct_24h: 0.0,
                change_pct_1h: 0.0,
                high_24h: 0.0,
                last_updated: now,
            });

        entry.high_24h = entry
            .high_24h
            .max(tick.high_24h.unwrap_or(0.0))
            .max(tick.price);
        entry.price = tick.price;
        if let Some(volume) = tick.volume_24h {
            entry.volume_24h = volume;
        }
        if let Some(pct) = tick.change_pct_24h {
            entry.change_pct_24h = pct;
        }
        if let Some(pct) = tick.change_pct_1h {
            entry.change_pct_1h = pct;
        }
        entry.last_updated = now;
        let snapshot = entry.clone();

        let prices = self.price_history.entry(tick.symbol.clone()).or_default();
        prices.push_back(tick.price);
        while prices.len() > self.price_capacity {
            prices.pop_front();
        }

        let volumes = self.volume_history.entry(tick.symbol.clone()).or_default();
        volumes.push_back((now, snapshot.volume_24h));
        while volumes.len() > self.volume_capacity {
            volumes.pop_front();
        }

        self.last_update.insert(tick.symbol.clone(), now);

        snapshot
    }

    /// All current snapshots, ordered by descending 24h volume.
    pub fn stream_data(&self) -> Vec<MarketSnapshot> {
        let mut snapshots: Vec<MarketSnapshot> = self.snapshots.values().cloned().collect();
        snapshots.sort_by(|a, b| {
            b.volume_24h
                .partial_cmp(&a.volume_24h)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        snapshots
    }

    pub fn snapshot(&self, symbol: &str) -> Option<&MarketSnapshot> {
        self.snapshots.get(symbol)
    }

    /// Recent prices for a symbol, oldest first.
    pub fn prices(&self, symbol: &str) -> Option<&VecDeque<f64>> {
        self.price_history.get(symbol)
    }

    pub fn volumes(&self, symbol: &str) -> Option<&VecDeque<(DateTime<Utc>, f64)>> {
        self.volume_history.get(symbol)
    }

    pub fn daily_high(&self, symbol: &str) -> Option<&DailyHigh> {
        self.daily_highs.get(symbol)
    }

    pub fn set_daily_high(&mut self, symbol: &str, high: DailyHigh) {
        self.daily_highs.insert(symbol.to_string(), high);
    }

    /// Number of pairs with a snapshot.
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    /// Pairs with a tracked daily high (the "monitored" count in analytics).
    pub fn monitored_pairs(&self) -> usize {
        self.daily_highs.len()
    }

    /// Whether any pair's last update is older than `max_age`.
    pub fn any_pair_stale(&self, now: DateTime<Utc>, max_age: chrono::Duration) -> bool {
        self.last_update
            .values()
            .any(|updated| now - *updated > max_age)
    }

    /// Drop all state. Used when the engine re-bootstraps from scratch.
    pub fn clear(&mut self) {
        self.snapshots.clear();
        self.price_history.clear();
        self.volume_history.clear();
        self.daily_highs.clear();
        self.last_update.clear();
    }
}
