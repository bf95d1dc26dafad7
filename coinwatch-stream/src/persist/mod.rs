//! Durable storage boundary.
//!
//! The engine only knows this trait and the row shapes; failures are logged
//! and swallowed by the caller, never propagated into the ingestion path.

use crate::error::PersistError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod memory;
pub mod supabase;

pub use memory::MemoryGateway;
pub use supabase::SupabaseGateway;

/// One persisted price sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceSample {
    pub price: f64,
    pub timestamp: DateTime<Utc>,
}

/// `price_history` row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceHistoryRow {
    pub coin_id: String,
    pub price: f64,
    pub volume_24h: f64,
    pub timestamp: DateTime<Utc>,
}

/// `high_of_day_alerts` row. Deduplicated before insert on its natural key
/// (`coin_id` + the high it broke): the stored high advances on every alert,
/// so one row exists per broken high level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HighOfDayAlertRow {
    pub coin_id: String,
    pub symbol: String,
    pub name: String,
    pub current_price: f64,
    pub previous_high: f64,
    pub percentage_above_high: f64,
    pub volume_24h: f64,
    pub market_cap: f64,
    pub alert_time: DateTime<Utc>,
    pub is_confirmed: bool,
}

/// `price_alerts` row for running-up detections. Duplicates per timeframe are
/// expected; no pre-existence check is performed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunningUpAlertRow {
    pub coin_id: String,
    pub symbol: String,
    pub name: String,
    pub current_price: f64,
    pub initial_price: f64,
    pub price_change_percent: f64,
    pub volume_24h: f64,
    pub market_cap: f64,
    pub time_frame: String,
    pub alert_time: DateTime<Utc>,
}

/// `top_gainer_coins` row, upserted keyed by `coin_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopGainerRow {
    pub coin_id: String,
    pub symbol: String,
    pub name: String,
    pub current_price: f64,
    pub market_cap: f64,
    pub total_volume: f64,
    pub price_change_24h: f64,
    pub volume_market_cap_ratio: f64,
    pub rsi_24h: f64,
    pub updated_at: DateTime<Utc>,
}

/// Durable store for price history and alert/summary rows.
///
/// All operations may fail; the engine treats failures as non-fatal. A failed
/// dedup read degrades to "skip insert" rather than "insert blindly".
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    /// Append one price sample.
    async fn insert_price_history(&self, row: &PriceHistoryRow) -> Result<(), PersistError>;

    /// Whether a high-of-day alert already exists for this natural key.
    async fn high_of_day_exists(
        &self,
        coin_id: &str,
        previous_high: f64,
    ) -> Result<bool, PersistError>;

    /// Insert a high-of-day alert row.
    async fn insert_high_of_day(&self, row: &HighOfDayAlertRow) -> Result<(), PersistError>;

    /// Insert a running-up alert row.
    async fn insert_running_up(&self, row: &RunningUpAlertRow) -> Result<(), PersistError>;

    /// Insert-or-replace the top-gainer summary row keyed by `coin_id`.
    async fn upsert_top_gainer(&self, row: &TopGainerRow) -> Result<(), PersistError>;

    /// The most recent persisted sample for `coin_id` strictly before
    /// `cutoff`, if any.
    async fn query_price_before(
        &self,
        coin_id: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<Option<PriceSample>, PersistError>;
}
