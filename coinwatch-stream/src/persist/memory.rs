//! In-process gateway.
//!
//! Backs tests and offline runs with the same contract as the real store,
//! including the upsert-by-`coin_id` semantics of the top-gainer table.

use super::{
    HighOfDayAlertRow, PersistenceGateway, PriceHistoryRow, PriceSample, RunningUpAlertRow,
    TopGainerRow,
};
use crate::error::PersistError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;

#[derive(Debug, Default)]
struct Tables {
    price_history: Vec<PriceHistoryRow>,
    high_of_day: Vec<HighOfDayAlertRow>,
    running_up: Vec<RunningUpAlertRow>,
    top_gainers: HashMap<String, TopGainerRow>,
}

/// Gateway holding all rows in memory.
#[derive(Debug, Default)]
pub struct MemoryGateway {
    tables: Mutex<Tables>,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn price_history(&self) -> Vec<PriceHistoryRow> {
        self.tables.lock().price_history.clone()
    }

    pub fn high_of_day_alerts(&self) -> Vec<HighOfDayAlertRow> {
        self.tables.lock().high_of_day.clone()
    }

    pub fn running_up_alerts(&self) -> Vec<RunningUpAlertRow> {
        self.tables.lock().running_up.clone()
    }

    pub fn top_gainers(&self) -> Vec<TopGainerRow> {
        self.tables.lock().top_gainers.values().cloned().collect()
    }
}

#[async_trait]
impl PersistenceGateway for MemoryGateway {
    async fn insert_price_history(&self, row: &PriceHistoryRow) -> Result<(), PersistError> {
        self.tables.lock().price_history.push(row.clone());
        Ok(())
    }

    async fn high_of_day_exists(
        &self,
        coin_id: &str,
        previous_high: f64,
    ) -> Result<bool, PersistError> {
        Ok(self
            .tables
            .lock()
            .high_of_day
            .iter()
            .any(|row| row.coin_id == coin_id && row.previous_high == previous_high))
    }

    async fn insert_high_of_day(&self, row: &HighOfDayAlertRow) -> Result<(), PersistError> {
        self.tables.lock().high_of_day.push(row.clone());
        Ok(())
    }

    async fn insert_running_up(&self, row: &RunningUpAlertRow) -> Result<(), PersistError> {
        self.tables.lock().running_up.push(row.clone());
        Ok(())
    }

    async fn upsert_top_gainer(&self, row: &TopGainerRow) -> Result<(), PersistError> {
        self.tables
            .lock()
            .top_gainers
            .insert(row.coin_id.clone(), row.clone());
        Ok(())
    }

    async fn query_price_before(
        &self,
        coin_id: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<Option<PriceSample>, PersistError> {
        Ok(self
            .tables
            .lock()
            .price_history
            .iter()
            .filter(|row| row.coin_id == coin_id && row.timestamp < cutoff)
            .max_by_key(|row| row.timestamp)
            .map(|row| PriceSample {
                price: row.price,
                timestamp: row.timestamp,
            }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn price_row(coin_id: &str, price: f64, timestamp: DateTime<Utc>) -> PriceHistoryRow {
        PriceHistoryRow {
            coin_id: coin_id.to_string(),
            price,
            volume_24h: 0.0,
            timestamp,
        }
    }

    #[tokio::test]
    async fn test_query_price_before_returns_latest_older_sample() {
        let gateway = MemoryGateway::new();
        let now = Utc::now();

        for minutes in [30, 20, 11, 5] {
            gateway
                .insert_price_history(&price_row(
                    "btc",
                    minutes as f64,
                    now - chrono::Duration::minutes(minutes),
                ))
                .await
                .unwrap();
        }

        let cutoff = now - chrono::Duration::minutes(10);
        let sample = gateway.query_price_before("btc", cutoff).await.unwrap();
        // The 11-minute-old sample is the newest one strictly before cutoff.
        assert_eq!(sample.unwrap().price, 11.0);

        assert_eq!(
            gateway
                .query_price_before("eth", cutoff)
                .await
                .unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_top_gainer_upsert_is_idempotent() {
        let gateway = MemoryGateway::new();
        let now = Utc::now();
        let mut row = TopGainerRow {
            coin_id: "sol".to_string(),
            symbol: "sol".to_string(),
            name: "SOL".to_string(),
            current_price: 100.0,
            market_cap: 1_000_000.0,
            total_volume: 600_000.0,
            price_change_24h: 8.0,
            volume_market_cap_ratio: 0.6,
            rsi_24h: 55.0,
            updated_at: now,
        };

        gateway.upsert_top_gainer(&row).await.unwrap();
        row.current_price = 110.0;
        gateway.upsert_top_gainer(&row).await.unwrap();

        let rows = gateway.top_gainers();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].current_price, 110.0);
    }
}
