//! High-of-day detector.
//!
//! Tracks a rolling 24h high-water mark per symbol. A tick that beats the
//! stored high by the configured percentage, with sufficient 24h volume,
//! emits an alert and advances the stored high. Expired highs are reset, not
//! compared against.

use super::AlertEngine;
use crate::{
    persist::HighOfDayAlertRow,
    store::{DailyHigh, MarketDataStore},
};
use chrono::{DateTime, Utc};
use tracing::info;

impl AlertEngine {
    /// Check one tick against the symbol's stored daily high. Mutates the
    /// stored high (initialise, reset on expiry, or advance on alert) and
    /// returns the alert row to persist, if any.
    pub fn check_high_of_day(
        &self,
        store: &mut MarketDataStore,
        symbol: &str,
        price: f64,
        volume_24h: f64,
        now: DateTime<Utc>,
    ) -> Option<HighOfDayAlertRow> {
        let current = DailyHigh {
            price,
            timestamp: now,
            volume_24h,
        };

        let Some(high) = store.daily_high(symbol).cloned() else {
            store.set_daily_high(symbol, current);
            return None;
        };

        let expiry = chrono::Duration::from_std(self.config.high_expiry)
            .unwrap_or_else(|_| chrono::Duration::hours(24));
        if now - high.timestamp > expiry {
            // Expired record: replace regardless of magnitude, no alert.
            store.set_daily_high(symbol, current);
            return None;
        }

        let threshold = high.price * (1.0 + self.config.hod_min_price_increase_pct / 100.0);
        if price <= threshold || volume_24h < self.config.hod_min_volume {
            return None;
        }

        let percentage_above_high = (price - high.price) / high.price * 100.0;
        info!(
            symbol,
            price,
            previous_high = high.price,
            pct = percentage_above_high,
            "high of day alert"
        );
        store.set_daily_high(symbol, current);

        Some(HighOfDayAlertRow {
            coin_id: symbol.to_lowercase(),
            symbol: symbol.to_lowercase(),
            name: symbol.to_string(),
            current_price: price,
            previous_high: high.price,
            percentage_above_high,
            volume_24h,
            market_cap: price * volume_24h,
            alert_time: now,
            is_confirmed: true,
        })
    }
}
