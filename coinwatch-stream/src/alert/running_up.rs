//! Running-up detector.
//!
//! Compares the current price against the persisted sample from the lookback
//! window; the persistence worker performs the read and feeds the result
//! here, so the hot ingestion path never waits on storage.

use super::AlertEngine;
use crate::persist::{PriceSample, RunningUpAlertRow};
use chrono::{DateTime, Utc};
use tracing::info;

impl AlertEngine {
    /// Evaluate one pair against its reference sample. `initial` is the most
    /// recent persisted price from before the lookback cutoff.
    pub fn evaluate_running_up(
        &self,
        symbol: &str,
        current_price: f64,
        volume_24h: f64,
        initial: &PriceSample,
        now: DateTime<Utc>,
    ) -> Option<RunningUpAlertRow> {
        if initial.price <= 0.0 {
            return None;
        }

        let price_change_percent = (current_price - initial.price) / initial.price * 100.0;
        if price_change_percent < self.config.running_up_min_pct {
            return None;
        }

        info!(
            symbol,
            current_price,
            initial_price = initial.price,
            pct = price_change_percent,
            time_frame = %self.config.running_up_timeframe,
            "running up alert"
        );

        Some(RunningUpAlertRow {
            coin_id: symbol.to_lowercase(),
            symbol: symbol.to_lowercase(),
            name: symbol.to_string(),
            current_price,
            initial_price: initial.price,
            price_change_percent,
            volume_24h,
            market_cap: current_price * volume_24h,
            time_frame: self.config.running_up_timeframe.clone(),
            alert_time: now,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    fn sample(price: f64, age_minutes: i64, now: DateTime<Utc>) -> PriceSample {
        PriceSample {
            price,
            timestamp: now - chrono::Duration::minutes(age_minutes),
        }
    }

    #[test]
    fn test_two_percent_rise_alerts() {
        let engine = AlertEngine::new(&EngineConfig::default());
        let now = Utc::now();

        let alert = engine
            .evaluate_running_up("SOL", 51.0, 700_000.0, &sample(50.0, 11, now), now)
            .expect("alert expected");
        assert!((alert.price_change_percent - 2.0).abs() < 1e-9);
        assert_eq!(alert.initial_price, 50.0);
        assert_eq!(alert.current_price, 51.0);
        assert_eq!(alert.time_frame, "10m");
        assert_eq!(alert.coin_id, "sol");
        assert_eq!(alert.market_cap, 51.0 * 700_000.0);
    }

    #[test]
    fn test_sub_threshold_rise_is_silent() {
        let engine = AlertEngine::new(&EngineConfig::default());
        let now = Utc::now();

        // 0.8% over the window: below the 1% floor.
        let alert = engine.evaluate_running_up("SOL", 50.4, 700_000.0, &sample(50.0, 11, now), now);
        assert!(alert.is_none());
    }

    #[test]
    fn test_decline_is_silent() {
        let engine = AlertEngine::new(&EngineConfig::default());
        let now = Utc::now();

        let alert = engine.evaluate_running_up("SOL", 48.0, 700_000.0, &sample(50.0, 11, now), now);
        assert!(alert.is_none());
    }

    #[test]
    fn test_non_positive_reference_is_silent() {
        let engine = AlertEngine::new(&EngineConfig::default());
        let now = Utc::now();

        let alert = engine.evaluate_running_up("SOL", 51.0, 700_000.0, &sample(0.0, 11, now), now);
        assert!(alert.is_none());
    }
}
