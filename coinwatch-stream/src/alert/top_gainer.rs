//! Top-gainer screen.
//!
//! Qualifies a pair on its 24h move, absolute volume, and volume-to-marketcap
//! ratio, then stamps the summary row with a 24-period RSI over the pair's
//! bounded price history. Market cap is estimated as price x 24h volume since
//! the feed carries no supply data.

use super::{rsi::rsi, AlertEngine};
use crate::{persist::TopGainerRow, store::MarketDataStore};
use chrono::{DateTime, Utc};
use tracing::debug;

impl AlertEngine {
    /// Screen one pair's current snapshot. Returns the summary row to upsert
    /// when every criterion holds.
    pub fn check_top_gainer(
        &self,
        store: &MarketDataStore,
        symbol: &str,
        now: DateTime<Utc>,
    ) -> Option<TopGainerRow> {
        let snapshot = store.snapshot(symbol)?;
        if snapshot.price <= 0.0 || snapshot.volume_24h <= 0.0 {
            return None;
        }

        let market_cap = snapshot.price * snapshot.volume_24h;
        let ratio = snapshot.volume_24h / market_cap;

        if snapshot.change_pct_24h < self.config.top_gainer_min_pct_24h
            || snapshot.volume_24h < self.config.top_gainer_min_volume
            || ratio < self.config.top_gainer_min_volume_mcap_ratio
        {
            return None;
        }

        let prices: Vec<f64> = store
            .prices(symbol)
            .map(|history| history.iter().copied().collect())
            .unwrap_or_default();
        let rsi_24h = rsi(&prices, self.config.rsi_periods);

        debug!(
            symbol,
            price = snapshot.price,
            pct_24h = snapshot.change_pct_24h,
            rsi_24h,
            "top gainer qualified"
        );

        Some(TopGainerRow {
            coin_id: symbol.to_lowercase(),
            symbol: symbol.to_lowercase(),
            name: symbol.to_uppercase(),
            current_price: snapshot.price,
            market_cap,
            total_volume: snapshot.volume_24h,
            price_change_24h: snapshot.change_pct_24h,
            volume_market_cap_ratio: ratio,
            rsi_24h,
            updated_at: now,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::EngineConfig, protocol::TickUpdate};

    fn tick(price: f64, volume: f64, pct_24h: f64) -> TickUpdate {
        TickUpdate {
            symbol: "SOL".to_string(),
            price,
            volume_24h: Some(volume),
            change_pct_24h: Some(pct_24h),
            change_pct_1h: None,
            high_24h: None,
        }
    }

    fn populated(price: f64, volume: f64, pct_24h: f64) -> MarketDataStore {
        let mut store = MarketDataStore::new("USD", 300, 60);
        store.apply_tick(&tick(price, volume, pct_24h), Utc::now());
        store
    }

    #[test]
    fn test_qualifying_pair_produces_row() {
        let engine = AlertEngine::new(&EngineConfig::default());
        // Price 0.5 gives ratio = volume / (price * volume) = 2.0.
        let store = populated(0.5, 600_000.0, 8.0);

        let row = engine
            .check_top_gainer(&store, "SOL", Utc::now())
            .expect("row expected");
        assert_eq!(row.coin_id, "sol");
        assert_eq!(row.name, "SOL");
        assert_eq!(row.market_cap, 0.5 * 600_000.0);
        assert_eq!(row.total_volume, 600_000.0);
        assert_eq!(row.price_change_24h, 8.0);
        // Single price sample: RSI falls back to neutral.
        assert_eq!(row.rsi_24h, 50.0);
    }

    #[test]
    fn test_low_24h_change_disqualifies() {
        let engine = AlertEngine::new(&EngineConfig::default());
        let store = populated(0.5, 600_000.0, 6.9);
        assert!(engine.check_top_gainer(&store, "SOL", Utc::now()).is_none());
    }

    #[test]
    fn test_low_volume_disqualifies() {
        let engine = AlertEngine::new(&EngineConfig::default());
        let store = populated(0.5, 499_999.0, 8.0);
        assert!(engine.check_top_gainer(&store, "SOL", Utc::now()).is_none());
    }

    #[test]
    fn test_low_volume_mcap_ratio_disqualifies() {
        let engine = AlertEngine::new(&EngineConfig::default());
        // Ratio collapses to 1/price; price 200 gives 0.005 < 0.01.
        let store = populated(200.0, 600_000.0, 8.0);
        assert!(engine.check_top_gainer(&store, "SOL", Utc::now()).is_none());
    }

    #[test]
    fn test_unknown_symbol_is_silent() {
        let engine = AlertEngine::new(&EngineConfig::default());
        let store = MarketDataStore::new("USD", 300, 60);
        assert!(engine.check_top_gainer(&store, "SOL", Utc::now()).is_none());
    }

    #[test]
    fn test_rsi_reflects_price_history() {
        let engine = AlertEngine::new(&EngineConfig::default());
        let mut store = MarketDataStore::new("USD", 300, 60);
        let now = Utc::now();
        // 30 monotonically rising samples: full RSI window of pure gains.
        for i in 0..30 {
            store.apply_tick(&tick(0.5 + i as f64 * 0.001, 600_000.0, 8.0), now);
        }

        let row = engine.check_top_gainer(&store, "SOL", now).expect("row");
        assert_eq!(row.rsi_24h, 100.0);
    }
}
