//! Relative Strength Index over a bounded price history.

/// Wilder-style RSI over the most recent `periods` deltas.
///
/// Returns 50 when fewer than `periods + 1` samples exist, and 100 when the
/// window contains no losses.
pub fn rsi(prices: &[f64], periods: usize) -> f64 {
    if periods == 0 || prices.len() < periods + 1 {
        return 50.0;
    }

    let window = &prices[prices.len() - (periods + 1)..];
    let mut gains = 0.0;
    let mut losses = 0.0;
    for pair in window.windows(2) {
        let delta = pair[1] - pair[0];
        if delta >= 0.0 {
            gains += delta;
        } else {
            losses -= delta;
        }
    }

    let avg_gain = gains / periods as f64;
    let avg_loss = losses / periods as f64;

    if avg_loss == 0.0 {
        return 100.0;
    }

    let rs = avg_gain / avg_loss;
    100.0 - (100.0 / (1.0 + rs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rsi_under_sampled_returns_50() {
        assert_eq!(rsi(&[], 24), 50.0);
        let prices: Vec<f64> = (0..24).map(|i| i as f64).collect();
        // 24 samples give only 23 deltas for a 24-period RSI.
        assert_eq!(rsi(&prices, 24), 50.0);
    }

    #[test]
    fn test_rsi_all_gains_returns_100() {
        let prices: Vec<f64> = (0..25).map(|i| 100.0 + i as f64).collect();
        assert_eq!(rsi(&prices, 24), 100.0);
    }

    #[test]
    fn test_rsi_balanced_gains_and_losses() {
        // Alternating +1/-1 over the window: avg gain == avg loss -> RSI 50.
        let mut prices = vec![100.0];
        for i in 0..24 {
            let last = *prices.last().unwrap();
            prices.push(if i % 2 == 0 { last + 1.0 } else { last - 1.0 });
        }
        let value = rsi(&prices, 24);
        assert!((value - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_rsi_uses_most_recent_window() {
        // A long losing streak followed by 25 rising samples: only the
        // recent window counts, so RSI is 100.
        let mut prices: Vec<f64> = (0..100).map(|i| 1_000.0 - i as f64).collect();
        let floor = *prices.last().unwrap();
        prices.extend((1..=25).map(|i| floor + i as f64));
        assert_eq!(rsi(&prices, 24), 100.0);
    }

    #[test]
    fn test_rsi_known_value() {
        // One loss of 2 and 23 gains of 1 in the window:
        // avg_gain = 23/24, avg_loss = 2/24, RS = 11.5, RSI = 92.
        let mut prices = vec![100.0];
        for _ in 0..23 {
            let last = *prices.last().unwrap();
            prices.push(last + 1.0);
        }
        let last = *prices.last().unwrap();
        prices.push(last - 2.0);

        let value = rsi(&prices, 24);
        let expected = 100.0 - 100.0 / (1.0 + (23.0 / 24.0) / (2.0 / 24.0));
        assert!((value - expected).abs() < 1e-9);
    }
}
