//! Symbol universe bootstrap.
//!
//! Pages through the upstream top-by-volume REST listing to build the set of
//! base symbols to subscribe to, plus per-pair seed data so the store has a
//! populated snapshot before the first tick arrives.

use crate::{config::EngineConfig, error::BootstrapError};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Bootstrap state for one pair: the REST listing's current values, used to
/// seed the store before any tick arrives.
#[derive(Debug, Clone, PartialEq)]
pub struct PairSeed {
    pub symbol: String,
    pub price: f64,
    pub volume_24h: f64,
    pub change_pct_24h: f64,
    pub change_pct_1h: f64,
    pub high_24h: Option<f64>,
}

/// The bootstrapped universe: subscribable symbols plus store seeds.
#[derive(Debug, Clone, Default)]
pub struct Universe {
    /// Base symbols eligible for subscription, in listing order.
    pub symbols: Vec<String>,
    /// Seed data for every listed pair with raw quote data.
    pub seeds: Vec<PairSeed>,
}

#[derive(Debug, Deserialize)]
struct TopListResponse {
    #[serde(rename = "Data", default)]
    data: Vec<TopListEntry>,
}

#[derive(Debug, Deserialize)]
struct TopListEntry {
    #[serde(rename = "CoinInfo")]
    coin_info: CoinInfo,
    #[serde(rename = "RAW")]
    raw: Option<HashMap<String, RawQuote>>,
    #[serde(rename = "DISPLAY")]
    display: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct CoinInfo {
    #[serde(rename = "Name")]
    name: String,
}

#[derive(Debug, Deserialize)]
struct RawQuote {
    #[serde(rename = "PRICE", default)]
    price: Option<f64>,
    #[serde(rename = "VOLUME24HOUR", default)]
    volume_24h: Option<f64>,
    #[serde(rename = "CHANGEPCT24HOUR", default)]
    change_pct_24h: Option<f64>,
    #[serde(rename = "CHANGEPCTHOUR", default)]
    change_pct_1h: Option<f64>,
    #[serde(rename = "HIGH24HOUR", default)]
    high_24h: Option<f64>,
}

/// Fold one listing page into the universe. Symbols require both raw and
/// display quotes in the requested quote currency; seeds only require raw.
fn collect_page(page: TopListResponse, quote: &str, universe: &mut Universe) -> usize {
    let mut added = 0;
    for entry in page.data {
        let symbol = entry.coin_info.name;
        let raw = entry.raw.as_ref().and_then(|raw| raw.get(quote));
        let displayed = entry
            .display
            .as_ref()
            .and_then(|display| display.get(quote))
            .is_some();

        if raw.is_some() && displayed && !universe.symbols.contains(&symbol) {
            universe.symbols.push(symbol.clone());
            added += 1;
        }

        if let Some(raw) = raw {
            let price = raw.price.unwrap_or(0.0);
            universe.seeds.push(PairSeed {
                symbol,
                price,
                volume_24h: raw.volume_24h.unwrap_or(0.0),
                change_pct_24h: raw.change_pct_24h.unwrap_or(0.0),
                change_pct_1h: raw.change_pct_1h.unwrap_or(0.0),
                high_24h: raw.high_24h.or(Some(price)),
            });
        }
    }
    added
}

/// Fetch the full symbol universe, one rate-limited page at a time.
///
/// A 429 on any page is retried after a fixed delay; once the retry budget
/// for a page is spent the whole bootstrap fails. An otherwise successful
/// crawl that yields zero subscribable symbols is also an error.
pub async fn fetch_universe(config: &EngineConfig) -> Result<Universe, BootstrapError> {
    let client = Client::builder()
        .timeout(config.bootstrap_request_timeout)
        .build()?;

    let (page_size, pages) = page_plan(config);
    let mut universe = Universe::default();

    for page_index in 0..pages {
        let page = fetch_page(&client, config, page_index, page_size).await?;
        let added = collect_page(page, &config.quote, &mut universe);
        debug!(
            page = page_index + 1,
            pages, added, "universe page collected"
        );

        if universe.symbols.len() >= config.max_pairs {
            break;
        }
        tokio::time::sleep(config.bootstrap_page_delay).await;
    }

    universe.symbols.truncate(config.max_pairs);

    if universe.symbols.is_empty() {
        return Err(BootstrapError::Empty);
    }

    info!(
        symbols = universe.symbols.len(),
        seeds = universe.seeds.len(),
        "universe bootstrap complete"
    );
    Ok(universe)
}

/// REST paging uses the configured batch cap directly; the halved effective
/// size only applies to the WebSocket subscription budget.
fn page_plan(config: &EngineConfig) -> (usize, usize) {
    let page_size = config.batch_size.max(1);
    (page_size, config.max_pairs.div_ceil(page_size))
}

async fn fetch_page(
    client: &Client,
    config: &EngineConfig,
    page: usize,
    page_size: usize,
) -> Result<TopListResponse, BootstrapError> {
    let mut retries = 0;
    loop {
        let response = client
            .get(&config.rest_url)
            .query(&[
                ("limit", page_size.to_string()),
                ("page", page.to_string()),
                ("tsym", config.quote.clone()),
                ("api_key", config.api_key.clone()),
            ])
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => {
                return response
                    .json::<TopListResponse>()
                    .await
                    .map_err(|error| BootstrapError::Malformed(error.to_string()));
            }
            StatusCode::TOO_MANY_REQUESTS => {
                retries += 1;
                if retries > config.rate_limit_max_retries {
                    return Err(BootstrapError::RateLimited { retries });
                }
                warn!(page, retries, "universe fetch rate limited, retrying");
                tokio::time::sleep(config.rate_limit_retry_delay).await;
            }
            status => return Err(BootstrapError::Status(status)),
        }
    }
}
