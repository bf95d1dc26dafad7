//! PostgREST-backed gateway (Supabase).
//!
//! Rows map 1:1 onto tables under `/rest/v1/`; upserts use
//! `Prefer: resolution=merge-duplicates` with `on_conflict=coin_id`.

use super::{
    HighOfDayAlertRow, PersistenceGateway, PriceHistoryRow, PriceSample, RunningUpAlertRow,
    TopGainerRow,
};
use crate::error::PersistError;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, Response};
use serde::Serialize;
use url::Url;

const TABLE_PRICE_HISTORY: &str = "price_history";
const TABLE_HIGH_OF_DAY: &str = "high_of_day_alerts";
const TABLE_RUNNING_UP: &str = "price_alerts";
const TABLE_TOP_GAINERS: &str = "top_gainer_coins";

/// Gateway speaking PostgREST to a Supabase project.
#[derive(Debug, Clone)]
pub struct SupabaseGateway {
    client: Client,
    base: Url,
    anon_key: String,
}

impl SupabaseGateway {
    /// Build a gateway for the given project URL and anon key.
    pub fn new(base_url: &str, anon_key: impl Into<String>) -> Result<Self, PersistError> {
        let base = Url::parse(base_url)
            .map_err(|error| PersistError::Malformed(format!("invalid base url: {error}")))?;
        Ok(Self {
            client: Client::new(),
            base,
            anon_key: anon_key.into(),
        })
    }

    fn table_url(&self, table: &str) -> Result<Url, PersistError> {
        self.base
            .join(&format!("rest/v1/{table}"))
            .map_err(|error| PersistError::Malformed(format!("invalid table url: {error}")))
    }

    fn authed(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .header("apikey", &self.anon_key)
            .bearer_auth(&self.anon_key)
    }

    async fn check(&self, response: Response) -> Result<Response, PersistError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(PersistError::Status { status, body })
    }

    async fn insert<Row: Serialize>(&self, table: &str, row: &Row) -> Result<(), PersistError> {
        let url = self.table_url(table)?;
        let response = self
            .authed(self.client.post(url))
            .header("Prefer", "return=minimal")
            .json(row)
            .send()
            .await?;
        self.check(response).await.map(|_| ())
    }
}

#[async_trait]
impl PersistenceGateway for SupabaseGateway {
    async fn insert_price_history(&self, row: &PriceHistoryRow) -> Result<(), PersistError> {
        self.insert(TABLE_PRICE_HISTORY, row).await
    }

    async fn high_of_day_exists(
        &self,
        coin_id: &str,
        previous_high: f64,
    ) -> Result<bool, PersistError> {
        let url = self.table_url(TABLE_HIGH_OF_DAY)?;
        let response = self
            .authed(self.client.get(url).query(&[
                ("select", "coin_id"),
                ("coin_id", &format!("eq.{coin_id}")),
                ("previous_high", &format!("eq.{previous_high}")),
                ("limit", "1"),
            ]))
            .send()
            .await?;
        let rows: Vec<serde_json::Value> = self.check(response).await?.json().await?;
        Ok(!rows.is_empty())
    }

    async fn insert_high_of_day(&self, row: &HighOfDayAlertRow) -> Result<(), PersistError> {
        self.insert(TABLE_HIGH_OF_DAY, row).await
    }

    async fn insert_running_up(&self, row: &RunningUpAlertRow) -> Result<(), PersistError> {
        self.insert(TABLE_RUNNING_UP, row).await
    }

    async fn upsert_top_gainer(&self, row: &TopGainerRow) -> Result<(), PersistError> {
        let url = self.table_url(TABLE_TOP_GAINERS)?;
        let response = self
            .authed(self.client.post(url).query(&[("on_conflict", "coin_id")]))
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(row)
            .send()
            .await?;
        self.check(response).await.map(|_| ())
    }

    async fn query_price_before(
        &self,
        coin_id: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<Option<PriceSample>, PersistError> {
        let url = self.table_url(TABLE_PRICE_HISTORY)?;
        let cutoff = cutoff.to_rfc3339_opts(SecondsFormat::Millis, true);
        let response = self
            .authed(self.client.get(url).query(&[
                ("select", "price,timestamp"),
                ("coin_id", &format!("eq.{coin_id}")),
                ("timestamp", &format!("lt.{cutoff}")),
                ("order", "timestamp.desc"),
                ("limit", "1"),
            ]))
            .send()
            .await?;
        let mut rows: Vec<PriceSample> = self.check(response).await?.json().await?;
        Ok(if rows.is_empty() {
            None
        } else {
            Some(rows.remove(0))
        })
    }
}
