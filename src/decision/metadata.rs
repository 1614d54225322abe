use crate::core::types::{MarketMetadata, OutcomeOdds};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;

/// Seam for the external market-metadata source.
#[async_trait]
pub trait MetadataClient: Send + Sync + 'static {
    async fn fetch(&self, market_id: &str) -> Result<MarketMetadata>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GammaMarketResponse {
    pub id: String,
    pub question: String,
    /// Stringified JSON list, e.g. "[\"Yes\", \"No\"]".
    pub outcomes: Option<String>,
    pub outcome_prices: Option<String>,
    pub liquidity: Option<Decimal>,
    #[serde(rename = "volume24hr")]
    pub volume_24hr: Option<Decimal>,
    pub end_date_iso: Option<String>,
    pub end_date: Option<String>,
}

pub struct GammaMetadataClient {
    client: Client,
    markets_url: String,
}

impl GammaMetadataClient {
    pub fn new(markets_url: String, client: Client) -> Self {
        Self {
            client,
            markets_url,
        }
    }
}

#[async_trait]
impl MetadataClient for GammaMetadataClient {
    async fn fetch(&self, market_id: &str) -> Result<MarketMetadata> {
        let url = format!("{}/{}", self.markets_url, market_id);

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .context("requesting market metadata")?;

        if !resp.status().is_success() {
            anyhow::bail!("metadata API error: {}", resp.status());
        }

        let gamma: GammaMarketResponse = resp.json().await.context("parsing market metadata")?;
        Ok(build_metadata(gamma, Utc::now()))
    }
}

/// Flatten the raw payload into the engineered features the decision oracle
/// sees: outcome odds, spread, extremeness (min outcome price), price sum,
/// and days to resolution.
pub fn build_metadata(gamma: GammaMarketResponse, now: DateTime<Utc>) -> MarketMetadata {
    let labels: Vec<String> = gamma
        .outcomes
        .as_deref()
        .and_then(|s| serde_json::from_str(s).ok())
        .unwrap_or_default();
    let prices: Vec<Decimal> = gamma
        .outcome_prices
        .as_deref()
        .and_then(|s| serde_json::from_str::<Vec<String>>(s).ok())
        .map(|raw| {
            raw.iter()
                .map(|p| Decimal::from_str_exact(p).unwrap_or(Decimal::ZERO))
                .collect()
        })
        .unwrap_or_default();

    let outcomes: Vec<OutcomeOdds> = labels
        .iter()
        .zip(prices.iter())
        .map(|(label, price)| OutcomeOdds {
            label: label.clone(),
            price: *price,
        })
        .collect();

    let price = prices.first().copied().unwrap_or(Decimal::ZERO);
    let spread = if prices.len() >= 2 {
        (prices[0] - prices[1]).abs()
    } else {
        Decimal::ZERO
    };
    let extremeness = prices.iter().copied().min().unwrap_or(Decimal::ZERO);
    let price_sum = prices.iter().copied().sum();

    let end_raw = gamma.end_date_iso.or(gamma.end_date).unwrap_or_default();
    let time_to_resolution_days = DateTime::parse_from_rfc3339(&end_raw)
        .map(|end| (end.with_timezone(&Utc).date_naive() - now.date_naive()).num_days())
        .map(|d| d.max(0))
        .unwrap_or(0);

    MarketMetadata {
        market_id: gamma.id,
        question: gamma.question,
        outcomes,
        liquidity: gamma.liquidity.unwrap_or(Decimal::ZERO),
        time_to_resolution_days,
        price,
        volume_24h: gamma.volume_24hr.unwrap_or(Decimal::ZERO),
        spread,
        extremeness,
        price_sum,
    }
}
