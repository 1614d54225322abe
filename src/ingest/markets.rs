//! Market-creation feed poller. Dumb transport: fetch pages, map rows to
//! MarketEvent, publish. The pipeline actor owns indexing and dedup.

use crate::bus::types::Bus;
use crate::config::config::MarketFeedCfg;
use crate::core::types::{Actor, MarketEvent};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::{StreamExt, stream};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedMarket {
    pub id: String,
    #[serde(default)]
    pub question: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub closed: bool,
}

/// Rows without any usable title are dropped; everything else becomes an
/// event for the pipeline.
pub fn to_events(rows: Vec<FeedMarket>) -> Vec<MarketEvent> {
    rows.into_iter()
        .filter_map(|row| {
            let title = row
                .question
                .or(row.title)
                .unwrap_or_default();
            if title.is_empty() {
                return None;
            }
            Some(MarketEvent {
                market_id: row.id,
                title,
                description: row.description.unwrap_or_default(),
                created_at: row.created_at.unwrap_or_else(Utc::now),
                closed: row.closed,
            })
        })
        .collect()
}

pub struct MarketFeedActor {
    pub bus: Bus,
    pub client: Client,
    pub cfg: MarketFeedCfg,
    pub shutdown: CancellationToken,
}

impl MarketFeedActor {
    pub fn new(
        bus: Bus,
        client: Client,
        cfg: MarketFeedCfg,
        shutdown: CancellationToken,
    ) -> MarketFeedActor {
        Self {
            bus,
            client,
            cfg,
            shutdown,
        }
    }

    async fn fetch_page(&self, offset: u32) -> Result<Vec<FeedMarket>> {
        let res = self
            .client
            .get(self.cfg.events_url.clone())
            .query(&[
                ("order", "id"),
                ("ascending", "false"),
                ("active", "true"),
                ("limit", &self.cfg.page_limit.to_string()),
                ("offset", &offset.to_string()),
            ])
            .send()
            .await
            .context("requesting market feed")?
            .error_for_status()
            .context("received non-success status for market feed request")?
            .json::<Vec<FeedMarket>>()
            .await
            .context("parsing market feed response")?;
        Ok(res)
    }

    async fn fetch_all(&self) -> Result<Vec<FeedMarket>> {
        let mut rows = Vec::new();
        let mut offset = 0;

        loop {
            let page = self.fetch_page(offset).await?;
            if page.is_empty() {
                break;
            }
            let len = page.len();
            rows.extend(page);
            if len < self.cfg.page_limit as usize {
                break;
            }
            offset += self.cfg.page_limit;
        }
        Ok(rows)
    }
}

#[async_trait::async_trait]
impl Actor for MarketFeedActor {
    async fn run(self) -> Result<()> {
        info!("MarketFeedActor started");

        let mut tick = tokio::time::interval(self.cfg.refresh);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("MarketFeedActor: shutdown requested");
                    break;
                }

                _ = tick.tick() => {
                    match self.fetch_all().await {
                        Ok(rows) => {
                            let events = to_events(rows);
                            let bus = self.bus.clone();
                            let publish_futs = events.into_iter().map(move |ev| {
                                let bus = bus.clone();
                                async move { bus.market_events.publish(ev).await }
                            });

                            // Bounded publishes so a large page can't blast the bus.
                            let results = stream::iter(publish_futs)
                                .buffer_unordered(32)
                                .collect::<Vec<_>>()
                                .await;

                            for res in results {
                                if let Err(e) = res {
                                    error!(?e, "publish to market_events failed");
                                }
                            }
                        }
                        Err(e) => {
                            error!("MarketFeedActor: failed to fetch market feed: {}", e);
                            // backoff to avoid a hot loop on repeated failures
                            tokio::time::sleep(Duration::from_secs(5)).await;
                        }
                    }
                }
            }
        }

        info!("MarketFeedActor stopped cleanly");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feed_rows_map_to_events() {
        let raw = r#"[
            {"id": "m1", "question": "Will X happen by Friday?", "description": "Resolves YES if...", "createdAt": "2025-06-01T12:00:00Z"},
            {"id": "m2", "title": "Will Y happen?", "closed": true},
            {"id": "m3"}
        ]"#;
        let rows: Vec<FeedMarket> = serde_json::from_str(raw).unwrap();
        let events = to_events(rows);

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].market_id, "m1");
        assert_eq!(events[0].title, "Will X happen by Friday?");
        assert!(!events[0].closed);
        assert_eq!(events[1].market_id, "m2");
        assert!(events[1].closed);
    }
}
