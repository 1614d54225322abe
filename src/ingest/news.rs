//! News feed poller. Polls each configured feed on an interval, derives a
//! stable key per article (feed id > link > title|published), suppresses
//! already-seen keys within a TTL window, and publishes the rest.

use crate::bus::types::Bus;
use crate::config::config::NewsFeedCfg;
use crate::core::types::{Actor, NewsItem};
use ahash::AHasher;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use lru::LruCache;
use reqwest::Client;
use serde::Deserialize;
use std::hash::{Hash, Hasher};
use std::num::NonZero;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Debug, Deserialize)]
pub struct FeedArticle {
    #[serde(default)]
    pub id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default)]
    pub published: Option<DateTime<Utc>>,
}

/// Seen-key window so restart-free operation doesn't re-publish the same
/// articles every poll.
pub struct SeenCache {
    cache: LruCache<u64, i64>,
    ttl_secs: i64,
}

impl SeenCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            cache: LruCache::new(NonZero::new(10_000).expect("seen cache capacity")),
            ttl_secs: ttl.as_secs() as i64,
        }
    }

    fn hash_key(key: &str) -> u64 {
        let mut hasher = AHasher::default();
        key.hash(&mut hasher);
        hasher.finish()
    }

    /// True the first time a key is offered within the TTL window.
    pub fn insert_if_new(&mut self, key: &str) -> bool {
        let hash = Self::hash_key(key);
        let now = Utc::now().timestamp();

        if let Some(&ts) = self.cache.get(&hash) {
            if now - ts <= self.ttl_secs {
                return false;
            }
        }
        self.cache.put(hash, now);
        true
    }
}

pub fn to_news(source: &str, articles: Vec<FeedArticle>, seen: &mut SeenCache) -> Vec<NewsItem> {
    let mut out = Vec::new();

    for article in articles {
        let title = article.title.trim();
        if title.is_empty() {
            continue; // skip broken entries
        }

        let published_str = article
            .published
            .map(|p| p.to_rfc3339())
            .unwrap_or_default();
        let key = NewsItem::stable_key(
            article.id.as_deref(),
            article.link.as_deref(),
            title,
            &published_str,
        );

        if !seen.insert_if_new(&key) {
            continue;
        }

        out.push(NewsItem {
            id: key,
            source: source.to_string(),
            title: title.to_string(),
            body: article.summary.trim().to_string(),
            published: article.published,
        });
    }

    out
}

pub struct NewsFeedActor {
    pub bus: Bus,
    pub client: Client,
    pub cfg: NewsFeedCfg,
    pub shutdown: CancellationToken,
}

impl NewsFeedActor {
    pub fn new(
        bus: Bus,
        client: Client,
        cfg: NewsFeedCfg,
        shutdown: CancellationToken,
    ) -> NewsFeedActor {
        Self {
            bus,
            client,
            cfg,
            shutdown,
        }
    }

    async fn fetch_feed(&self, url: &str) -> Result<Vec<FeedArticle>> {
        let res = self
            .client
            .get(url)
            .send()
            .await
            .context("requesting news feed")?
            .error_for_status()
            .context("received non-success status for news feed request")?
            .json::<Vec<FeedArticle>>()
            .await
            .context("parsing news feed response")?;
        Ok(res)
    }
}

#[async_trait::async_trait]
impl Actor for NewsFeedActor {
    async fn run(self) -> Result<()> {
        info!("NewsFeedActor started, feeds: {}", self.cfg.feeds.len());

        let mut seen = SeenCache::new(self.cfg.seen_ttl);
        let mut tick = tokio::time::interval(self.cfg.refresh);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("NewsFeedActor: shutdown requested");
                    break;
                }

                _ = tick.tick() => {
                    for feed in &self.cfg.feeds {
                        let articles = match self.fetch_feed(&feed.url).await {
                            Ok(a) => a,
                            Err(e) => {
                                warn!(feed = %feed.id, error = %e, "news feed fetch failed");
                                continue;
                            }
                        };

                        let fresh = to_news(&feed.id, articles, &mut seen);
                        if !fresh.is_empty() {
                            info!(feed = %feed.id, count = fresh.len(), "publishing fresh news items");
                        }

                        for item in fresh {
                            if let Err(e) = self.bus.raw_news.publish(item).await {
                                error!(?e, "publish to raw_news failed");
                            }
                        }
                    }
                }
            }
        }

        info!("NewsFeedActor stopped cleanly");
        Ok(())
    }
}
