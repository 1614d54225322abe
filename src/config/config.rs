use crate::core::retry::RetryPolicy;
use anyhow::{Context, Result};
use config::{Config, File};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppCfg {
    #[serde(default)]
    pub http: HttpCfg,
    #[serde(rename = "marketFeed", default)]
    pub market_feed: MarketFeedCfg,
    #[serde(rename = "newsFeed", default)]
    pub news_feed: NewsFeedCfg,
    #[serde(default)]
    pub matcher: MatcherCfg,
    #[serde(default)]
    pub llm: LlmCfg,
    #[serde(default)]
    pub judge: JudgeCfg,
    #[serde(default)]
    pub decision: DecisionCfg,
    #[serde(default)]
    pub execution: ExecutionCfg,
    #[serde(default)]
    pub monitor: MonitorCfg,
    #[serde(default)]
    pub pipeline: PipelineCfg,
    #[serde(default)]
    pub database: DatabaseCfg,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpCfg {
    #[serde(rename = "userAgent", default = "default_ua")]
    pub user_agent: String,
    #[serde(with = "humantime_serde", default = "default_timeout")]
    pub timeout: Duration,
    #[serde(rename = "poolIdleTimeout", with = "humantime_serde", default = "default_pool_idle")]
    pub pool_idle_timeout: Duration,
    #[serde(rename = "tcpKeepAlive", with = "humantime_serde", default = "default_keepalive")]
    pub tcp_keep_alive: Duration,
    #[serde(rename = "poolMaxIdlePerHost", default = "default_pool")]
    pub pool_max_idle_per_host: usize,
}

impl Default for HttpCfg {
    fn default() -> Self {
        Self {
            user_agent: default_ua(),
            timeout: default_timeout(),
            pool_idle_timeout: default_pool_idle(),
            tcp_keep_alive: default_keepalive(),
            pool_max_idle_per_host: default_pool(),
        }
    }
}
fn default_ua() -> String {
    "newspulse/0.1".into()
}
fn default_timeout() -> Duration {
    Duration::from_secs(10)
}
fn default_pool_idle() -> Duration {
    Duration::from_secs(90)
}
fn default_keepalive() -> Duration {
    Duration::from_secs(60)
}
fn default_pool() -> usize {
    16
}

#[derive(Debug, Deserialize, Clone)]
pub struct MarketFeedCfg {
    #[serde(rename = "eventsUrl")]
    pub events_url: String,
    #[serde(with = "humantime_serde", default = "default_market_refresh")]
    pub refresh: Duration,
    #[serde(rename = "pageLimit", default = "default_page_limit")]
    pub page_limit: u32,
}

impl Default for MarketFeedCfg {
    fn default() -> Self {
        Self {
            events_url: "https://gamma-api.polymarket.com/events".to_string(),
            refresh: default_market_refresh(),
            page_limit: default_page_limit(),
        }
    }
}
fn default_market_refresh() -> Duration {
    Duration::from_secs(300)
}
fn default_page_limit() -> u32 {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct FeedCfg {
    pub id: String,
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct NewsFeedCfg {
    #[serde(with = "humantime_serde", default = "default_news_refresh")]
    pub refresh: Duration,
    #[serde(default)]
    pub feeds: Vec<FeedCfg>,
    /// How long an already-seen article key suppresses re-ingestion.
    #[serde(rename = "seenTtl", with = "humantime_serde", default = "default_seen_ttl")]
    pub seen_ttl: Duration,
}

impl Default for NewsFeedCfg {
    fn default() -> Self {
        Self {
            refresh: default_news_refresh(),
            feeds: Vec::new(),
            seen_ttl: default_seen_ttl(),
        }
    }
}
fn default_news_refresh() -> Duration {
    Duration::from_secs(60)
}
fn default_seen_ttl() -> Duration {
    Duration::from_secs(48 * 3600)
}

#[derive(Debug, Deserialize, Clone)]
pub struct MatcherCfg {
    #[serde(rename = "minScore", default = "default_min_score")]
    pub min_score: f64,
    #[serde(rename = "maxCandidates", default = "default_max_candidates")]
    pub max_candidates: usize,
    #[serde(rename = "cosineWeight", default = "default_cosine_weight")]
    pub cosine_weight: f64,
    #[serde(rename = "lexicalWeight", default = "default_lexical_weight")]
    pub lexical_weight: f64,
    #[serde(rename = "recallK", default = "default_recall_k")]
    pub recall_k: usize,
    /// Recency window for "already judged NotRelevant" suppression.
    #[serde(rename = "judgedTtl", with = "humantime_serde", default = "default_judged_ttl")]
    pub judged_ttl: Duration,
}

impl Default for MatcherCfg {
    fn default() -> Self {
        Self {
            min_score: default_min_score(),
            max_candidates: default_max_candidates(),
            cosine_weight: default_cosine_weight(),
            lexical_weight: default_lexical_weight(),
            recall_k: default_recall_k(),
            judged_ttl: default_judged_ttl(),
        }
    }
}
fn default_min_score() -> f64 {
    0.5
}
fn default_max_candidates() -> usize {
    5
}
fn default_cosine_weight() -> f64 {
    0.6
}
fn default_lexical_weight() -> f64 {
    0.4
}
fn default_recall_k() -> usize {
    50
}
fn default_judged_ttl() -> Duration {
    Duration::from_secs(6 * 3600)
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmCfg {
    #[serde(rename = "baseUrl", default = "default_llm_base")]
    pub base_url: String,
    #[serde(rename = "apiKey", default)]
    pub api_key: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(rename = "rateLimitRpm", default = "default_rate_limit")]
    pub rate_limit_rpm: u32,
}

impl Default for LlmCfg {
    fn default() -> Self {
        Self {
            base_url: default_llm_base(),
            api_key: String::new(),
            model: default_llm_model(),
            rate_limit_rpm: default_rate_limit(),
        }
    }
}
fn default_llm_base() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_rate_limit() -> u32 {
    60
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct JudgeCfg {
    #[serde(default)]
    pub retry: RetryPolicy,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DecisionCfg {
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(rename = "marketsUrl", default = "default_markets_url")]
    pub markets_url: String,
}

impl Default for DecisionCfg {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            markets_url: default_markets_url(),
        }
    }
}
fn default_markets_url() -> String {
    "https://gamma-api.polymarket.com/markets".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExecutionCfg {
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default = "default_bankroll")]
    pub bankroll: f64,
}

impl Default for ExecutionCfg {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            bankroll: default_bankroll(),
        }
    }
}
fn default_bankroll() -> f64 {
    1000.0
}

#[derive(Debug, Deserialize, Clone)]
pub struct MonitorCfg {
    #[serde(with = "humantime_serde", default = "default_monitor_interval")]
    pub interval: Duration,
    /// Relative price move (vs entry fill) that triggers early evaluation.
    #[serde(rename = "spikePricePct", default = "default_spike_price")]
    pub spike_price_pct: f64,
    /// Relative 24h-volume move (vs entry baseline) that triggers it.
    #[serde(rename = "spikeVolumePct", default = "default_spike_volume")]
    pub spike_volume_pct: f64,
    #[serde(rename = "evalDeadline", with = "humantime_serde", default = "default_eval_deadline")]
    pub eval_deadline: Duration,
}

impl Default for MonitorCfg {
    fn default() -> Self {
        Self {
            interval: default_monitor_interval(),
            spike_price_pct: default_spike_price(),
            spike_volume_pct: default_spike_volume(),
            eval_deadline: default_eval_deadline(),
        }
    }
}
fn default_monitor_interval() -> Duration {
    Duration::from_secs(60)
}
fn default_spike_price() -> f64 {
    0.15
}
fn default_spike_volume() -> f64 {
    1.0
}
fn default_eval_deadline() -> Duration {
    Duration::from_secs(24 * 3600)
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineCfg {
    /// Cap on concurrently processed news items (bounds outstanding oracle
    /// calls).
    #[serde(rename = "maxConcurrency", default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

impl Default for PipelineCfg {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
        }
    }
}
fn default_max_concurrency() -> usize {
    4
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct DatabaseCfg {
    /// Empty -> run against the in-memory store (paper mode without
    /// Postgres).
    #[serde(default)]
    pub url: String,
}

impl AppCfg {
    pub fn load(path: &str) -> Result<Self> {
        let cfg = Config::builder()
            .add_source(File::with_name(path))
            .add_source(config::Environment::default().separator("__"))
            .build()
            .context("building config")?;

        let app: AppCfg = cfg.try_deserialize().context("deserializing config")?;
        app.validate()?;
        Ok(app)
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            !self.market_feed.events_url.is_empty(),
            "marketFeed.eventsUrl missing"
        );
        anyhow::ensure!(
            self.matcher.cosine_weight >= 0.0 && self.matcher.lexical_weight >= 0.0,
            "matcher weights must be non-negative"
        );
        anyhow::ensure!(
            self.matcher.cosine_weight + self.matcher.lexical_weight > 0.0,
            "matcher weights must not both be zero"
        );
        anyhow::ensure!(self.matcher.max_candidates > 0, "matcher.maxCandidates must be > 0");
        anyhow::ensure!(
            self.pipeline.max_concurrency > 0,
            "pipeline.maxConcurrency must be > 0"
        );
        anyhow::ensure!(
            self.monitor.spike_price_pct > 0.0,
            "monitor.spikePricePct must be > 0"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn defaults_validate() {
        let cfg = AppCfg::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.matcher.min_score, 0.5);
        assert_eq!(cfg.matcher.max_candidates, 5);
        assert_eq!(cfg.judge.retry.max_attempts, 3);
    }

    #[test]
    fn test_env_var_override() {
        env::set_var("LLM__API_KEY", "env-key-123");

        let cfg = Config::builder()
            .add_source(config::Environment::default().separator("__"))
            .build()
            .unwrap();

        let val = cfg.get_string("llm.api_key").unwrap();
        assert_eq!(val, "env-key-123");

        env::remove_var("LLM__API_KEY");
    }
}
