use anyhow::Result;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[async_trait::async_trait]
pub trait Actor: Send + Sync + 'static {
    async fn run(self) -> Result<()>;
}

// ----------- Market side -----------------

#[derive(Clone, Debug, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarketStatus {
    Open,
    Monitored,
    Closed,
}

impl MarketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketStatus::Open => "Open",
            MarketStatus::Monitored => "Monitored",
            MarketStatus::Closed => "Closed",
        }
    }
}

/// Market-creation (or close) event as consumed from the market feed.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MarketEvent {
    #[serde(rename = "marketId")]
    pub market_id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub closed: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Market {
    pub id: String,
    pub title: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub status: MarketStatus,
}

impl Market {
    pub fn from_event(ev: &MarketEvent) -> Self {
        Self {
            id: ev.market_id.clone(),
            title: ev.title.clone(),
            description: ev.description.clone(),
            created_at: ev.created_at,
            status: MarketStatus::Open,
        }
    }

    /// Text used for fingerprinting (title carries most signal, description
    /// disambiguates near-identical questions).
    pub fn fingerprint_text(&self) -> String {
        format!("{} {}", self.title, self.description)
    }
}

/// Combined embedding + keyword representation. Computed once per market,
/// immutable afterwards.
#[derive(Clone, Debug)]
pub struct Fingerprint {
    pub vector: Vec<f32>,
    pub keywords: Vec<String>,
}

// ----------- News side -----------------

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NewsItem {
    /// Stable key for dedup: explicit feed id > link > title|published.
    pub id: String,
    pub source: String,
    pub title: String,
    #[serde(default)]
    pub body: String,
    pub published: Option<DateTime<Utc>>,
}

impl NewsItem {
    /// Build the stable item key the way the feed state tracker expects it.
    pub fn stable_key(
        entry_id: Option<&str>,
        link: Option<&str>,
        title: &str,
        published: &str,
    ) -> String {
        if let Some(id) = entry_id.filter(|s| !s.is_empty()) {
            return format!("id::{id}");
        }
        if let Some(link) = link.filter(|s| !s.is_empty()) {
            return format!("link::{link}");
        }
        format!("tp::{}|{}", title.trim(), published.trim())
    }

    pub fn matching_text(&self) -> String {
        format!("{} {}", self.title, self.body)
    }
}

// ----------- Matching pipeline -----------------

/// One (market, news) pair produced by the Candidate Matcher. Ephemeral:
/// it only exists to flow into the judging stage.
#[derive(Clone, Debug)]
pub struct Candidate {
    pub market_id: String,
    pub news_id: String,
    pub cosine: f64,
    pub lexical: f64,
    pub score: f64,
    pub rank: usize,
    pub market_title: String,
    pub market_description: String,
    pub market_created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Relevance {
    Relevant,
    NotRelevant,
}

#[derive(Clone, Debug)]
pub struct JudgedCandidate {
    pub candidate: Candidate,
    pub relevance: Relevance,
    pub rationale: String,
}

// ----------- Decision / execution -----------------

#[derive(Clone, Debug, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeAction {
    Buy,
    Sell,
    Hold,
}

impl TradeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeAction::Buy => "Buy",
            TradeAction::Sell => "Sell",
            TradeAction::Hold => "Hold",
        }
    }
}

#[derive(Clone, Debug, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeSide {
    Yes,
    No,
}

impl TradeSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeSide::Yes => "Yes",
            TradeSide::No => "No",
        }
    }
}

/// Price/volume baseline captured when the decision was made, used later by
/// the monitoring loop to measure movement since execution.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub price: Decimal,
    pub volume_24h: Decimal,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OutcomeOdds {
    pub label: String,
    pub price: Decimal,
}

/// Enriched market context fetched before invoking the decision oracle.
/// `spread`, `extremeness` and `price_sum` are engineered features: cheap
/// hints about saturation and mispricing.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MarketMetadata {
    pub market_id: String,
    pub question: String,
    pub outcomes: Vec<OutcomeOdds>,
    pub liquidity: Decimal,
    pub time_to_resolution_days: i64,
    pub price: Decimal,
    pub volume_24h: Decimal,
    pub spread: Decimal,
    pub extremeness: Decimal,
    pub price_sum: Decimal,
}

impl MarketMetadata {
    pub fn snapshot(&self) -> MarketSnapshot {
        MarketSnapshot {
            price: self.price,
            volume_24h: self.volume_24h,
        }
    }
}

/// Immutable once created. `side` is meaningful only for Buy/Sell.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Decision {
    pub market_id: String,
    pub news_id: String,
    pub action: TradeAction,
    pub side: Option<TradeSide>,
    pub size: Decimal,
    pub confidence: f64,
    pub rationale: String,
    pub snapshot: MarketSnapshot,
    pub decided_at: DateTime<Utc>,
}

impl Decision {
    pub fn hold(market_id: &str, news_id: &str, rationale: &str) -> Self {
        Self {
            market_id: market_id.to_string(),
            news_id: news_id.to_string(),
            action: TradeAction::Hold,
            side: None,
            size: Decimal::ZERO,
            confidence: 0.0,
            rationale: rationale.to_string(),
            snapshot: MarketSnapshot::default(),
            decided_at: Utc::now(),
        }
    }
}

#[derive(Clone, Debug, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeStatus {
    Pending,
    Executed,
    Failed,
    Evaluated,
}

impl TradeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeStatus::Pending => "Pending",
            TradeStatus::Executed => "Executed",
            TradeStatus::Failed => "Failed",
            TradeStatus::Evaluated => "Evaluated",
        }
    }

    /// Pending -> {Executed | Failed} -> (Executed only) -> Evaluated.
    pub fn can_transition_to(&self, next: TradeStatus) -> bool {
        matches!(
            (self, next),
            (TradeStatus::Pending, TradeStatus::Executed)
                | (TradeStatus::Pending, TradeStatus::Failed)
                | (TradeStatus::Executed, TradeStatus::Evaluated)
        )
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Fill {
    pub price: Decimal,
    pub size: Decimal,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TradeRecord {
    /// Client-side trade id: "<market_id>-<micros>".
    pub id: String,
    pub market_id: String,
    pub news_id: String,
    pub action: TradeAction,
    pub side: TradeSide,
    pub requested_size: Decimal,
    pub rationale: String,
    pub status: TradeStatus,
    pub fill: Option<Fill>,
    pub failure: Option<String>,
    /// Baseline volume at decision time, for spike detection.
    pub entry_volume: Decimal,
    pub created_at: DateTime<Utc>,
    pub executed_at: Option<DateTime<Utc>>,
}

// ----------- Evaluation -----------------

#[derive(Clone, Debug, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CorrectnessLabel {
    Aligned,
    Opposed,
    Flat,
}

impl CorrectnessLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            CorrectnessLabel::Aligned => "Aligned",
            CorrectnessLabel::Opposed => "Opposed",
            CorrectnessLabel::Flat => "Flat",
        }
    }
}

#[derive(Clone, Debug, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvaluationTrigger {
    Spike,
    Deadline,
}

impl EvaluationTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvaluationTrigger::Spike => "Spike",
            EvaluationTrigger::Deadline => "Deadline",
        }
    }
}

/// Append-only record written by the monitoring loop.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EvaluationOutcome {
    pub trade_id: String,
    pub market_id: String,
    pub price_at_eval: Decimal,
    pub volume_at_eval: Decimal,
    pub price_delta_pct: Decimal,
    pub volume_delta_pct: Decimal,
    pub label: CorrectnessLabel,
    pub trigger: EvaluationTrigger,
    pub evaluated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trade_status_transitions_are_monotonic() {
        assert!(TradeStatus::Pending.can_transition_to(TradeStatus::Executed));
        assert!(TradeStatus::Pending.can_transition_to(TradeStatus::Failed));
        assert!(TradeStatus::Executed.can_transition_to(TradeStatus::Evaluated));

        // No reversals, no evaluation of failures
        assert!(!TradeStatus::Executed.can_transition_to(TradeStatus::Pending));
        assert!(!TradeStatus::Failed.can_transition_to(TradeStatus::Pending));
        assert!(!TradeStatus::Failed.can_transition_to(TradeStatus::Evaluated));
        assert!(!TradeStatus::Evaluated.can_transition_to(TradeStatus::Executed));
    }

    #[test]
    fn stable_key_prefers_id_then_link() {
        assert_eq!(
            NewsItem::stable_key(Some("abc"), Some("http://x"), "t", "p"),
            "id::abc"
        );
        assert_eq!(
            NewsItem::stable_key(None, Some("http://x"), "t", "p"),
            "link::http://x"
        );
        assert_eq!(
            NewsItem::stable_key(None, None, " Fed cuts ", "2025-01-01"),
            "tp::Fed cuts|2025-01-01"
        );
    }
}
