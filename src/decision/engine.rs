//! Decision Engine.
//!
//! Enriches a relevant candidate with live market metadata, asks the
//! decision oracle for a structured verdict, and validates the shape at a
//! strict boundary. A malformed or unreachable oracle can only produce
//! Hold, mirroring the judge stage's fail-safe contract. Hold terminates
//! the candidate's lifecycle without execution.

use crate::core::retry::{RetryPolicy, with_retries};
use crate::core::types::{
    Decision, JudgedCandidate, MarketMetadata, NewsItem, TradeAction, TradeSide,
};
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

use super::metadata::MetadataClient;
use crate::llm::LlmClient;

/// Seam for the external trade-decision oracle: enriched context in, raw
/// structured text out. The engine owns parsing and failure policy.
#[async_trait]
pub trait DecisionOracle: Send + Sync + 'static {
    async fn decide(
        &self,
        news_title: &str,
        news_body: &str,
        metadata: &MarketMetadata,
    ) -> Result<String>;
}

const DECISION_SYSTEM_PROMPT: &str = r#"You are an automated prediction-market paper-trading assistant.

Behavioral rules:
1) Respond ONLY with a JSON object, no free text:
   {"action": "buy" | "sell" | "hold", "side": "yes" | "no", "size": number, "confidence": number, "rationale": string}
2) You may choose "hold" if signals are weak or ambiguous, or you do not expect a significant probability shift. Do not force a decision.
3) If action is buy or sell, you MUST give a side and a positive size (units of bankroll to commit).
4) Consider only the provided market snapshot and news. Do NOT invent external facts.
5) Prefer caution near resolution, on thin liquidity, or when the price already implies the view.
6) confidence is 0.0 to 1.0, your calibrated belief in the chosen direction."#;

#[async_trait]
impl DecisionOracle for LlmClient {
    async fn decide(
        &self,
        news_title: &str,
        news_body: &str,
        metadata: &MarketMetadata,
    ) -> Result<String> {
        let user = json!({
            "news": { "title": news_title, "body": news_body },
            "market": metadata,
        })
        .to_string();
        self.chat(DECISION_SYSTEM_PROMPT, &user).await
    }
}

#[derive(Debug, Deserialize)]
struct DecisionResponse {
    action: String,
    side: Option<String>,
    size: Option<f64>,
    confidence: Option<f64>,
    rationale: Option<String>,
}

pub struct DecisionEngine {
    oracle: Arc<dyn DecisionOracle>,
    metadata: Arc<dyn MetadataClient>,
    retry: RetryPolicy,
}

impl DecisionEngine {
    pub fn new(
        oracle: Arc<dyn DecisionOracle>,
        metadata: Arc<dyn MetadataClient>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            oracle,
            metadata,
            retry,
        }
    }

    /// Produce a Decision for a judged-relevant candidate. Infallible by
    /// contract: every failure mode maps to Hold.
    pub async fn decide(&self, judged: &JudgedCandidate, news: &NewsItem) -> Decision {
        let market_id = &judged.candidate.market_id;
        let news_id = &judged.candidate.news_id;

        let metadata = match with_retries(&self.retry, "market-metadata", || {
            self.metadata.fetch(market_id)
        })
        .await
        {
            Ok(md) => md,
            Err(e) => {
                warn!(%market_id, error = %e, "metadata unavailable; holding");
                metrics::counter!("decisions_total", "action" => "hold", "reason" => "metadata")
                    .increment(1);
                return Decision::hold(market_id, news_id, "metadata-unavailable");
            }
        };

        let raw = match with_retries(&self.retry, "decision-oracle", || {
            self.oracle.decide(&news.title, &news.body, &metadata)
        })
        .await
        {
            Ok(raw) => raw,
            Err(e) => {
                warn!(%market_id, error = %e, "decision oracle unavailable; holding");
                metrics::counter!("decisions_total", "action" => "hold", "reason" => "timeout")
                    .increment(1);
                let mut d = Decision::hold(market_id, news_id, "oracle-timeout");
                d.snapshot = metadata.snapshot();
                return d;
            }
        };

        match parse_decision(&raw, market_id, news_id, &metadata) {
            Some(decision) => {
                info!(
                    %market_id,
                    action = decision.action.as_str(),
                    side = ?decision.side,
                    size = %decision.size,
                    "decision oracle verdict"
                );
                metrics::counter!("decisions_total", "action" => decision.action.as_str(), "reason" => "oracle")
                    .increment(1);
                decision
            }
            None => {
                warn!(%market_id, raw = %raw, "unparseable decision; holding");
                metrics::counter!("decisions_total", "action" => "hold", "reason" => "unparseable")
                    .increment(1);
                let mut d = Decision::hold(market_id, news_id, "unparseable-response");
                d.snapshot = metadata.snapshot();
                d
            }
        }
    }
}

/// Strict parse boundary. Buy/Sell require a side and a positive size;
/// anything outside the schema is None and the caller coerces to Hold.
fn parse_decision(
    raw: &str,
    market_id: &str,
    news_id: &str,
    metadata: &MarketMetadata,
) -> Option<Decision> {
    let resp: DecisionResponse = serde_json::from_str(raw).ok()?;

    let action = match resp.action.trim().to_lowercase().as_str() {
        "buy" => TradeAction::Buy,
        "sell" => TradeAction::Sell,
        "hold" => TradeAction::Hold,
        _ => return None,
    };

    let confidence = resp.confidence.unwrap_or(0.0).clamp(0.0, 1.0);
    let rationale = resp.rationale.unwrap_or_default();

    if action == TradeAction::Hold {
        return Some(Decision {
            market_id: market_id.to_string(),
            news_id: news_id.to_string(),
            action,
            side: None,
            size: Decimal::ZERO,
            confidence,
            rationale,
            snapshot: metadata.snapshot(),
            decided_at: Utc::now(),
        });
    }

    let side = match resp.side.as_deref().map(|s| s.trim().to_lowercase()) {
        Some(s) if s == "yes" => TradeSide::Yes,
        Some(s) if s == "no" => TradeSide::No,
        _ => return None,
    };

    let size = resp.size.filter(|s| *s > 0.0).and_then(Decimal::from_f64)?;

    Some(Decision {
        market_id: market_id.to_string(),
        news_id: news_id.to_string(),
        action,
        side: Some(side),
        size,
        confidence,
        rationale,
        snapshot: metadata.snapshot(),
        decided_at: Utc::now(),
    })
}
