//! Relevance Judge Gateway.
//!
//! The oracle is treated as a noisy binary classifier: its output is parsed
//! at a strict boundary right after the call, and anything that doesn't fit
//! degrades to NotRelevant. This stage never raises an error to its caller;
//! an unparseable or unreachable oracle can only cost us a trade, never
//! cause one.

use crate::core::retry::{RetryPolicy, with_retries};
use crate::core::types::{Candidate, JudgedCandidate, Relevance};
use anyhow::Result;
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::llm::LlmClient;

pub const UNPARSEABLE_RATIONALE: &str = "unparseable-response";
pub const TIMEOUT_RATIONALE: &str = "oracle-timeout";

/// Seam for the external relevance oracle: raw text in, raw text out. The
/// gateway owns parsing and failure policy.
#[async_trait]
pub trait RelevanceOracle: Send + Sync + 'static {
    async fn assess(&self, news_text: &str, market_text: &str) -> Result<String>;
}

const JUDGE_SYSTEM_PROMPT: &str = r#"You are a strict financial analyst. You will be given a news article and a prediction-market question.
Your task is to determine if the news article will have any DIRECT impact on the market outcome.

IMPORTANT: Be very strict. Most news will NOT impact most markets.

STRICT RULES:
- Same company/person/organization = IMPACT (yes)
- Same specific topic/event = IMPACT (yes)
- Different companies = NO IMPACT (no)
- Different topics = NO IMPACT (no)
- Vague connections = NO IMPACT (no)

Default to NO IMPACT unless there is a clear, direct connection.
Respond with JSON: {"related": "yes" or "no", "reasoning": "one concise sentence"}."#;

#[async_trait]
impl RelevanceOracle for LlmClient {
    async fn assess(&self, news_text: &str, market_text: &str) -> Result<String> {
        let user = format!(
            "News: {}\n\nMarket: {}\n\nDoes this news have DIRECT impact on this specific market? Be strict.",
            news_text.trim(),
            market_text.trim()
        );
        self.chat(JUDGE_SYSTEM_PROMPT, &user).await
    }
}

#[derive(Debug, Deserialize)]
struct VerdictResponse {
    related: String,
    #[serde(default)]
    reasoning: String,
}

pub struct JudgeGateway {
    oracle: Arc<dyn RelevanceOracle>,
    retry: RetryPolicy,
}

impl JudgeGateway {
    pub fn new(oracle: Arc<dyn RelevanceOracle>, retry: RetryPolicy) -> Self {
        Self { oracle, retry }
    }

    /// Judge one candidate pair. Infallible by contract: every failure mode
    /// maps to NotRelevant.
    pub async fn judge(
        &self,
        candidate: Candidate,
        market_text: &str,
        news_text: &str,
    ) -> JudgedCandidate {
        let raw = match with_retries(&self.retry, "relevance-oracle", || {
            self.oracle.assess(news_text, market_text)
        })
        .await
        {
            Ok(raw) => raw,
            Err(e) => {
                warn!(
                    market_id = %candidate.market_id,
                    news_id = %candidate.news_id,
                    error = %e,
                    "relevance oracle unavailable; failing safe"
                );
                metrics::counter!("judge_verdicts_total", "verdict" => "timeout").increment(1);
                return JudgedCandidate {
                    candidate,
                    relevance: Relevance::NotRelevant,
                    rationale: TIMEOUT_RATIONALE.to_string(),
                };
            }
        };

        let (relevance, rationale) = match parse_verdict(&raw) {
            Some(v) => v,
            None => {
                warn!(
                    market_id = %candidate.market_id,
                    raw = %raw,
                    "unparseable relevance verdict; failing safe"
                );
                metrics::counter!("judge_verdicts_total", "verdict" => "unparseable").increment(1);
                (Relevance::NotRelevant, UNPARSEABLE_RATIONALE.to_string())
            }
        };

        if relevance == Relevance::Relevant {
            info!(
                market_id = %candidate.market_id,
                news_id = %candidate.news_id,
                "oracle judged candidate relevant"
            );
            metrics::counter!("judge_verdicts_total", "verdict" => "relevant").increment(1);
        } else {
            metrics::counter!("judge_verdicts_total", "verdict" => "not_relevant").increment(1);
        }

        JudgedCandidate {
            candidate,
            relevance,
            rationale,
        }
    }
}

/// Strict parse boundary. Accepts the JSON verdict shape, or (the older
/// oracle contract) a bare yes/no answer. Anything else is None.
fn parse_verdict(raw: &str) -> Option<(Relevance, String)> {
    if let Ok(v) = serde_json::from_str::<VerdictResponse>(raw) {
        return match v.related.trim().to_lowercase().as_str() {
            "yes" => Some((Relevance::Relevant, v.reasoning)),
            "no" => Some((Relevance::NotRelevant, v.reasoning)),
            _ => None,
        };
    }

    lazy_static! {
        static ref NON_WORD_RE: Regex = Regex::new(r"[^\w\s]").unwrap();
    }
    let lowered = raw.to_lowercase();
    let cleaned = NON_WORD_RE.replace_all(&lowered, "");
    match cleaned.trim() {
        "yes" => Some((Relevance::Relevant, raw.trim().to_string())),
        "no" => Some((Relevance::NotRelevant, raw.trim().to_string())),
        _ => None,
    }
}
