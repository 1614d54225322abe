use crate::config::config::LlmCfg;
use anyhow::{Context, Result};
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use reqwest::Client;
use serde_json::json;
use std::num::NonZeroU32;
use std::sync::Arc;
use tracing::debug;

/// OpenAI-compatible chat client shared by both oracles. Rate-limited so a
/// burst of matched candidates can't blow the provider quota.
#[derive(Clone)]
pub struct LlmClient {
    client: Client,
    cfg: LlmCfg,
    limiter: Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
}

impl LlmClient {
    pub fn new(cfg: LlmCfg, client: Client) -> Self {
        let rpm = NonZeroU32::new(cfg.rate_limit_rpm).unwrap_or(NonZeroU32::new(1).unwrap());
        let limiter = Arc::new(RateLimiter::direct(Quota::per_minute(rpm)));

        Self {
            client,
            cfg,
            limiter,
        }
    }

    pub fn model(&self) -> &str {
        &self.cfg.model
    }

    /// One chat round-trip; returns the assistant content with any markdown
    /// code fences stripped. Transport and HTTP errors surface to the
    /// caller, which owns the retry budget.
    pub async fn chat(&self, system: &str, user: &str) -> Result<String> {
        self.limiter.until_ready().await;

        let req_body = json!({
            "model": self.cfg.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user}
            ],
            "temperature": 0.0
        });

        let url = format!("{}/chat/completions", self.cfg.base_url);
        debug!(%url, model = %self.cfg.model, "calling LLM");

        let res = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.cfg.api_key))
            .json(&req_body)
            .send()
            .await
            .context("LLM request failed")?;

        if !res.status().is_success() {
            let err_text = res.text().await.unwrap_or_default();
            anyhow::bail!("LLM API error: {}", err_text);
        }

        let resp_json: serde_json::Value = res.json().await.context("reading LLM response")?;

        let content_str = resp_json["choices"][0]["message"]["content"]
            .as_str()
            .context("No content in LLM response")?;

        Ok(strip_code_fences(content_str).to_string())
    }
}

/// Models often wrap JSON answers in ```json fences; strip them before any
/// schema validation.
pub fn strip_code_fences(content: &str) -> &str {
    content
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
}
