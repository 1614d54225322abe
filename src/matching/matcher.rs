//! Candidate Matcher: news item in, ranked candidate pairs out.
//!
//! The hybrid score is a weighted combination of embedding cosine
//! similarity and keyword overlap. Recall is the union of semantic and
//! BM25 keyword hits, so a market surfaces if either representation
//! matches. Matching the same item against an unchanged index is
//! deterministic: ties break on market creation time, then market id.

use crate::config::config::MatcherCfg;
use crate::core::error::PipelineError;
use crate::core::types::{Candidate, Fingerprint, Market, NewsItem};
use anyhow::Result;
use std::collections::HashMap;
use std::num::NonZero;
use std::sync::{Arc, Mutex};
use tracing::debug;

use super::embedder::Embedder;
use super::index::{IndexHit, MarketIndex};
use super::judgement_cache::{JudgementCache, JudgementCacheConfig};
use super::tokenization::{keyword_tokens, normalize, token_overlap};

pub struct CandidateMatcher {
    cfg: MatcherCfg,
    embedder: Arc<dyn Embedder>,
    index: Arc<MarketIndex>,
    judged: Mutex<JudgementCache>,
}

impl CandidateMatcher {
    pub fn new(cfg: MatcherCfg, embedder: Arc<dyn Embedder>, index: Arc<MarketIndex>) -> Self {
        let judged = JudgementCache::new(JudgementCacheConfig {
            capacity: NonZero::new(10_000).expect("judgement cache capacity"),
            ttl: cfg.judged_ttl,
        });
        Self {
            cfg,
            embedder,
            index,
            judged: Mutex::new(judged),
        }
    }

    /// Compute a market's fingerprint (once) and register it.
    pub fn index_market(&self, market: &Market) -> Result<(), PipelineError> {
        let text = market.fingerprint_text();
        let vector = self
            .embedder
            .embed(&text)
            .map_err(|e| PipelineError::Transport(e.to_string()))?;
        let keywords = keyword_tokens(&normalize(&text));

        self.index.insert(market, Fingerprint { vector, keywords })
    }

    pub fn remove_market(&self, market_id: &str) -> Result<()> {
        self.index.remove(market_id)
    }

    /// Record a NotRelevant verdict so the pair is excluded from matching
    /// for the configured recency window.
    pub fn note_not_relevant(&self, market_id: &str, news_id: &str) {
        self.judged
            .lock()
            .expect("judgement cache mutex poisoned")
            .mark_not_relevant(market_id, news_id);
    }

    pub fn match_news(&self, news: &NewsItem) -> Result<Vec<Candidate>> {
        let text = news.matching_text();
        let news_tokens = keyword_tokens(&normalize(&text));
        let vector = self.embedder.embed(&text)?;

        // Hybrid recall: semantic ∪ keyword.
        let mut hits: HashMap<String, IndexHit> = HashMap::new();
        for hit in self.index.query(&vector, self.cfg.recall_k) {
            hits.insert(hit.market_id.clone(), hit);
        }
        for hit in self
            .index
            .search_keywords(&news_tokens, &vector, self.cfg.recall_k)
        {
            hits.entry(hit.market_id.clone()).or_insert(hit);
        }

        let mut judged = self.judged.lock().expect("judgement cache mutex poisoned");

        let mut candidates: Vec<Candidate> = hits
            .into_values()
            .filter(|hit| !judged.is_suppressed(&hit.market_id, &news.id))
            .filter_map(|hit| {
                let lexical = token_overlap(&news_tokens, &hit.keywords);
                let score =
                    self.cfg.cosine_weight * hit.similarity + self.cfg.lexical_weight * lexical;
                if score < self.cfg.min_score {
                    return None;
                }
                Some(Candidate {
                    market_id: hit.market_id,
                    news_id: news.id.clone(),
                    cosine: hit.similarity,
                    lexical,
                    score,
                    rank: 0,
                    market_title: hit.title,
                    market_description: hit.description,
                    market_created_at: hit.created_at,
                })
            })
            .collect();
        drop(judged);

        candidates.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.market_created_at.cmp(&a.market_created_at))
                .then_with(|| a.market_id.cmp(&b.market_id))
        });
        candidates.truncate(self.cfg.max_candidates);

        for (i, c) in candidates.iter_mut().enumerate() {
            c.rank = i + 1;
        }

        debug!(
            news_id = %news.id,
            candidates = candidates.len(),
            "matched news against market index"
        );

        Ok(candidates)
    }
}
