//! Pipeline actor: the control plane around the stochastic oracles.
//!
//! Consumes market events (index maintenance) and news items (the matching
//! -> judging -> decision -> execution flow). Distinct news items are
//! processed in parallel on spawned tasks bounded by a semaphore; the
//! per-market serialization the execution invariant needs is the
//! coordinator's claim, taken BEFORE the decision oracle runs and held
//! until the trade resolves.

use crate::bus::types::Bus;
use crate::core::error::PipelineError;
use crate::core::types::{Actor, Market, MarketEvent, MarketStatus, NewsItem, Relevance};
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::decision::DecisionEngine;
use crate::execution::ExecutionCoordinator;
use crate::judge::JudgeGateway;
use crate::matching::matcher::CandidateMatcher;
use crate::persistence::store::TradeStore;

pub struct PipelineActor {
    pub bus: Bus,
    pub shutdown: CancellationToken,
    pub matcher: Arc<CandidateMatcher>,
    pub judge: Arc<JudgeGateway>,
    pub engine: Arc<DecisionEngine>,
    pub coordinator: Arc<ExecutionCoordinator>,
    pub store: Arc<dyn TradeStore>,
    pub max_concurrency: usize,
}

impl PipelineActor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        bus: Bus,
        shutdown: CancellationToken,
        matcher: Arc<CandidateMatcher>,
        judge: Arc<JudgeGateway>,
        engine: Arc<DecisionEngine>,
        coordinator: Arc<ExecutionCoordinator>,
        store: Arc<dyn TradeStore>,
        max_concurrency: usize,
    ) -> Self {
        Self {
            bus,
            shutdown,
            matcher,
            judge,
            engine,
            coordinator,
            store,
            max_concurrency,
        }
    }

    async fn handle_market_event(&self, ev: &MarketEvent) {
        if ev.closed {
            if let Err(e) = self.matcher.remove_market(&ev.market_id) {
                error!(market_id = %ev.market_id, error = %e, "failed to evict closed market");
                return;
            }
            if let Err(e) = self
                .store
                .set_market_status(&ev.market_id, MarketStatus::Closed)
                .await
            {
                error!(market_id = %ev.market_id, error = %e, "failed to close market in store");
            }
            info!(market_id = %ev.market_id, "removed closed market from index");
            return;
        }

        let market = Market::from_event(ev);
        match self.matcher.index_market(&market) {
            Ok(()) => {
                if let Err(e) = self.store.upsert_market(&market).await {
                    error!(market_id = %market.id, error = %e, "failed to persist market");
                }
                info!(market_id = %market.id, "indexed market");
                metrics::counter!("markets_indexed_total").increment(1);
            }
            // The feed re-delivers known markets every poll; the original
            // fingerprint stays authoritative.
            Err(PipelineError::DuplicateMarket(_)) => {
                debug!(market_id = %market.id, "market already indexed");
            }
            Err(e) => {
                error!(market_id = %market.id, error = %e, "failed to index market");
            }
        }
    }
}

/// Drive one news item through the full candidate lifecycle.
pub async fn process_news_item(
    matcher: Arc<CandidateMatcher>,
    judge: Arc<JudgeGateway>,
    engine: Arc<DecisionEngine>,
    coordinator: Arc<ExecutionCoordinator>,
    news: Arc<NewsItem>,
) {
    let candidates = match matcher.match_news(&news) {
        Ok(c) => c,
        Err(e) => {
            error!(news_id = %news.id, error = %e, "candidate matching failed");
            return;
        }
    };

    if candidates.is_empty() {
        debug!(news_id = %news.id, "no candidates above threshold");
        return;
    }

    let news_text = news.matching_text();

    for candidate in candidates {
        let market_id = candidate.market_id.clone();
        let market_text = format!(
            "{} {}",
            candidate.market_title, candidate.market_description
        );

        let judged = judge.judge(candidate, &market_text, &news_text).await;

        if judged.relevance == Relevance::NotRelevant {
            // Remember the verdict so the pair isn't re-judged within the
            // recency window.
            matcher.note_not_relevant(&market_id, &news.id);
            continue;
        }

        // Claim before the decision oracle runs: the exclusive scope spans
        // decision creation through execution resolution.
        let claim = match coordinator.claim(&market_id) {
            Ok(claim) => claim,
            Err(PipelineError::MarketBusy(_)) => {
                info!(%market_id, news_id = %news.id, "market busy; dropping candidate");
                metrics::counter!("candidates_dropped_total", "reason" => "market_busy")
                    .increment(1);
                continue;
            }
            Err(e) => {
                error!(%market_id, error = %e, "claim failed");
                continue;
            }
        };

        let decision = engine.decide(&judged, &news).await;

        match coordinator.execute(claim, &decision).await {
            Ok(Some(record)) => {
                info!(
                    trade_id = %record.id,
                    %market_id,
                    status = record.status.as_str(),
                    "candidate lifecycle complete"
                );
            }
            Ok(None) => {
                debug!(%market_id, "candidate ended in hold");
            }
            Err(e) => {
                error!(%market_id, error = %e, "execution failed");
            }
        }
    }
}

#[async_trait::async_trait]
impl Actor for PipelineActor {
    async fn run(self) -> Result<()> {
        info!("PipelineActor started");

        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let mut tasks = tokio::task::JoinSet::new();

        let mut market_rx = self.bus.market_events.subscribe();
        let mut news_rx = self.bus.raw_news.subscribe();

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("PipelineActor: shutdown requested");
                    break;
                }

                // Market index maintenance path
                res = market_rx.recv() => {
                    match res {
                        Ok(ev) => self.handle_market_event(&ev).await,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            warn!(lagged = n, "PipelineActor lagged on market_events");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                            error!("market_events stream closed; exiting PipelineActor");
                            break;
                        }
                    }
                }

                // News path: fan out, bounded by the semaphore
                res = news_rx.recv() => {
                    match res {
                        Ok(news) => {
                            let semaphore = semaphore.clone();
                            let matcher = self.matcher.clone();
                            let judge = self.judge.clone();
                            let engine = self.engine.clone();
                            let coordinator = self.coordinator.clone();
                            tasks.spawn(async move {
                                let _permit = match semaphore.acquire_owned().await {
                                    Ok(p) => p,
                                    Err(_) => return, // semaphore closed on shutdown
                                };
                                process_news_item(matcher, judge, engine, coordinator, news).await;
                            });
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            warn!(lagged = n, "PipelineActor lagged on raw_news");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                            error!("raw_news stream closed; exiting PipelineActor");
                            break;
                        }
                    }
                }

                // Reap finished news tasks
                Some(res) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(panic) = res {
                        error!(?panic, "news task panicked");
                    }
                }
            }
        }

        // Drain: let in-flight oracle/venue calls finish before exit so no
        // trade record is left without a terminal status.
        info!(in_flight = tasks.len(), "PipelineActor draining in-flight work");
        while let Some(res) = tasks.join_next().await {
            if let Err(panic) = res {
                error!(?panic, "news task panicked during drain");
            }
        }

        info!("PipelineActor stopped cleanly");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::config::MatcherCfg;
    use crate::core::retry::RetryPolicy;
    use crate::core::types::{MarketMetadata, TradeAction, TradeSide, TradeStatus};
    use crate::decision::engine::DecisionOracle;
    use crate::decision::metadata::MetadataClient;
    use crate::execution::venue::{Venue, VenueReceipt};
    use crate::judge::gateway::RelevanceOracle;
    use crate::matching::embedder::Embedder;
    use crate::matching::index::MarketIndex;
    use crate::persistence::store::MemStore;
    use async_trait::async_trait;
    use chrono::Utc;
    use rust_decimal::Decimal;
    use std::time::Duration;

    struct StubEmbedder;

    impl Embedder for StubEmbedder {
        fn embed(&self, text: &str) -> Result<Vec<f32>> {
            // Everything about zinc lands close together; anything else far.
            if text.contains("zinc") {
                Ok(vec![1.0, 0.0])
            } else {
                Ok(vec![0.0, 1.0])
            }
        }
    }

    struct FixedJudge(&'static str);

    #[async_trait]
    impl RelevanceOracle for FixedJudge {
        async fn assess(&self, _news: &str, _market: &str) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    struct FixedDecider(&'static str);

    #[async_trait]
    impl DecisionOracle for FixedDecider {
        async fn decide(&self, _t: &str, _b: &str, _m: &MarketMetadata) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    struct FixedMetadata;

    #[async_trait]
    impl MetadataClient for FixedMetadata {
        async fn fetch(&self, market_id: &str) -> Result<MarketMetadata> {
            Ok(MarketMetadata {
                market_id: market_id.to_string(),
                price: Decimal::new(55, 2),
                volume_24h: Decimal::new(1000, 0),
                ..MarketMetadata::default()
            })
        }
    }

    struct FillingVenue;

    #[async_trait]
    impl Venue for FillingVenue {
        async fn submit(
            &self,
            _market_id: &str,
            _side: TradeSide,
            size: Decimal,
            limit_price: Decimal,
        ) -> Result<VenueReceipt> {
            Ok(VenueReceipt::Filled {
                price: limit_price,
                size,
            })
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
            multiplier: 2.0,
            timeout: Duration::from_millis(100),
        }
    }

    struct Rig {
        matcher: Arc<CandidateMatcher>,
        judge: Arc<JudgeGateway>,
        engine: Arc<DecisionEngine>,
        coordinator: Arc<ExecutionCoordinator>,
        store: MemStore,
    }

    fn rig(judge_verdict: &'static str, decider_verdict: &'static str) -> Rig {
        let index = Arc::new(MarketIndex::new().unwrap());
        let matcher = Arc::new(CandidateMatcher::new(
            MatcherCfg::default(),
            Arc::new(StubEmbedder),
            index,
        ));
        let judge = Arc::new(JudgeGateway::new(
            Arc::new(FixedJudge(judge_verdict)),
            fast_retry(),
        ));
        let engine = Arc::new(DecisionEngine::new(
            Arc::new(FixedDecider(decider_verdict)),
            Arc::new(FixedMetadata),
            fast_retry(),
        ));
        let store = MemStore::new();
        let coordinator = Arc::new(ExecutionCoordinator::new(
            Arc::new(FillingVenue),
            Arc::new(store.clone()),
            Bus::new(),
            fast_retry(),
        ));
        Rig {
            matcher,
            judge,
            engine,
            coordinator,
            store,
        }
    }

    fn market(id: &str) -> Market {
        Market {
            id: id.to_string(),
            title: "zinc cobalt nickel lithium".to_string(),
            description: String::new(),
            created_at: Utc::now(),
            status: MarketStatus::Open,
        }
    }

    fn news(id: &str) -> Arc<NewsItem> {
        Arc::new(NewsItem {
            id: id.to_string(),
            source: "test".to_string(),
            title: "zinc cobalt copper".to_string(),
            body: String::new(),
            published: Some(Utc::now()),
        })
    }

    #[tokio::test]
    async fn relevant_news_ends_in_an_executed_trade() {
        let rig = rig(
            r#"{"related": "yes", "reasoning": "same metals"}"#,
            r#"{"action": "buy", "side": "yes", "size": 10, "confidence": 0.8, "rationale": "supply shock"}"#,
        );
        rig.matcher.index_market(&market("m1")).unwrap();

        process_news_item(
            rig.matcher.clone(),
            rig.judge.clone(),
            rig.engine.clone(),
            rig.coordinator.clone(),
            news("n1"),
        )
        .await;

        let trades = rig.store.trades().await;
        assert_eq!(trades.len(), 1);
        let trade = &trades[0];
        assert_eq!(trade.market_id, "m1");
        assert_eq!(trade.action, TradeAction::Buy);
        assert_eq!(trade.side, TradeSide::Yes);
        assert_eq!(trade.status, TradeStatus::Executed);
    }

    #[tokio::test]
    async fn not_relevant_candidate_is_dropped_and_remembered() {
        let rig = rig(
            r#"{"related": "no", "reasoning": "different topics"}"#,
            r#"{"action": "buy", "side": "yes", "size": 10}"#,
        );
        rig.matcher.index_market(&market("m1")).unwrap();

        let item = news("n1");
        process_news_item(
            rig.matcher.clone(),
            rig.judge.clone(),
            rig.engine.clone(),
            rig.coordinator.clone(),
            item.clone(),
        )
        .await;

        assert!(rig.store.trades().await.is_empty());
        // The NotRelevant verdict is dedup-visible: the same pair no longer
        // surfaces as a candidate.
        assert!(rig.matcher.match_news(&item).unwrap().is_empty());
    }

    #[tokio::test]
    async fn hold_decision_creates_no_trade() {
        let rig = rig(
            r#"{"related": "yes", "reasoning": "same metals"}"#,
            r#"{"action": "hold", "rationale": "price already implies the view"}"#,
        );
        rig.matcher.index_market(&market("m1")).unwrap();

        process_news_item(
            rig.matcher.clone(),
            rig.judge.clone(),
            rig.engine.clone(),
            rig.coordinator.clone(),
            news("n1"),
        )
        .await;

        assert!(rig.store.trades().await.is_empty());
        // And the market is free for later candidates.
        assert!(rig.coordinator.claim("m1").is_ok());
    }

    #[tokio::test]
    async fn busy_market_drops_the_candidate() {
        let rig = rig(
            r#"{"related": "yes", "reasoning": "same metals"}"#,
            r#"{"action": "buy", "side": "yes", "size": 10}"#,
        );
        rig.matcher.index_market(&market("m1")).unwrap();

        let held = rig.coordinator.claim("m1").unwrap();

        process_news_item(
            rig.matcher.clone(),
            rig.judge.clone(),
            rig.engine.clone(),
            rig.coordinator.clone(),
            news("n1"),
        )
        .await;

        assert!(rig.store.trades().await.is_empty());
        drop(held);
    }
}
