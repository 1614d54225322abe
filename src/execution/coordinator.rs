//! Execution Coordinator.
//!
//! Owns the single-in-flight-per-market invariant through a keyed claim
//! registry: a claim is taken before the decision oracle runs and held until
//! the trade reaches a terminal status, so concurrent candidates for the
//! same market are rejected with MarketBusy instead of queued. Unrelated
//! markets execute in parallel.
//!
//! Every accepted decision ends in a terminal store write: Executed on a
//! fill, Failed on a venue rejection or an exhausted transport budget. A
//! record is never left Pending.

use crate::bus::types::Bus;
use crate::core::error::PipelineError;
use crate::core::retry::{RetryPolicy, with_retries};
use crate::core::types::{
    Decision, Fill, MarketStatus, TradeAction, TradeRecord, TradeStatus,
};
use chrono::Utc;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};

use super::venue::{Venue, VenueReceipt};
use crate::persistence::store::TradeStore;

/// Exclusive per-market token. Dropping it releases the market.
#[derive(Debug)]
pub struct MarketClaim {
    market_id: String,
    registry: Arc<Mutex<HashSet<String>>>,
}

impl MarketClaim {
    pub fn market_id(&self) -> &str {
        &self.market_id
    }
}

impl Drop for MarketClaim {
    fn drop(&mut self) {
        self.registry
            .lock()
            .expect("claim registry mutex poisoned")
            .remove(&self.market_id);
    }
}

pub struct ExecutionCoordinator {
    venue: Arc<dyn Venue>,
    store: Arc<dyn TradeStore>,
    bus: Bus,
    retry: RetryPolicy,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl ExecutionCoordinator {
    pub fn new(
        venue: Arc<dyn Venue>,
        store: Arc<dyn TradeStore>,
        bus: Bus,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            venue,
            store,
            bus,
            retry,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Take the exclusive decision slot for a market. MarketBusy is a
    /// business rejection, not a fault: callers drop the candidate.
    pub fn claim(&self, market_id: &str) -> Result<MarketClaim, PipelineError> {
        let mut in_flight = self
            .in_flight
            .lock()
            .expect("claim registry mutex poisoned");

        if !in_flight.insert(market_id.to_string()) {
            return Err(PipelineError::MarketBusy(market_id.to_string()));
        }

        Ok(MarketClaim {
            market_id: market_id.to_string(),
            registry: self.in_flight.clone(),
        })
    }

    /// Execute a decision under its claim. Hold releases the claim without a
    /// record; Buy/Sell always end in a persisted terminal record.
    pub async fn execute(
        &self,
        claim: MarketClaim,
        decision: &Decision,
    ) -> Result<Option<TradeRecord>, PipelineError> {
        if claim.market_id() != decision.market_id {
            return Err(PipelineError::Store(format!(
                "claim for {} does not match decision for {}",
                claim.market_id(),
                decision.market_id
            )));
        }

        if decision.action == TradeAction::Hold {
            info!(market_id = %decision.market_id, "hold decision; no execution");
            return Ok(None);
        }

        let side = match decision.side {
            Some(side) => side,
            None => {
                // The engine's parse boundary should make this impossible.
                warn!(market_id = %decision.market_id, "sided action without side; dropping");
                return Ok(None);
            }
        };

        let mut record = TradeRecord {
            id: format!("{}-{}", decision.market_id, Utc::now().timestamp_micros()),
            market_id: decision.market_id.clone(),
            news_id: decision.news_id.clone(),
            action: decision.action,
            side,
            requested_size: decision.size,
            rationale: decision.rationale.clone(),
            status: TradeStatus::Pending,
            fill: None,
            failure: None,
            entry_volume: decision.snapshot.volume_24h,
            created_at: Utc::now(),
            executed_at: None,
        };

        self.store
            .append_trade(&record)
            .await
            .map_err(|e| PipelineError::Store(e.to_string()))?;

        let submit_result = with_retries(&self.retry, "venue-submit", || {
            self.venue
                .submit(&decision.market_id, side, decision.size, decision.snapshot.price)
        })
        .await;

        match submit_result {
            Ok(VenueReceipt::Filled { price, size }) => {
                record.status = TradeStatus::Executed;
                record.fill = Some(Fill { price, size });
                record.executed_at = Some(Utc::now());
                info!(
                    trade_id = %record.id,
                    market_id = %record.market_id,
                    %price,
                    %size,
                    "order filled"
                );
            }
            Ok(VenueReceipt::Rejected { reason }) => {
                record.status = TradeStatus::Failed;
                record.failure = Some(reason.clone());
                warn!(trade_id = %record.id, %reason, "venue rejected order");
            }
            Err(e) => {
                record.status = TradeStatus::Failed;
                record.failure = Some("venue-transport-exhausted".to_string());
                warn!(trade_id = %record.id, error = %e, "venue unreachable; recording failure");
            }
        }

        metrics::counter!("trades_total", "status" => record.status.as_str()).increment(1);

        self.store
            .update_trade(&record)
            .await
            .map_err(|e| PipelineError::Store(e.to_string()))?;

        if record.status == TradeStatus::Executed {
            if let Err(e) = self
                .store
                .set_market_status(&record.market_id, MarketStatus::Monitored)
                .await
            {
                error!(market_id = %record.market_id, error = %e, "failed to mark market monitored");
            }
        }

        if let Err(e) = self.bus.trades.publish(record.clone()).await {
            error!(trade_id = %record.id, error = %e, "failed to publish trade record");
        }

        Ok(Some(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{MarketSnapshot, TradeSide};
    use crate::persistence::store::MemStore;
    use anyhow::Result;
    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn decision(market_id: &str, action: TradeAction) -> Decision {
        Decision {
            market_id: market_id.to_string(),
            news_id: "n1".to_string(),
            action,
            side: (action != TradeAction::Hold).then_some(TradeSide::Yes),
            size: Decimal::new(10, 0),
            confidence: 0.8,
            rationale: "test decision".to_string(),
            snapshot: MarketSnapshot {
                price: Decimal::new(55, 2),
                volume_24h: Decimal::new(1000, 0),
            },
            decided_at: Utc::now(),
        }
    }

    fn fast_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            multiplier: 2.0,
            timeout: Duration::from_millis(100),
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

    struct SlowFillingVenue(Duration);

    #[async_trait]
    impl Venue for SlowFillingVenue {
        async fn submit(
            &self,
            _market_id: &str,
            _side: TradeSide,
            size: Decimal,
            limit_price: Decimal,
        ) -> Result<VenueReceipt> {
            tokio::time::sleep(self.0).await;
            Ok(VenueReceipt::Filled {
                price: limit_price,
                size,
            })
        }
    }

    struct RejectingVenue;

    #[async_trait]
    impl Venue for RejectingVenue {
        async fn submit(
            &self,
            _market_id: &str,
            _side: TradeSide,
            _size: Decimal,
            _limit_price: Decimal,
        ) -> Result<VenueReceipt> {
            Ok(VenueReceipt::Rejected {
                reason: "no-liquidity".to_string(),
            })
        }
    }

    struct DownVenue {
        calls: AtomicU32,
    }

    #[async_trait]
    impl Venue for DownVenue {
        async fn submit(
            &self,
            _market_id: &str,
            _side: TradeSide,
            _size: Decimal,
            _limit_price: Decimal,
        ) -> Result<VenueReceipt> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(anyhow::anyhow!("connection refused"))
        }
    }

    fn coordinator(venue: impl Venue, store: MemStore) -> ExecutionCoordinator {
        ExecutionCoordinator::new(Arc::new(venue), Arc::new(store), Bus::new(), fast_retry(3))
    }

    #[tokio::test]
    async fn fill_produces_executed_record() {
        let store = MemStore::new();
        let coord = coordinator(FillingVenue, store.clone());

        let claim = coord.claim("m1").unwrap();
        let record = coord
            .execute(claim, &decision("m1", TradeAction::Buy))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(record.status, TradeStatus::Executed);
        let fill = record.fill.unwrap();
        assert_eq!(fill.price, Decimal::new(55, 2));
        assert_eq!(fill.size, Decimal::new(10, 0));

        let stored = store.trade(&record.id).await.unwrap();
        assert_eq!(stored.status, TradeStatus::Executed);
    }

    #[tokio::test]
    async fn second_claim_is_market_busy() {
        let store = MemStore::new();
        let coord = coordinator(FillingVenue, store);

        let _held = coord.claim("m1").unwrap();
        let err = coord.claim("m1").unwrap_err();
        assert!(matches!(err, PipelineError::MarketBusy(_)));

        // Other markets are unaffected
        assert!(coord.claim("m2").is_ok());
    }

    #[tokio::test]
    async fn claim_is_released_on_drop() {
        let store = MemStore::new();
        let coord = coordinator(FillingVenue, store);

        let claim = coord.claim("m1").unwrap();
        drop(claim);
        assert!(coord.claim("m1").is_ok());
    }

    #[tokio::test]
    async fn concurrent_decision_is_rejected_while_first_is_pending() {
        let store = MemStore::new();
        let coord = Arc::new(ExecutionCoordinator::new(
            Arc::new(SlowFillingVenue(Duration::from_millis(150))),
            Arc::new(store.clone()),
            Bus::new(),
            fast_retry(1),
        ));

        let claim = coord.claim("m1").unwrap();
        let coord2 = coord.clone();
        let first = tokio::spawn(async move {
            coord2
                .execute(claim, &decision("m1", TradeAction::Buy))
                .await
        });

        // While the first decision is in flight, a second one is rejected.
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(matches!(
            coord.claim("m1").unwrap_err(),
            PipelineError::MarketBusy(_)
        ));

        let record = first.await.unwrap().unwrap().unwrap();
        assert_eq!(record.status, TradeStatus::Executed);

        // Only one trade record was ever created.
        assert_eq!(store.trades().await.len(), 1);

        // After resolution the market can be claimed again.
        assert!(coord.claim("m1").is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn at_most_one_claim_lives_at_any_instant() {
        let store = MemStore::new();
        let coord = Arc::new(coordinator(FillingVenue, store));

        let active = Arc::new(AtomicU32::new(0));
        let max_active = Arc::new(AtomicU32::new(0));
        let barrier = Arc::new(tokio::sync::Barrier::new(8));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let coord = coord.clone();
            let active = active.clone();
            let max_active = max_active.clone();
            let barrier = barrier.clone();
            handles.push(tokio::spawn(async move {
                barrier.wait().await;
                // Retry until this task gets its turn holding the claim.
                loop {
                    match coord.claim("m1") {
                        Ok(claim) => {
                            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                            max_active.fetch_max(now, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(5)).await;
                            active.fetch_sub(1, Ordering::SeqCst);
                            drop(claim);
                            return;
                        }
                        Err(PipelineError::MarketBusy(_)) => {
                            tokio::time::sleep(Duration::from_millis(1)).await;
                        }
                        Err(e) => panic!("unexpected error: {e}"),
                    }
                }
            }));
        }

        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(max_active.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn venue_rejection_is_recorded_as_failed() {
        let store = MemStore::new();
        let coord = coordinator(RejectingVenue, store.clone());

        let claim = coord.claim("m1").unwrap();
        let record = coord
            .execute(claim, &decision("m1", TradeAction::Buy))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(record.status, TradeStatus::Failed);
        assert_eq!(record.failure.as_deref(), Some("no-liquidity"));
        assert_eq!(
            store.trade(&record.id).await.unwrap().status,
            TradeStatus::Failed
        );
    }

    #[tokio::test]
    async fn transport_exhaustion_never_leaves_pending() {
        let store = MemStore::new();
        let venue = Arc::new(DownVenue {
            calls: AtomicU32::new(0),
        });
        let coord = ExecutionCoordinator::new(
            venue.clone(),
            Arc::new(store.clone()),
            Bus::new(),
            fast_retry(3),
        );

        let claim = coord.claim("m1").unwrap();
        let record = coord
            .execute(claim, &decision("m1", TradeAction::Buy))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(venue.calls.load(Ordering::SeqCst), 3);
        assert_eq!(record.status, TradeStatus::Failed);
        assert_eq!(record.failure.as_deref(), Some("venue-transport-exhausted"));
        assert_eq!(
            store.trade(&record.id).await.unwrap().status,
            TradeStatus::Failed
        );
    }

    #[tokio::test]
    async fn hold_releases_claim_without_a_record() {
        let store = MemStore::new();
        let coord = coordinator(FillingVenue, store.clone());

        let claim = coord.claim("m1").unwrap();
        let res = coord
            .execute(claim, &decision("m1", TradeAction::Hold))
            .await
            .unwrap();

        assert!(res.is_none());
        assert!(store.trades().await.is_empty());
        assert!(coord.claim("m1").is_ok());
    }
}
