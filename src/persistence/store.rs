//! Durable store seam: append-only trades and evaluation outcomes, upserted
//! markets. `MemStore` backs tests and database-less paper runs; `PgStore`
//! (persistence::database) is the production implementation.

use crate::core::types::{
    EvaluationOutcome, Market, MarketStatus, TradeRecord, TradeStatus,
};
use anyhow::{Result, bail};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

#[async_trait]
pub trait TradeStore: Send + Sync + 'static {
    async fn upsert_market(&self, market: &Market) -> Result<()>;
    async fn set_market_status(&self, market_id: &str, status: MarketStatus) -> Result<()>;

    /// Insert a fresh (Pending) trade record.
    async fn append_trade(&self, trade: &TradeRecord) -> Result<()>;

    /// Apply a status transition. Implementations enforce monotonicity:
    /// Pending -> {Executed|Failed} -> (Executed only) -> Evaluated.
    async fn update_trade(&self, trade: &TradeRecord) -> Result<()>;

    /// Executed trades not yet evaluated: the monitoring loop's watch set.
    async fn load_watchlist(&self) -> Result<Vec<TradeRecord>>;

    async fn append_evaluation(&self, outcome: &EvaluationOutcome) -> Result<()>;
}

#[derive(Default)]
struct MemState {
    markets: HashMap<String, Market>,
    trades: HashMap<String, TradeRecord>,
    evaluations: Vec<EvaluationOutcome>,
}

/// In-memory store guarded by a single async mutex.
#[derive(Clone, Default)]
pub struct MemStore {
    state: Arc<Mutex<MemState>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn trade(&self, trade_id: &str) -> Option<TradeRecord> {
        self.state.lock().await.trades.get(trade_id).cloned()
    }

    pub async fn trades(&self) -> Vec<TradeRecord> {
        self.state.lock().await.trades.values().cloned().collect()
    }

    pub async fn market(&self, market_id: &str) -> Option<Market> {
        self.state.lock().await.markets.get(market_id).cloned()
    }

    pub async fn evaluations(&self) -> Vec<EvaluationOutcome> {
        self.state.lock().await.evaluations.clone()
    }
}

#[async_trait]
impl TradeStore for MemStore {
    async fn upsert_market(&self, market: &Market) -> Result<()> {
        self.state
            .lock()
            .await
            .markets
            .insert(market.id.clone(), market.clone());
        Ok(())
    }

    async fn set_market_status(&self, market_id: &str, status: MarketStatus) -> Result<()> {
        if let Some(m) = self.state.lock().await.markets.get_mut(market_id) {
            m.status = status;
        }
        Ok(())
    }

    async fn append_trade(&self, trade: &TradeRecord) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.trades.contains_key(&trade.id) {
            bail!("trade {} already recorded", trade.id);
        }
        state.trades.insert(trade.id.clone(), trade.clone());
        Ok(())
    }

    async fn update_trade(&self, trade: &TradeRecord) -> Result<()> {
        let mut state = self.state.lock().await;
        let current = match state.trades.get(&trade.id) {
            Some(t) => t,
            None => bail!("trade {} not found", trade.id),
        };
        if !current.status.can_transition_to(trade.status) {
            bail!(
                "illegal trade status transition {} -> {} for {}",
                current.status.as_str(),
                trade.status.as_str(),
                trade.id
            );
        }
        state.trades.insert(trade.id.clone(), trade.clone());
        Ok(())
    }

    async fn load_watchlist(&self) -> Result<Vec<TradeRecord>> {
        Ok(self
            .state
            .lock()
            .await
            .trades
            .values()
            .filter(|t| t.status == TradeStatus::Executed)
            .cloned()
            .collect())
    }

    async fn append_evaluation(&self, outcome: &EvaluationOutcome) -> Result<()> {
        self.state.lock().await.evaluations.push(outcome.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Fill, TradeAction, TradeSide};
    use chrono::Utc;
    use rust_decimal::Decimal;

    fn pending_trade(id: &str) -> TradeRecord {
        TradeRecord {
            id: id.to_string(),
            market_id: "m1".to_string(),
            news_id: "n1".to_string(),
            action: TradeAction::Buy,
            side: TradeSide::Yes,
            requested_size: Decimal::new(10, 0),
            rationale: "test".to_string(),
            status: TradeStatus::Pending,
            fill: None,
            failure: None,
            entry_volume: Decimal::new(1000, 0),
            created_at: Utc::now(),
            executed_at: None,
        }
    }

    #[tokio::test]
    async fn status_updates_are_monotonic() {
        let store = MemStore::new();
        let mut trade = pending_trade("t1");
        store.append_trade(&trade).await.unwrap();

        trade.status = TradeStatus::Executed;
        trade.fill = Some(Fill {
            price: Decimal::new(55, 2),
            size: Decimal::new(10, 0),
        });
        trade.executed_at = Some(Utc::now());
        store.update_trade(&trade).await.unwrap();

        // Reverting to Pending is rejected
        let mut revert = trade.clone();
        revert.status = TradeStatus::Pending;
        assert!(store.update_trade(&revert).await.is_err());

        // Executed -> Evaluated is legal, and terminal
        trade.status = TradeStatus::Evaluated;
        store.update_trade(&trade).await.unwrap();
        let mut again = trade.clone();
        again.status = TradeStatus::Executed;
        assert!(store.update_trade(&again).await.is_err());
    }

    #[tokio::test]
    async fn failed_trades_cannot_be_evaluated() {
        let store = MemStore::new();
        let mut trade = pending_trade("t1");
        store.append_trade(&trade).await.unwrap();

        trade.status = TradeStatus::Failed;
        trade.failure = Some("venue rejected".to_string());
        store.update_trade(&trade).await.unwrap();

        trade.status = TradeStatus::Evaluated;
        assert!(store.update_trade(&trade).await.is_err());
    }

    #[tokio::test]
    async fn watchlist_is_executed_only() {
        let store = MemStore::new();

        let mut executed = pending_trade("t1");
        store.append_trade(&executed).await.unwrap();
        executed.status = TradeStatus::Executed;
        store.update_trade(&executed).await.unwrap();

        let pending = pending_trade("t2");
        store.append_trade(&pending).await.unwrap();

        let mut evaluated = pending_trade("t3");
        store.append_trade(&evaluated).await.unwrap();
        evaluated.status = TradeStatus::Executed;
        store.update_trade(&evaluated).await.unwrap();
        evaluated.status = TradeStatus::Evaluated;
        store.update_trade(&evaluated).await.unwrap();

        let watchlist = store.load_watchlist().await.unwrap();
        assert_eq!(watchlist.len(), 1);
        assert_eq!(watchlist[0].id, "t1");
    }

    #[tokio::test]
    async fn duplicate_append_is_rejected() {
        let store = MemStore::new();
        let trade = pending_trade("t1");
        store.append_trade(&trade).await.unwrap();
        assert!(store.append_trade(&trade).await.is_err());
    }
}
