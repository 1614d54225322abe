use crate::core::types::TradeSide;
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;
use tokio::sync::Mutex;

use super::venue::{Venue, VenueReceipt};

#[derive(Debug, Clone)]
pub struct PaperPosition {
    pub quantity: Decimal,
    pub avg_entry_price: Decimal,
    pub last_updated_ts: i64,
}

#[derive(Debug)]
pub struct PaperState {
    pub cash: Decimal,
    /// Keyed by "market_id:side".
    pub positions: HashMap<String, PaperPosition>,
}

/// Simulated venue: instant fills at the submitted limit price, cash and
/// position accounting, no fees.
pub struct PaperVenue {
    state: Mutex<PaperState>,
}

impl PaperVenue {
    pub fn new(initial_cash: Decimal) -> Self {
        Self {
            state: Mutex::new(PaperState {
                cash: initial_cash,
                positions: HashMap::new(),
            }),
        }
    }

    pub async fn cash(&self) -> Decimal {
        self.state.lock().await.cash
    }

    pub async fn position(&self, market_id: &str, side: TradeSide) -> Option<PaperPosition> {
        self.state
            .lock()
            .await
            .positions
            .get(&position_key(market_id, side))
            .cloned()
    }
}

fn position_key(market_id: &str, side: TradeSide) -> String {
    format!("{}:{}", market_id, side.as_str())
}

#[async_trait]
impl Venue for PaperVenue {
    async fn submit(
        &self,
        market_id: &str,
        side: TradeSide,
        size: Decimal,
        limit_price: Decimal,
    ) -> Result<VenueReceipt> {
        if limit_price <= Decimal::ZERO || size <= Decimal::ZERO {
            return Ok(VenueReceipt::Rejected {
                reason: "invalid-order".to_string(),
            });
        }

        let mut state = self.state.lock().await;
        let cost = limit_price * size;

        if state.cash < cost {
            return Ok(VenueReceipt::Rejected {
                reason: "insufficient-funds".to_string(),
            });
        }
        state.cash -= cost;

        let key = position_key(market_id, side);
        let position = state.positions.entry(key).or_insert(PaperPosition {
            quantity: Decimal::ZERO,
            avg_entry_price: Decimal::ZERO,
            last_updated_ts: 0,
        });

        // Weighted average entry price across fills
        let old_cost = position.quantity * position.avg_entry_price;
        let new_qty = position.quantity + size;
        if new_qty > Decimal::ZERO {
            position.avg_entry_price = (old_cost + cost) / new_qty;
        }
        position.quantity = new_qty;
        position.last_updated_ts = Utc::now().timestamp_millis();

        Ok(VenueReceipt::Filled {
            price: limit_price,
            size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fills_debit_cash_and_build_position() {
        let venue = PaperVenue::new(Decimal::new(100, 0));

        let receipt = venue
            .submit("m1", TradeSide::Yes, Decimal::new(10, 0), Decimal::new(55, 2))
            .await
            .unwrap();

        match receipt {
            VenueReceipt::Filled { price, size } => {
                assert_eq!(price, Decimal::new(55, 2));
                assert_eq!(size, Decimal::new(10, 0));
            }
            VenueReceipt::Rejected { reason } => panic!("unexpected rejection: {reason}"),
        }

        // 100 - 0.55 * 10 = 94.5
        assert_eq!(venue.cash().await, Decimal::new(945, 1));
        let pos = venue.position("m1", TradeSide::Yes).await.unwrap();
        assert_eq!(pos.quantity, Decimal::new(10, 0));
        assert_eq!(pos.avg_entry_price, Decimal::new(55, 2));
    }

    #[tokio::test]
    async fn averages_entry_price_across_fills() {
        let venue = PaperVenue::new(Decimal::new(1000, 0));

        venue
            .submit("m1", TradeSide::Yes, Decimal::new(10, 0), Decimal::new(40, 2))
            .await
            .unwrap();
        venue
            .submit("m1", TradeSide::Yes, Decimal::new(10, 0), Decimal::new(60, 2))
            .await
            .unwrap();

        let pos = venue.position("m1", TradeSide::Yes).await.unwrap();
        assert_eq!(pos.quantity, Decimal::new(20, 0));
        assert_eq!(pos.avg_entry_price, Decimal::new(50, 2));
    }

    #[tokio::test]
    async fn rejects_when_cash_is_short() {
        let venue = PaperVenue::new(Decimal::new(1, 0));

        let receipt = venue
            .submit("m1", TradeSide::Yes, Decimal::new(100, 0), Decimal::new(55, 2))
            .await
            .unwrap();

        assert!(matches!(receipt, VenueReceipt::Rejected { ref reason } if reason == "insufficient-funds"));
        // Nothing was debited
        assert_eq!(venue.cash().await, Decimal::new(1, 0));
    }

    #[tokio::test]
    async fn rejects_degenerate_orders() {
        let venue = PaperVenue::new(Decimal::new(100, 0));
        let receipt = venue
            .submit("m1", TradeSide::No, Decimal::new(10, 0), Decimal::ZERO)
            .await
            .unwrap();
        assert!(matches!(receipt, VenueReceipt::Rejected { .. }));
    }
}
