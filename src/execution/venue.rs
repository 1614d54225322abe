use crate::core::types::TradeSide;
use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;

/// Terminal answer from the venue. A transport failure is NOT a receipt;
/// it surfaces as an Err and is retried by the coordinator.
#[derive(Debug, Clone)]
pub enum VenueReceipt {
    Filled { price: Decimal, size: Decimal },
    Rejected { reason: String },
}

/// Seam for the trading venue (paper execution in this system).
#[async_trait]
pub trait Venue: Send + Sync + 'static {
    async fn submit(
        &self,
        market_id: &str,
        side: TradeSide,
        size: Decimal,
        limit_price: Decimal,
    ) -> Result<VenueReceipt>;
}
