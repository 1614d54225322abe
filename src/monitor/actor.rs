//! Monitoring Loop.
//!
//! Per executed trade: Executed -> {watching} -> Evaluated. Each interval,
//! every Executed-but-unevaluated trade is checked against live market
//! metadata; a spike (relative price or volume move) or the evaluation
//! deadline — whichever comes first — closes the watch with an append-only
//! EvaluationOutcome. Markets without an executed trade are never polled,
//! and a metadata fetch failure just leaves the trade in the watch set for
//! the next tick.

use crate::config::config::MonitorCfg;
use crate::core::types::{
    Actor, CorrectnessLabel, EvaluationOutcome, EvaluationTrigger, MarketMetadata, MarketStatus,
    TradeAction, TradeRecord, TradeSide, TradeStatus,
};
use anyhow::Result;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::decision::metadata::MetadataClient;
use crate::persistence::store::TradeStore;

pub struct MonitorActor {
    store: Arc<dyn TradeStore>,
    metadata: Arc<dyn MetadataClient>,
    cfg: MonitorCfg,
    shutdown: CancellationToken,
}

impl MonitorActor {
    pub fn new(
        store: Arc<dyn TradeStore>,
        metadata: Arc<dyn MetadataClient>,
        cfg: MonitorCfg,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            store,
            metadata,
            cfg,
            shutdown,
        }
    }

    /// One pass over the watch set. Failures are contained per trade.
    pub async fn scan(&self) {
        let watchlist = match self.store.load_watchlist().await {
            Ok(trades) => trades,
            Err(e) => {
                error!(error = %e, "failed to load trade watchlist");
                return;
            }
        };

        for trade in watchlist {
            let metadata = match self.metadata.fetch(&trade.market_id).await {
                Ok(md) => md,
                Err(e) => {
                    // Transient: the trade stays in the watch set.
                    warn!(
                        market_id = %trade.market_id,
                        error = %e,
                        "metadata fetch failed; will retry next interval"
                    );
                    continue;
                }
            };

            let outcome = match evaluate(&trade, &metadata, Utc::now(), &self.cfg) {
                Some(outcome) => outcome,
                None => continue,
            };

            if let Err(e) = self.store.append_evaluation(&outcome).await {
                error!(trade_id = %trade.id, error = %e, "failed to append evaluation");
                continue; // keep watching; retried next tick
            }

            let mut evaluated = trade.clone();
            evaluated.status = TradeStatus::Evaluated;
            if let Err(e) = self.store.update_trade(&evaluated).await {
                error!(trade_id = %trade.id, error = %e, "failed to mark trade evaluated");
                continue;
            }

            if let Err(e) = self
                .store
                .set_market_status(&trade.market_id, MarketStatus::Closed)
                .await
            {
                error!(market_id = %trade.market_id, error = %e, "failed to close market");
            }

            metrics::counter!(
                "evaluations_total",
                "label" => outcome.label.as_str(),
                "trigger" => outcome.trigger.as_str()
            )
            .increment(1);

            info!(
                trade_id = %trade.id,
                market_id = %trade.market_id,
                label = outcome.label.as_str(),
                trigger = outcome.trigger.as_str(),
                price_delta = %outcome.price_delta_pct,
                "trade evaluated"
            );
        }
    }
}

/// Decide whether a trade is due for evaluation and, if so, derive the
/// outcome. Pure: all the state machine logic lives here.
pub fn evaluate(
    trade: &TradeRecord,
    metadata: &MarketMetadata,
    now: DateTime<Utc>,
    cfg: &MonitorCfg,
) -> Option<EvaluationOutcome> {
    let fill = trade.fill.as_ref()?;

    let price_delta_pct = if fill.price > Decimal::ZERO {
        (metadata.price - fill.price) / fill.price
    } else {
        Decimal::ZERO
    };
    let volume_delta_pct = if trade.entry_volume > Decimal::ZERO {
        (metadata.volume_24h - trade.entry_volume) / trade.entry_volume
    } else {
        Decimal::ZERO
    };

    let price_threshold = Decimal::from_f64(cfg.spike_price_pct)?;
    let volume_threshold = Decimal::from_f64(cfg.spike_volume_pct)?;
    let spiked =
        price_delta_pct.abs() >= price_threshold || volume_delta_pct.abs() >= volume_threshold;

    let watch_started = trade.executed_at.unwrap_or(trade.created_at);
    let deadline_passed = now
        .signed_duration_since(watch_started)
        .to_std()
        .map(|elapsed| elapsed >= cfg.eval_deadline)
        .unwrap_or(false);

    let trigger = if spiked {
        EvaluationTrigger::Spike
    } else if deadline_passed {
        EvaluationTrigger::Deadline
    } else {
        return None;
    };

    // Did the trade direction align with the subsequent movement? Buying
    // Yes (or selling No) expects the quoted price to rise; the mirror
    // positions expect it to fall.
    let expects_rise = matches!(
        (trade.action, trade.side),
        (TradeAction::Buy, TradeSide::Yes) | (TradeAction::Sell, TradeSide::No)
    );
    let label = if price_delta_pct == Decimal::ZERO {
        CorrectnessLabel::Flat
    } else if (price_delta_pct > Decimal::ZERO) == expects_rise {
        CorrectnessLabel::Aligned
    } else {
        CorrectnessLabel::Opposed
    };

    Some(EvaluationOutcome {
        trade_id: trade.id.clone(),
        market_id: trade.market_id.clone(),
        price_at_eval: metadata.price,
        volume_at_eval: metadata.volume_24h,
        price_delta_pct,
        volume_delta_pct,
        label,
        trigger,
        evaluated_at: now,
    })
}

#[async_trait::async_trait]
impl Actor for MonitorActor {
    async fn run(self) -> Result<()> {
        info!("MonitorActor started");

        let mut tick = tokio::time::interval(self.cfg.interval);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("MonitorActor: shutdown requested");
                    break;
                }
                _ = tick.tick() => {
                    self.scan().await;
                }
            }
        }

        info!("MonitorActor stopped cleanly");
        Ok(())
    }
}
