use crate::core::types::{MarketEvent, NewsItem, TradeRecord};
use anyhow::Result;
use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;
use tokio::sync::broadcast;

// ---------- Topic trait (broadcast semantics) ----------
#[async_trait]
pub trait Topic<T>: Sync + Send + 'static {
    /// Publish a message to all subscribers.
    async fn publish(&self, msg: T) -> Result<()>;

    /// Subscribe to the stream (each subscriber has an independent cursor).
    fn subscribe(&self) -> broadcast::Receiver<Arc<T>>;
}

// --- Broadcast topic: 1->N fanout (lossy under lag). Payloads wrapped in
// Arc<T> so subscribers don't force a Clone of T per receiver.
pub struct BroadcastTopic<T: Clone + Send + Sync + 'static> {
    tx: broadcast::Sender<Arc<T>>,
}

impl<T: Clone + Send + Sync + 'static> BroadcastTopic<T> {
    pub fn with_capacity(cap: usize) -> Self {
        let (tx, _rx) = broadcast::channel(cap);
        Self { tx }
    }
}

#[async_trait]
impl<T: Debug + Clone + Send + Sync + 'static> Topic<T> for BroadcastTopic<T> {
    async fn publish(&self, msg: T) -> Result<()> {
        // send() only errors when there are no receivers; that's fine here.
        let _ = self.tx.send(Arc::new(msg));
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<Arc<T>> {
        self.tx.subscribe()
    }
}

#[derive(Clone)]
pub struct Bus {
    pub market_events: Arc<dyn Topic<MarketEvent>>,
    pub raw_news: Arc<dyn Topic<NewsItem>>,
    pub trades: Arc<dyn Topic<TradeRecord>>,
}

impl Bus {
    pub fn new() -> Self {
        let cap = 1024;

        Self {
            market_events: Arc::new(BroadcastTopic::<MarketEvent>::with_capacity(cap)),
            raw_news: Arc::new(BroadcastTopic::<NewsItem>::with_capacity(cap)),
            trades: Arc::new(BroadcastTopic::<TradeRecord>::with_capacity(cap)),
        }
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new()
    }
}
