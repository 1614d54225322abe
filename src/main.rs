mod bus;
mod config;
mod core;
mod decision;
mod execution;
mod ingest;
mod judge;
mod llm;
mod matching;
mod monitor;
mod persistence;
mod pipeline;

use crate::bus::types::Bus;
use crate::config::config::AppCfg;
use crate::core::types::Actor;
use crate::decision::engine::DecisionEngine;
use crate::decision::metadata::{GammaMetadataClient, MetadataClient};
use crate::execution::coordinator::ExecutionCoordinator;
use crate::execution::paper::PaperVenue;
use crate::ingest::{MarketFeedActor, NewsFeedActor};
use crate::judge::JudgeGateway;
use crate::llm::LlmClient;
use crate::matching::embedder::{Embedder, FastEmbedder};
use crate::matching::index::MarketIndex;
use crate::matching::matcher::CandidateMatcher;
use crate::monitor::MonitorActor;
use crate::persistence::database::PgStore;
use crate::persistence::store::{MemStore, TradeStore};
use crate::pipeline::PipelineActor;
use anyhow::Result;
use reqwest::Client;
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, info_span};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    dotenv::dotenv().ok();

    let cfg = AppCfg::load("config.yml")?;

    // Root span for the supervisor/main thread
    let span = info_span!(
        "Supervisor",
        pid = %std::process::id(),
        version = env!("CARGO_PKG_VERSION"),
    );
    let _enter = span.enter();

    info!("Starting up");

    info!("Initializing shared pub/sub Bus");
    let bus = Bus::new();
    let shutdown = CancellationToken::new();

    info!("Initializing Client");
    let client = Client::builder()
        .user_agent(cfg.http.user_agent.clone())
        .pool_idle_timeout(cfg.http.pool_idle_timeout)
        .pool_max_idle_per_host(cfg.http.pool_max_idle_per_host)
        .tcp_keepalive(cfg.http.tcp_keep_alive)
        .timeout(cfg.http.timeout)
        .build()
        .expect("client");

    let store: Arc<dyn TradeStore> = if cfg.database.url.is_empty() {
        info!("No database configured; running on the in-memory store");
        Arc::new(MemStore::new())
    } else {
        info!("Connecting to Postgres");
        Arc::new(PgStore::new(&cfg.database.url).await?)
    };

    info!("Initializing embedding model and market index");
    let embedder: Arc<dyn Embedder> = Arc::new(FastEmbedder::new()?);
    let index = Arc::new(MarketIndex::new()?);
    let matcher = Arc::new(CandidateMatcher::new(cfg.matcher.clone(), embedder, index));

    info!("Building pipeline stages");
    let llm = LlmClient::new(cfg.llm.clone(), client.clone());
    let judge = Arc::new(JudgeGateway::new(
        Arc::new(llm.clone()),
        cfg.judge.retry.clone(),
    ));
    let metadata: Arc<dyn MetadataClient> = Arc::new(GammaMetadataClient::new(
        cfg.decision.markets_url.clone(),
        client.clone(),
    ));
    let engine = Arc::new(DecisionEngine::new(
        Arc::new(llm),
        metadata.clone(),
        cfg.decision.retry.clone(),
    ));
    let venue = Arc::new(PaperVenue::new(
        Decimal::from_f64(cfg.execution.bankroll).unwrap_or(Decimal::ZERO),
    ));
    let coordinator = Arc::new(ExecutionCoordinator::new(
        venue,
        store.clone(),
        bus.clone(),
        cfg.execution.retry.clone(),
    ));

    info!("Building actors");
    let market_feed = MarketFeedActor::new(
        bus.clone(),
        client.clone(),
        cfg.market_feed.clone(),
        shutdown.clone(),
    );
    let news_feed = NewsFeedActor::new(
        bus.clone(),
        client.clone(),
        cfg.news_feed.clone(),
        shutdown.clone(),
    );
    let pipeline = PipelineActor::new(
        bus.clone(),
        shutdown.clone(),
        matcher,
        judge,
        engine,
        coordinator,
        store.clone(),
        cfg.pipeline.max_concurrency,
    );
    let monitor = MonitorActor::new(
        store.clone(),
        metadata.clone(),
        cfg.monitor.clone(),
        shutdown.clone(),
    );

    info!("Spawning actors");
    let mut actors = tokio::task::JoinSet::new();

    actors.spawn(market_feed.run().instrument(info_span!("MarketFeed")));
    actors.spawn(news_feed.run().instrument(info_span!("NewsFeed")));
    actors.spawn(pipeline.run().instrument(info_span!("Pipeline")));
    actors.spawn(monitor.run().instrument(info_span!("Monitor")));

    info!("Waiting for actors");

    tokio::select! {
        _ = async {
             while let Some(res) = actors.join_next().await {
                 match res {
                    Ok(Ok(()))  => info!("Actor exited cleanly"),
                    Ok(Err(e))  => error!(?e, "Actor returned error"),
                    Err(panic)  => error!(?panic, "Actor panicked/cancelled"),
                }
            }
        } => {  }
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C received, shutting down supervisor loop");
            shutdown.cancel();
        }
    }

    info!("Waiting for graceful shutdown of actors");
    while let Some(res) = actors.join_next().await {
        match res {
            Ok(Ok(())) => info!("Actor exited cleanly"),
            Ok(Err(e)) => error!(?e, "Actor returned error"),
            Err(panic) => error!(?panic, "Actor panicked/cancelled"),
        }
    }

    info!("Supervisor exit");
    Ok(())
}
