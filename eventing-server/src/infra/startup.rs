use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use eventing_core::bridge::BridgeContext;
use eventing_core::dispatch::{Dispatcher, HandlerContext, RecentFailures};
use eventing_core::feed::{FeedPump, FeedSequences, JsonLinesFeed};
use eventing_core::kv::{KvBackend, KvFacade, MemoryKvBackend};
use eventing_core::query::{MemoryQueryEngine, QueryCompiler, QueryService};
use eventing_core::queue::{MemoryQueueGateway, QueueGateway};
use eventing_core::timers::{SystemClock, TimerDriver, TimerRegistry};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::apps;
use crate::infra::{
    app_state::AppState,
    config::{BackendConfig, Config},
};

/// Builds every runtime collaborator from `config`. Nothing is spawned here;
/// background work starts in [`StartupHooks::run`].
pub async fn wire_app_resources(config: Arc<Config>) -> Result<AppState> {
    let (store, queues): (Arc<dyn KvBackend>, Arc<dyn QueueGateway>) = match &config.backend {
        BackendConfig::Memory => {
            info!(buckets = ?config.buckets.names(), "using in-memory backends");
            (
                Arc::new(MemoryKvBackend::with_buckets(config.buckets.names())),
                Arc::new(MemoryQueueGateway::new()),
            )
        }
        BackendConfig::Redis { url } => {
            let store = eventing_core::kv::redis::RedisKvBackend::connect(url)
                .await
                .context("failed to connect the Redis bucket backend")?;
            let queues =
                eventing_core::queue::redis::RedisQueueGateway::connect(url, &config.queues.prefix)
                    .await
                    .context("failed to connect the Redis queue backend")?;
            info!(prefix = %config.queues.prefix, "connected to Redis");
            (Arc::new(store), Arc::new(queues))
        }
    };

    let query = QueryService::new(
        QueryCompiler::new(config.query.quoting),
        Arc::new(MemoryQueryEngine::new(store.clone())),
    );
    let kv = KvFacade::new(store);

    let callbacks = apps::timer_callbacks(&config);
    let timers = Arc::new(TimerRegistry::new(Arc::new(SystemClock), callbacks.ids()));
    let failures = Arc::new(RecentFailures::new(config.stats.recent_failures));

    let context = HandlerContext::new(kv.clone(), query.clone(), timers.clone(), queues);
    let dispatcher = Dispatcher::builder(context, Arc::new(apps::handler_chain(&config)))
        .config(config.dispatcher.clone())
        .callbacks(callbacks)
        .sink(failures.clone())
        .build();

    let bridge = apps::bridge(BridgeContext::new(kv, query), &config)
        .context("failed to register bridge routes")?;
    info!(routes = bridge.routes().count(), "bridge routes registered");

    Ok(AppState {
        config,
        bridge: Arc::new(bridge),
        dispatcher,
        timers,
        failures,
        sequences: FeedSequences::new(),
        shutdown: CancellationToken::new(),
        started_at: Utc::now(),
    })
}

#[async_trait]
pub trait StartupHooks: Send + Sync {
    async fn run(&self, state: &AppState) -> Result<()>;
}

/// Starts the timer driver, the stats logger and, when configured, a one-off
/// replay of a JSON-lines feed.
#[derive(Debug, Default)]
pub struct ProdStartupHooks;

#[async_trait]
impl StartupHooks for ProdStartupHooks {
    async fn run(&self, state: &AppState) -> Result<()> {
        TimerDriver::new(state.timers.clone(), Arc::new(state.dispatcher.clone()))
            .with_tick(state.config.timers.tick())
            .spawn(state.shutdown.child_token());

        if let Some(every) = state.config.stats.interval() {
            state
                .dispatcher
                .spawn_stats_logger(every, state.shutdown.child_token());
        }

        if let Some(path) = state.config.feed.replay.as_ref() {
            let feed = JsonLinesFeed::open(path)
                .await
                .with_context(|| format!("failed to open replay feed {}", path.display()))?
                .with_sequences(state.sequences.clone());
            let pump = FeedPump::new(feed, state.dispatcher.clone());
            let shutdown = state.shutdown.child_token();
            let path = path.clone();
            tokio::spawn(async move {
                match pump.run(shutdown).await {
                    Ok(report) => info!(
                        path = %path.display(),
                        forwarded = report.forwarded,
                        rejected = report.rejected,
                        exhausted = report.exhausted,
                        "replay finished"
                    ),
                    Err(err) => error!(path = %path.display(), error = %err, "replay aborted"),
                }
            });
        }

        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct NoopStartupHooks;

#[async_trait]
impl StartupHooks for NoopStartupHooks {
    async fn run(&self, _state: &AppState) -> Result<()> {
        Ok(())
    }
}
