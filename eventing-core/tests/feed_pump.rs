use std::sync::Arc;

use async_trait::async_trait;
use eventing_core::dispatch::{Dispatcher, EventHandler, HandlerContext};
use eventing_core::error::HandlerError;
use eventing_core::feed::{ChannelFeed, FeedPump, JsonLinesFeed};
use eventing_core::kv::{KvFacade, MemoryKvBackend};
use eventing_core::query::{MemoryQueryEngine, QueryCompiler, QueryService};
use eventing_core::queue::MemoryQueueGateway;
use eventing_core::timers::{CallbackId, SystemClock, TimerRegistry};
use eventing_core::types::{DeletionEvent, MutationEvent};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

/// Mirrors JSON documents into the `mirror` bucket and removes them on
/// deletion.
struct Mirror;

#[async_trait]
impl EventHandler for Mirror {
    fn name(&self) -> &str {
        "mirror"
    }

    async fn on_mutation(
        &self,
        ctx: &HandlerContext,
        event: &MutationEvent,
    ) -> Result<(), HandlerError> {
        if let Some(doc) = event.json_body()? {
            ctx.bucket("mirror").set(&event.key, &doc).await?;
        }
        Ok(())
    }

    async fn on_deletion(
        &self,
        ctx: &HandlerContext,
        event: &DeletionEvent,
    ) -> Result<(), HandlerError> {
        ctx.bucket("mirror").delete(&event.key).await?;
        Ok(())
    }
}

fn dispatcher() -> Dispatcher {
    let store = Arc::new(MemoryKvBackend::with_buckets(["mirror"]));
    let query = QueryService::new(
        QueryCompiler::default(),
        Arc::new(MemoryQueryEngine::new(store.clone())),
    );
    let timers = Arc::new(TimerRegistry::new(
        Arc::new(SystemClock),
        Vec::<CallbackId>::new(),
    ));
    let ctx = HandlerContext::new(
        KvFacade::new(store),
        query,
        timers,
        Arc::new(MemoryQueueGateway::new()),
    );
    Dispatcher::builder(ctx, Arc::new(Mirror)).build()
}

#[tokio::test]
async fn replay_file_is_applied_in_order() {
    let replay = r#"{"op":"mutation","key":"u1","doc":{"city":"Oakland"},"seq":1}
{"op":"mutation","key":"u2","doc":{"city":"Reno"},"seq":1}
this line is garbage
{"op":"mutation","key":"u1","doc":{"city":"San Francisco"},"seq":2}
{"op":"deletion","key":"u2","seq":2}
{"op":"mutation","key":"u1","doc":{"city":"stale"},"seq":1}
"#;
    let dispatcher = dispatcher();
    let feed = JsonLinesFeed::new(replay.as_bytes());

    let report = FeedPump::new(feed, dispatcher.clone())
        .run(CancellationToken::new())
        .await
        .unwrap();
    dispatcher.wait_idle().await;

    assert!(report.exhausted);
    assert_eq!(report.forwarded, 5);
    assert_eq!(report.rejected, 1);

    let mirror = dispatcher.context().bucket("mirror");
    assert_eq!(
        mirror.get::<Value>("u1").await.unwrap(),
        Some(json!({"city": "San Francisco"}))
    );
    assert_eq!(mirror.get::<Value>("u2").await.unwrap(), None);
    assert_eq!(dispatcher.stats().skipped, 1);
}

#[tokio::test]
async fn channel_feed_stops_on_shutdown() {
    let dispatcher = dispatcher();
    let (sender, feed) = ChannelFeed::new(8);
    let shutdown = CancellationToken::new();
    let mut outcomes = dispatcher.subscribe();
    let pump = tokio::spawn(FeedPump::new(feed, dispatcher.clone()).run(shutdown.clone()));

    sender
        .send(MutationEvent::json("k", &json!({"v": 1}), 1).into())
        .await
        .unwrap();

    let outcome = outcomes.recv().await.unwrap();
    assert!(outcome.succeeded());

    shutdown.cancel();
    let report = pump.await.unwrap().unwrap();
    assert_eq!(report.forwarded, 1);
    assert!(!report.exhausted);
    drop(sender);
}

#[tokio::test]
async fn channel_feed_ends_when_senders_drop() {
    let dispatcher = dispatcher();
    let (sender, feed) = ChannelFeed::new(2);
    sender
        .send(DeletionEvent::new("gone", 1).into())
        .await
        .unwrap();
    drop(sender);

    let report = FeedPump::new(feed, dispatcher.clone())
        .run(CancellationToken::new())
        .await
        .unwrap();
    assert!(report.exhausted);
    assert_eq!(report.forwarded, 1);
}
