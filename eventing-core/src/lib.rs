//! # Eventing Core
//!
//! Runtime for mutation-triggered functions: user logic that runs for every
//! change to a document in a key-value bucket.
//!
//! ## Overview
//!
//! - **Query compilation**: templates with `${slot}` substitutions, identifier quoting
//! - **KV facade**: typed get/set/delete against explicitly injected buckets
//! - **Timers**: `(key, callback)` deadlines, last registration wins, fire once
//! - **Queues**: at-least-once hand-off of opaque work items
//! - **Dispatch**: per-key serialized handlers with isolated failures
//! - **HTTP bridge**: exact-match request routes over the same collaborators
//!
//! ## Feature Flags
//!
//! - `redis` (default): Redis-backed [`kv::KvBackend`] and [`queue::QueueGateway`]
//!
//! ## Architecture
//!
//! A [`feed::ChangeFeed`] is pumped into a [`dispatch::Dispatcher`], which runs
//! the configured [`dispatch::EventHandler`] with a [`dispatch::HandlerContext`].
//! A [`timers::TimerDriver`] hands due timers to the same dispatcher, so they
//! share per-key ordering with change events. The [`bridge::HttpBridge`] runs
//! independently over the same KV facade and query service.
//!
//! ## Examples
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use eventing_core::{
//!     dispatch::{Dispatcher, EventHandler, HandlerContext},
//!     error::HandlerError,
//!     kv::{KvFacade, MemoryKvBackend},
//!     query::{MemoryQueryEngine, QueryCompiler, QueryService},
//!     queue::MemoryQueueGateway,
//!     timers::{CallbackId, SystemClock, TimerRegistry},
//!     types::MutationEvent,
//! };
//!
//! struct Mirror;
//!
//! #[async_trait::async_trait]
//! impl EventHandler for Mirror {
//!     fn name(&self) -> &str {
//!         "mirror"
//!     }
//!
//!     async fn on_mutation(
//!         &self,
//!         ctx: &HandlerContext,
//!         event: &MutationEvent,
//!     ) -> Result<(), HandlerError> {
//!         ctx.bucket("mirror").set_raw(&event.key, event.body.clone()).await?;
//!         Ok(())
//!     }
//! }
//!
//! # async fn run() {
//! let store = Arc::new(MemoryKvBackend::with_buckets(["mirror"]));
//! let query = QueryService::new(
//!     QueryCompiler::default(),
//!     Arc::new(MemoryQueryEngine::new(store.clone())),
//! );
//! let timers = Arc::new(TimerRegistry::new(
//!     Arc::new(SystemClock),
//!     Vec::<CallbackId>::new(),
//! ));
//! let ctx = HandlerContext::new(
//!     KvFacade::new(store),
//!     query,
//!     timers,
//!     Arc::new(MemoryQueueGateway::new()),
//! );
//!
//! let dispatcher = Dispatcher::builder(ctx, Arc::new(Mirror)).build();
//! let ticket = dispatcher
//!     .submit(MutationEvent::json("u1", &serde_json::json!({"n": 1}), 1))
//!     .unwrap();
//! assert!(ticket.outcome().await.unwrap().succeeded());
//! # }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod bridge;
pub mod dispatch;
pub mod error;
pub mod feed;
pub mod kv;
pub mod query;
pub mod queue;
pub mod timers;
pub mod types;

pub use error::{EventingError, Result};
