use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::HandlerError;
use crate::kv::{Bucket, KvFacade};
use crate::query::QueryService;
use crate::queue::{QueueGateway, QueueItem};
use crate::timers::{CallbackId, Registration, TimerRegistry};
use crate::types::{DeletionEvent, MutationEvent};

/// Collaborators available to user logic. Cloning is cheap.
#[derive(Clone)]
pub struct HandlerContext {
    kv: KvFacade,
    query: QueryService,
    timers: Arc<TimerRegistry>,
    queues: Arc<dyn QueueGateway>,
}

impl fmt::Debug for HandlerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerContext")
            .field("kv", &self.kv)
            .field("query", &self.query)
            .field("timers", &self.timers)
            .finish_non_exhaustive()
    }
}

impl HandlerContext {
    pub fn new(
        kv: KvFacade,
        query: QueryService,
        timers: Arc<TimerRegistry>,
        queues: Arc<dyn QueueGateway>,
    ) -> Self {
        Self {
            kv,
            query,
            timers,
            queues,
        }
    }

    pub fn kv(&self) -> &KvFacade {
        &self.kv
    }

    pub fn bucket(&self, name: &str) -> Bucket {
        self.kv.bucket(name)
    }

    pub fn query(&self) -> &QueryService {
        &self.query
    }

    pub fn timers(&self) -> &Arc<TimerRegistry> {
        &self.timers
    }

    pub fn queues(&self) -> &dyn QueueGateway {
        self.queues.as_ref()
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.timers.now()
    }

    pub fn schedule(
        &self,
        key: &str,
        callback: &CallbackId,
        fire_at: DateTime<Utc>,
    ) -> Result<Registration, HandlerError> {
        Ok(self.timers.register(key, callback, fire_at)?)
    }

    pub fn cancel_timer(&self, key: &str, callback: &CallbackId) -> bool {
        self.timers.cancel(key, callback)
    }

    pub async fn enqueue_json<T: Serialize + ?Sized + Sync>(
        &self,
        queue: &str,
        value: &T,
    ) -> Result<(), HandlerError> {
        let item = QueueItem::json(value)?;
        Ok(self.queues.enqueue(queue, item).await?)
    }
}

/// User logic bound to the change feed. Both hooks default to doing nothing.
#[async_trait]
pub trait EventHandler: Send + Sync {
    fn name(&self) -> &str;

    /// Binary and other non-JSON bodies reach this hook too; check
    /// [`MutationEvent::is_json`] before decoding.
    async fn on_mutation(
        &self,
        ctx: &HandlerContext,
        event: &MutationEvent,
    ) -> Result<(), HandlerError> {
        let _ = (ctx, event);
        Ok(())
    }

    /// The document may already be gone from the bucket.
    async fn on_deletion(
        &self,
        ctx: &HandlerContext,
        event: &DeletionEvent,
    ) -> Result<(), HandlerError> {
        let _ = (ctx, event);
        Ok(())
    }
}

/// Runs several handlers for each event in registration order. Every handler
/// sees every event even if an earlier one fails; failures are joined.
#[derive(Default)]
pub struct HandlerChain {
    handlers: Vec<Arc<dyn EventHandler>>,
}

impl fmt::Debug for HandlerChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.handlers.iter().map(|h| h.name()).collect();
        f.debug_struct("HandlerChain").field("handlers", &names).finish()
    }
}

impl HandlerChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    fn join(mut failures: Vec<(String, HandlerError)>) -> Result<(), HandlerError> {
        if failures.len() > 1 {
            let message = failures
                .iter()
                .map(|(name, err)| format!("{name}: {err}"))
                .collect::<Vec<_>>()
                .join("; ");
            return Err(HandlerError::logic(message));
        }
        match failures.pop() {
            Some((_, err)) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl EventHandler for HandlerChain {
    fn name(&self) -> &str {
        "chain"
    }

    async fn on_mutation(
        &self,
        ctx: &HandlerContext,
        event: &MutationEvent,
    ) -> Result<(), HandlerError> {
        let mut failures = Vec::new();
        for handler in &self.handlers {
            if let Err(err) = handler.on_mutation(ctx, event).await {
                failures.push((handler.name().to_string(), err));
            }
        }
        Self::join(failures)
    }

    async fn on_deletion(
        &self,
        ctx: &HandlerContext,
        event: &DeletionEvent,
    ) -> Result<(), HandlerError> {
        let mut failures = Vec::new();
        for handler in &self.handlers {
            if let Err(err) = handler.on_deletion(ctx, event).await {
                failures.push((handler.name().to_string(), err));
            }
        }
        Self::join(failures)
    }
}

/// Logic run when a timer fires for `key`.
#[async_trait]
pub trait TimerCallback: Send + Sync {
    async fn fire(&self, ctx: &HandlerContext, key: &str) -> Result<(), HandlerError>;
}

/// Callback ids mapped to their implementations. Built once at startup and
/// read-only afterwards.
#[derive(Default, Clone)]
pub struct CallbackRegistry {
    callbacks: BTreeMap<CallbackId, Arc<dyn TimerCallback>>,
}

impl fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackRegistry")
            .field("ids", &self.callbacks.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registering the same id twice keeps the later callback.
    pub fn with(mut self, id: impl Into<CallbackId>, callback: Arc<dyn TimerCallback>) -> Self {
        self.callbacks.insert(id.into(), callback);
        self
    }

    pub fn get(&self, id: &CallbackId) -> Option<&Arc<dyn TimerCallback>> {
        self.callbacks.get(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = CallbackId> + '_ {
        self.callbacks.keys().cloned()
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }
}
