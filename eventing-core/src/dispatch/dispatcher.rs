use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{Notify, Semaphore, broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span};
use uuid::Uuid;

use crate::error::{DispatchError, HandlerError};
use crate::timers::{CallbackId, TimerEntry, TimerSink};
use crate::types::{ChangeEvent, EventKind};

use super::handler::{CallbackRegistry, EventHandler, HandlerContext};
use super::outcome::{DispatchStats, EventOutcome, OutcomeBus, OutcomeStatus, StatsSnapshot};
use super::sink::{ErrorSink, Failure, TracingSink};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Upper bound on handlers running at once across all keys.
    pub max_in_flight: usize,
    pub outcome_capacity: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 64,
            outcome_capacity: 1024,
        }
    }
}

enum Work {
    Change(ChangeEvent),
    Timer(TimerEntry),
}

impl Work {
    fn key(&self) -> &str {
        match self {
            Work::Change(event) => event.key(),
            Work::Timer(entry) => &entry.key,
        }
    }

    fn kind(&self) -> EventKind {
        match self {
            Work::Change(event) => event.kind(),
            Work::Timer(_) => EventKind::Timer,
        }
    }
}

struct Job {
    id: Uuid,
    work: Work,
    reply: oneshot::Sender<EventOutcome>,
}

/// Handle to the outcome of one submitted unit of work.
#[derive(Debug)]
pub struct DispatchTicket {
    id: Uuid,
    outcome: oneshot::Receiver<EventOutcome>,
}

impl DispatchTicket {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Waits for the work to finish. `None` if the runtime dropped it.
    pub async fn outcome(self) -> Option<EventOutcome> {
        self.outcome.await.ok()
    }
}

pub struct DispatcherBuilder {
    config: DispatcherConfig,
    context: HandlerContext,
    handler: Arc<dyn EventHandler>,
    callbacks: CallbackRegistry,
    sink: Arc<dyn ErrorSink>,
}

impl fmt::Debug for DispatcherBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatcherBuilder")
            .field("config", &self.config)
            .field("handler", &self.handler.name())
            .field("callbacks", &self.callbacks)
            .finish_non_exhaustive()
    }
}

impl DispatcherBuilder {
    pub fn config(mut self, config: DispatcherConfig) -> Self {
        self.config = config;
        self
    }

    pub fn callbacks(mut self, callbacks: CallbackRegistry) -> Self {
        self.callbacks = callbacks;
        self
    }

    pub fn sink(mut self, sink: Arc<dyn ErrorSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn build(self) -> Dispatcher {
        let permits = self.config.max_in_flight.max(1);
        Dispatcher {
            inner: Arc::new(Inner {
                bus: OutcomeBus::new(self.config.outcome_capacity),
                config: self.config,
                context: self.context,
                handler: self.handler,
                callbacks: self.callbacks,
                sink: self.sink,
                lanes: Mutex::new(HashMap::new()),
                last_seen: DashMap::new(),
                permits: Arc::new(Semaphore::new(permits)),
                stats: DispatchStats::default(),
                closed: AtomicBool::new(false),
                idle: Notify::new(),
            }),
        }
    }
}

/// Runs handlers for change events and fired timers.
///
/// Work for one key runs strictly one at a time in submission order. Work for
/// different keys runs concurrently, bounded by
/// [`DispatcherConfig::max_in_flight`]. A handler error or panic fails only
/// its own event.
///
/// A change event whose sequence number does not exceed the last one seen for
/// its key is skipped, whether the earlier run succeeded or not.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

struct Inner {
    config: DispatcherConfig,
    context: HandlerContext,
    handler: Arc<dyn EventHandler>,
    callbacks: CallbackRegistry,
    sink: Arc<dyn ErrorSink>,
    // A key is present while a drain task owns it.
    lanes: Mutex<HashMap<String, VecDeque<Job>>>,
    last_seen: DashMap<String, u64>,
    permits: Arc<Semaphore>,
    bus: OutcomeBus,
    stats: DispatchStats,
    closed: AtomicBool,
    idle: Notify,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("config", &self.inner.config)
            .field("handler", &self.inner.handler.name())
            .field("active_keys", &self.inner.lanes.lock().len())
            .field("stats", &self.inner.stats.snapshot())
            .field("closed", &self.inner.closed.load(Ordering::Relaxed))
            .finish()
    }
}

impl Dispatcher {
    pub fn builder(context: HandlerContext, handler: Arc<dyn EventHandler>) -> DispatcherBuilder {
        DispatcherBuilder {
            config: DispatcherConfig::default(),
            context,
            handler,
            callbacks: CallbackRegistry::new(),
            sink: Arc::new(TracingSink),
        }
    }

    pub fn context(&self) -> &HandlerContext {
        &self.inner.context
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventOutcome> {
        self.inner.bus.subscribe()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }

    pub fn active_keys(&self) -> usize {
        self.inner.lanes.lock().len()
    }

    /// Keys with a recorded last sequence number. Entries are kept for the
    /// life of the dispatcher so stale events stay detectable, so this grows
    /// with the number of distinct keys ever seen.
    pub fn tracked_keys(&self) -> usize {
        self.inner.last_seen.len()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    pub fn submit(&self, event: impl Into<ChangeEvent>) -> Result<DispatchTicket, DispatchError> {
        let event = event.into();
        if event.key().is_empty() {
            return Err(DispatchError::EmptyKey);
        }
        self.enqueue(Work::Change(event))
    }

    pub fn submit_timer(&self, entry: TimerEntry) -> Result<DispatchTicket, DispatchError> {
        if entry.key.is_empty() {
            return Err(DispatchError::EmptyKey);
        }
        self.enqueue(Work::Timer(entry))
    }

    fn enqueue(&self, work: Work) -> Result<DispatchTicket, DispatchError> {
        if self.is_closed() {
            return Err(DispatchError::ShuttingDown);
        }

        let id = Uuid::now_v7();
        let (reply, outcome) = oneshot::channel();
        let key = work.key().to_string();
        self.inner.stats.record_received();

        let job = Job { id, work, reply };
        let start_drain = {
            let mut lanes = self.inner.lanes.lock();
            match lanes.get_mut(&key) {
                Some(queue) => {
                    queue.push_back(job);
                    false
                }
                None => {
                    lanes.insert(key.clone(), VecDeque::from([job]));
                    true
                }
            }
        };

        if start_drain {
            tokio::spawn(Arc::clone(&self.inner).drain(key));
        }

        Ok(DispatchTicket { id, outcome })
    }

    /// Resolves once no key has queued or running work.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.inner.lanes.lock().is_empty() {
                return;
            }
            notified.await;
        }
    }

    /// Stops accepting work and waits for everything already accepted.
    /// Running handlers are never cancelled.
    pub async fn shutdown(&self) {
        self.inner.closed.store(true, Ordering::Release);
        info!(target: "eventing::dispatch", active_keys = self.active_keys(), "dispatcher draining");
        self.wait_idle().await;
        info!(target: "eventing::dispatch", stats = ?self.stats(), "dispatcher stopped");
    }

    /// Logs a stats line every `every` until `shutdown` fires.
    pub fn spawn_stats_logger(&self, every: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        let dispatcher = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.tick().await;
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => {
                        let stats = dispatcher.stats();
                        info!(
                            target: "eventing::stats",
                            received = stats.received,
                            succeeded = stats.succeeded,
                            failed = stats.failed,
                            skipped = stats.skipped,
                            timers_fired = stats.timers_fired,
                            in_flight = stats.in_flight,
                            "dispatcher stats"
                        );
                    }
                }
            }
        })
    }
}

impl TimerSink for Dispatcher {
    fn timer_due(&self, entry: TimerEntry) -> Result<(), DispatchError> {
        self.submit_timer(entry).map(|_| ())
    }
}

impl Inner {
    async fn drain(self: Arc<Self>, key: String) {
        loop {
            let job = {
                let mut lanes = self.lanes.lock();
                let Some(queue) = lanes.get_mut(&key) else {
                    return;
                };
                match queue.pop_front() {
                    Some(job) => job,
                    None => {
                        lanes.remove(&key);
                        if lanes.is_empty() {
                            self.idle.notify_waiters();
                        }
                        return;
                    }
                }
            };

            // The semaphore is never closed.
            let _permit = Arc::clone(&self.permits).acquire_owned().await.ok();
            let Job { id, work, reply } = job;
            let outcome = self.execute(id, work).await;

            self.stats.record(&outcome);
            self.bus.publish(outcome.clone());
            let _ = reply.send(outcome);
        }
    }

    async fn execute(&self, id: Uuid, work: Work) -> EventOutcome {
        let started = Instant::now();
        let key = work.key().to_string();
        let kind = work.kind();
        let (sequence_number, callback) = match &work {
            Work::Change(event) => (Some(event.sequence_number()), None),
            Work::Timer(entry) => (None, Some(entry.callback.clone())),
        };

        let span = info_span!(
            target: "eventing::dispatch",
            "dispatch",
            %id,
            key = %key,
            %kind,
            seq = sequence_number,
            callback = callback.as_ref().map(CallbackId::as_str),
        );

        let status = async {
            if let Some(seq) = sequence_number {
                let last = self.last_seen.get(&key).map(|entry| *entry);
                if let Some(last_seen) = last
                    && seq <= last_seen
                {
                    debug!(target: "eventing::dispatch", last_seen, "stale event skipped");
                    return OutcomeStatus::Skipped { last_seen };
                }
                self.last_seen.insert(key.clone(), seq);
            }

            let result = AssertUnwindSafe(self.run(work)).catch_unwind().await;
            let result = result.unwrap_or_else(|_| Err(HandlerError::logic("handler panicked")));

            match result {
                Ok(()) => {
                    debug!(target: "eventing::dispatch", "handler succeeded");
                    OutcomeStatus::Succeeded
                }
                Err(err) => {
                    self.sink
                        .report(&Failure::new(id, &key, kind, callback.clone(), &err));
                    OutcomeStatus::Failed {
                        error: err.to_string(),
                    }
                }
            }
        }
        .instrument(span)
        .await;

        EventOutcome {
            id,
            key,
            kind,
            sequence_number,
            callback,
            status,
            elapsed_ms: started.elapsed().as_millis() as u64,
        }
    }

    async fn run(&self, work: Work) -> Result<(), HandlerError> {
        let ctx = &self.context;
        match work {
            Work::Change(ChangeEvent::Mutation(event)) => {
                self.handler.on_mutation(ctx, &event).await
            }
            Work::Change(ChangeEvent::Deletion(event)) => {
                self.handler.on_deletion(ctx, &event).await
            }
            Work::Timer(entry) => match self.callbacks.get(&entry.callback) {
                Some(callback) => callback.fire(ctx, &entry.key).await,
                None => Err(HandlerError::logic(format!(
                    "no timer callback registered under `{}`",
                    entry.callback
                ))),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::handler::TimerCallback;
    use crate::dispatch::sink::RecentFailures;
    use crate::kv::{KvFacade, MemoryKvBackend};
    use crate::query::{MemoryQueryEngine, QueryCompiler, QueryService};
    use crate::queue::MemoryQueueGateway;
    use crate::timers::{SystemClock, TimerRegistry};
    use crate::types::{DeletionEvent, MutationEvent};
    use async_trait::async_trait;
    use chrono::Utc;
    use serde_json::json;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<(String, u64)>>,
    }

    #[async_trait]
    impl EventHandler for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        async fn on_mutation(
            &self,
            _ctx: &HandlerContext,
            event: &MutationEvent,
        ) -> Result<(), HandlerError> {
            tokio::task::yield_now().await;
            if event.key == "poison" {
                return Err(HandlerError::logic("poisoned"));
            }
            if event.key == "panic" {
                panic!("handler bug");
            }
            self.seen
                .lock()
                .push((event.key.clone(), event.sequence_number));
            Ok(())
        }

        async fn on_deletion(
            &self,
            _ctx: &HandlerContext,
            event: &DeletionEvent,
        ) -> Result<(), HandlerError> {
            self.seen
                .lock()
                .push((format!("-{}", event.key), event.sequence_number));
            Ok(())
        }
    }

    struct Touch;

    #[async_trait]
    impl TimerCallback for Touch {
        async fn fire(&self, ctx: &HandlerContext, key: &str) -> Result<(), HandlerError> {
            ctx.bucket("audit").set(key, &json!({"fired": true})).await?;
            Ok(())
        }
    }

    struct Boom;

    #[async_trait]
    impl TimerCallback for Boom {
        async fn fire(&self, _ctx: &HandlerContext, _key: &str) -> Result<(), HandlerError> {
            panic!("callback bug");
        }
    }

    fn context(callbacks: &CallbackRegistry) -> HandlerContext {
        let store = Arc::new(MemoryKvBackend::with_buckets(["audit"]));
        let query = QueryService::new(
            QueryCompiler::default(),
            Arc::new(MemoryQueryEngine::new(store.clone())),
        );
        let timers = Arc::new(TimerRegistry::new(Arc::new(SystemClock), callbacks.ids()));
        HandlerContext::new(
            KvFacade::new(store),
            query,
            timers,
            Arc::new(MemoryQueueGateway::new()),
        )
    }

    fn dispatcher(handler: Arc<Recorder>) -> Dispatcher {
        let callbacks = CallbackRegistry::new().with("touch", Arc::new(Touch));
        Dispatcher::builder(context(&callbacks), handler)
            .callbacks(callbacks)
            .build()
    }

    fn mutation(key: &str, seq: u64) -> MutationEvent {
        MutationEvent::json(key, &json!({"n": seq}), seq)
    }

    #[tokio::test]
    async fn same_key_runs_in_sequence_order() {
        let recorder = Arc::new(Recorder::default());
        let dispatcher = dispatcher(recorder.clone());

        for seq in 1..=20 {
            dispatcher.submit(mutation("k", seq)).unwrap();
        }
        dispatcher.wait_idle().await;

        let seqs: Vec<u64> = recorder.seen.lock().iter().map(|(_, s)| *s).collect();
        assert_eq!(seqs, (1..=20).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn stale_and_duplicate_sequence_numbers_are_skipped() {
        let recorder = Arc::new(Recorder::default());
        let dispatcher = dispatcher(recorder.clone());

        dispatcher.submit(mutation("k", 5)).unwrap();
        let dup = dispatcher.submit(mutation("k", 5)).unwrap();
        let old = dispatcher.submit(DeletionEvent::new("k", 3)).unwrap();

        assert_eq!(
            dup.outcome().await.unwrap().status,
            OutcomeStatus::Skipped { last_seen: 5 }
        );
        assert!(old.outcome().await.unwrap().skipped());
        assert_eq!(recorder.seen.lock().len(), 1);
        assert_eq!(dispatcher.stats().skipped, 2);
    }

    #[tokio::test]
    async fn last_sequence_is_tracked_once_per_key() {
        let dispatcher = dispatcher(Arc::new(Recorder::default()));
        assert_eq!(dispatcher.tracked_keys(), 0);

        for key in ["a", "b", "a"] {
            dispatcher.submit(DeletionEvent::new(key, 1)).unwrap();
        }
        dispatcher
            .submit_timer(TimerEntry {
                key: "c".into(),
                callback: CallbackId::new("touch"),
                fire_at: Utc::now(),
            })
            .unwrap();
        dispatcher.wait_idle().await;

        assert_eq!(dispatcher.tracked_keys(), 2);
    }

    #[tokio::test]
    async fn failing_event_does_not_block_its_key_or_others() {
        let recorder = Arc::new(Recorder::default());
        let sink = Arc::new(RecentFailures::new(8));
        let callbacks = CallbackRegistry::new();
        let dispatcher = Dispatcher::builder(context(&callbacks), recorder.clone())
            .sink(sink.clone())
            .build();

        let poisoned = dispatcher.submit(mutation("poison", 1)).unwrap();
        let panicked = dispatcher.submit(mutation("panic", 1)).unwrap();
        dispatcher.submit(mutation("ok", 1)).unwrap();
        dispatcher.wait_idle().await;

        assert!(poisoned.outcome().await.unwrap().failed());
        assert!(panicked.outcome().await.unwrap().failed());
        assert_eq!(*recorder.seen.lock(), vec![("ok".to_string(), 1)]);
        assert_eq!(sink.len(), 2);

        let stats = dispatcher.stats();
        assert_eq!((stats.succeeded, stats.failed, stats.in_flight), (1, 2, 0));
    }

    #[tokio::test]
    async fn panicking_timer_callback_fails_only_its_timer() {
        let recorder = Arc::new(Recorder::default());
        let callbacks = CallbackRegistry::new().with("boom", Arc::new(Boom));
        let dispatcher = Dispatcher::builder(context(&callbacks), recorder.clone())
            .callbacks(callbacks)
            .build();

        let timer = dispatcher
            .submit_timer(TimerEntry {
                key: "k".into(),
                callback: CallbackId::new("boom"),
                fire_at: Utc::now(),
            })
            .unwrap();
        let after = dispatcher.submit(mutation("k", 1)).unwrap();

        assert!(timer.outcome().await.unwrap().failed());
        assert!(after.outcome().await.unwrap().succeeded());
        assert!(!dispatcher.is_closed());
        assert_eq!(*recorder.seen.lock(), vec![("k".to_string(), 1)]);
    }

    #[tokio::test]
    async fn fired_timer_runs_registered_callback() {
        let dispatcher = dispatcher(Arc::new(Recorder::default()));
        let ticket = dispatcher
            .submit_timer(TimerEntry {
                key: "u1".into(),
                callback: CallbackId::new("touch"),
                fire_at: Utc::now(),
            })
            .unwrap();

        let outcome = ticket.outcome().await.unwrap();
        assert!(outcome.succeeded());
        assert_eq!(outcome.kind, EventKind::Timer);
        assert_eq!(
            dispatcher
                .context()
                .bucket("audit")
                .get::<serde_json::Value>("u1")
                .await
                .unwrap(),
            Some(json!({"fired": true}))
        );
        assert_eq!(dispatcher.stats().timers_fired, 1);
    }

    #[tokio::test]
    async fn shutdown_rejects_new_work() {
        let dispatcher = dispatcher(Arc::new(Recorder::default()));
        dispatcher.submit(mutation("k", 1)).unwrap();
        dispatcher.shutdown().await;

        assert!(matches!(
            dispatcher.submit(mutation("k", 2)),
            Err(DispatchError::ShuttingDown)
        ));
        assert!(matches!(
            dispatcher.submit(mutation("", 1)),
            Err(DispatchError::ShuttingDown) | Err(DispatchError::EmptyKey)
        ));
        assert_eq!(dispatcher.active_keys(), 0);
    }

    #[tokio::test]
    async fn outcomes_are_broadcast() {
        let dispatcher = dispatcher(Arc::new(Recorder::default()));
        let mut outcomes = dispatcher.subscribe();
        dispatcher.submit(DeletionEvent::new("gone", 1)).unwrap();

        let outcome = outcomes.recv().await.unwrap();
        assert_eq!(outcome.key, "gone");
        assert_eq!(outcome.kind, EventKind::Deletion);
        assert!(outcome.succeeded());
    }
}
