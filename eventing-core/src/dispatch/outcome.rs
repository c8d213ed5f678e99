use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::timers::CallbackId;
use crate::types::EventKind;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OutcomeStatus {
    Succeeded,
    Failed { error: String },
    /// Sequence number did not advance past `last_seen` for the key.
    Skipped { last_seen: u64 },
}

/// What happened to one unit of work.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct EventOutcome {
    pub id: Uuid,
    pub key: String,
    pub kind: EventKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence_number: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback: Option<CallbackId>,
    #[serde(flatten)]
    pub status: OutcomeStatus,
    pub elapsed_ms: u64,
}

impl EventOutcome {
    pub fn succeeded(&self) -> bool {
        matches!(self.status, OutcomeStatus::Succeeded)
    }

    pub fn failed(&self) -> bool {
        matches!(self.status, OutcomeStatus::Failed { .. })
    }

    pub fn skipped(&self) -> bool {
        matches!(self.status, OutcomeStatus::Skipped { .. })
    }
}

/// Fans outcomes out to any number of observers. Slow observers lag and lose
/// the oldest outcomes; the dispatcher never waits on them.
pub struct OutcomeBus {
    sender: broadcast::Sender<EventOutcome>,
}

impl fmt::Debug for OutcomeBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutcomeBus")
            .field("receivers", &self.sender.receiver_count())
            .finish()
    }
}

impl OutcomeBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventOutcome> {
        self.sender.subscribe()
    }

    pub fn publish(&self, outcome: EventOutcome) {
        let _ = self.sender.send(outcome);
    }
}

/// Running totals since startup.
#[derive(Debug, Default)]
pub struct DispatchStats {
    received: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
    timers_fired: AtomicU64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub received: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub skipped: u64,
    pub timers_fired: u64,
    pub in_flight: u64,
}

impl DispatchStats {
    pub fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record(&self, outcome: &EventOutcome) {
        let counter = match outcome.status {
            OutcomeStatus::Succeeded => &self.succeeded,
            OutcomeStatus::Failed { .. } => &self.failed,
            OutcomeStatus::Skipped { .. } => &self.skipped,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        if outcome.kind == EventKind::Timer && !outcome.skipped() {
            self.timers_fired.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let received = self.received.load(Ordering::Relaxed);
        let succeeded = self.succeeded.load(Ordering::Relaxed);
        let failed = self.failed.load(Ordering::Relaxed);
        let skipped = self.skipped.load(Ordering::Relaxed);
        StatsSnapshot {
            received,
            succeeded,
            failed,
            skipped,
            timers_fired: self.timers_fired.load(Ordering::Relaxed),
            in_flight: received.saturating_sub(succeeded + failed + skipped),
        }
    }
}
