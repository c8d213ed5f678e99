use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{error, warn};
use uuid::Uuid;

use crate::error::{HandlerError, QueryError};
use crate::timers::CallbackId;
use crate::types::EventKind;

/// A handler or timer callback failure.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Failure {
    pub id: Uuid,
    pub key: String,
    pub kind: EventKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback: Option<CallbackId>,
    pub error: String,
    /// Backing store or queue was unreachable; retrying later may succeed.
    pub transient: bool,
    pub at: DateTime<Utc>,
}

impl Failure {
    pub fn new(
        id: Uuid,
        key: &str,
        kind: EventKind,
        callback: Option<CallbackId>,
        err: &HandlerError,
    ) -> Self {
        Self {
            id,
            key: key.to_string(),
            kind,
            callback,
            error: err.to_string(),
            transient: is_transient(err),
            at: Utc::now(),
        }
    }
}

fn is_transient(err: &HandlerError) -> bool {
    match err {
        HandlerError::Kv(kv) => kv.is_transient(),
        HandlerError::Queue(_) => true,
        HandlerError::Query(QueryError::Unavailable(_)) => true,
        _ => false,
    }
}

/// Receives every failed event. Must not block.
pub trait ErrorSink: Send + Sync {
    fn report(&self, failure: &Failure);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl ErrorSink for TracingSink {
    fn report(&self, failure: &Failure) {
        let callback = failure.callback.as_ref().map(CallbackId::as_str);
        if failure.transient {
            warn!(
                target: "eventing::dispatch",
                id = %failure.id,
                key = %failure.key,
                kind = %failure.kind,
                callback,
                error = %failure.error,
                "handler failed on unavailable backend"
            );
        } else {
            error!(
                target: "eventing::dispatch",
                id = %failure.id,
                key = %failure.key,
                kind = %failure.kind,
                callback,
                error = %failure.error,
                "handler failed"
            );
        }
    }
}

/// Logs like [`TracingSink`] and keeps the most recent failures for
/// inspection.
pub struct RecentFailures {
    capacity: usize,
    entries: Mutex<VecDeque<Failure>>,
}

impl fmt::Debug for RecentFailures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecentFailures")
            .field("capacity", &self.capacity)
            .field("len", &self.entries.lock().len())
            .finish()
    }
}

impl RecentFailures {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(VecDeque::new()),
        }
    }

    /// Oldest first.
    pub fn snapshot(&self) -> Vec<Failure> {
        self.entries.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ErrorSink for RecentFailures {
    fn report(&self, failure: &Failure) {
        TracingSink.report(failure);
        let mut entries = self.entries.lock();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(failure.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{KvError, QueueError};

    fn failure(key: &str, err: HandlerError) -> Failure {
        Failure::new(Uuid::now_v7(), key, EventKind::Mutation, None, &err)
    }

    #[test]
    fn recent_failures_keeps_newest() {
        let sink = RecentFailures::new(2);
        for key in ["a", "b", "c"] {
            sink.report(&failure(key, HandlerError::logic("nope")));
        }
        let keys: Vec<String> = sink.snapshot().into_iter().map(|f| f.key).collect();
        assert_eq!(keys, vec!["b", "c"]);
    }

    #[test]
    fn infrastructure_errors_are_transient() {
        assert!(failure("a", KvError::unavailable("b", "down").into()).transient);
        assert!(failure("a", QueueError::unavailable("q", "down").into()).transient);
        assert!(!failure("a", HandlerError::logic("bad input")).transient);
    }
}
