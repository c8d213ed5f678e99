use std::{fmt, sync::Arc};

use chrono::{DateTime, Utc};
use eventing_core::bridge::HttpBridge;
use eventing_core::dispatch::{Dispatcher, RecentFailures};
use eventing_core::feed::FeedSequences;
use eventing_core::timers::TimerRegistry;
use tokio_util::sync::CancellationToken;

use crate::infra::config::Config;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub bridge: Arc<HttpBridge>,
    pub dispatcher: Dispatcher,
    pub timers: Arc<TimerRegistry>,
    /// Ring of the most recent handler failures, surfaced on `/health`.
    pub failures: Arc<RecentFailures>,
    /// Sequence numbers for feed records that omit `seq`, shared by every
    /// ingest batch and the startup replay.
    pub sequences: FeedSequences,
    pub shutdown: CancellationToken,
    pub started_at: DateTime<Utc>,
}

impl fmt::Debug for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppState")
            .field("backend", &self.config.backend.kind())
            .field("started_at", &self.started_at)
            .finish_non_exhaustive()
    }
}

impl AppState {
    pub fn config_handle(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    pub fn uptime_secs(&self) -> i64 {
        (Utc::now() - self.started_at).num_seconds().max(0)
    }
}
