use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::DispatchError;

use super::registry::{TimerEntry, TimerRegistry};

pub const DEFAULT_TICK: Duration = Duration::from_secs(1);

/// Receives timers once they become due.
pub trait TimerSink: Send + Sync {
    fn timer_due(&self, entry: TimerEntry) -> Result<(), DispatchError>;
}

/// Periodically drains due timers from the registry into a sink.
pub struct TimerDriver {
    registry: Arc<TimerRegistry>,
    sink: Arc<dyn TimerSink>,
    tick: Duration,
}

impl fmt::Debug for TimerDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerDriver")
            .field("registry", &self.registry)
            .field("tick", &self.tick)
            .finish_non_exhaustive()
    }
}

impl TimerDriver {
    pub fn new(registry: Arc<TimerRegistry>, sink: Arc<dyn TimerSink>) -> Self {
        Self {
            registry,
            sink,
            tick: DEFAULT_TICK,
        }
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Hands every currently due timer to the sink. Returns how many were
    /// accepted.
    pub fn tick_once(&self) -> usize {
        let due = self.registry.take_due_now();
        let mut accepted = 0;
        for entry in due {
            let key = entry.key.clone();
            let callback = entry.callback.clone();
            match self.sink.timer_due(entry) {
                Ok(()) => accepted += 1,
                Err(err) => {
                    warn!(
                        target: "eventing::timers",
                        key = %key,
                        callback = %callback,
                        error = %err,
                        "due timer dropped"
                    );
                }
            }
        }
        if accepted > 0 {
            debug!(target: "eventing::timers", fired = accepted, "timers handed to dispatcher");
        }
        accepted
    }

    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    pub async fn run(self, shutdown: CancellationToken) {
        info!(target: "eventing::timers", tick_ms = self.tick.as_millis() as u64, "timer driver started");
        let mut interval = tokio::time::interval(self.tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    self.tick_once();
                }
            }
        }

        info!(
            target: "eventing::timers",
            pending = self.registry.len(),
            "timer driver stopped"
        );
    }
}
