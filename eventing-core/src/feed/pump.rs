use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::dispatch::Dispatcher;
use crate::error::{DispatchError, FeedError};

use super::ChangeFeed;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PumpReport {
    pub forwarded: u64,
    pub rejected: u64,
    /// The feed ran dry, as opposed to being stopped.
    pub exhausted: bool,
}

/// Moves events from a feed into a dispatcher until the feed ends, shutdown
/// is signalled, or the dispatcher stops accepting work.
///
/// Malformed or invalid records are counted and skipped. Feed IO errors end
/// the pump with an error.
#[derive(Debug)]
pub struct FeedPump<F> {
    feed: F,
    dispatcher: Dispatcher,
}

impl<F: ChangeFeed> FeedPump<F> {
    pub fn new(feed: F, dispatcher: Dispatcher) -> Self {
        Self { feed, dispatcher }
    }

    pub async fn run(mut self, shutdown: CancellationToken) -> Result<PumpReport, FeedError> {
        let mut report = PumpReport::default();

        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                next = self.feed.next_event() => next,
            };

            let event = match next {
                Ok(Some(event)) => event,
                Ok(None) => {
                    report.exhausted = true;
                    break;
                }
                Err(err @ (FeedError::Malformed { .. } | FeedError::InvalidEvent(_))) => {
                    warn!(target: "eventing::feed", error = %err, "feed record skipped");
                    report.rejected += 1;
                    continue;
                }
                Err(err) => return Err(err),
            };

            match self.dispatcher.submit(event) {
                Ok(ticket) => {
                    debug!(target: "eventing::feed", id = %ticket.id(), "event forwarded");
                    report.forwarded += 1;
                }
                Err(DispatchError::ShuttingDown) => break,
                Err(err) => {
                    warn!(target: "eventing::feed", error = %err, "event refused by dispatcher");
                    report.rejected += 1;
                }
            }
        }

        info!(
            target: "eventing::feed",
            forwarded = report.forwarded,
            rejected = report.rejected,
            exhausted = report.exhausted,
            "feed pump stopped"
        );
        Ok(report)
    }
}
