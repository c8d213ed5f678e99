//! Upstream change feeds and the pump that forwards them into a dispatcher.

pub mod jsonl;
pub mod pump;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::FeedError;
use crate::types::ChangeEvent;

pub use jsonl::{FeedRecord, FeedSequences, JsonLinesFeed};
pub use pump::{FeedPump, PumpReport};

/// Ordered source of change events. Order is only meaningful per key.
#[async_trait]
pub trait ChangeFeed: Send {
    /// `Ok(None)` once the feed is exhausted.
    async fn next_event(&mut self) -> Result<Option<ChangeEvent>, FeedError>;
}

/// In-process feed fed through an mpsc channel. Ends when every sender is
/// dropped.
#[derive(Debug)]
pub struct ChannelFeed {
    receiver: mpsc::Receiver<ChangeEvent>,
}

impl ChannelFeed {
    pub fn new(capacity: usize) -> (mpsc::Sender<ChangeEvent>, Self) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (sender, Self { receiver })
    }
}

#[async_trait]
impl ChangeFeed for ChannelFeed {
    async fn next_event(&mut self) -> Result<Option<ChangeEvent>, FeedError> {
        Ok(self.receiver.recv().await)
    }
}
