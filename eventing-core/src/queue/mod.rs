//! Downstream work-queue access.
//!
//! Delivery is at-least-once: a consumer may see the same payload more than
//! once and must process it idempotently. Ordering across producers is never
//! guaranteed; per-producer order holds only when the bound implementation
//! documents FIFO behaviour.

pub mod memory;
#[cfg(feature = "redis")]
#[cfg_attr(docsrs, doc(cfg(feature = "redis")))]
pub mod redis;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::QueueError;

pub use memory::MemoryQueueGateway;

/// Opaque work item. Ownership moves to the gateway on enqueue.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueItem {
    pub payload: Vec<u8>,
}

impl QueueItem {
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: payload.into(),
        }
    }

    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self, serde_json::Error> {
        Ok(Self::new(serde_json::to_vec(value)?))
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QueueGateway: Send + Sync {
    async fn enqueue(&self, queue: &str, item: QueueItem) -> Result<(), QueueError>;

    async fn dequeue(&self, queue: &str) -> Result<Option<QueueItem>, QueueError>;

    /// Number of items waiting, when the backend can report it.
    async fn depth(&self, queue: &str) -> Result<Option<usize>, QueueError> {
        let _ = queue;
        Ok(None)
    }
}
