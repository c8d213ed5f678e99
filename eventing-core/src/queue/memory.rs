use std::collections::VecDeque;
use std::fmt;

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};

use crate::error::QueueError;

use super::{QueueGateway, QueueItem};

/// In-process queue. Items from one producer come back in enqueue order.
#[derive(Default)]
pub struct MemoryQueueGateway {
    queues: DashMap<String, VecDeque<QueueItem>>,
    offline: DashSet<String>,
}

impl fmt::Debug for MemoryQueueGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryQueueGateway")
            .field("queue_count", &self.queues.len())
            .finish()
    }
}

impl MemoryQueueGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_online(&self, queue: &str, online: bool) {
        if online {
            self.offline.remove(queue);
        } else {
            self.offline.insert(queue.to_string());
        }
    }

    pub fn len(&self, queue: &str) -> usize {
        self.queues.get(queue).map(|q| q.len()).unwrap_or(0)
    }

    pub fn is_empty(&self, queue: &str) -> bool {
        self.len(queue) == 0
    }

    fn check(&self, queue: &str) -> Result<(), QueueError> {
        if self.offline.contains(queue) {
            return Err(QueueError::unavailable(queue, "queue offline"));
        }
        Ok(())
    }
}

#[async_trait]
impl QueueGateway for MemoryQueueGateway {
    async fn enqueue(&self, queue: &str, item: QueueItem) -> Result<(), QueueError> {
        self.check(queue)?;
        self.queues.entry(queue.to_string()).or_default().push_back(item);
        Ok(())
    }

    async fn dequeue(&self, queue: &str) -> Result<Option<QueueItem>, QueueError> {
        self.check(queue)?;
        Ok(self.queues.get_mut(queue).and_then(|mut q| q.pop_front()))
    }

    async fn depth(&self, queue: &str) -> Result<Option<usize>, QueueError> {
        self.check(queue)?;
        Ok(Some(self.len(queue)))
    }
}
