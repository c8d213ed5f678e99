use std::fmt;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tracing::warn;

use crate::error::QueueError;

use super::{QueueGateway, QueueItem};

/// Queue gateway over Redis lists. Producers `LPUSH`, consumers `RPOP`, which
/// gives FIFO per list. An item popped by a consumer that then crashes is not
/// redelivered; consumers that need redelivery re-enqueue on failure.
#[derive(Clone)]
pub struct RedisQueueGateway {
    connection: ConnectionManager,
    prefix: String,
}

impl fmt::Debug for RedisQueueGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisQueueGateway")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

impl RedisQueueGateway {
    pub async fn connect(url: &str, prefix: impl Into<String>) -> Result<Self, QueueError> {
        let client =
            redis::Client::open(url).map_err(|err| QueueError::unavailable("*", err.to_string()))?;
        let connection = ConnectionManager::new(client)
            .await
            .map_err(|err| QueueError::unavailable("*", err.to_string()))?;
        Ok(Self {
            connection,
            prefix: prefix.into(),
        })
    }

    fn list_key(&self, queue: &str) -> String {
        format!("{}{}", self.prefix, queue)
    }
}

fn unavailable(queue: &str, err: redis::RedisError) -> QueueError {
    warn!(target: "eventing::queue", queue, error = %err, "redis queue call failed");
    QueueError::unavailable(queue, err.to_string())
}

#[async_trait]
impl QueueGateway for RedisQueueGateway {
    async fn enqueue(&self, queue: &str, item: QueueItem) -> Result<(), QueueError> {
        let mut conn = self.connection.clone();
        redis::cmd("LPUSH")
            .arg(self.list_key(queue))
            .arg(item.payload)
            .query_async::<()>(&mut conn)
            .await
            .map_err(|err| unavailable(queue, err))
    }

    async fn dequeue(&self, queue: &str) -> Result<Option<QueueItem>, QueueError> {
        let mut conn = self.connection.clone();
        let payload = redis::cmd("RPOP")
            .arg(self.list_key(queue))
            .query_async::<Option<Vec<u8>>>(&mut conn)
            .await
            .map_err(|err| unavailable(queue, err))?;
        Ok(payload.map(QueueItem::new))
    }

    async fn depth(&self, queue: &str) -> Result<Option<usize>, QueueError> {
        let mut conn = self.connection.clone();
        let len = redis::cmd("LLEN")
            .arg(self.list_key(queue))
            .query_async::<usize>(&mut conn)
            .await
            .map_err(|err| unavailable(queue, err))?;
        Ok(Some(len))
    }
}
