use std::fmt;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tracing::warn;

use crate::error::KvError;

use super::KvBackend;

/// Bucket store over a Redis keyspace. Documents live under
/// `<bucket>::<key>`.
#[derive(Clone)]
pub struct RedisKvBackend {
    connection: ConnectionManager,
}

impl fmt::Debug for RedisKvBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisKvBackend").finish_non_exhaustive()
    }
}

impl RedisKvBackend {
    pub async fn connect(url: &str) -> Result<Self, KvError> {
        let client =
            redis::Client::open(url).map_err(|err| KvError::unavailable("*", err.to_string()))?;
        let connection = ConnectionManager::new(client)
            .await
            .map_err(|err| KvError::unavailable("*", err.to_string()))?;
        Ok(Self { connection })
    }

    pub fn from_connection(connection: ConnectionManager) -> Self {
        Self { connection }
    }

    fn document_key(bucket: &str, key: &str) -> String {
        format!("{bucket}::{key}")
    }

    fn bucket_pattern(bucket: &str) -> String {
        let mut pattern = String::with_capacity(bucket.len() + 3);
        for ch in bucket.chars() {
            if matches!(ch, '*' | '?' | '[' | ']' | '\\') {
                pattern.push('\\');
            }
            pattern.push(ch);
        }
        pattern.push_str("::*");
        pattern
    }
}

const SCAN_BATCH: usize = 500;

fn unavailable(bucket: &str, err: redis::RedisError) -> KvError {
    warn!(target: "eventing::kv", bucket, error = %err, "redis bucket call failed");
    KvError::unavailable(bucket, err.to_string())
}

#[async_trait]
impl KvBackend for RedisKvBackend {
    async fn get(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>, KvError> {
        let mut conn = self.connection.clone();
        redis::cmd("GET")
            .arg(Self::document_key(bucket, key))
            .query_async::<Option<Vec<u8>>>(&mut conn)
            .await
            .map_err(|err| unavailable(bucket, err))
    }

    async fn set(&self, bucket: &str, key: &str, value: Vec<u8>) -> Result<(), KvError> {
        let mut conn = self.connection.clone();
        redis::cmd("SET")
            .arg(Self::document_key(bucket, key))
            .arg(value)
            .query_async::<()>(&mut conn)
            .await
            .map_err(|err| unavailable(bucket, err))
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<(), KvError> {
        let mut conn = self.connection.clone();
        redis::cmd("DEL")
            .arg(Self::document_key(bucket, key))
            .query_async::<()>(&mut conn)
            .await
            .map_err(|err| unavailable(bucket, err))
    }

    async fn scan(&self, bucket: &str) -> Result<Vec<(String, Vec<u8>)>, KvError> {
        let mut conn = self.connection.clone();
        let pattern = Self::bucket_pattern(bucket);
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await
                .map_err(|err| unavailable(bucket, err))?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        keys.sort();
        keys.dedup();

        let prefix = format!("{bucket}::");
        let mut docs = Vec::with_capacity(keys.len());
        for chunk in keys.chunks(SCAN_BATCH) {
            let values: Vec<Option<Vec<u8>>> = redis::cmd("MGET")
                .arg(chunk)
                .query_async(&mut conn)
                .await
                .map_err(|err| unavailable(bucket, err))?;
            // Keys deleted between SCAN and MGET come back as nil.
            for (full_key, value) in chunk.iter().zip(values) {
                if let (Some(key), Some(value)) = (full_key.strip_prefix(&prefix), value) {
                    docs.push((key.to_string(), value));
                }
            }
        }
        Ok(docs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_pattern_escapes_glob_characters() {
        assert_eq!(RedisKvBackend::bucket_pattern("beer-sample"), "beer-sample::*");
        assert_eq!(RedisKvBackend::bucket_pattern("a*b[1]"), "a\\*b\\[1\\]::*");
    }
}
