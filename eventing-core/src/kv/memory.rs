use std::{fmt, sync::Arc};

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};

use crate::error::KvError;

use super::KvBackend;

type BucketMap = Arc<DashMap<String, Vec<u8>>>;

/// Process-local bucket store.
///
/// Buckets must be declared up front; addressing an undeclared bucket, or one
/// that has been marked offline, fails with `BucketUnavailable` the same way an
/// unreachable remote store would.
#[derive(Default)]
pub struct MemoryKvBackend {
    buckets: DashMap<String, BucketMap>,
    offline: DashSet<String>,
}

impl fmt::Debug for MemoryKvBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryKvBackend")
            .field("bucket_count", &self.buckets.len())
            .field("offline", &self.offline.len())
            .finish()
    }
}

impl MemoryKvBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_buckets<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let backend = Self::new();
        for name in names {
            backend.create_bucket(name);
        }
        backend
    }

    pub fn create_bucket(&self, name: impl Into<String>) {
        self.buckets.entry(name.into()).or_default();
    }

    pub fn bucket_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.buckets.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Simulates the bucket becoming unreachable (or reachable again).
    pub fn set_online(&self, bucket: &str, online: bool) {
        if online {
            self.offline.remove(bucket);
        } else {
            self.offline.insert(bucket.to_string());
        }
    }

    fn resolve(&self, bucket: &str) -> Result<BucketMap, KvError> {
        if self.offline.contains(bucket) {
            return Err(KvError::unavailable(bucket, "bucket offline"));
        }
        self.buckets
            .get(bucket)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| KvError::unavailable(bucket, "no such bucket"))
    }
}

#[async_trait]
impl KvBackend for MemoryKvBackend {
    async fn get(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>, KvError> {
        let map = self.resolve(bucket)?;
        Ok(map.get(key).map(|value| value.clone()))
    }

    async fn set(&self, bucket: &str, key: &str, value: Vec<u8>) -> Result<(), KvError> {
        let map = self.resolve(bucket)?;
        map.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<(), KvError> {
        let map = self.resolve(bucket)?;
        map.remove(key);
        Ok(())
    }

    async fn scan(&self, bucket: &str) -> Result<Vec<(String, Vec<u8>)>, KvError> {
        let map = self.resolve(bucket)?;
        let mut docs: Vec<(String, Vec<u8>)> = map
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        docs.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(docs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn undeclared_bucket_is_unavailable() {
        let backend = MemoryKvBackend::with_buckets(["a"]);
        let err = backend.get("b", "k").await.unwrap_err();
        assert_eq!(err, KvError::unavailable("b", "no such bucket"));
    }

    #[tokio::test]
    async fn offline_bucket_recovers() {
        let backend = MemoryKvBackend::with_buckets(["a"]);
        backend.set("a", "k", b"v".to_vec()).await.unwrap();

        backend.set_online("a", false);
        assert!(backend.get("a", "k").await.unwrap_err().is_transient());

        backend.set_online("a", true);
        assert_eq!(backend.get("a", "k").await.unwrap(), Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn scan_is_key_ordered() {
        let backend = MemoryKvBackend::with_buckets(["a"]);
        backend.set("a", "z", vec![]).await.unwrap();
        backend.set("a", "m", vec![]).await.unwrap();
        let keys: Vec<String> = backend
            .scan("a")
            .await
            .unwrap()
            .into_iter()
            .map(|(key, _)| key)
            .collect();
        assert_eq!(keys, vec!["m", "z"]);
    }
}
