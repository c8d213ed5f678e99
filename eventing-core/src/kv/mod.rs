//! Bucket access for handlers and the HTTP bridge.
//!
//! Buckets are injected as [`KvFacade`] / [`Bucket`] handles; nothing in the
//! runtime reaches a store through ambient globals. Every call returns only
//! after the backend acknowledges it, so a `set` followed by a `get` from the
//! same caller observes the write.

pub mod memory;
#[cfg(feature = "redis")]
#[cfg_attr(docsrs, doc(cfg(feature = "redis")))]
pub mod redis;

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};

use crate::error::KvError;

pub use memory::MemoryKvBackend;

/// Raw byte-level store behind the facade.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KvBackend: Send + Sync {
    async fn get(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>, KvError>;

    async fn set(&self, bucket: &str, key: &str, value: Vec<u8>) -> Result<(), KvError>;

    /// Removing an absent key succeeds.
    async fn delete(&self, bucket: &str, key: &str) -> Result<(), KvError>;

    /// Point-in-time copy of every document in a bucket, ordered by key.
    async fn scan(&self, bucket: &str) -> Result<Vec<(String, Vec<u8>)>, KvError>;
}

/// Shared entry point to every configured bucket.
#[derive(Clone)]
pub struct KvFacade {
    backend: Arc<dyn KvBackend>,
}

impl fmt::Debug for KvFacade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KvFacade")
            .field("backend", &"KvBackend")
            .finish()
    }
}

impl KvFacade {
    pub fn new(backend: Arc<dyn KvBackend>) -> Self {
        Self { backend }
    }

    pub fn bucket(&self, name: impl Into<String>) -> Bucket {
        Bucket {
            name: name.into(),
            backend: Arc::clone(&self.backend),
        }
    }

    pub async fn get(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>, KvError> {
        self.backend.get(bucket, key).await
    }

    pub async fn set(&self, bucket: &str, key: &str, value: Vec<u8>) -> Result<(), KvError> {
        self.backend.set(bucket, key, value).await
    }

    pub async fn delete(&self, bucket: &str, key: &str) -> Result<(), KvError> {
        self.backend.delete(bucket, key).await
    }
}

/// Handle bound to one named bucket with typed JSON helpers.
#[derive(Clone)]
pub struct Bucket {
    name: String,
    backend: Arc<dyn KvBackend>,
}

impl fmt::Debug for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bucket").field("name", &self.name).finish()
    }
}

impl Bucket {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn get_raw(&self, key: &str) -> Result<Option<Vec<u8>>, KvError> {
        self.backend.get(&self.name, key).await
    }

    pub async fn set_raw(&self, key: &str, value: Vec<u8>) -> Result<(), KvError> {
        self.backend.set(&self.name, key, value).await
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, KvError> {
        match self.get_raw(key).await? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|err| KvError::Decode {
                    bucket: self.name.clone(),
                    key: key.to_string(),
                    reason: err.to_string(),
                }),
            None => Ok(None),
        }
    }

    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), KvError> {
        let bytes = serde_json::to_vec(value).map_err(|err| KvError::Decode {
            bucket: self.name.clone(),
            key: key.to_string(),
            reason: err.to_string(),
        })?;
        self.set_raw(key, bytes).await
    }

    pub async fn delete(&self, key: &str) -> Result<(), KvError> {
        self.backend.delete(&self.name, key).await
    }
}
