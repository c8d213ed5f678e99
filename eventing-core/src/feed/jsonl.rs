use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::fs::File;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};

use crate::error::FeedError;
use crate::types::{ChangeEvent, DeletionEvent, DocumentType, MutationEvent};

use super::ChangeFeed;

/// One line of a JSON-lines feed.
///
/// ```text
/// {"op":"mutation","key":"u1","doc":{"city":"San Francisco"},"seq":1}
/// {"op":"mutation","key":"blob","type":"binary","body":"raw bytes","cas":7}
/// {"op":"deletion","key":"u1","seq":2}
/// ```
///
/// A record without `seq` takes the next number after the highest one its
/// [`FeedSequences`] has seen for the key. `type` defaults to `json` when
/// `doc` is present and `binary` otherwise.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum FeedRecord {
    Mutation {
        key: String,
        #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
        doc_type: Option<DocumentType>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        doc: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        body: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        seq: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cas: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        expiry: Option<u32>,
    },
    Deletion {
        key: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        seq: Option<u64>,
    },
}

/// Highest sequence number seen per key across every feed sharing this
/// handle. Holds one entry per distinct key.
#[derive(Clone, Debug, Default)]
pub struct FeedSequences {
    highest: Arc<DashMap<String, u64>>,
}

impl FeedSequences {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an explicit sequence number and returns it unchanged.
    pub fn observe(&self, key: &str, seq: u64) -> u64 {
        self.highest
            .entry(key.to_string())
            .and_modify(|highest| *highest = (*highest).max(seq))
            .or_insert(seq);
        seq
    }

    /// Allocates the number after the highest one seen for `key`.
    pub fn next(&self, key: &str) -> u64 {
        let mut entry = self.highest.entry(key.to_string()).or_insert(0);
        let next = entry.saturating_add(1);
        *entry = next;
        next
    }

    pub fn tracked_keys(&self) -> usize {
        self.highest.len()
    }

    fn resolve(&self, key: &str, seq: Option<u64>) -> u64 {
        // Empty keys fail validation and never reach the map.
        if key.is_empty() {
            return seq.unwrap_or_default();
        }
        match seq {
            Some(seq) => self.observe(key, seq),
            None => self.next(key),
        }
    }
}

impl FeedRecord {
    pub fn into_event(
        self,
        line: usize,
        sequences: &FeedSequences,
    ) -> Result<ChangeEvent, FeedError> {
        let event: ChangeEvent = match self {
            FeedRecord::Mutation {
                key,
                doc_type,
                doc,
                body,
                seq,
                cas,
                expiry,
            } => {
                let (default_type, bytes) = match (doc, body) {
                    (Some(_), Some(_)) => {
                        return Err(FeedError::Malformed {
                            line,
                            reason: "record has both `doc` and `body`".into(),
                        });
                    }
                    (Some(doc), None) => (
                        DocumentType::Json,
                        serde_json::to_vec(&doc).map_err(|err| FeedError::Malformed {
                            line,
                            reason: err.to_string(),
                        })?,
                    ),
                    (None, Some(body)) => (DocumentType::Binary, body.into_bytes()),
                    (None, None) => (DocumentType::Binary, Vec::new()),
                };
                let seq = sequences.resolve(&key, seq);
                let mut event =
                    MutationEvent::new(key, doc_type.unwrap_or(default_type), bytes, seq);
                event.cas = cas;
                event.expiry = expiry;
                event.into()
            }
            FeedRecord::Deletion { key, seq } => {
                let seq = sequences.resolve(&key, seq);
                DeletionEvent::new(key, seq).into()
            }
        };
        event.validate()?;
        Ok(event)
    }
}

/// Replays change events from JSON lines. Blank lines and lines starting
/// with `#` are ignored. A malformed line yields an error for that line only;
/// the next call continues with the following line.
///
/// Feeds that should continue one another's numbering, such as successive
/// ingest batches, share a [`FeedSequences`] through
/// [`JsonLinesFeed::with_sequences`].
#[derive(Debug)]
pub struct JsonLinesFeed<R> {
    lines: Lines<R>,
    line: usize,
    sequences: FeedSequences,
}

impl JsonLinesFeed<BufReader<File>> {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, FeedError> {
        let file = File::open(path).await?;
        Ok(Self::new(BufReader::new(file)))
    }
}

impl<R: AsyncBufRead + Unpin> JsonLinesFeed<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            line: 0,
            sequences: FeedSequences::new(),
        }
    }

    pub fn with_sequences(mut self, sequences: FeedSequences) -> Self {
        self.sequences = sequences;
        self
    }
}

#[async_trait]
impl<R> ChangeFeed for JsonLinesFeed<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    async fn next_event(&mut self) -> Result<Option<ChangeEvent>, FeedError> {
        while let Some(raw) = self.lines.next_line().await? {
            self.line += 1;
            let trimmed = raw.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let record: FeedRecord =
                serde_json::from_str(trimmed).map_err(|err| FeedError::Malformed {
                    line: self.line,
                    reason: err.to_string(),
                })?;
            return record.into_event(self.line, &self.sequences).map(Some);
        }
        Ok(None)
    }
}
