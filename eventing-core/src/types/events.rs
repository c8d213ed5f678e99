use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{FeedError, HandlerError};

/// Content type of a mutated document as reported by the change feed.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    Json,
    Binary,
    Other,
}

/// Notification that a document was created or updated.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MutationEvent {
    pub key: String,
    #[serde(rename = "type")]
    pub doc_type: DocumentType,
    #[serde(default)]
    pub body: Vec<u8>,
    #[serde(rename = "seq")]
    pub sequence_number: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cas: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<u32>,
}

impl MutationEvent {
    pub fn new(
        key: impl Into<String>,
        doc_type: DocumentType,
        body: impl Into<Vec<u8>>,
        sequence_number: u64,
    ) -> Self {
        Self {
            key: key.into(),
            doc_type,
            body: body.into(),
            sequence_number,
            cas: None,
            expiry: None,
        }
    }

    /// Convenience constructor for JSON documents.
    pub fn json(key: impl Into<String>, body: &Value, sequence_number: u64) -> Self {
        // Serializing a `Value` cannot fail.
        let bytes = serde_json::to_vec(body).unwrap_or_default();
        Self::new(key, DocumentType::Json, bytes, sequence_number)
    }

    pub fn is_json(&self) -> bool {
        self.doc_type == DocumentType::Json
    }

    /// Decodes the body of a JSON document. Non-JSON documents are opaque and
    /// yield `Ok(None)`.
    pub fn json_body(&self) -> Result<Option<Value>, HandlerError> {
        if !self.is_json() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_slice(&self.body)?))
    }
}

/// Notification that a document was removed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletionEvent {
    pub key: String,
    #[serde(rename = "seq")]
    pub sequence_number: u64,
}

impl DeletionEvent {
    pub fn new(key: impl Into<String>, sequence_number: u64) -> Self {
        Self {
            key: key.into(),
            sequence_number,
        }
    }
}

/// Single record emitted by a change feed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ChangeEvent {
    Mutation(MutationEvent),
    Deletion(DeletionEvent),
}

impl ChangeEvent {
    pub fn key(&self) -> &str {
        match self {
            ChangeEvent::Mutation(event) => &event.key,
            ChangeEvent::Deletion(event) => &event.key,
        }
    }

    pub fn sequence_number(&self) -> u64 {
        match self {
            ChangeEvent::Mutation(event) => event.sequence_number,
            ChangeEvent::Deletion(event) => event.sequence_number,
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            ChangeEvent::Mutation(_) => EventKind::Mutation,
            ChangeEvent::Deletion(_) => EventKind::Deletion,
        }
    }

    pub fn validate(&self) -> Result<(), FeedError> {
        if self.key().is_empty() {
            return Err(FeedError::InvalidEvent("empty document key".into()));
        }
        Ok(())
    }
}

impl From<MutationEvent> for ChangeEvent {
    fn from(event: MutationEvent) -> Self {
        ChangeEvent::Mutation(event)
    }
}

impl From<DeletionEvent> for ChangeEvent {
    fn from(event: DeletionEvent) -> Self {
        ChangeEvent::Deletion(event)
    }
}

/// Unit of work class processed by the dispatcher.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Mutation,
    Deletion,
    Timer,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            EventKind::Mutation => "mutation",
            EventKind::Deletion => "deletion",
            EventKind::Timer => "timer",
        };
        f.write_str(label)
    }
}
