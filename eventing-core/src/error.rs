use thiserror::Error;

/// Failures raised while turning a query template into executable text.
///
/// These are programmer errors: a template and its substitutions disagree, or
/// a substitution cannot be emitted safely. Callers should fail fast rather
/// than retry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error("template slot `{0}` has no substitution")]
    MissingSubstitution(String),

    #[error("substitution `{0}` does not match any template slot")]
    UnusedSubstitution(String),

    #[error("unterminated slot starting at byte {0}")]
    UnterminatedSlot(usize),

    #[error("empty slot name at byte {0}")]
    EmptySlot(usize),

    #[error("identifier `{0}` contains a reserved delimiter")]
    ReservedDelimiter(String),

    #[error("value for slot `{slot}` contains a quote character")]
    UnsafeValue { slot: String },
}

/// Failures surfaced by the KV facade.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KvError {
    #[error("bucket `{bucket}` unavailable: {reason}")]
    BucketUnavailable { bucket: String, reason: String },

    #[error("document `{key}` in bucket `{bucket}` is not valid JSON: {reason}")]
    Decode {
        bucket: String,
        key: String,
        reason: String,
    },
}

impl KvError {
    pub fn unavailable(bucket: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::BucketUnavailable {
            bucket: bucket.into(),
            reason: reason.into(),
        }
    }

    /// Transient infrastructure failures are retried by the caller, never by
    /// the facade itself.
    pub fn is_transient(&self) -> bool {
        matches!(self, KvError::BucketUnavailable { .. })
    }
}

/// Failures surfaced by the queue gateway.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("queue `{queue}` unavailable: {reason}")]
    QueueUnavailable { queue: String, reason: String },
}

impl QueueError {
    pub fn unavailable(queue: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::QueueUnavailable {
            queue: queue.into(),
            reason: reason.into(),
        }
    }
}

/// Failures raised by the query engine once a query has been compiled.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error("query rejected by engine: {0}")]
    Rejected(String),

    #[error("query engine unavailable: {0}")]
    Unavailable(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TimerError {
    #[error("timer key must not be empty")]
    EmptyKey,

    #[error("no timer callback registered under `{0}`")]
    UnknownCallback(String),
}

/// Business-logic failure raised by user handlers. Isolated to the event that
/// triggered it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    #[error(transparent)]
    Kv(#[from] KvError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Timer(#[from] TimerError),

    #[error("invalid document body: {0}")]
    InvalidBody(String),

    #[error("{0}")]
    Logic(String),
}

impl HandlerError {
    pub fn logic(message: impl Into<String>) -> Self {
        Self::Logic(message.into())
    }
}

impl From<TemplateError> for HandlerError {
    fn from(err: TemplateError) -> Self {
        HandlerError::Query(QueryError::Template(err))
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        HandlerError::InvalidBody(err.to_string())
    }
}

#[derive(Error, Debug)]
pub enum FeedError {
    #[error("feed IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed feed record on line {line}: {reason}")]
    Malformed { line: usize, reason: String },

    #[error("event rejected: {0}")]
    InvalidEvent(String),
}

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("event key must not be empty")]
    EmptyKey,

    #[error("dispatcher is shutting down")]
    ShuttingDown,
}

/// Failures raised by HTTP bridge routes. Missing parameters are the
/// caller's fault; everything else is an internal error with no partial body.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    #[error("missing request parameter `{0}`")]
    MissingParam(String),

    #[error("invalid request parameter `{name}`: {reason}")]
    InvalidParam { name: String, reason: String },

    #[error(transparent)]
    Kv(#[from] KvError),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error("{0}")]
    Internal(String),
}

impl BridgeError {
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            BridgeError::MissingParam(_) | BridgeError::InvalidParam { .. }
        )
    }
}

impl From<TemplateError> for BridgeError {
    fn from(err: TemplateError) -> Self {
        BridgeError::Query(QueryError::Template(err))
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::Internal(err.to_string())
    }
}

/// Crate-wide error for call sites that cross component boundaries.
#[derive(Error, Debug)]
pub enum EventingError {
    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Kv(#[from] KvError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Timer(#[from] TimerError),

    #[error(transparent)]
    Handler(#[from] HandlerError),

    #[error(transparent)]
    Feed(#[from] FeedError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Bridge(#[from] BridgeError),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, EventingError>;
