//! Pipeline error types.

use thiserror::Error;

/// Errors that can occur while moving an event through the relay pipeline.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Upstream stream connection/send/receive error.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Durable queue unreachable or a queue operation failed.
    #[error("Queue error: {0}")]
    Queue(String),

    /// Queued payload or upstream message could not be decoded.
    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),

    /// A required field was missing or had the wrong shape.
    #[error("Invalid event: missing or malformed field '{field}'")]
    InvalidEvent { field: String },

    /// Subscription store query failed.
    #[error("Subscription lookup failed: {0}")]
    Lookup(String),

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl RelayError {
    /// Returns `true` if the operation may succeed when tried again later.
    /// The consumer only hands a message back for another attempt when this
    /// holds.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Queue(_) | Self::Lookup(_))
    }

    /// Returns `true` for payload-level errors; the message will never decode.
    pub fn is_decode(&self) -> bool {
        matches!(self, Self::Decode(_) | Self::InvalidEvent { .. })
    }
}

/// How a single push delivery failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// The endpoint is gone or the subscription keys are unusable.
    /// Candidate for cleanup by the subscription owner.
    Permanent,
    /// The push service or the network failed; a later attempt may work.
    Transient,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Permanent => write!(f, "permanent"),
            Self::Transient => write!(f, "transient"),
        }
    }
}

/// A failed delivery to one subscriber.
#[derive(Debug, Clone, Error)]
#[error("{kind} delivery failure: {reason}")]
pub struct DeliveryError {
    pub kind: FailureKind,
    pub reason: String,
}

impl DeliveryError {
    pub fn permanent(reason: impl Into<String>) -> Self {
        Self { kind: FailureKind::Permanent, reason: reason.into() }
    }

    pub fn transient(reason: impl Into<String>) -> Self {
        Self { kind: FailureKind::Transient, reason: reason.into() }
    }

    pub fn is_permanent(&self) -> bool {
        self.kind == FailureKind::Permanent
    }
}
