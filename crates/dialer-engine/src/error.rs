//! Error types for the dialer engine
//!
//! Errors are grouped the way the dialer treats them operationally:
//!
//! - **Transient network** failures are retried with backoff, then logged and
//!   abandoned. They never stop a session.
//! - **Invalid contacts** are skipped permanently and counted.
//! - **Concurrency conflicts** are lost arbitration races. They are not failures;
//!   the losing line is recorded as `canceled/agent_busy`.
//! - **Data integrity** and **resource leak** findings are advisory and only
//!   surface through verification reports.

use thiserror::Error;

/// Result type for dialer operations
pub type Result<T> = std::result::Result<T, DialerError>;

/// Errors that can occur in the dialer engine
#[derive(Debug, Error)]
pub enum DialerError {
    /// Network failure talking to the provider or a notification endpoint
    #[error("Transient network error during {operation}: {message}")]
    TransientNetwork { operation: String, message: String },

    /// Contact that can never be dialed (bad number, do-not-call, ...)
    #[error("Invalid contact {contact_id}: {reason}")]
    InvalidContact { contact_id: String, reason: String },

    /// Line lost the race for the agent bridge
    #[error("Line {line_id} lost arbitration to line {winner}")]
    ConcurrencyConflict { line_id: usize, winner: usize },

    /// Persisted data violates an expected invariant
    #[error("Data integrity violation on record {record_id}: {message}")]
    DataIntegrity { record_id: String, message: String },

    /// A call or line that never reached a terminal state
    #[error("Resource leak on record {record_id}: {message}")]
    ResourceLeak { record_id: String, message: String },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Malformed or unroutable event at the boundary
    #[error("Invalid event: {message}")]
    InvalidEvent { message: String },

    /// Provider rejected a command
    #[error("Provider error: {message}")]
    Provider { message: String },

    /// Persistence failure
    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),

    /// Entity lookup failed
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Operation timed out
    #[error("Operation {operation} timed out after {millis}ms")]
    Timeout { operation: String, millis: u64 },

    /// Serialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DialerError {
    /// Create a transient network error
    pub fn network(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::TransientNetwork {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create an invalid contact error
    pub fn invalid_contact(contact_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidContact {
            contact_id: contact_id.into(),
            reason: reason.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an invalid event error
    pub fn invalid_event(message: impl Into<String>) -> Self {
        Self::InvalidEvent {
            message: message.into(),
        }
    }

    /// Create a provider error
    pub fn provider(message: impl Into<String>) -> Self {
        Self::Provider {
            message: message.into(),
        }
    }

    /// Create a not-found error
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether retrying the failed operation can help
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::TransientNetwork { .. } | Self::Timeout { .. } => true,
            Self::Storage(e) => matches!(
                e,
                sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::PoolClosed
            ),
            _ => false,
        }
    }

    /// Short category label for structured logs
    pub fn category(&self) -> &'static str {
        match self {
            Self::TransientNetwork { .. } => "network",
            Self::InvalidContact { .. } => "contact",
            Self::ConcurrencyConflict { .. } => "arbitration",
            Self::DataIntegrity { .. } => "integrity",
            Self::ResourceLeak { .. } => "leak",
            Self::Configuration { .. } => "config",
            Self::InvalidEvent { .. } => "event",
            Self::Provider { .. } => "provider",
            Self::Storage(_) => "storage",
            Self::NotFound { .. } => "not_found",
            Self::Timeout { .. } => "timeout",
            Self::Serialization(_) => "serialization",
            Self::Internal { .. } => "internal",
        }
    }
}
