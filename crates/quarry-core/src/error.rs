//! Error taxonomy shared by every Quarry crate.

use thiserror::Error;

/// A database-reported failure from the catalog accessor's execute primitive.
///
/// Transport failures and semantic SQL errors are not distinguished here; the
/// validation loop classifies them by message text.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("execution failed: {message}")]
pub struct ExecutionError {
    pub message: String,
}

impl ExecutionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Failures from an external language-model provider.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    /// Transport-level failure (DNS, connect, TLS, reset).
    #[error("network error: {0}")]
    Network(String),

    /// Provider answered with a non-success status.
    #[error("provider returned {status}: {body}")]
    Api { status: u16, body: String },

    /// Quota or rate limit exhausted.
    #[error("rate limited by provider")]
    RateLimited,

    /// Call exceeded the configured timeout.
    #[error("provider call timed out after {secs}s")]
    Timeout { secs: u64 },

    /// Response body could not be interpreted.
    #[error("invalid provider response: {0}")]
    InvalidResponse(String),

    /// No provider is registered for the requested model id.
    #[error("no provider registered for model '{0}'")]
    UnknownModel(String),

    /// The API key environment variable is not set.
    #[error("missing credentials: environment variable {0} is not set")]
    MissingCredentials(String),
}

/// Errors surfaced by query synthesis, rewriting and validation.
#[derive(Debug, Error)]
pub enum QueryError {
    /// The canonical request is malformed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The request or candidate touches an excluded relation or is not a SELECT.
    #[error("policy violation: {reason}")]
    PolicyViolation { reason: String },

    /// The database rejected a probe.
    #[error(transparent)]
    Execution(#[from] ExecutionError),

    /// An external model call failed.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// Every repair strategy and the fallback path were exhausted.
    #[error("query could not be repaired: {reason}")]
    UnrepairableQuery { reason: String },
}

impl QueryError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    pub fn policy(reason: impl Into<String>) -> Self {
        Self::PolicyViolation {
            reason: reason.into(),
        }
    }

    pub fn unrepairable(reason: impl Into<String>) -> Self {
        Self::UnrepairableQuery {
            reason: reason.into(),
        }
    }

    /// Terminal errors never trigger synthesis or fallback.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::InvalidRequest(_) | Self::PolicyViolation { .. }
        )
    }
}
