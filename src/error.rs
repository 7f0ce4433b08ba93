use thiserror::Error;

use crate::http::TransportErrorKind;

/// Main error type for the federation search client
#[derive(Debug, Error)]
pub enum ClientError {
    /// Connection, timeout or body read failure, after all retries
    #[error("Transport error ({kind}) for {url} after {attempts} attempt(s): {message}")]
    Transport {
        kind: TransportErrorKind,
        url: String,
        attempts: u32,
        message: String,
    },

    /// Retryable HTTP status that persisted after all retries
    #[error("HTTP {status} from {url} after {attempts} attempt(s)")]
    RetryableStatus {
        status: u16,
        url: String,
        attempts: u32,
    },

    /// Non-retryable HTTP status, surfaced immediately
    #[error("HTTP {status} from {url} (not retried, {attempts} attempt(s))")]
    FatalStatus {
        status: u16,
        url: String,
        attempts: u32,
    },

    /// Malformed search response or hit
    #[error("Decode error: {0}")]
    Decode(String),

    /// Cache operation error
    #[error("Cache error: {0}")]
    CacheError(String),

    /// Aggregation budget exhausted in strict mode
    #[error("Aggregation budget exceeded after {rounds} round(s): {reason}")]
    RecursionBudgetExceeded { rounds: u32, reason: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ClientError {
    /// Check if the error came from a retryable condition
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::Transport { .. } | ClientError::RetryableStatus { .. }
        )
    }

    /// Number of attempts made for the failing outbound request, if any
    pub fn attempts(&self) -> Option<u32> {
        match self {
            ClientError::Transport { attempts, .. }
            | ClientError::RetryableStatus { attempts, .. }
            | ClientError::FatalStatus { attempts, .. } => Some(*attempts),
            _ => None,
        }
    }

    /// HTTP status returned by the remote service, if any
    pub fn status_code(&self) -> Option<u16> {
        match self {
            ClientError::RetryableStatus { status, .. } | ClientError::FatalStatus { status, .. } => {
                Some(*status)
            }
            _ => None,
        }
    }

    /// Get error type as string for logging and metrics labels
    pub fn error_type(&self) -> &'static str {
        match self {
            ClientError::Transport { .. } => "transport_error",
            ClientError::RetryableStatus { .. } => "retryable_status",
            ClientError::FatalStatus { .. } => "fatal_status",
            ClientError::Decode(_) => "decode_error",
            ClientError::CacheError(_) => "cache_error",
            ClientError::RecursionBudgetExceeded { .. } => "recursion_budget_exceeded",
            ClientError::ConfigError(_) => "config_error",
            ClientError::IoError(_) => "io_error",
            ClientError::SerializationError(_) => "serialization_error",
            ClientError::Internal(_) => "internal_error",
        }
    }
}

/// Result type alias for client operations
pub type ClientResult<T> = Result<T, ClientError>;
