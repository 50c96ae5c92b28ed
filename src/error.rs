//! Error taxonomy shared by every component.
//!
//! - validation errors: caller data rejected before any side effect
//! - delivery errors: transport, timeout, cancellation and structural failures
//! - storage errors: absorbed by the cache, never surfaced to the renderer
//! - lifecycle and rendering-path errors raised by the SDK context

use std::time::Duration;
use thiserror::Error;

pub use crate::validate::{ValidationError, ValidationErrorCode};

/// Failures of the delivery client.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeliveryError {
    /// The transport failed before any response was produced.
    #[error("Delivery request failed: {0}")]
    Transport(String),

    /// The server answered with a non-success status.
    #[error("HTTP {status}: {status_text}")]
    Status { status: u16, status_text: String },

    /// A single attempt ran past the configured request timeout.
    #[error("Delivery request timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// The caller cancelled the request.
    #[error("Delivery request aborted")]
    Cancelled,

    /// HTTP success whose payload is missing the creative or tracking block.
    #[error("Invalid response structure: {0}")]
    InvalidResponse(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl DeliveryError {
    /// Whether another attempt may succeed.
    ///
    /// Transport failures, timeouts, 408, 429 and 5xx are retryable. Every
    /// other status, structural errors and cancellation are terminal.
    pub fn is_retryable(&self) -> bool {
        match self {
            DeliveryError::Transport(_) | DeliveryError::Timeout(_) => true,
            DeliveryError::Status { status, .. } => {
                *status == 408 || *status == 429 || *status >= 500
            }
            DeliveryError::Cancelled
            | DeliveryError::InvalidResponse(_)
            | DeliveryError::Validation(_) => false,
        }
    }

    /// HTTP status carried by the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            DeliveryError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Failures of the storage layer behind the cache.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StorageError {
    #[error("Storage is unavailable")]
    Unavailable,

    #[error("Storage quota exceeded ({used} of {quota} bytes)")]
    QuotaExceeded { used: usize, quota: usize },

    #[error("Storage I/O failed: {0}")]
    Io(String),

    #[error("Corrupted storage data: {0}")]
    Corrupted(String),
}

/// Crate-wide error type.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The isolated browsing context never reported it finished loading.
    #[error("Isolated frame failed to load: {0}")]
    FrameLoad(String),

    #[error("SDK not initialized, call init() first")]
    NotInitialized,

    #[error("SDK has been destroyed, cannot reinitialize")]
    Destroyed,

    /// A lifecycle hook supplied by the embedding page failed.
    #[error("{hook} callback failed: {message}")]
    Hook { hook: &'static str, message: String },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_statuses() {
        let status = |status| DeliveryError::Status {
            status,
            status_text: String::new(),
        };

        assert!(status(408).is_retryable());
        assert!(status(429).is_retryable());
        assert!(status(500).is_retryable());
        assert!(status(503).is_retryable());

        assert!(!status(400).is_retryable());
        assert!(!status(401).is_retryable());
        assert!(!status(404).is_retryable());
    }

    #[test]
    fn test_terminal_errors() {
        assert!(DeliveryError::Transport("connection reset".into()).is_retryable());
        assert!(DeliveryError::Timeout(Duration::from_millis(100)).is_retryable());
        assert!(!DeliveryError::Cancelled.is_retryable());
        assert!(!DeliveryError::InvalidResponse("missing creative".into()).is_retryable());
    }

    #[test]
    fn test_display() {
        let err = DeliveryError::Status {
            status: 503,
            status_text: "Service Unavailable".into(),
        };
        assert_eq!(err.to_string(), "HTTP 503: Service Unavailable");
        assert_eq!(
            DeliveryError::Timeout(Duration::from_millis(250)).to_string(),
            "Delivery request timed out after 250ms"
        );
    }
}
