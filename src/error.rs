//! Error types for client operations.

use crate::types::OperationType;
use thiserror::Error;

/// Main error type for client operations.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// A required field is missing or malformed. Never reaches the network.
    #[error("{operation}: validation failed: {reason}")]
    Validation {
        operation: OperationType,
        reason: String,
    },

    /// Transport-level failure (DNS, TCP, TLS, timeout).
    #[error("{operation}: connection error: {message}")]
    Connection {
        operation: OperationType,
        message: String,
        timed_out: bool,
    },

    /// Non-2xx HTTP status.
    #[error("{operation}: server responded with status {status}")]
    Server {
        operation: OperationType,
        status: u16,
        body: Vec<u8>,
    },

    /// 2xx response whose body does not have the expected shape.
    #[error("{operation}: error parsing response: {message}")]
    Parsing {
        operation: OperationType,
        message: String,
        body: Vec<u8>,
    },

    /// Aborted by the caller's cancellation signal.
    #[error("{operation}: request cancelled")]
    Cancelled { operation: OperationType },
}

/// Fieldless mirror of [`Error`] variants.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    Connection,
    Server,
    Parsing,
    Cancelled,
}

impl Error {
    pub(crate) fn validation(operation: OperationType, reason: impl Into<String>) -> Self {
        Error::Validation {
            operation,
            reason: reason.into(),
        }
    }

    pub(crate) fn parsing(
        operation: OperationType,
        message: impl Into<String>,
        body: &[u8],
    ) -> Self {
        Error::Parsing {
            operation,
            message: message.into(),
            body: body.to_vec(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation { .. } => ErrorKind::Validation,
            Error::Connection { .. } => ErrorKind::Connection,
            Error::Server { .. } => ErrorKind::Server,
            Error::Parsing { .. } => ErrorKind::Parsing,
            Error::Cancelled { .. } => ErrorKind::Cancelled,
        }
    }

    pub fn operation(&self) -> OperationType {
        match self {
            Error::Validation { operation, .. }
            | Error::Connection { operation, .. }
            | Error::Server { operation, .. }
            | Error::Parsing { operation, .. }
            | Error::Cancelled { operation } => *operation,
        }
    }

    /// Whether the subscribe loop may retry after this error.
    ///
    /// Transport failures, 5xx, 408 and 429 are transient. Other 4xx
    /// (bad keys, denied access) will not fix themselves.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Connection { .. } => true,
            Error::Server { status, .. } => *status >= 500 || *status == 408 || *status == 429,
            _ => false,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Connection { timed_out: true, .. })
    }

    /// Raw response body preserved for diagnostics.
    pub fn raw_body(&self) -> Option<&[u8]> {
        match self {
            Error::Server { body, .. } | Error::Parsing { body, .. } => Some(body),
            _ => None,
        }
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classes() {
        let conn = Error::Connection {
            operation: OperationType::Subscribe,
            message: "reset".into(),
            timed_out: false,
        };
        assert!(conn.is_retryable());

        let unavailable = Error::Server {
            operation: OperationType::Subscribe,
            status: 503,
            body: vec![],
        };
        assert!(unavailable.is_retryable());

        let forbidden = Error::Server {
            operation: OperationType::Subscribe,
            status: 403,
            body: b"{\"error\":true}".to_vec(),
        };
        assert!(!forbidden.is_retryable());
        assert_eq!(forbidden.raw_body(), Some(&b"{\"error\":true}"[..]));

        assert!(!Error::validation(OperationType::Grant, "Missing Secret Key").is_retryable());
    }

    #[test]
    fn test_display_names_operation() {
        let err = Error::validation(OperationType::Grant, "Missing Secret Key");
        assert_eq!(err.to_string(), "grant: validation failed: Missing Secret Key");
        assert_eq!(err.kind(), ErrorKind::Validation);
    }
}
