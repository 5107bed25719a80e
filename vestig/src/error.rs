// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error types for the vestig engine.
//!
//! Construction-time validation fails fast with a [`ConfigError`]; everything
//! on the emission path is infallible from the caller's point of view, and
//! transport internals report through [`TransportError`].

use thiserror::Error;

/// Errors raised while validating configuration, at constructor time only.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An unknown log level name.
    #[error("invalid log level: {0}")]
    InvalidLevel(String),

    /// An unknown sanitizer preset name.
    #[error("invalid sanitizer preset: {0}")]
    InvalidPreset(String),

    /// A DSN that does not match `scheme://key@host/project_id`.
    #[error("invalid DSN: {0}")]
    InvalidDsn(String),

    /// The host has no writable filesystem.
    #[error("filesystem is not available on this runtime")]
    FilesystemUnavailable,

    /// Any other invalid configuration value.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Errors that occur inside a transport.
///
/// These never propagate to an emitting caller; only explicit `flush()` and
/// `destroy()` calls surface them.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The server returned an HTTP error status.
    ///
    /// Response bodies are never carried verbatim — only the status and the
    /// body length are kept.
    #[error("request failed with status {status} ({body_bytes} byte body)")]
    Http {
        /// The HTTP status code (e.g. 429, 503).
        status: u16,
        /// Length of the discarded response body.
        body_bytes: usize,
    },

    /// The request exceeded the configured timeout.
    #[error("request timed out")]
    TimedOut,

    /// The connection could not be established or was interrupted.
    #[error("network error: {0}")]
    Network(String),

    /// A record could not be serialized for the wire.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// An I/O error from a file or store backend.
    #[error("I/O error: {0}")]
    Io(String),

    /// The transport has been destroyed.
    #[error("transport is destroyed")]
    Destroyed,
}

impl TransportError {
    /// Whether a failed send may be retried.
    ///
    /// 429 and 5xx responses, timeouts and network errors are transient;
    /// other HTTP statuses and local failures are permanent.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Http { status, .. } => *status == 429 || (500..=599).contains(status),
            TransportError::TimedOut | TransportError::Network(_) => true,
            TransportError::Serialization(_) | TransportError::Io(_) | TransportError::Destroyed => {
                false
            }
        }
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        TransportError::Io(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(429, true)]
    #[case(500, true)]
    #[case(503, true)]
    #[case(599, true)]
    #[case(400, false)]
    #[case(401, false)]
    #[case(404, false)]
    fn http_retryability(#[case] status: u16, #[case] expected: bool) {
        let err = TransportError::Http {
            status,
            body_bytes: 0,
        };
        assert_eq!(err.is_retryable(), expected);
    }

    #[test]
    fn transient_kinds_are_retryable() {
        assert!(TransportError::TimedOut.is_retryable());
        assert!(TransportError::Network("refused".into()).is_retryable());
    }

    #[test]
    fn local_failures_are_permanent() {
        assert!(!TransportError::Serialization("bad".into()).is_retryable());
        assert!(!TransportError::Io("disk full".into()).is_retryable());
        assert!(!TransportError::Destroyed.is_retryable());
    }

    #[test]
    fn http_display_does_not_leak_body() {
        let err = TransportError::Http {
            status: 403,
            body_bytes: 512,
        };
        let text = err.to_string();
        assert!(text.contains("403"));
        assert!(text.contains("512"));
    }
}
