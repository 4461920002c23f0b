//! Error types for graph-chat-export
//!
//! This module provides the error handling for the library:
//! - A single [`Error`] enum shared by the request engine, resolver and materializer
//! - [`ResolutionFailure`] carrying the ordered strategy attempts for one attachment
//! - Classification into fatal (traversal-aborting) and per-item failures
//! - Stable machine-readable error codes for events and summaries

use crate::types::ResolutionAttempt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for graph-chat-export operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for graph-chat-export
///
/// Each variant includes contextual information to help diagnose issues.
/// Rate limiting and token expiry never show up here while the retry budget
/// allows recovery; they are handled inside the request executor.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "export.output_dir")
        key: Option<String>,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Transport-level failure (connect, timeout, body read)
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Non-success HTTP status that has no recovery path
    #[error("HTTP {status} from {url}")]
    Http {
        /// Response status code
        status: u16,
        /// Request URL
        url: String,
    },

    /// Rate-limit or token-refresh recovery ran out of budget
    #[error("retry budget exhausted for {url}: {reason} after {attempts} attempts ({waited:?} waited)")]
    RetryExhausted {
        /// Request URL
        url: String,
        /// Which budget was exhausted
        reason: String,
        /// Number of requests issued, including the first one
        attempts: u32,
        /// Total time spent sleeping on Retry-After
        waited: Duration,
    },

    /// Credentials could not be obtained from the token provider
    #[error("authentication error: {0}")]
    Auth(String),

    /// Every resolution strategy failed for an attachment
    #[error(transparent)]
    Resolution(#[from] ResolutionFailure),

    /// URL could not be parsed or rebuilt
    #[error("invalid URL {url}: {reason}")]
    InvalidUrl {
        /// The offending URL
        url: String,
        /// Why it was rejected
        reason: String,
    },

    /// File could not be reserved under any candidate name
    #[error("file collision at {path}: {reason}")]
    FileCollision {
        /// The path where the collision occurred
        path: PathBuf,
        /// The reason for the collision
        reason: String,
    },

    /// The export was cancelled (signal or caller request)
    #[error("export cancelled")]
    Cancelled,

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether this error must abort the whole traversal.
    ///
    /// Exhausted retry budgets and missing credentials mean every following
    /// request would fail the same way. Everything else degrades to a
    /// per-chat or per-attachment failure that is counted and skipped.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::RetryExhausted { .. } | Error::Auth(_) | Error::Config { .. } | Error::Cancelled
        )
    }

    /// Whether this error must stop the remaining attachment downloads
    ///
    /// A spent retry budget belongs to one attachment host and is counted as
    /// that attachment's failure; only credentials and cancellation stop the
    /// downloads of a chat.
    pub fn stops_downloads(&self) -> bool {
        matches!(self, Error::Auth(_) | Error::Config { .. } | Error::Cancelled)
    }

    /// Machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            Error::Config { .. } => "config_error",
            Error::Io(_) => "io_error",
            Error::Network(_) => "network_error",
            Error::Serialization(_) => "serialization_error",
            Error::Http { .. } => "http_error",
            Error::RetryExhausted { .. } => "retry_exhausted",
            Error::Auth(_) => "auth_error",
            Error::Resolution(_) => "resolution_failed",
            Error::InvalidUrl { .. } => "invalid_url",
            Error::FileCollision { .. } => "file_collision",
            Error::Cancelled => "cancelled",
            Error::Other(_) => "internal_error",
        }
    }

    /// Shorthand for a configuration error tied to a key
    pub fn config(key: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }
}

/// All applicable strategies failed to retrieve an attachment
#[derive(Debug, Error)]
#[error("all {} resolution strategies failed for {name}", attempts.len())]
pub struct ResolutionFailure {
    /// Suggested name of the reference that could not be resolved
    pub name: String,
    /// Ordered attempts, one per strategy tried
    pub attempts: Vec<ResolutionAttempt>,
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AttemptOutcome, Strategy};

    #[test]
    fn retry_exhausted_and_auth_are_fatal() {
        let exhausted = Error::RetryExhausted {
            url: "https://graph.example/me/chats".into(),
            reason: "rate limited".into(),
            attempts: 4,
            waited: Duration::from_secs(3),
        };
        assert!(exhausted.is_fatal());
        assert!(Error::Auth("no token".into()).is_fatal());
        assert!(Error::Cancelled.is_fatal());
    }

    #[test]
    fn only_credentials_and_cancellation_stop_downloads() {
        let exhausted = Error::RetryExhausted {
            url: "https://contoso.sharepoint.com/file.pdf".into(),
            reason: "rate limit wait exceeds ceiling".into(),
            attempts: 1,
            waited: Duration::ZERO,
        };
        assert!(!exhausted.stops_downloads());
        assert!(Error::Auth("no token".into()).stops_downloads());
        assert!(Error::Cancelled.stops_downloads());
        assert!(!Error::Other("boom".into()).stops_downloads());
    }

    #[test]
    fn per_item_errors_are_not_fatal() {
        let http = Error::Http {
            status: 404,
            url: "https://graph.example/me/chats/x/messages".into(),
        };
        assert!(!http.is_fatal());
        assert!(!Error::Other("boom".into()).is_fatal());
        assert!(
            !Error::Resolution(ResolutionFailure {
                name: "a.pdf".into(),
                attempts: vec![],
            })
            .is_fatal()
        );
    }

    #[test]
    fn resolution_failure_message_counts_attempts() {
        let failure = ResolutionFailure {
            name: "report.pdf".into(),
            attempts: vec![
                ResolutionAttempt {
                    strategy: Strategy::SharedItem,
                    url: "https://graph.example/shares/u!x/driveItem/content".into(),
                    outcome: AttemptOutcome::Status(403),
                },
                ResolutionAttempt {
                    strategy: Strategy::DirectUrl,
                    url: "https://contoso.sharepoint.com/report.pdf".into(),
                    outcome: AttemptOutcome::Error("timed out".into()),
                },
            ],
        };
        assert_eq!(
            failure.to_string(),
            "all 2 resolution strategies failed for report.pdf"
        );
        assert_eq!(Error::from(failure).code(), "resolution_failed");
    }

    #[test]
    fn config_helper_sets_key() {
        let err = Error::config("export.max_concurrent_downloads", "must be at least 1");
        match err {
            Error::Config { key, message } => {
                assert_eq!(key.as_deref(), Some("export.max_concurrent_downloads"));
                assert_eq!(message, "must be at least 1");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
