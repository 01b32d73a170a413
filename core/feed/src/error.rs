//! Error types for sentinel-feed.
//!
//! Ingestion itself never fails: malformed input is absorbed by the
//! normalizer. Errors only surface while building a feed from configuration,
//! or from subscriber handlers (which the notifier isolates).

// ═══════════════════════════════════════════════════════════════════════════════
// Feed Errors
// ═══════════════════════════════════════════════════════════════════════════════

/// All errors that can occur while constructing or configuring a feed.
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    // ─────────────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Invalid risk pattern {pattern:?}: {source}")]
    InvalidRiskPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    // ─────────────────────────────────────────────────────────────────────
    // Subscription Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Unknown notification channel: {0}")]
    UnknownChannel(String),
}

/// Convenience type alias for Results using FeedError.
pub type Result<T> = std::result::Result<T, FeedError>;

impl From<FeedError> for String {
    fn from(err: FeedError) -> String {
        err.to_string()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Handler Errors
// ═══════════════════════════════════════════════════════════════════════════════

/// Error returned by a subscriber handler. Logged by the notifier, never
/// propagated to the caller of `process_event`.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct HandlerError {
    pub message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        HandlerError { message }
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        HandlerError {
            message: message.to_string(),
        }
    }
}
