//! Typed errors for the listing scraper.
//!
//! Uses `thiserror` for library errors (not `anyhow`) so callers can match on
//! the failure class: collaborator errors decide retries, store errors are
//! fatal for the current job.

use std::path::PathBuf;

use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;

use crate::types::product::RecordIssue;

lazy_static! {
    // Messages the automation service uses when the underlying browser
    // session has gone away and must be recreated.
    static ref SESSION_CLOSED: Regex = Regex::new(
        r"(?i)(session|target|page|browser|context)\s+(has\s+been\s+|was\s+|is\s+)?closed|session\s+(not\s+found|expired)|connection\s+(reset|closed)"
    ).unwrap();
}

/// Top-level errors for scraping operations.
#[derive(Debug, Error)]
pub enum ScrapeError {
    /// The page-automation collaborator failed
    #[error("automation error: {0}")]
    Automation(#[from] AutomationError),

    /// Reading or writing a state/session file failed
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// A raw record could not be turned into a product
    #[error("invalid record: {0}")]
    InvalidRecord(#[from] RecordIssue),

    /// The run was stopped between page-cycles
    #[error("operation cancelled")]
    Cancelled,

    /// Any failure the workflow could not classify
    #[error("workflow error: {0}")]
    Workflow(String),
}

/// Errors raised by the page-automation collaborator.
#[derive(Debug, Clone, Error)]
pub enum AutomationError {
    #[error("navigation to {url} failed: {message}")]
    Navigation { url: String, message: String },

    #[error("action failed: {0}")]
    Action(String),

    #[error("observation failed: {0}")]
    Observation(String),

    #[error("extraction failed: {0}")]
    Extraction(String),

    /// The collaborator answered with data we could not interpret
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// The collaborator could not be reached or refused to start a session
    #[error("automation unavailable: {0}")]
    Unavailable(String),

    /// The session closed again after it had already been recreated once
    #[error("automation session lost: {0}")]
    SessionLost(String),
}

impl AutomationError {
    /// Whether the message matches the "session closed" failure class.
    ///
    /// Only this class triggers a session reinitialization.
    pub fn is_session_closed(&self) -> bool {
        match self {
            AutomationError::SessionLost(_) => false,
            other => SESSION_CLOSED.is_match(&other.to_string()),
        }
    }

    /// Errors that no amount of retrying within the job will fix.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AutomationError::SessionLost(_) | AutomationError::Unavailable(_)
        )
    }
}

/// Persistence errors for state and session files.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("already exists: {path}")]
    AlreadyExists { path: PathBuf },

    #[error("not found: {what}")]
    NotFound { what: String },

    /// The file at a key's path holds a document for another key
    #[error("{path} holds {found}, expected {expected}")]
    KeyMismatch {
        path: PathBuf,
        expected: String,
        found: String,
    },
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn key_mismatch(
        path: impl Into<PathBuf>,
        expected: (&str, &str, &str),
        found: (&str, &str, &str),
    ) -> Self {
        let show = |(s, v, c): (&str, &str, &str)| format!("{}/{}/{}", s, v, c);
        StoreError::KeyMismatch {
            path: path.into(),
            expected: show(expected),
            found: show(found),
        }
    }

    pub(crate) fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        StoreError::Json {
            path: path.into(),
            source,
        }
    }
}

/// Result type alias for scraping operations.
pub type Result<T> = std::result::Result<T, ScrapeError>;

/// Result type alias for collaborator calls.
pub type AutomationResult<T> = std::result::Result<T, AutomationError>;

/// Result type alias for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_closed_pattern() {
        let closed = AutomationError::Action("Target page, context or browser has been closed".into());
        assert!(closed.is_session_closed());

        let expired = AutomationError::Extraction("remote: Session expired after 300s".into());
        assert!(expired.is_session_closed());

        let other = AutomationError::Action("element not found: Accept cookies".into());
        assert!(!other.is_session_closed());
    }

    #[test]
    fn test_session_lost_is_fatal_not_recoverable() {
        let lost = AutomationError::SessionLost("session closed".into());
        assert!(lost.is_fatal());
        assert!(!lost.is_session_closed());
    }
}
