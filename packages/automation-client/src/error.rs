//! Error types for the automation client.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, AutomationClientError>;

#[derive(Debug, Error)]
pub enum AutomationClientError {
    /// Transport failure (connection refused, timeout, TLS)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-2xx response, or an envelope with `success: false`
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("invalid JSON from {endpoint}: {source}")]
    Json {
        endpoint: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("response from {endpoint} carried no data")]
    MissingData { endpoint: String },
}

impl AutomationClientError {
    /// The service could not be reached at all.
    pub fn is_connect(&self) -> bool {
        match self {
            AutomationClientError::Http(e) => e.is_connect() || e.is_timeout(),
            _ => false,
        }
    }

    /// HTTP status of an API error.
    pub fn status(&self) -> Option<u16> {
        match self {
            AutomationClientError::Api { status, .. } => Some(*status),
            AutomationClientError::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}
