use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Envelope wrapping every service response.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

/// Browser options for a new session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionOptions {
    pub headless: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            headless: true,
            timeout_ms: None,
            user_agent: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionInfo {
    pub session_id: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NavigateRequest<'a> {
    pub url: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub struct InstructionRequest<'a> {
    pub instruction: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExtractRequest<'a> {
    pub instruction: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<&'a Value>,
}

/// An element reported by `observe`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Element {
    pub description: String,
    #[serde(default)]
    pub selector: Option<String>,
    #[serde(default)]
    pub method: Option<String>,
}
