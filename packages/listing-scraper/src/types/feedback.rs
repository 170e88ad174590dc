//! Validation outcomes and the decisions routed from them.

use serde::{Deserialize, Serialize};

/// Result of validating one extracted page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ValidationOutcome {
    Passed {
        confidence: f64,
    },
    Failed {
        issues: Vec<String>,
        suggestions: Vec<String>,
        confidence: f64,
    },
    /// The collaborator failed in a way no retry within the job will fix
    ToolFailure {
        message: String,
    },
}

impl ValidationOutcome {
    pub fn is_passed(&self) -> bool {
        matches!(self, ValidationOutcome::Passed { .. })
    }
}

/// Feedback carried into the next extraction attempt of a page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationFeedback {
    pub issues: Vec<String>,
    pub suggestions: Vec<String>,
    /// Attempts already made for this page
    pub retry_count: u32,
    pub max_retries: u32,
}

/// Pagination signal reported alongside an extraction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageSignal {
    pub has_more_pages: Option<bool>,
    pub total_pages: Option<u32>,
}

/// Everything the router looks at.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteInput<'a> {
    pub outcome: &'a ValidationOutcome,
    pub extraction_attempts: u32,
    pub max_extraction_attempts: u32,
    pub current_page: u32,
    pub max_pages: Option<u32>,
    pub signal: &'a PageSignal,
}

/// What the workflow does next with a page.
#[derive(Debug, Clone, PartialEq)]
pub enum RouteDecision {
    AcceptAndContinue,
    AcceptAndComplete,
    ReExtract(ValidationFeedback),
    /// Give up on this page; `more_pages` tells whether to move on or finish
    SkipPage { more_pages: bool },
    FatalError(String),
}
