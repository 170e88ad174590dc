//! The page-automation collaborator.
//!
//! The collaborator drives a real browser from natural-language
//! instructions. This crate never inspects HTML itself; it only sequences
//! these calls and interprets what `extract` returns.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AutomationResult;
use crate::types::job::BatchJob;

/// An element the collaborator found while observing a page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ElementDescriptor {
    pub description: String,
    #[serde(default)]
    pub selector: Option<String>,
    /// Suggested interaction, e.g. "click"
    #[serde(default)]
    pub method: Option<String>,
}

/// One browser session driven by instructions.
///
/// Any call may fail with an error whose message marks the session as
/// closed (see [`crate::AutomationError::is_session_closed`]); callers
/// then `reinitialize` once and retry.
#[async_trait]
pub trait PageAutomation: Send + Sync {
    async fn navigate(&self, url: &str) -> AutomationResult<()>;

    async fn act(&self, instruction: &str) -> AutomationResult<()>;

    async fn observe(&self, instruction: &str) -> AutomationResult<Vec<ElementDescriptor>>;

    async fn extract(&self, instruction: &str, schema: Option<&Value>) -> AutomationResult<Value>;

    /// Replace the underlying session with a fresh one.
    async fn reinitialize(&self) -> AutomationResult<()>;

    /// Release the session. Errors here are logged, never propagated.
    async fn close(&self) -> AutomationResult<()> {
        Ok(())
    }
}

/// Opens one collaborator session per job.
#[async_trait]
pub trait AutomationFactory: Send + Sync {
    async fn create(&self, job: &BatchJob) -> AutomationResult<Box<dyn PageAutomation>>;
}
