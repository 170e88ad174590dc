//! One-shot session recovery around collaborator calls.

use serde_json::Value;
use tracing::warn;

use crate::error::{AutomationError, AutomationResult};
use crate::traits::automation::{ElementDescriptor, PageAutomation};

/// Wraps a collaborator for the duration of one job run.
///
/// The first "session closed" error reinitializes the session and retries
/// the call once. Any later session-closed error, including one raised by
/// the retry itself, becomes [`AutomationError::SessionLost`].
pub struct SessionGuard<'a> {
    inner: &'a dyn PageAutomation,
    reinitialized: bool,
}

impl<'a> SessionGuard<'a> {
    pub fn new(inner: &'a dyn PageAutomation) -> Self {
        Self {
            inner,
            reinitialized: false,
        }
    }

    pub fn reinitialized(&self) -> bool {
        self.reinitialized
    }

    pub async fn navigate(&mut self, url: &str) -> AutomationResult<()> {
        match self.inner.navigate(url).await {
            Err(e) if e.is_session_closed() => {
                self.recover("navigate", e).await?;
                self.settle(self.inner.navigate(url).await)
            }
            other => other,
        }
    }

    pub async fn act(&mut self, instruction: &str) -> AutomationResult<()> {
        match self.inner.act(instruction).await {
            Err(e) if e.is_session_closed() => {
                self.recover("act", e).await?;
                self.settle(self.inner.act(instruction).await)
            }
            other => other,
        }
    }

    pub async fn observe(&mut self, instruction: &str) -> AutomationResult<Vec<ElementDescriptor>> {
        match self.inner.observe(instruction).await {
            Err(e) if e.is_session_closed() => {
                self.recover("observe", e).await?;
                self.settle(self.inner.observe(instruction).await)
            }
            other => other,
        }
    }

    pub async fn extract(
        &mut self,
        instruction: &str,
        schema: Option<&Value>,
    ) -> AutomationResult<Value> {
        match self.inner.extract(instruction, schema).await {
            Err(e) if e.is_session_closed() => {
                self.recover("extract", e).await?;
                self.settle(self.inner.extract(instruction, schema).await)
            }
            other => other,
        }
    }

    async fn recover(&mut self, operation: &str, error: AutomationError) -> AutomationResult<()> {
        if self.reinitialized {
            return Err(AutomationError::SessionLost(error.to_string()));
        }
        self.reinitialized = true;
        warn!(operation, error = %error, "automation session closed, reinitializing");

        self.inner
            .reinitialize()
            .await
            .map_err(|e| AutomationError::SessionLost(format!("reinitialize failed: {}", e)))
    }

    fn settle<T>(&self, retried: AutomationResult<T>) -> AutomationResult<T> {
        match retried {
            Err(e) if e.is_session_closed() => Err(AutomationError::SessionLost(e.to_string())),
            other => other,
        }
    }
}
