//! `PageAutomation` backed by the remote automation service.

use async_trait::async_trait;
use automation_client::{AutomationClient, AutomationClientError, SessionOptions};
use listing_scraper::{
    AutomationError, AutomationFactory, AutomationResult, BatchJob, ElementDescriptor,
    PageAutomation,
};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::debug;

/// One remote browser session. The session is opened lazily and replaced
/// on `reinitialize`.
pub struct HttpAutomation {
    client: AutomationClient,
    options: SessionOptions,
    session_id: Mutex<Option<String>>,
}

impl HttpAutomation {
    pub async fn open(client: AutomationClient, options: SessionOptions) -> AutomationResult<Self> {
        let automation = Self {
            client,
            options,
            session_id: Mutex::new(None),
        };
        automation.session().await?;
        Ok(automation)
    }

    async fn session(&self) -> AutomationResult<String> {
        let mut current = self.session_id.lock().await;
        if let Some(id) = current.as_ref() {
            return Ok(id.clone());
        }
        let session = self
            .client
            .create_session(&self.options)
            .await
            .map_err(|e| AutomationError::Unavailable(e.to_string()))?;
        *current = Some(session.session_id.clone());
        Ok(session.session_id)
    }
}

/// Unreachable service means no call can succeed; everything else keeps
/// the operation's own error class so session-closed messages still match.
fn classify(
    error: AutomationClientError,
    wrap: impl FnOnce(String) -> AutomationError,
) -> AutomationError {
    if error.is_connect() {
        AutomationError::Unavailable(error.to_string())
    } else {
        wrap(error.to_string())
    }
}

#[async_trait]
impl PageAutomation for HttpAutomation {
    async fn navigate(&self, url: &str) -> AutomationResult<()> {
        let session = self.session().await?;
        self.client
            .navigate(&session, url)
            .await
            .map_err(|e| {
                classify(e, |message| AutomationError::Navigation {
                    url: url.to_string(),
                    message,
                })
            })
    }

    async fn act(&self, instruction: &str) -> AutomationResult<()> {
        let session = self.session().await?;
        self.client
            .act(&session, instruction)
            .await
            .map_err(|e| classify(e, AutomationError::Action))
    }

    async fn observe(&self, instruction: &str) -> AutomationResult<Vec<ElementDescriptor>> {
        let session = self.session().await?;
        let elements = self
            .client
            .observe(&session, instruction)
            .await
            .map_err(|e| classify(e, AutomationError::Observation))?;
        Ok(elements
            .into_iter()
            .map(|element| ElementDescriptor {
                description: element.description,
                selector: element.selector,
                method: element.method,
            })
            .collect())
    }

    async fn extract(&self, instruction: &str, schema: Option<&Value>) -> AutomationResult<Value> {
        let session = self.session().await?;
        self.client
            .extract(&session, instruction, schema)
            .await
            .map_err(|e| classify(e, AutomationError::Extraction))
    }

    async fn reinitialize(&self) -> AutomationResult<()> {
        let previous = self.session_id.lock().await.take();
        if let Some(id) = previous {
            if let Err(e) = self.client.close_session(&id).await {
                debug!(session_id = %id, error = %e, "closing stale session failed");
            }
        }
        let session = self.session().await?;
        debug!(session_id = %session, "automation session reinitialized");
        Ok(())
    }

    async fn close(&self) -> AutomationResult<()> {
        let Some(id) = self.session_id.lock().await.take() else {
            return Ok(());
        };
        self.client
            .close_session(&id)
            .await
            .map_err(|e| classify(e, AutomationError::Action))
    }
}

/// Opens one remote session per job.
pub struct HttpAutomationFactory {
    client: AutomationClient,
    options: SessionOptions,
}

impl HttpAutomationFactory {
    pub fn new(client: AutomationClient) -> Self {
        Self {
            client,
            options: SessionOptions::default(),
        }
    }
}

#[async_trait]
impl AutomationFactory for HttpAutomationFactory {
    async fn create(&self, job: &BatchJob) -> AutomationResult<Box<dyn PageAutomation>> {
        let automation =
            HttpAutomation::open(self.client.clone(), self.options.clone()).await?;
        debug!(job_id = %job.job_id, vendor = %job.vendor, "automation session opened");
        Ok(Box::new(automation))
    }
}
