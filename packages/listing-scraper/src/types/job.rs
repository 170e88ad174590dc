//! Batch jobs and their aggregate progress.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;
use uuid::Uuid;

use super::pagination::StateStatus;
use super::product::ProductRecord;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Pending,
    Running,
    Retrying,
    Completed,
    Failed,
    /// Its target was paused through the state store; not requeued
    Paused,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// What to enqueue: one target of a session.
#[derive(Debug, Clone, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct JobSpec {
    pub session_id: String,
    pub vendor: String,
    pub category: String,
    pub url: String,
    #[builder(default, setter(strip_option))]
    pub max_pages: Option<u32>,
    /// Falls back to the runner's default when unset
    #[builder(default, setter(strip_option))]
    pub max_retries: Option<u32>,
}

/// Statistics returned by one workflow run over a target.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunStats {
    pub pages_processed: u32,
    pub pages_failed: u32,
    pub products_found: usize,
    pub products_added: usize,
    pub products_updated: usize,
    pub duplicates_removed: usize,
    pub extraction_attempts: u32,
    pub total_products: usize,
}

/// One scraping target tracked by the batch runner.
///
/// `retry_count` never exceeds `max_retries`; `completed` and `failed` are
/// terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchJob {
    pub job_id: Uuid,
    pub session_id: String,
    pub vendor: String,
    pub category: String,
    pub url: String,
    pub max_pages: Option<u32>,
    pub max_retries: u32,
    pub retry_count: u32,
    pub status: JobStatus,
    pub error: Option<String>,
    pub result: Option<Vec<ProductRecord>>,
    pub stats: Option<RunStats>,
    /// Status of the target's pagination state after the last run
    pub state_status: Option<StateStatus>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl BatchJob {
    pub fn from_spec(spec: JobSpec, default_max_retries: u32) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            session_id: spec.session_id,
            vendor: spec.vendor,
            category: spec.category,
            url: spec.url,
            max_pages: spec.max_pages,
            max_retries: spec.max_retries.unwrap_or(default_max_retries),
            retry_count: 0,
            status: JobStatus::Pending,
            error: None,
            result: None,
            stats: None,
            state_status: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    /// Whether a failed attempt may be requeued.
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }
}

/// Snapshot of runner counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchProgress {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub paused: usize,
    pub active: usize,
    pub pending: usize,
    /// `completed / (completed + failed)`, 0 before any job finished
    pub success_rate: f64,
}
