//! Session files: the persisted product set of one target.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::pagination::StateStatus;
use super::product::ProductRecord;

/// One logical run over a target. Only `last_updated` and `status` change
/// after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapeSession {
    pub session_id: String,
    pub vendor: String,
    pub category: String,
    pub category_url: String,
    #[serde(rename = "started_at")]
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    #[serde(default)]
    pub max_pages: Option<u32>,
    pub status: StateStatus,
}

/// Running counters kept alongside the products.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionStatistics {
    pub total_products_found: u64,
    pub total_products_validated: u64,
    pub validation_success_rate: f64,
    pub pages_processed: u32,
    #[serde(default)]
    pub pages_passed_validation: u32,
    #[serde(default)]
    pub products_added: u64,
    #[serde(default)]
    pub products_updated: u64,
    #[serde(default)]
    pub last_page_processed: Option<u32>,
}

/// On-disk document for one (session, vendor, category).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionFile {
    pub scraping_session: ScrapeSession,
    pub products: Vec<ProductRecord>,
    pub session_statistics: SessionStatistics,
}

impl SessionFile {
    pub fn new(session: ScrapeSession) -> Self {
        Self {
            scraping_session: session,
            products: Vec::new(),
            session_statistics: SessionStatistics::default(),
        }
    }

    pub fn total_products(&self) -> usize {
        self.products.len()
    }
}

/// Validation facts about the page a batch came from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageValidationInfo {
    /// Raw records the collaborator returned
    pub raw_count: usize,
    /// Records that normalized cleanly
    pub valid_count: usize,
    pub passed: bool,
    pub attempts: u32,
    pub average_quality: Option<f64>,
    #[serde(default)]
    pub issues: Vec<String>,
}

/// Outcome of one merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeResult {
    pub products_added: usize,
    pub products_updated: usize,
    pub duplicates_removed: usize,
    pub total_products: usize,
}

/// Reference to a session file owned by the session store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionHandle {
    pub session_id: String,
    pub vendor: String,
    pub category: String,
    pub path: PathBuf,
}
