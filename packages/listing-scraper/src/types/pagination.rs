//! Durable per-target pagination progress.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How a listing exposes further results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaginationMethod {
    Numbered,
    InfiniteScroll,
    LoadMore,
    Offset,
    #[default]
    Unknown,
}

/// Lifecycle of one target's pagination.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateStatus {
    #[default]
    Active,
    Paused,
    Completed,
    Error,
    Cancelled,
}

impl StateStatus {
    /// Statuses that resume discovery considers.
    pub fn is_resumable(self) -> bool {
        matches!(
            self,
            StateStatus::Active | StateStatus::Paused | StateStatus::Error
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StateStatus::Active => "active",
            StateStatus::Paused => "paused",
            StateStatus::Completed => "completed",
            StateStatus::Error => "error",
            StateStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for StateStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress of one (session, vendor, category) target.
///
/// Once `status` is [`StateStatus::Completed`] the page counter is frozen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaginationState {
    pub session_id: String,
    pub vendor: String,
    pub category: String,
    #[serde(default)]
    pub category_url: String,
    pub current_page: u32,
    pub total_pages: Option<u32>,
    pub products_scraped: u64,
    pub last_product_url: Option<String>,
    /// Next-page URL reported by the collaborator, if any
    #[serde(default)]
    pub resume_url: Option<String>,
    #[serde(default)]
    pub pagination_method: PaginationMethod,
    pub max_pages: Option<u32>,
    #[serde(default)]
    pub products_per_page: Option<u32>,
    #[serde(default)]
    pub error_count: u32,
    #[serde(default)]
    pub last_error: Option<String>,
    pub status: StateStatus,
    pub started_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl PaginationState {
    pub fn new(
        session_id: impl Into<String>,
        vendor: impl Into<String>,
        category: impl Into<String>,
        max_pages: Option<u32>,
    ) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            vendor: vendor.into(),
            category: category.into(),
            category_url: String::new(),
            current_page: 1,
            total_pages: None,
            products_scraped: 0,
            last_product_url: None,
            resume_url: None,
            pagination_method: PaginationMethod::Unknown,
            max_pages,
            products_per_page: None,
            error_count: 0,
            last_error: None,
            status: StateStatus::Active,
            started_at: now,
            last_updated: now,
        }
    }

    pub fn with_category_url(mut self, url: impl Into<String>) -> Self {
        self.category_url = url.into();
        self
    }

    pub fn touch(&mut self) {
        self.last_updated = Utc::now();
    }

    /// Move to the next page. Refused once the state is complete.
    pub fn advance_page(&mut self) -> bool {
        if self.is_complete() {
            return false;
        }
        self.current_page += 1;
        self.touch();
        true
    }

    /// Account for a merged page.
    pub fn record_progress(
        &mut self,
        products_added: usize,
        page_size: usize,
        last_product_url: Option<String>,
    ) {
        self.products_scraped += products_added as u64;
        if page_size > 0 {
            self.products_per_page = Some(page_size as u32);
        }
        if last_product_url.is_some() {
            self.last_product_url = last_product_url;
        }
        self.touch();
    }

    pub fn record_error(&mut self, message: impl Into<String>) {
        self.error_count += 1;
        self.last_error = Some(message.into());
        self.touch();
    }

    pub fn mark_complete(&mut self) {
        self.status = StateStatus::Completed;
        self.resume_url = None;
        self.touch();
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.status, StateStatus::Completed | StateStatus::Cancelled)
    }

    /// Whether `current_page` is the last page allowed by `max_pages` or
    /// known from `total_pages`.
    pub fn at_page_limit(&self) -> bool {
        let limit = match (self.max_pages, self.total_pages) {
            (Some(max), Some(total)) => Some(max.min(total)),
            (max, total) => max.or(total),
        };
        limit.is_some_and(|limit| self.current_page >= limit)
    }

    /// Progress in [0, 1], from the known page count or the page limit.
    pub fn progress_fraction(&self) -> Option<f64> {
        if self.status == StateStatus::Completed {
            return Some(1.0);
        }
        let denominator = self.total_pages.or(self.max_pages)?;
        if denominator == 0 {
            return None;
        }
        Some((self.current_page as f64 / denominator as f64).min(1.0))
    }
}

/// Per-target line of a [`SessionSummary`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetSummary {
    pub vendor: String,
    pub category: String,
    pub category_url: String,
    pub current_page: u32,
    pub total_pages: Option<u32>,
    pub max_pages: Option<u32>,
    pub products_scraped: u64,
    pub status: StateStatus,
    pub progress: Option<f64>,
}

/// Aggregate view of every target in a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub overall_status: StateStatus,
    pub total_targets: usize,
    pub completed_targets: usize,
    pub total_products_scraped: u64,
    pub total_errors: u32,
    pub last_updated: DateTime<Utc>,
    pub targets: Vec<TargetSummary>,
}

impl SessionSummary {
    /// Summarize a non-empty set of states belonging to one session.
    pub fn from_states(session_id: &str, states: &[PaginationState]) -> Option<Self> {
        let last_updated = states.iter().map(|s| s.last_updated).max()?;

        let mut targets: Vec<TargetSummary> = states
            .iter()
            .map(|s| TargetSummary {
                vendor: s.vendor.clone(),
                category: s.category.clone(),
                category_url: s.category_url.clone(),
                current_page: s.current_page,
                total_pages: s.total_pages,
                max_pages: s.max_pages,
                products_scraped: s.products_scraped,
                status: s.status,
                progress: s.progress_fraction(),
            })
            .collect();
        targets.sort_by(|a, b| (&a.vendor, &a.category).cmp(&(&b.vendor, &b.category)));

        Some(Self {
            session_id: session_id.to_string(),
            overall_status: overall_status(states),
            total_targets: states.len(),
            completed_targets: states.iter().filter(|s| s.is_complete()).count(),
            total_products_scraped: states.iter().map(|s| s.products_scraped).sum(),
            total_errors: states.iter().map(|s| s.error_count).sum(),
            last_updated,
            targets,
        })
    }
}

/// Any active → active; all completed → completed; any error → error;
/// any paused → paused; otherwise cancelled.
fn overall_status(states: &[PaginationState]) -> StateStatus {
    let any = |status: StateStatus| states.iter().any(|s| s.status == status);
    if any(StateStatus::Active) {
        StateStatus::Active
    } else if states.iter().all(|s| s.status == StateStatus::Completed) {
        StateStatus::Completed
    } else if any(StateStatus::Error) {
        StateStatus::Error
    } else if any(StateStatus::Paused) {
        StateStatus::Paused
    } else {
        StateStatus::Cancelled
    }
}
