//! Resumable Product-Listing Scraper
//!
//! Orchestrates paginated product-listing scrapes across many
//! (vendor, category) targets. Page automation is delegated to an external
//! collaborator behind [`PageAutomation`]; this crate owns the loop around
//! it: validation with feedback-driven re-extraction, per-page durable
//! progress for resume, deduplicating merges into per-target session files,
//! and a bounded pool of workers with retries.
//!
//! # Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use listing_scraper::{BatchRunner, ListingWorkflow, RunnerConfig, ScraperConfig};
//!
//! let workflow = Arc::new(ListingWorkflow::from_config(ScraperConfig::rooted_at("data")));
//! let runner = BatchRunner::new(workflow, factory, RunnerConfig::default());
//!
//! let job_id = runner
//!     .add_job("asda", "fruit", "https://groceries.example/fruit", &session_id, 3)
//!     .await;
//! let progress = runner.run_to_completion(3).await;
//! let products = runner.results(job_id).await;
//! ```
//!
//! # Modules
//!
//! - [`traits`] - Collaborator seam (`PageAutomation`, `AutomationFactory`)
//! - [`types`] - Records, pagination state, session files, jobs, config
//! - [`stores`] - File-backed pagination state and session stores
//! - [`pipeline`] - Validation, routing and the per-target workflow
//! - [`batch`] - Job queue and worker pool
//! - [`progress`] - Operator-facing progress lines
//! - [`testing`] - Scripted collaborator and fixtures

pub mod batch;
pub mod error;
pub mod pipeline;
pub mod progress;
pub mod stores;
pub mod testing;
pub mod traits;
pub mod types;

pub use error::{
    AutomationError, AutomationResult, Result, ScrapeError, StoreError, StoreResult,
};
pub use traits::automation::{AutomationFactory, ElementDescriptor, PageAutomation};
pub use types::{
    config::{PageInstructions, RunnerConfig, ScraperConfig},
    feedback::{PageSignal, RouteDecision, RouteInput, ValidationFeedback, ValidationOutcome},
    job::{BatchJob, BatchProgress, JobSpec, JobStatus, RunStats},
    pagination::{PaginationMethod, PaginationState, SessionSummary, StateStatus, TargetSummary},
    product::{Price, ProductKey, ProductRecord, RecordIssue},
    session::{
        MergeResult, PageValidationInfo, ScrapeSession, SessionFile, SessionHandle,
        SessionStatistics,
    },
};

pub use batch::{BatchRunner, RunCounters};
pub use pipeline::{route, ListingWorkflow, RunEnd, WorkflowOutcome};
pub use progress::{estimate_eta, format_progress};
pub use stores::{PaginationStateStore, SessionStore};
