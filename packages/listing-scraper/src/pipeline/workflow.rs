//! The page workflow for one target.
//!
//! ```text
//! Init ─► Navigate ─► Extract ─► Validate ─┬─► ReExtract ─► Extract
//!            ▲                             ├─► NextPage ──► Navigate
//!            │                             ├─► Complete
//!            └─────────────────────────────┴─► HandleError
//! ```
//!
//! Every accepted or skipped page is merged into the session file before
//! the pagination state advances, so a crash between pages never loses
//! merged work and resuming never re-counts it. Cancellation is observed
//! only on the way into `Navigate`, i.e. between page-cycles. The same holds
//! for a run-wide pause gate, and for a pause of the target's state made
//! through [`PaginationStateStore::pause`] while the run is in progress.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::payload::{listing_schema, ExtractedPage};
use super::recovery::SessionGuard;
use super::router::route;
use super::validate::validate_page;
use crate::error::{AutomationError, AutomationResult, ScrapeError, StoreError};
use crate::stores::{PaginationStateStore, SessionStore};
use crate::traits::automation::PageAutomation;
use crate::types::config::ScraperConfig;
use crate::types::feedback::{
    PageSignal, RouteDecision, RouteInput, ValidationFeedback, ValidationOutcome,
};
use crate::types::job::{BatchJob, RunStats};
use crate::types::pagination::{PaginationMethod, PaginationState, StateStatus};
use crate::types::product::ProductRecord;
use crate::types::session::{MergeResult, PageValidationInfo, SessionHandle};

/// How a workflow run ended.
#[derive(Debug)]
pub enum RunEnd {
    Completed,
    /// Stopped between page-cycles; the state is persisted as paused
    Interrupted,
    /// The target's state was paused or cancelled in the store while the
    /// run was in progress; the run stopped at the next page boundary
    Halted,
    /// Partial results were persisted before returning
    Failed(ScrapeError),
}

#[derive(Debug)]
pub struct WorkflowOutcome {
    pub end: RunEnd,
    /// Pagination state as last persisted, if the run got that far
    pub state: Option<PaginationState>,
    pub stats: RunStats,
    /// Records merged during this run, in page order
    pub products: Vec<ProductRecord>,
}

impl WorkflowOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self.end, RunEnd::Completed)
    }

    pub fn error(&self) -> Option<&ScrapeError> {
        match &self.end {
            RunEnd::Failed(e) => Some(e),
            _ => None,
        }
    }

    pub fn status(&self) -> Option<StateStatus> {
        self.state.as_ref().map(|s| s.status)
    }
}

enum Step {
    Navigate,
    Extract,
    Validate(AutomationResult<ExtractedPage>),
    ReExtract(ValidationFeedback),
    NextPage,
    Complete,
    HandleError(ScrapeError),
    Interrupt,
    Halt,
}

/// A page accepted or given up on, waiting to be merged.
struct PendingPage {
    records: Vec<ProductRecord>,
    info: PageValidationInfo,
    signal: PageSignal,
    next_page_url: Option<String>,
    method: Option<PaginationMethod>,
    skipped: bool,
}

struct Run<'a> {
    job: &'a BatchJob,
    guard: SessionGuard<'a>,
    gate: watch::Receiver<bool>,
    state: PaginationState,
    handle: SessionHandle,
    feedback: Option<ValidationFeedback>,
    attempts: u32,
    pending: Option<PendingPage>,
    stats: RunStats,
    products: Vec<ProductRecord>,
}

/// Runs targets through the navigate → extract → validate cycle.
pub struct ListingWorkflow {
    states: Arc<PaginationStateStore>,
    sessions: Arc<SessionStore>,
    config: ScraperConfig,
    schema: Value,
}

impl ListingWorkflow {
    pub fn new(
        states: Arc<PaginationStateStore>,
        sessions: Arc<SessionStore>,
        config: ScraperConfig,
    ) -> Self {
        Self {
            states,
            sessions,
            config,
            schema: listing_schema(),
        }
    }

    /// Build both stores from the directories in `config`.
    pub fn from_config(config: ScraperConfig) -> Self {
        let states = Arc::new(PaginationStateStore::new(&config.state_dir));
        let sessions = Arc::new(
            SessionStore::new(&config.output_dir, &config.backup_dir)
                .with_backup_retention(config.backup_retention),
        );
        Self::new(states, sessions, config)
    }

    pub fn config(&self) -> &ScraperConfig {
        &self.config
    }

    pub fn states(&self) -> &Arc<PaginationStateStore> {
        &self.states
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    /// Run `job` until it completes, fails, or `cancel` fires between pages.
    ///
    /// A target whose state is already completed returns immediately.
    pub async fn run<'a>(
        &self,
        job: &'a BatchJob,
        automation: &'a dyn PageAutomation,
        cancel: &CancellationToken,
    ) -> WorkflowOutcome {
        let (_open, gate) = watch::channel(false);
        self.run_with_gate(job, automation, cancel, gate).await
    }

    /// Like [`run`](Self::run), but holds before each page-cycle while `gate`
    /// reads `true`. Cancelling while held interrupts the run.
    pub async fn run_with_gate<'a>(
        &self,
        job: &'a BatchJob,
        automation: &'a dyn PageAutomation,
        cancel: &CancellationToken,
        gate: watch::Receiver<bool>,
    ) -> WorkflowOutcome {
        let (state, handle) = match self.init(job).await {
            Ok(ready) => ready,
            Err(e) => {
                error!(job_id = %job.job_id, vendor = %job.vendor, category = %job.category, error = %e, "workflow init failed");
                return WorkflowOutcome {
                    end: RunEnd::Failed(e),
                    state: None,
                    stats: RunStats::default(),
                    products: Vec::new(),
                };
            }
        };

        if state.status == StateStatus::Completed {
            info!(job_id = %job.job_id, vendor = %job.vendor, category = %job.category, "target already completed");
            return WorkflowOutcome {
                end: RunEnd::Completed,
                state: Some(state),
                stats: RunStats::default(),
                products: Vec::new(),
            };
        }

        let mut run = Run {
            job,
            guard: SessionGuard::new(automation),
            gate,
            state,
            handle,
            feedback: None,
            attempts: 0,
            pending: None,
            stats: RunStats::default(),
            products: Vec::new(),
        };

        let mut step = Step::Navigate;
        loop {
            step = match step {
                Step::Navigate => self.navigate(&mut run, cancel).await,
                Step::Extract => self.extract(&mut run).await,
                Step::Validate(extracted) => self.validate(&mut run, extracted),
                Step::ReExtract(feedback) => {
                    run.feedback = Some(feedback);
                    Step::Extract
                }
                Step::NextPage => self.next_page(&mut run, cancel).await,
                Step::Complete => return self.complete(run).await,
                Step::HandleError(e) => return self.handle_error(run, e).await,
                Step::Interrupt => return self.interrupt(run).await,
                Step::Halt => return self.halt(run).await,
            };
        }
    }

    /// Load or create the target's pagination state and session file.
    async fn init(&self, job: &BatchJob) -> Result<(PaginationState, SessionHandle), ScrapeError> {
        let existing = self
            .states
            .find(&job.session_id, &job.vendor, &job.category)
            .await?;

        let state = match existing {
            Some(mut state) => {
                if state.status != StateStatus::Completed {
                    if job.max_pages.is_some() {
                        state.max_pages = job.max_pages;
                    }
                    if state.category_url.is_empty() {
                        state.category_url = job.url.clone();
                    }
                    state.status = StateStatus::Active;
                    state.touch();
                    self.states.update(&state).await?;
                    info!(
                        job_id = %job.job_id,
                        vendor = %job.vendor,
                        category = %job.category,
                        page = state.current_page,
                        products_scraped = state.products_scraped,
                        "resuming target"
                    );
                }
                state
            }
            None => {
                let state = PaginationState::new(
                    &job.session_id,
                    &job.vendor,
                    &job.category,
                    job.max_pages,
                )
                .with_category_url(&job.url);
                match self.states.insert(&state).await {
                    Ok(()) => state,
                    Err(StoreError::AlreadyExists { .. }) => {
                        self.states
                            .get(&job.session_id, &job.vendor, &job.category)
                            .await?
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        };

        let handle = self
            .sessions
            .open_or_create(
                &job.vendor,
                &job.category,
                &job.session_id,
                &state.category_url,
                state.max_pages,
            )
            .await?;
        Ok((state, handle))
    }

    async fn navigate(&self, run: &mut Run<'_>, cancel: &CancellationToken) -> Step {
        let held = *run.gate.borrow();
        if held {
            info!(job_id = %run.job.job_id, page = run.state.current_page, "processing paused, holding");
            if !wait_while_paused(&mut run.gate, cancel).await {
                return Step::Interrupt;
            }
            info!(job_id = %run.job.job_id, page = run.state.current_page, "processing resumed");
        }
        if cancel.is_cancelled() {
            return Step::Interrupt;
        }

        let page = run.state.current_page;
        let max_attempts = self.config.max_navigation_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.reach_page(run).await {
                Ok(()) => break,
                Err(e) if e.is_fatal() || attempt >= max_attempts => {
                    warn!(job_id = %run.job.job_id, page, attempt, error = %e, "navigation failed");
                    return Step::HandleError(e.into());
                }
                Err(e) => {
                    warn!(job_id = %run.job.job_id, page, attempt, error = %e, "navigation failed, retrying");
                }
            }
        }

        if let Err(e) = self.dismiss_overlays(run).await {
            return Step::HandleError(e.into());
        }

        debug!(job_id = %run.job.job_id, vendor = %run.job.vendor, category = %run.job.category, page, "page reached");
        run.attempts = 0;
        run.feedback = None;
        Step::Extract
    }

    async fn reach_page(&self, run: &mut Run<'_>) -> AutomationResult<()> {
        let page = run.state.current_page;
        if page <= 1 {
            return run.guard.navigate(&run.state.category_url).await;
        }
        if let Some(url) = run.state.resume_url.clone() {
            return run.guard.navigate(&url).await;
        }
        run.guard.navigate(&run.state.category_url).await?;
        run.guard
            .act(&self.config.instructions.go_to_page_for(page))
            .await
    }

    /// Observe and close blocking overlays. Only fatal errors propagate.
    async fn dismiss_overlays(&self, run: &mut Run<'_>) -> AutomationResult<()> {
        let instructions = &self.config.instructions;
        let overlays = match run.guard.observe(&instructions.find_overlays).await {
            Ok(overlays) => overlays,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                debug!(job_id = %run.job.job_id, error = %e, "overlay check failed");
                return Ok(());
            }
        };

        for overlay in overlays.iter().take(self.config.max_overlay_dismissals) {
            match run
                .guard
                .act(&instructions.dismiss_overlay_for(&overlay.description))
                .await
            {
                Ok(()) => debug!(job_id = %run.job.job_id, overlay = %overlay.description, "overlay dismissed"),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => warn!(job_id = %run.job.job_id, overlay = %overlay.description, error = %e, "failed to dismiss overlay"),
            }
        }
        Ok(())
    }

    async fn extract(&self, run: &mut Run<'_>) -> Step {
        run.attempts += 1;
        run.stats.extraction_attempts += 1;

        let instructions = &self.config.instructions;
        let instruction = match &run.feedback {
            Some(feedback) => {
                instructions.extract_with_feedback(&feedback.issues, &feedback.suggestions)
            }
            None => instructions.extract_products.clone(),
        };

        debug!(
            job_id = %run.job.job_id,
            page = run.state.current_page,
            attempt = run.attempts,
            "extracting"
        );
        let extracted = run
            .guard
            .extract(&instruction, Some(&self.schema))
            .await
            .and_then(ExtractedPage::from_value);
        Step::Validate(extracted)
    }

    fn validate(&self, run: &mut Run<'_>, extracted: AutomationResult<ExtractedPage>) -> Step {
        let page = run.state.current_page;
        let mut fatal: Option<AutomationError> = None;

        let (outcome, validation, extracted) = match extracted {
            Ok(extracted) => {
                let mut validation = validate_page(
                    &extracted.products,
                    &run.job.vendor,
                    &run.job.category,
                    self.config.min_valid_ratio,
                );
                validation.info.attempts = run.attempts;
                (validation.outcome.clone(), Some(validation), Some(extracted))
            }
            Err(e) if e.is_fatal() => {
                let outcome = ValidationOutcome::ToolFailure {
                    message: e.to_string(),
                };
                fatal = Some(e);
                (outcome, None, None)
            }
            Err(e) => {
                warn!(job_id = %run.job.job_id, page, attempt = run.attempts, error = %e, "extraction failed");
                let outcome = ValidationOutcome::Failed {
                    issues: vec![format!("extraction error: {}", e)],
                    suggestions: Vec::new(),
                    confidence: 0.0,
                };
                (outcome, None, None)
            }
        };

        let mut signal = extracted
            .as_ref()
            .map(|p| p.signal.clone())
            .unwrap_or_default();
        signal.total_pages = signal.total_pages.or(run.state.total_pages);

        let decision = route(&RouteInput {
            outcome: &outcome,
            extraction_attempts: run.attempts,
            max_extraction_attempts: self.config.max_extraction_attempts,
            current_page: page,
            max_pages: run.state.max_pages,
            signal: &signal,
        });

        let continues = decision == RouteDecision::AcceptAndContinue;
        match decision {
            RouteDecision::AcceptAndContinue | RouteDecision::AcceptAndComplete => {
                let (Some(validation), Some(extracted)) = (validation, extracted) else {
                    return Step::HandleError(ScrapeError::Workflow(
                        "accepted a page without extracted records".to_string(),
                    ));
                };
                let rejected = validation.info.raw_count - validation.info.valid_count;
                if rejected > 0 {
                    debug!(job_id = %run.job.job_id, page, rejected, issues = ?validation.info.issues, "dropping invalid records");
                }
                info!(
                    job_id = %run.job.job_id,
                    vendor = %run.job.vendor,
                    category = %run.job.category,
                    page,
                    attempt = run.attempts,
                    valid = validation.records.len(),
                    "page validated"
                );
                run.pending = Some(PendingPage {
                    records: validation.records,
                    info: validation.info,
                    signal,
                    next_page_url: extracted.next_page_url,
                    method: extracted.method,
                    skipped: false,
                });
                if continues {
                    Step::NextPage
                } else {
                    Step::Complete
                }
            }
            RouteDecision::ReExtract(feedback) => {
                info!(
                    job_id = %run.job.job_id,
                    page,
                    attempt = run.attempts,
                    issues = ?feedback.issues,
                    "validation failed, re-extracting with feedback"
                );
                Step::ReExtract(feedback)
            }
            RouteDecision::SkipPage { more_pages } => {
                warn!(
                    job_id = %run.job.job_id,
                    vendor = %run.job.vendor,
                    category = %run.job.category,
                    page,
                    attempt = run.attempts,
                    "extraction attempts exhausted, skipping page"
                );
                let issues = match &outcome {
                    ValidationOutcome::Failed { issues, .. } => issues.clone(),
                    _ => Vec::new(),
                };
                let info = validation.map(|v| v.info).unwrap_or_default();
                run.pending = Some(PendingPage {
                    records: Vec::new(),
                    info: PageValidationInfo {
                        valid_count: 0,
                        passed: false,
                        attempts: run.attempts,
                        issues,
                        ..info
                    },
                    signal,
                    next_page_url: None,
                    method: None,
                    skipped: true,
                });
                if more_pages {
                    Step::NextPage
                } else {
                    Step::Complete
                }
            }
            RouteDecision::FatalError(message) => Step::HandleError(
                fatal
                    .map(ScrapeError::from)
                    .unwrap_or(ScrapeError::Workflow(message)),
            ),
        }
    }

    /// Merge the pending page and fold it into the state (without advancing).
    async fn commit(&self, run: &mut Run<'_>) -> Result<(), ScrapeError> {
        let Some(pending) = run.pending.as_ref() else {
            return Ok(());
        };
        let page = run.state.current_page;

        let merge: MergeResult = self
            .sessions
            .merge_products(&run.handle, &pending.records, page, Some(&pending.info))
            .await?;

        let Some(pending) = run.pending.take() else {
            return Ok(());
        };

        run.stats.pages_processed += 1;
        run.stats.products_found += pending.info.raw_count;
        run.stats.products_added += merge.products_added;
        run.stats.products_updated += merge.products_updated;
        run.stats.duplicates_removed += merge.duplicates_removed;
        run.stats.total_products = merge.total_products;

        run.state
            .record_progress(merge.products_added, pending.records.len(), None);
        if let Some(total) = pending.signal.total_pages {
            run.state.total_pages = Some(total);
        }
        if let Some(method) = pending.method {
            run.state.pagination_method = method;
        }
        run.state.resume_url = pending.next_page_url;
        if pending.skipped {
            run.stats.pages_failed += 1;
            run.state.record_error(format!(
                "page {} skipped after {} extraction attempts",
                page, pending.info.attempts
            ));
        }

        run.products.extend(pending.records);
        Ok(())
    }

    async fn next_page(&self, run: &mut Run<'_>, cancel: &CancellationToken) -> Step {
        if let Err(e) = self.commit(run).await {
            return Step::HandleError(e);
        }

        let finished = run.state.current_page;
        run.state.advance_page();
        run.feedback = None;
        run.attempts = 0;
        if let Err(e) = self.states.checkpoint(&mut run.state).await {
            return Step::HandleError(e.into());
        }

        info!(
            job_id = %run.job.job_id,
            vendor = %run.job.vendor,
            category = %run.job.category,
            page = finished,
            products_scraped = run.state.products_scraped,
            "page complete"
        );
        if run.state.status != StateStatus::Active {
            return Step::Halt;
        }

        let delay = self.config.page_delay;
        if !delay.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(delay) => {}
            }
        }
        Step::Navigate
    }

    async fn complete(&self, mut run: Run<'_>) -> WorkflowOutcome {
        if let Err(e) = self.commit(&mut run).await {
            return self.handle_error(run, e).await;
        }

        run.state.mark_complete();
        if let Err(e) = self.states.update(&run.state).await {
            return self.handle_error(run, e.into()).await;
        }
        if let Err(e) = self
            .sessions
            .set_status(&run.handle, StateStatus::Completed)
            .await
        {
            warn!(job_id = %run.job.job_id, error = %e, "failed to mark session file completed");
        }

        info!(
            job_id = %run.job.job_id,
            vendor = %run.job.vendor,
            category = %run.job.category,
            page = run.state.current_page,
            pages = run.stats.pages_processed,
            products_scraped = run.state.products_scraped,
            total_products = run.stats.total_products,
            "target completed"
        );

        WorkflowOutcome {
            end: RunEnd::Completed,
            state: Some(run.state),
            stats: run.stats,
            products: run.products,
        }
    }

    async fn handle_error(&self, mut run: Run<'_>, error: ScrapeError) -> WorkflowOutcome {
        error!(
            job_id = %run.job.job_id,
            vendor = %run.job.vendor,
            category = %run.job.category,
            page = run.state.current_page,
            error = %error,
            "workflow failed"
        );

        if run.pending.is_some() {
            if let Err(e) = self.commit(&mut run).await {
                error!(job_id = %run.job.job_id, error = %e, "failed to persist partial page");
                if let Some(pending) = run.pending.take() {
                    run.products.extend(pending.records);
                }
            }
        }

        run.state.record_error(error.to_string());
        run.state.status = StateStatus::Error;
        if let Err(e) = self.states.update(&run.state).await {
            error!(job_id = %run.job.job_id, error = %e, "failed to persist error state");
        }
        if let Err(e) = self
            .sessions
            .set_status(&run.handle, StateStatus::Error)
            .await
        {
            warn!(job_id = %run.job.job_id, error = %e, "failed to mark session file errored");
        }

        WorkflowOutcome {
            end: RunEnd::Failed(error),
            state: Some(run.state),
            stats: run.stats,
            products: run.products,
        }
    }

    async fn interrupt(&self, mut run: Run<'_>) -> WorkflowOutcome {
        run.state.status = StateStatus::Paused;
        run.state.touch();
        if let Err(e) = self.states.update(&run.state).await {
            error!(job_id = %run.job.job_id, error = %e, "failed to persist paused state");
        }
        if let Err(e) = self
            .sessions
            .set_status(&run.handle, StateStatus::Paused)
            .await
        {
            warn!(job_id = %run.job.job_id, error = %e, "failed to mark session file paused");
        }

        info!(
            job_id = %run.job.job_id,
            vendor = %run.job.vendor,
            category = %run.job.category,
            page = run.state.current_page,
            "workflow interrupted between pages"
        );
        WorkflowOutcome {
            end: RunEnd::Interrupted,
            state: Some(run.state),
            stats: run.stats,
            products: run.products,
        }
    }

    /// The state was paused or cancelled from outside; it is already
    /// persisted with that status.
    async fn halt(&self, run: Run<'_>) -> WorkflowOutcome {
        let status = run.state.status;
        if let Err(e) = self.sessions.set_status(&run.handle, status).await {
            warn!(job_id = %run.job.job_id, error = %e, "failed to record halt in session file");
        }

        info!(
            job_id = %run.job.job_id,
            vendor = %run.job.vendor,
            category = %run.job.category,
            page = run.state.current_page,
            status = %status,
            "target halted"
        );
        WorkflowOutcome {
            end: RunEnd::Halted,
            state: Some(run.state),
            stats: run.stats,
            products: run.products,
        }
    }
}

/// Wait until `gate` reads `false`. Returns `false` if `cancel` fires first.
pub(crate) async fn wait_while_paused(
    gate: &mut watch::Receiver<bool>,
    cancel: &CancellationToken,
) -> bool {
    loop {
        let paused = *gate.borrow_and_update();
        if !paused {
            return true;
        }
        tokio::select! {
            _ = cancel.cancelled() => return false,
            changed = gate.changed() => {
                if changed.is_err() {
                    // the gate can no longer open
                    cancel.cancelled().await;
                    return false;
                }
            }
        }
    }
}
