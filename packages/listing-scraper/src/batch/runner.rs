//! Bounded worker pool running targets through the page workflow.
//!
//! ```text
//! BatchRunner
//!     │
//!     ├─► add_job / enqueue  (JobBoard queue, status pending)
//!     ├─► start(n)           (n worker tasks sharing one stop token)
//!     │       └─► claim job ─► factory.create ─► workflow.run ─► finish
//!     │                                             (retry / requeue / done)
//!     ├─► pause_processing / resume_processing   (workers hold, stay alive)
//!     └─► stop()             (cancel token, join workers)
//! ```
//!
//! Each worker owns exactly one job at a time. A failed attempt goes back
//! to the queue as `retrying` until `max_retries` is spent, then the job is
//! `failed`; other jobs are unaffected. While processing is paused, idle
//! workers claim nothing and running jobs hold before their next page.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::board::{Attempt, Disposition, JobBoard, RunCounters};
use crate::pipeline::workflow::{wait_while_paused, ListingWorkflow, RunEnd};
use crate::traits::automation::AutomationFactory;
use crate::types::config::RunnerConfig;
use crate::types::job::{BatchJob, BatchProgress, JobSpec, RunStats};
use crate::types::pagination::StateStatus;
use crate::types::product::ProductRecord;

/// Poll interval used when no job is claimable.
const IDLE_POLL: Duration = Duration::from_millis(100);

struct Shared {
    board: Mutex<JobBoard>,
    /// Woken when a job is queued or a worker frees a vendor slot
    work: Notify,
    /// Woken when the board may have become idle
    idle: Notify,
    /// `true` while processing is paused
    paused: watch::Sender<bool>,
}

struct Pool {
    stop: CancellationToken,
    workers: Vec<JoinHandle<()>>,
}

pub struct BatchRunner {
    workflow: Arc<ListingWorkflow>,
    factory: Arc<dyn AutomationFactory>,
    config: RunnerConfig,
    shared: Arc<Shared>,
    pool: Mutex<Pool>,
}

impl BatchRunner {
    pub fn new(
        workflow: Arc<ListingWorkflow>,
        factory: Arc<dyn AutomationFactory>,
        config: RunnerConfig,
    ) -> Self {
        Self {
            workflow,
            factory,
            config,
            shared: Arc::new(Shared {
                board: Mutex::new(JobBoard::new()),
                work: Notify::new(),
                idle: Notify::new(),
                paused: watch::Sender::new(false),
            }),
            pool: Mutex::new(Pool {
                stop: CancellationToken::new(),
                workers: Vec::new(),
            }),
        }
    }

    pub fn workflow(&self) -> &Arc<ListingWorkflow> {
        &self.workflow
    }

    /// Queue a target in `pending` status and return its job id.
    pub async fn add_job(
        &self,
        vendor: &str,
        category: &str,
        url: &str,
        session_id: &str,
        max_retries: u32,
    ) -> Uuid {
        self.enqueue(
            JobSpec::builder()
                .session_id(session_id)
                .vendor(vendor)
                .category(category)
                .url(url)
                .max_retries(max_retries)
                .build(),
        )
        .await
    }

    /// Queue a job built from `spec`, using the runner's default retry budget
    /// when the spec has none.
    pub async fn enqueue(&self, spec: JobSpec) -> Uuid {
        let job = BatchJob::from_spec(spec, self.config.default_max_retries);
        debug!(
            job_id = %job.job_id,
            vendor = %job.vendor,
            category = %job.category,
            max_retries = job.max_retries,
            "job queued"
        );
        let id = self.shared.board.lock().await.enqueue(job);
        self.shared.work.notify_waiters();
        id
    }

    /// Launch `workers` tasks that drain the queue until [`stop`](Self::stop).
    pub async fn start(&self, workers: usize) {
        let mut pool = self.pool.lock().await;
        if pool.stop.is_cancelled() {
            pool.stop = CancellationToken::new();
        }

        let first = pool.workers.len();
        for index in first..first + workers.max(1) {
            let worker = Worker {
                id: index,
                shared: self.shared.clone(),
                workflow: self.workflow.clone(),
                factory: self.factory.clone(),
                per_vendor: self.config.max_concurrent_per_vendor,
                stop: pool.stop.clone(),
            };
            pool.workers.push(tokio::spawn(worker.run()));
        }
        info!(workers = pool.workers.len(), "batch runner started");
    }

    /// Stop cooperatively: in-flight jobs finish their current page-cycle,
    /// persist their state as paused and return to the queue. Waits for
    /// every worker to exit.
    pub async fn stop(&self) {
        let mut pool = self.pool.lock().await;
        pool.stop.cancel();
        self.shared.work.notify_waiters();

        for handle in pool.workers.drain(..) {
            if let Err(e) = handle.await {
                error!(error = %e, "worker task failed");
            }
        }
        info!("batch runner stopped");
    }

    /// Hold every worker: no new job is claimed and running jobs stop
    /// before their next page-cycle until [`resume_processing`](Self::resume_processing).
    pub fn pause_processing(&self) {
        if !self.shared.paused.send_replace(true) {
            info!("batch processing paused");
        }
    }

    pub fn resume_processing(&self) {
        if self.shared.paused.send_replace(false) {
            info!("batch processing resumed");
        }
        self.shared.work.notify_waiters();
    }

    pub fn is_processing_paused(&self) -> bool {
        *self.shared.paused.borrow()
    }

    /// Resolve once the queue is empty and no job is running.
    pub async fn wait_idle(&self) {
        loop {
            if self.shared.board.lock().await.is_idle() {
                return;
            }
            tokio::select! {
                _ = self.shared.idle.notified() => {}
                _ = tokio::time::sleep(IDLE_POLL) => {}
            }
        }
    }

    /// Start `workers`, wait until every queued job is finished, then stop.
    pub async fn run_to_completion(&self, workers: usize) -> BatchProgress {
        self.start(workers).await;
        self.wait_idle().await;
        self.stop().await;
        self.progress().await
    }

    pub async fn progress(&self) -> BatchProgress {
        self.shared.board.lock().await.progress()
    }

    pub async fn counters(&self) -> RunCounters {
        self.shared.board.lock().await.counters()
    }

    /// Products gathered for a job so far; empty until a page was merged.
    pub async fn results(&self, job_id: Uuid) -> Vec<ProductRecord> {
        self.shared.board.lock().await.results(job_id)
    }

    pub async fn job(&self, job_id: Uuid) -> Option<BatchJob> {
        self.shared.board.lock().await.job(job_id)
    }

    pub async fn jobs(&self) -> Vec<BatchJob> {
        self.shared.board.lock().await.jobs()
    }

    /// Drop a job that has not started yet. Running jobs are not touched.
    pub async fn cancel_job(&self, job_id: Uuid) -> Option<BatchJob> {
        let cancelled = self.shared.board.lock().await.cancel(job_id);
        if cancelled.is_some() {
            info!(job_id = %job_id, "job cancelled");
            self.shared.idle.notify_waiters();
        }
        cancelled
    }
}

struct Worker {
    id: usize,
    shared: Arc<Shared>,
    workflow: Arc<ListingWorkflow>,
    factory: Arc<dyn AutomationFactory>,
    per_vendor: Option<usize>,
    stop: CancellationToken,
}

impl Worker {
    async fn run(self) {
        debug!(worker = self.id, "worker starting");
        loop {
            if self.stop.is_cancelled() {
                break;
            }

            let paused = *self.shared.paused.borrow();
            if paused {
                let mut gate = self.shared.paused.subscribe();
                if !wait_while_paused(&mut gate, &self.stop).await {
                    break;
                }
                continue;
            }

            let claimed = self.shared.board.lock().await.claim(self.per_vendor);
            let Some(job) = claimed else {
                tokio::select! {
                    _ = self.stop.cancelled() => break,
                    _ = self.shared.work.notified() => {}
                    _ = tokio::time::sleep(IDLE_POLL) => {}
                }
                continue;
            };

            let job_id = job.job_id;
            let (attempt, products, stats, state_status) = self.execute(&job).await;

            let disposition = self.shared.board.lock().await.finish(
                job_id,
                attempt,
                products,
                stats,
                state_status,
            );
            match disposition {
                Disposition::Completed => {
                    info!(job_id = %job_id, vendor = %job.vendor, category = %job.category, "job completed")
                }
                Disposition::Requeued => {
                    info!(job_id = %job_id, vendor = %job.vendor, category = %job.category, "job interrupted, back in queue")
                }
                Disposition::Halted => {
                    info!(job_id = %job_id, vendor = %job.vendor, category = %job.category, "target paused, job parked")
                }
                Disposition::Retrying => warn!(
                    job_id = %job_id,
                    vendor = %job.vendor,
                    category = %job.category,
                    retry = job.retry_count + 1,
                    max_retries = job.max_retries,
                    "job failed, retrying"
                ),
                Disposition::Failed => error!(
                    job_id = %job_id,
                    vendor = %job.vendor,
                    category = %job.category,
                    retries = job.retry_count,
                    "job failed permanently"
                ),
            }

            self.shared.work.notify_waiters();
            self.shared.idle.notify_waiters();
        }
        debug!(worker = self.id, "worker stopped");
    }

    async fn execute(
        &self,
        job: &BatchJob,
    ) -> (Attempt, Vec<ProductRecord>, RunStats, Option<StateStatus>) {
        info!(
            worker = self.id,
            job_id = %job.job_id,
            vendor = %job.vendor,
            category = %job.category,
            attempt = job.retry_count + 1,
            "job started"
        );

        let automation = match self.factory.create(job).await {
            Ok(automation) => automation,
            Err(e) => {
                warn!(job_id = %job.job_id, error = %e, "failed to open automation session");
                return (
                    Attempt::Failed(e.to_string()),
                    Vec::new(),
                    RunStats::default(),
                    None,
                );
            }
        };

        let outcome = self
            .workflow
            .run_with_gate(
                job,
                automation.as_ref(),
                &self.stop,
                self.shared.paused.subscribe(),
            )
            .await;

        if let Err(e) = automation.close().await {
            warn!(job_id = %job.job_id, error = %e, "failed to close automation session");
        }

        let state_status = outcome.status();
        let attempt = match outcome.end {
            RunEnd::Completed => Attempt::Completed,
            RunEnd::Interrupted => Attempt::Interrupted,
            RunEnd::Halted => Attempt::Halted,
            RunEnd::Failed(e) => Attempt::Failed(e.to_string()),
        };
        (attempt, outcome.products, outcome.stats, state_status)
    }
}
