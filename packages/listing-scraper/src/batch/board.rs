//! Queue, job table and counters shared by the runner's workers.
//!
//! The board is plain data; the runner keeps it behind one async mutex, so
//! every method here runs with that lock held.

use std::collections::{HashMap, VecDeque};

use chrono::Utc;
use uuid::Uuid;

use crate::types::job::{BatchJob, BatchProgress, JobStatus, RunStats};
use crate::types::pagination::StateStatus;
use crate::types::product::ProductRecord;

/// Aggregate job counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunCounters {
    pub completed_jobs: usize,
    pub failed_jobs: usize,
}

/// How a job attempt ended, as reported by a worker.
#[derive(Debug)]
pub enum Attempt {
    Completed,
    /// Stopped between pages; the job goes back to the queue
    Interrupted,
    /// The target was paused or cancelled in the state store
    Halted,
    Failed(String),
}

/// What happened to a job after `finish`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Completed,
    Requeued,
    Halted,
    Retrying,
    Failed,
}

#[derive(Default)]
pub struct JobBoard {
    queue: VecDeque<Uuid>,
    jobs: HashMap<Uuid, BatchJob>,
    order: Vec<Uuid>,
    results: HashMap<Uuid, Vec<ProductRecord>>,
    running_per_vendor: HashMap<String, usize>,
    active: usize,
    counters: RunCounters,
}

impl JobBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, job: BatchJob) -> Uuid {
        let id = job.job_id;
        self.order.push(id);
        self.queue.push_back(id);
        self.jobs.insert(id, job);
        id
    }

    /// Take the first queued job whose vendor is under `per_vendor` running
    /// jobs, and mark it running.
    pub fn claim(&mut self, per_vendor: Option<usize>) -> Option<BatchJob> {
        let position = self.queue.iter().position(|id| {
            let Some(job) = self.jobs.get(id) else {
                return false;
            };
            let running = self.running_per_vendor.get(&job.vendor).copied().unwrap_or(0);
            per_vendor.map_or(true, |limit| running < limit)
        })?;
        let id = self.queue.remove(position)?;
        let job = self.jobs.get_mut(&id)?;

        job.status = JobStatus::Running;
        job.started_at = Some(Utc::now());
        *self
            .running_per_vendor
            .entry(job.vendor.clone())
            .or_default() += 1;
        self.active += 1;
        Some(job.clone())
    }

    /// Record the end of a claimed job's attempt.
    pub fn finish(
        &mut self,
        job_id: Uuid,
        attempt: Attempt,
        products: Vec<ProductRecord>,
        stats: RunStats,
        state_status: Option<StateStatus>,
    ) -> Disposition {
        self.active = self.active.saturating_sub(1);

        let Some(job) = self.jobs.get_mut(&job_id) else {
            return Disposition::Failed;
        };
        if let Some(running) = self.running_per_vendor.get_mut(&job.vendor) {
            *running = running.saturating_sub(1);
        }

        let results = self.results.entry(job_id).or_default();
        results.extend(products);
        job.stats = Some(stats);
        job.state_status = state_status;

        match attempt {
            Attempt::Completed => {
                job.status = JobStatus::Completed;
                job.error = None;
                job.result = Some(results.clone());
                job.finished_at = Some(Utc::now());
                self.counters.completed_jobs += 1;
                Disposition::Completed
            }
            Attempt::Interrupted => {
                job.status = JobStatus::Pending;
                self.queue.push_front(job_id);
                Disposition::Requeued
            }
            Attempt::Halted => {
                job.status = JobStatus::Paused;
                Disposition::Halted
            }
            Attempt::Failed(error) => {
                job.error = Some(error);
                if job.can_retry() {
                    job.retry_count += 1;
                    job.status = JobStatus::Retrying;
                    self.queue.push_back(job_id);
                    Disposition::Retrying
                } else {
                    job.status = JobStatus::Failed;
                    job.result = Some(results.clone());
                    job.finished_at = Some(Utc::now());
                    self.counters.failed_jobs += 1;
                    Disposition::Failed
                }
            }
        }
    }

    /// Remove a job that has not started (pending or waiting to retry).
    pub fn cancel(&mut self, job_id: Uuid) -> Option<BatchJob> {
        let position = self.queue.iter().position(|id| *id == job_id)?;
        self.queue.remove(position);
        self.order.retain(|id| *id != job_id);
        self.results.remove(&job_id);
        self.jobs.remove(&job_id)
    }

    pub fn is_idle(&self) -> bool {
        self.queue.is_empty() && self.active == 0
    }

    pub fn job(&self, job_id: Uuid) -> Option<BatchJob> {
        self.jobs.get(&job_id).cloned()
    }

    /// Jobs in the order they were added.
    pub fn jobs(&self) -> Vec<BatchJob> {
        self.order
            .iter()
            .filter_map(|id| self.jobs.get(id).cloned())
            .collect()
    }

    pub fn results(&self, job_id: Uuid) -> Vec<ProductRecord> {
        self.results.get(&job_id).cloned().unwrap_or_default()
    }

    pub fn counters(&self) -> RunCounters {
        self.counters
    }

    pub fn progress(&self) -> BatchProgress {
        let RunCounters {
            completed_jobs: completed,
            failed_jobs: failed,
        } = self.counters;
        let finished = completed + failed;
        BatchProgress {
            total: self.jobs.len(),
            completed,
            failed,
            paused: self
                .jobs
                .values()
                .filter(|job| job.status == JobStatus::Paused)
                .count(),
            active: self.active,
            pending: self.queue.len(),
            success_rate: if finished == 0 {
                0.0
            } else {
                completed as f64 / finished as f64
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::record;
    use crate::types::job::JobSpec;

    fn job(vendor: &str, category: &str, max_retries: u32) -> BatchJob {
        let spec = JobSpec::builder()
            .session_id("s1")
            .vendor(vendor)
            .category(category)
            .url(format!("https://{}.example/{}", vendor, category))
            .max_retries(max_retries)
            .build();
        BatchJob::from_spec(spec, 3)
    }

    #[test]
    fn test_claim_respects_vendor_limit() {
        let mut board = JobBoard::new();
        board.enqueue(job("a", "x", 0));
        board.enqueue(job("a", "y", 0));
        board.enqueue(job("b", "x", 0));

        let first = board.claim(Some(1)).unwrap();
        assert_eq!(first.vendor, "a");
        let second = board.claim(Some(1)).unwrap();
        assert_eq!(second.vendor, "b");
        assert!(board.claim(Some(1)).is_none());

        board.finish(first.job_id, Attempt::Completed, vec![], RunStats::default(), None);
        assert_eq!(board.claim(Some(1)).unwrap().category, "y");
    }

    #[test]
    fn test_retry_bound_counts_failure_once() {
        let mut board = JobBoard::new();
        let id = board.enqueue(job("a", "x", 2));

        let mut dispositions = Vec::new();
        while let Some(claimed) = board.claim(None) {
            dispositions.push(board.finish(
                claimed.job_id,
                Attempt::Failed("boom".into()),
                vec![],
                RunStats::default(),
                None,
            ));
        }

        assert_eq!(
            dispositions,
            vec![Disposition::Retrying, Disposition::Retrying, Disposition::Failed]
        );
        let job = board.job(id).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.retry_count, 2);
        assert_eq!(board.counters().failed_jobs, 1);
        assert!(board.is_idle());
    }

    #[test]
    fn test_interrupted_job_returns_to_front() {
        let mut board = JobBoard::new();
        let first = board.enqueue(job("a", "x", 0));
        board.enqueue(job("b", "x", 0));

        let claimed = board.claim(None).unwrap();
        let disposition = board.finish(
            claimed.job_id,
            Attempt::Interrupted,
            vec![record("Ball", 1.0)],
            RunStats::default(),
            Some(StateStatus::Paused),
        );
        assert_eq!(disposition, Disposition::Requeued);
        assert_eq!(board.job(first).unwrap().status, JobStatus::Pending);
        assert_eq!(board.claim(None).unwrap().job_id, first);
        assert_eq!(board.results(first).len(), 1);
        assert_eq!(board.counters(), RunCounters::default());
    }

    #[test]
    fn test_halted_job_is_parked_not_requeued() {
        let mut board = JobBoard::new();
        let id = board.enqueue(job("a", "x", 0));

        let claimed = board.claim(None).unwrap();
        let disposition = board.finish(
            claimed.job_id,
            Attempt::Halted,
            vec![record("Ball", 1.0)],
            RunStats::default(),
            Some(StateStatus::Paused),
        );
        assert_eq!(disposition, Disposition::Halted);
        assert_eq!(board.job(id).unwrap().status, JobStatus::Paused);
        assert!(board.claim(None).is_none());
        assert!(board.is_idle());

        let progress = board.progress();
        assert_eq!(progress.paused, 1);
        assert_eq!(progress.completed + progress.failed, 0);
    }

    #[test]
    fn test_cancel_only_queued_jobs() {
        let mut board = JobBoard::new();
        let running = board.enqueue(job("a", "x", 0));
        let queued = board.enqueue(job("b", "x", 0));
        board.claim(None);

        assert!(board.cancel(running).is_none());
        assert!(board.cancel(queued).is_some());
        assert_eq!(board.progress().total, 1);
    }

    #[test]
    fn test_progress() {
        let mut board = JobBoard::new();
        for category in ["x", "y", "z"] {
            board.enqueue(job("a", category, 0));
        }
        let a = board.claim(None).unwrap();
        let b = board.claim(None).unwrap();
        board.finish(a.job_id, Attempt::Completed, vec![], RunStats::default(), None);
        board.finish(b.job_id, Attempt::Failed("x".into()), vec![], RunStats::default(), None);

        let progress = board.progress();
        assert_eq!(progress.total, 3);
        assert_eq!(progress.completed, 1);
        assert_eq!(progress.failed, 1);
        assert_eq!(progress.pending, 1);
        assert_eq!(progress.active, 0);
        assert!((progress.success_rate - 0.5).abs() < 1e-9);
    }
}
