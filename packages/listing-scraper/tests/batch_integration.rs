//! Integration tests for the batch runner.
//!
//! These drive several targets through the worker pool:
//! 1. Failing jobs are retried a bounded number of times
//! 2. A stopped run leaves its targets paused and resumable
//! 3. The per-vendor limit holds while workers are busy
//! 4. Re-running a completed session never duplicates merged products
//! 5. Pausing a target or the whole run takes effect between pages

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use listing_scraper::{
    testing::{listing_page, raw_products, ScriptedAutomation, ScriptedFactory},
    AutomationError, BatchRunner, JobStatus, ListingWorkflow, RunnerConfig, ScraperConfig,
    StateStatus,
};
use tempfile::TempDir;

fn workflow(dir: &TempDir) -> Arc<ListingWorkflow> {
    Arc::new(ListingWorkflow::from_config(ScraperConfig::rooted_at(
        dir.path(),
    )))
}

#[tokio::test]
async fn test_always_failing_job_is_retried_twice() {
    let dir = TempDir::new().unwrap();
    let factory = Arc::new(ScriptedFactory::new(|_| {
        Ok(ScriptedAutomation::new()
            .fail_navigation_with(AutomationError::Unavailable("no browser".into()), 10))
    }));
    let runner = BatchRunner::new(workflow(&dir), factory.clone(), RunnerConfig::default());

    let failing = runner
        .add_job("asda", "fruit", "https://groceries.example/fruit", "s1", 2)
        .await;
    assert_eq!(runner.jobs().await.len(), 1);

    let progress = runner.run_to_completion(2).await;

    assert_eq!(factory.created(), 3);
    let job = runner.job(failing).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.retry_count, 2);
    assert!(job.error.unwrap().contains("no browser"));
    assert_eq!(runner.counters().await.failed_jobs, 1);
    assert_eq!(progress.failed, 1);
    assert_eq!(progress.success_rate, 0.0);

    let state = runner
        .workflow()
        .states()
        .get("s1", "asda", "fruit")
        .await
        .unwrap();
    assert_eq!(state.status, StateStatus::Error);
}

#[tokio::test]
async fn test_one_failing_job_does_not_affect_others() {
    let dir = TempDir::new().unwrap();
    let factory = ScriptedFactory::new(|job| {
        if job.vendor == "broken" {
            Err(AutomationError::Unavailable("refused".into()))
        } else {
            Ok(ScriptedAutomation::new().with_page(1, listing_page(raw_products("Apple", 3), None)))
        }
    });
    let runner = BatchRunner::new(workflow(&dir), Arc::new(factory), RunnerConfig::default());

    let ok = runner
        .add_job("asda", "fruit", "https://groceries.example/fruit", "s1", 1)
        .await;
    let broken = runner
        .add_job("broken", "fruit", "https://broken.example/fruit", "s1", 1)
        .await;

    let progress = runner.run_to_completion(2).await;
    assert_eq!(progress.completed, 1);
    assert_eq!(progress.failed, 1);
    assert_eq!(runner.results(ok).await.len(), 3);
    assert!(runner.results(broken).await.is_empty());
}

#[tokio::test]
async fn test_stop_pauses_in_flight_job_and_restart_finishes_it() {
    let dir = TempDir::new().unwrap();
    let automation = ScriptedAutomation::new()
        .with_page(1, listing_page(raw_products("Apple", 4), Some(true)))
        .with_page(2, listing_page(raw_products("Pear", 2), Some(false)))
        .with_extract_delay(Duration::from_millis(100));
    let runner = BatchRunner::new(
        workflow(&dir),
        Arc::new(ScriptedFactory::shared(automation.clone())),
        RunnerConfig::default(),
    );

    let id = runner
        .add_job("asda", "fruit", "https://groceries.example/fruit", "s1", 3)
        .await;
    runner.start(1).await;
    tokio::time::sleep(Duration::from_millis(30)).await;
    runner.stop().await;

    let job = runner.job(id).await.unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.retry_count, 0);
    assert_eq!(job.state_status, Some(StateStatus::Paused));
    assert_eq!(runner.counters().await.failed_jobs, 0);
    assert_eq!(runner.results(id).await.len(), 4);

    let state = runner
        .workflow()
        .states()
        .get("s1", "asda", "fruit")
        .await
        .unwrap();
    assert_eq!(state.status, StateStatus::Paused);
    assert_eq!(state.current_page, 2);

    let progress = runner.run_to_completion(1).await;
    assert_eq!(progress.completed, 1);
    assert_eq!(runner.results(id).await.len(), 6);
    assert_eq!(automation.extractions_on(1), 1);
}

#[tokio::test]
async fn test_vendor_limit_caps_concurrent_jobs() {
    let dir = TempDir::new().unwrap();
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    struct Tracking {
        inner: ScriptedAutomation,
        running: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl listing_scraper::PageAutomation for Tracking {
        async fn navigate(&self, url: &str) -> listing_scraper::AutomationResult<()> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            self.inner.navigate(url).await
        }
        async fn act(&self, instruction: &str) -> listing_scraper::AutomationResult<()> {
            self.inner.act(instruction).await
        }
        async fn observe(
            &self,
            instruction: &str,
        ) -> listing_scraper::AutomationResult<Vec<listing_scraper::ElementDescriptor>> {
            self.inner.observe(instruction).await
        }
        async fn extract(
            &self,
            instruction: &str,
            schema: Option<&serde_json::Value>,
        ) -> listing_scraper::AutomationResult<serde_json::Value> {
            let extracted = self.inner.extract(instruction, schema).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            extracted
        }
        async fn reinitialize(&self) -> listing_scraper::AutomationResult<()> {
            self.inner.reinitialize().await
        }
    }

    struct TrackingFactory {
        running: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl listing_scraper::AutomationFactory for TrackingFactory {
        async fn create(
            &self,
            _job: &listing_scraper::BatchJob,
        ) -> listing_scraper::AutomationResult<Box<dyn listing_scraper::PageAutomation>> {
            Ok(Box::new(Tracking {
                inner: ScriptedAutomation::new()
                    .with_page(1, listing_page(raw_products("Apple", 2), None))
                    .with_extract_delay(Duration::from_millis(20)),
                running: self.running.clone(),
                peak: self.peak.clone(),
            }))
        }
    }

    let factory = TrackingFactory {
        running: running.clone(),
        peak: peak.clone(),
    };
    let runner = BatchRunner::new(
        workflow(&dir),
        Arc::new(factory),
        RunnerConfig::default().with_max_concurrent_per_vendor(Some(1)),
    );
    for category in ["fruit", "veg", "dairy", "bakery"] {
        runner
            .add_job("asda", category, "https://groceries.example", "s1", 0)
            .await;
    }

    let progress = runner.run_to_completion(4).await;
    assert_eq!(progress.completed, 4);
    assert_eq!(peak.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_rerunning_session_does_not_duplicate_products() {
    let dir = TempDir::new().unwrap();
    let wf = workflow(&dir);
    let make_runner = || {
        BatchRunner::new(
            wf.clone(),
            Arc::new(ScriptedFactory::new(|_| {
                Ok(ScriptedAutomation::new()
                    .with_page(1, listing_page(raw_products("Apple", 5), None)))
            })),
            RunnerConfig::default(),
        )
    };

    // a completed target is skipped when its session runs again
    let first = make_runner();
    first
        .add_job("asda", "fruit", "https://groceries.example/fruit", "s1", 0)
        .await;
    first.run_to_completion(1).await;

    let second = make_runner();
    let again = second
        .add_job("asda", "fruit", "https://groceries.example/fruit", "s1", 0)
        .await;
    let progress = second.run_to_completion(1).await;
    assert_eq!(progress.completed, 1);
    assert!(second.results(again).await.is_empty());

    let handle = wf.sessions().handle_for("s1", "asda", "fruit");
    let file = wf.sessions().load(&handle).await.unwrap();
    assert_eq!(file.total_products(), 5);
}

#[tokio::test]
async fn test_target_paused_mid_run_is_parked_then_resumable() {
    let dir = TempDir::new().unwrap();
    let automation = ScriptedAutomation::new()
        .with_page(1, listing_page(raw_products("Apple", 4), Some(true)))
        .with_page(2, listing_page(raw_products("Pear", 2), Some(true)))
        .with_page(3, listing_page(raw_products("Plum", 1), Some(false)))
        .with_extract_delay(Duration::from_millis(80));
    let runner = BatchRunner::new(
        workflow(&dir),
        Arc::new(ScriptedFactory::shared(automation.clone())),
        RunnerConfig::default(),
    );

    let id = runner
        .add_job("asda", "fruit", "https://groceries.example/fruit", "s1", 3)
        .await;
    runner.start(1).await;
    let states = runner.workflow().states().clone();
    while states.pause("s1").await.unwrap() == 0 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    tokio::time::timeout(Duration::from_secs(5), runner.wait_idle())
        .await
        .unwrap();
    runner.stop().await;

    let job = runner.job(id).await.unwrap();
    assert_eq!(job.status, JobStatus::Paused);
    assert_eq!(job.retry_count, 0);
    assert_eq!(job.state_status, Some(StateStatus::Paused));
    assert_eq!(runner.progress().await.paused, 1);
    assert_eq!(automation.extractions_on(2), 0);

    let state = states.get("s1", "asda", "fruit").await.unwrap();
    assert_eq!(state.status, StateStatus::Paused);
    assert_eq!(state.current_page, 2);

    // a later run picks the target up where it stopped
    let resumed = BatchRunner::new(
        runner.workflow().clone(),
        Arc::new(ScriptedFactory::shared(automation.clone())),
        RunnerConfig::default(),
    );
    resumed
        .add_job("asda", "fruit", "https://groceries.example/fruit", "s1", 3)
        .await;
    let progress = resumed.run_to_completion(1).await;
    assert_eq!(progress.completed, 1);
    assert_eq!(automation.extractions_on(1), 1);
    assert_eq!(states.get("s1", "asda", "fruit").await.unwrap().products_scraped, 7);
}

#[tokio::test]
async fn test_paused_processing_holds_running_job_between_pages() {
    let dir = TempDir::new().unwrap();
    let automation = ScriptedAutomation::new()
        .with_page(1, listing_page(raw_products("Apple", 3), Some(true)))
        .with_page(2, listing_page(raw_products("Pear", 2), Some(false)))
        .with_extract_delay(Duration::from_millis(60));
    let factory = Arc::new(ScriptedFactory::shared(automation.clone()));
    let runner = BatchRunner::new(workflow(&dir), factory.clone(), RunnerConfig::default());

    let id = runner
        .add_job("asda", "fruit", "https://groceries.example/fruit", "s1", 3)
        .await;
    runner.start(1).await;
    while factory.created() == 0 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    runner.pause_processing();

    // page 1 finishes, page 2 is never started while paused
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(automation.extractions_on(1), 1);
    assert_eq!(automation.extractions_on(2), 0);
    assert_eq!(runner.job(id).await.unwrap().status, JobStatus::Running);
    let state = runner
        .workflow()
        .states()
        .get("s1", "asda", "fruit")
        .await
        .unwrap();
    assert_eq!(state.current_page, 2);
    assert_eq!(state.status, StateStatus::Active);

    runner.resume_processing();
    tokio::time::timeout(Duration::from_secs(5), runner.wait_idle())
        .await
        .unwrap();
    runner.stop().await;

    assert_eq!(runner.job(id).await.unwrap().status, JobStatus::Completed);
    assert_eq!(runner.results(id).await.len(), 5);
}
