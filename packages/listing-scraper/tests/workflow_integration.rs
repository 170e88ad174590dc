//! Integration tests for the per-target workflow against on-disk stores.
//!
//! These cover the end-to-end guarantees of a single target:
//! 1. Pages are merged and counted exactly once
//! 2. A run that died between pages resumes where it stopped
//! 3. Validation failures are bounded per page
//! 4. Leftovers of interrupted writes never shadow real documents

use listing_scraper::{
    testing::{listing_page, raw_product, raw_products, ScriptedAutomation},
    AutomationError, BatchJob, JobSpec, ListingWorkflow, PaginationState, ScraperConfig,
    StateStatus,
};
use serde_json::json;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn workflow(dir: &TempDir) -> ListingWorkflow {
    ListingWorkflow::from_config(ScraperConfig::rooted_at(dir.path()))
}

fn job(session_id: &str, max_pages: Option<u32>) -> BatchJob {
    let spec = JobSpec::builder()
        .session_id(session_id)
        .vendor("asda")
        .category("fruit")
        .url("https://groceries.example/fruit")
        .build();
    let mut job = BatchJob::from_spec(spec, 3);
    job.max_pages = max_pages;
    job
}

#[tokio::test]
async fn test_two_page_target_completes() {
    let dir = TempDir::new().unwrap();
    let wf = workflow(&dir);
    let automation = ScriptedAutomation::new()
        .with_page(1, listing_page(raw_products("Apple", 10), Some(true)))
        .with_page(2, listing_page(raw_products("Pear", 8), Some(false)));
    let job = job("s1", Some(2));

    let outcome = wf.run(&job, &automation, &CancellationToken::new()).await;
    assert!(outcome.is_completed());

    let state = wf.states().get("s1", "asda", "fruit").await.unwrap();
    assert_eq!(state.current_page, 2);
    assert_eq!(state.products_scraped, 18);
    assert_eq!(state.status, StateStatus::Completed);

    let handle = wf.sessions().handle_for("s1", "asda", "fruit");
    let file = wf.sessions().load(&handle).await.unwrap();
    assert_eq!(file.total_products(), 18);
    assert_eq!(file.session_statistics.pages_processed, 2);
    assert_eq!(file.scraping_session.status, StateStatus::Completed);
    assert_eq!(file.scraping_session.category_url, "https://groceries.example/fruit");
}

#[tokio::test]
async fn test_resume_after_failure_between_pages() {
    let dir = TempDir::new().unwrap();
    let wf = workflow(&dir);
    let job = job("s1", Some(3));

    // page 2 is reached via the go-to-page act, which dies mid-run
    let first = ScriptedAutomation::new()
        .with_page(1, listing_page(raw_products("Apple", 10), Some(true)))
        .fail_act_with(AutomationError::Unavailable("service went away".into()), 1);
    let outcome = wf.run(&job, &first, &CancellationToken::new()).await;
    assert!(outcome.error().is_some());

    let state = wf.states().get("s1", "asda", "fruit").await.unwrap();
    assert_eq!(state.status, StateStatus::Error);
    assert_eq!(state.current_page, 2);
    assert_eq!(state.products_scraped, 10);

    let resumable = wf.states().list_resumable(7).await.unwrap();
    assert_eq!(resumable.len(), 1);
    assert_eq!(resumable[0].session_id, "s1");

    let second = ScriptedAutomation::new()
        .with_page(1, listing_page(raw_products("Apple", 10), Some(true)))
        .with_page(2, listing_page(raw_products("Pear", 5), Some(true)))
        .with_page(3, listing_page(raw_products("Plum", 4), Some(false)));
    let outcome = wf.run(&job, &second, &CancellationToken::new()).await;
    assert!(outcome.is_completed());

    // page 1 is never extracted again
    assert_eq!(second.extractions_on(1), 0);
    assert_eq!(second.extractions_on(2), 1);

    let state = wf.states().get("s1", "asda", "fruit").await.unwrap();
    assert_eq!(state.status, StateStatus::Completed);
    assert_eq!(state.current_page, 3);
    assert_eq!(state.products_scraped, 19);

    let handle = wf.sessions().handle_for("s1", "asda", "fruit");
    let file = wf.sessions().load(&handle).await.unwrap();
    assert_eq!(file.total_products(), 19);
}

#[tokio::test]
async fn test_interrupted_run_resumes_without_duplicates() {
    let dir = TempDir::new().unwrap();
    let wf = workflow(&dir);
    let job = job("s1", None);
    let automation = ScriptedAutomation::new()
        .with_page(1, listing_page(raw_products("Apple", 6), Some(true)))
        .with_page(2, listing_page(raw_products("Pear", 3), Some(false)));

    // stop requested while page 1 is in flight
    let cancel = CancellationToken::new();
    let slow = automation
        .clone()
        .with_extract_delay(std::time::Duration::from_millis(50));
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        trigger.cancel();
    });
    let outcome = wf.run(&job, &slow, &cancel).await;
    assert_eq!(outcome.status(), Some(StateStatus::Paused));
    assert_eq!(outcome.products.len(), 6);

    let state = wf.states().get("s1", "asda", "fruit").await.unwrap();
    assert_eq!(state.current_page, 2);
    assert_eq!(state.status, StateStatus::Paused);

    let outcome = wf.run(&job, &automation, &CancellationToken::new()).await;
    assert!(outcome.is_completed());
    assert_eq!(outcome.products.len(), 3);

    let state = wf.states().get("s1", "asda", "fruit").await.unwrap();
    assert_eq!(state.products_scraped, 9);
    let handle = wf.sessions().handle_for("s1", "asda", "fruit");
    assert_eq!(wf.sessions().load(&handle).await.unwrap().total_products(), 9);
}

#[tokio::test]
async fn test_always_failing_validation_is_bounded() {
    let dir = TempDir::new().unwrap();
    let wf = workflow(&dir);
    let automation = ScriptedAutomation::new()
        .with_page(
            1,
            json!({
                "products": [{"name": "Mystery", "price": "free"}],
                "pagination": {"has_more_pages": true}
            }),
        )
        .with_page(2, listing_page(vec![raw_product("Banana", 0.5)], Some(false)));

    let outcome = wf.run(&job("s1", None), &automation, &CancellationToken::new()).await;

    assert_eq!(automation.extractions_on(1), 3);
    assert!(outcome.is_completed());
    assert_eq!(outcome.stats.pages_failed, 1);
    assert_eq!(outcome.products.len(), 1);

    let state = wf.states().get("s1", "asda", "fruit").await.unwrap();
    assert_eq!(state.error_count, 1);
    assert_eq!(state.products_scraped, 1);
}

#[tokio::test]
async fn test_interrupted_write_leftovers_are_ignored() {
    let dir = TempDir::new().unwrap();
    let wf = workflow(&dir);
    let states = wf.states();

    let mut state = PaginationState::new("s1", "asda", "fruit", Some(5));
    states.insert(&state).await.unwrap();
    state.current_page = 3;
    states.update(&state).await.unwrap();

    // a writer that died before rename leaves a truncated temp file behind
    let path = states.path_for("s1", "asda", "fruit");
    let file_name = path.file_name().unwrap().to_str().unwrap().to_string();
    let leftover = states.dir().join(format!(".{}.tmp-deadbeef", file_name));
    std::fs::write(&leftover, b"{\"session_id\": \"s1\", \"curr").unwrap();

    let loaded = states.get("s1", "asda", "fruit").await.unwrap();
    assert_eq!(loaded.current_page, 3);
    assert_eq!(states.list_all().await.unwrap().len(), 1);
}
