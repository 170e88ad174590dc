//! Operator CLI for resumable product-listing scrapes.
//!
//! Every command prints one JSON document on stdout; logs go to stderr.

mod automation;
mod config;
mod targets;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use listing_scraper::{
    format_progress, BatchProgress, BatchRunner, JobSpec, JobStatus, ListingWorkflow, RunStats,
    SessionSummary, StateStatus,
};
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use crate::automation::HttpAutomationFactory;
use crate::config::Config;

#[derive(Parser)]
#[command(name = "scrape")]
#[command(about = "Resumable product-listing scraper")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape every target in a targets file
    Run {
        /// JSON file: [{vendor, category, url, max_pages?}]
        #[arg(long)]
        targets: PathBuf,
        /// Session id to scrape into (a new one is generated when omitted)
        #[arg(long)]
        session: Option<String>,
        #[arg(long)]
        workers: Option<usize>,
        /// Page limit for targets that do not set their own
        #[arg(long)]
        max_pages: Option<u32>,
    },

    /// List sessions with unfinished targets
    Resumable {
        #[arg(long)]
        days: Option<i64>,
    },

    /// Continue the unfinished targets of a session
    Resume {
        session_id: String,
        #[arg(long)]
        workers: Option<usize>,
    },

    /// Pause every active target of a session
    Pause { session_id: String },

    /// Reactivate every paused target of a session
    Unpause { session_id: String },

    /// Summary of a session's targets
    Status { session_id: String },

    /// Delete state of fully completed sessions older than N days
    Cleanup {
        #[arg(long, default_value_t = 7)]
        days: i64,
    },
}

// ============================================================================
// JSON Response Types
// ============================================================================

#[derive(Serialize)]
struct RunReport {
    session_id: String,
    interrupted: bool,
    progress: BatchProgress,
    jobs: Vec<JobReport>,
}

#[derive(Serialize)]
struct JobReport {
    job_id: Uuid,
    vendor: String,
    category: String,
    status: JobStatus,
    retry_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    state_status: Option<StateStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    products: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    stats: Option<RunStats>,
}

#[derive(Serialize)]
struct StatusReport {
    #[serde(flatten)]
    summary: SessionSummary,
    progress: Vec<String>,
}

#[derive(Serialize)]
struct Response {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sessions: Option<Vec<String>>,
}

fn output<T: Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("failed to serialize output")?
    );
    Ok(())
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,listing_scraper=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_line_number(true),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command {
        Commands::Run {
            targets,
            session,
            workers,
            max_pages,
        } => cmd_run(&config, &targets, session, workers, max_pages).await,
        Commands::Resumable { days } => cmd_resumable(&config, days).await,
        Commands::Resume {
            session_id,
            workers,
        } => cmd_resume(&config, &session_id, workers).await,
        Commands::Pause { session_id } => cmd_pause(&config, &session_id, true).await,
        Commands::Unpause { session_id } => cmd_pause(&config, &session_id, false).await,
        Commands::Status { session_id } => cmd_status(&config, &session_id).await,
        Commands::Cleanup { days } => cmd_cleanup(&config, days).await,
    }
}

fn workflow(config: &Config) -> Arc<ListingWorkflow> {
    Arc::new(ListingWorkflow::from_config(config.scraper_config()))
}

fn runner(config: &Config) -> Result<BatchRunner> {
    let factory = HttpAutomationFactory::new(config.automation_client()?);
    Ok(BatchRunner::new(
        workflow(config),
        Arc::new(factory),
        config.runner_config(),
    ))
}

async fn cmd_run(
    config: &Config,
    targets_file: &std::path::Path,
    session: Option<String>,
    workers: Option<usize>,
    max_pages: Option<u32>,
) -> Result<()> {
    let targets = targets::load(targets_file)?;
    let session_id = session.unwrap_or_else(targets::new_session_id);
    let runner = runner(config)?;

    info!(session_id = %session_id, targets = targets.len(), "starting run");
    for target in targets {
        let mut spec = JobSpec::builder()
            .session_id(session_id.clone())
            .vendor(target.vendor)
            .category(target.category)
            .url(target.url)
            .build();
        spec.max_pages = target.max_pages.or(max_pages);
        runner.enqueue(spec).await;
    }

    let report = execute(&runner, session_id, workers.unwrap_or(config.workers)).await;
    output(&report)
}

async fn cmd_resume(config: &Config, session_id: &str, workers: Option<usize>) -> Result<()> {
    let runner = runner(config)?;
    let states = runner
        .workflow()
        .states()
        .list_session(session_id)
        .await
        .with_context(|| format!("failed to read state of session {}", session_id))?;

    let mut queued = 0;
    for state in states.into_iter().filter(|s| !s.is_complete()) {
        if state.category_url.is_empty() {
            warn!(vendor = %state.vendor, category = %state.category, "state has no category url, skipping");
            continue;
        }
        let mut spec = JobSpec::builder()
            .session_id(session_id)
            .vendor(state.vendor)
            .category(state.category)
            .url(state.category_url)
            .build();
        spec.max_pages = state.max_pages;
        runner.enqueue(spec).await;
        queued += 1;
    }

    if queued == 0 {
        return output(&Response {
            success: true,
            message: Some(format!("nothing to resume in session {}", session_id)),
            count: Some(0),
            sessions: None,
        });
    }

    info!(session_id, targets = queued, "resuming session");
    let report = execute(&runner, session_id.to_string(), workers.unwrap_or(config.workers)).await;
    output(&report)
}

/// Run every queued job; Ctrl-C stops cooperatively between pages.
async fn execute(runner: &BatchRunner, session_id: String, workers: usize) -> RunReport {
    runner.start(workers).await;

    let interrupted = tokio::select! {
        _ = runner.wait_idle() => false,
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                warn!(error = %e, "failed to listen for ctrl-c");
            }
            info!("interrupt received, stopping after the current pages");
            true
        }
    };
    runner.stop().await;

    let mut jobs = Vec::new();
    for job in runner.jobs().await {
        let products = runner.results(job.job_id).await.len();
        jobs.push(JobReport {
            job_id: job.job_id,
            vendor: job.vendor,
            category: job.category,
            status: job.status,
            retry_count: job.retry_count,
            state_status: job.state_status,
            error: job.error,
            products,
            stats: job.stats,
        });
    }

    RunReport {
        session_id,
        interrupted,
        progress: runner.progress().await,
        jobs,
    }
}

async fn cmd_resumable(config: &Config, days: Option<i64>) -> Result<()> {
    let scraper = config.scraper_config();
    let days = days.unwrap_or(scraper.resume_window_days);
    let sessions = workflow(config)
        .states()
        .list_resumable(days)
        .await
        .context("failed to scan pagination state")?;
    output(&sessions)
}

async fn cmd_pause(config: &Config, session_id: &str, pause: bool) -> Result<()> {
    let states = workflow(config).states().clone();
    let updated = if pause {
        states.pause(session_id).await?
    } else {
        states.resume(session_id).await?
    };
    output(&Response {
        success: true,
        message: Some(format!(
            "{} {} target(s) of {}",
            if pause { "paused" } else { "unpaused" },
            updated,
            session_id
        )),
        count: Some(updated),
        sessions: None,
    })
}

async fn cmd_status(config: &Config, session_id: &str) -> Result<()> {
    let states = workflow(config).states().clone();
    let summary = states
        .session_summary(session_id)
        .await
        .with_context(|| format!("unknown session {}", session_id))?;
    let progress = states
        .list_session(session_id)
        .await?
        .iter()
        .map(format_progress)
        .collect();
    output(&StatusReport { summary, progress })
}

async fn cmd_cleanup(config: &Config, days: i64) -> Result<()> {
    let removed = workflow(config)
        .states()
        .cleanup_old_sessions(days)
        .await
        .context("cleanup failed")?;
    output(&Response {
        success: true,
        message: None,
        count: Some(removed.len()),
        sessions: Some(removed),
    })
}
