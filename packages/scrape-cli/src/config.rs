use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use automation_client::AutomationClient;
use listing_scraper::{RunnerConfig, ScraperConfig};

/// CLI configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub automation_url: Option<String>,
    pub automation_api_key: Option<String>,
    pub state_dir: PathBuf,
    pub output_dir: PathBuf,
    pub backup_dir: PathBuf,
    pub workers: usize,
    pub max_retries: u32,
    pub page_delay: Duration,
    /// `None` when `SCRAPER_MAX_PER_VENDOR=0`
    pub max_per_vendor: Option<usize>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenvy::dotenv();
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let number = |name: &str, default: u64| -> Result<u64> {
            match var(name) {
                Some(value) => value
                    .trim()
                    .parse()
                    .with_context(|| format!("{} must be a valid number", name)),
                None => Ok(default),
            }
        };

        let max_per_vendor = number("SCRAPER_MAX_PER_VENDOR", 2)? as usize;

        Ok(Self {
            automation_url: var("AUTOMATION_URL"),
            automation_api_key: var("AUTOMATION_API_KEY").filter(|key| !key.is_empty()),
            state_dir: var("SCRAPER_STATE_DIR")
                .unwrap_or_else(|| "data/state".to_string())
                .into(),
            output_dir: var("SCRAPER_OUTPUT_DIR")
                .unwrap_or_else(|| "data/sessions".to_string())
                .into(),
            backup_dir: var("SCRAPER_BACKUP_DIR")
                .unwrap_or_else(|| "data/backups".to_string())
                .into(),
            workers: number("SCRAPER_WORKERS", 3)?.max(1) as usize,
            max_retries: number("SCRAPER_MAX_RETRIES", 3)? as u32,
            page_delay: Duration::from_millis(number("SCRAPER_PAGE_DELAY_MS", 2000)?),
            max_per_vendor: (max_per_vendor > 0).then_some(max_per_vendor),
        })
    }

    pub fn scraper_config(&self) -> ScraperConfig {
        ScraperConfig::new()
            .with_state_dir(self.state_dir.clone())
            .with_output_dir(self.output_dir.clone())
            .with_backup_dir(self.backup_dir.clone())
            .with_page_delay(self.page_delay)
    }

    pub fn runner_config(&self) -> RunnerConfig {
        RunnerConfig::new()
            .with_workers(self.workers)
            .with_default_max_retries(self.max_retries)
            .with_max_concurrent_per_vendor(self.max_per_vendor)
    }

    /// Client for the automation service; only commands that scrape need it.
    pub fn automation_client(&self) -> Result<AutomationClient> {
        let url = self
            .automation_url
            .as_deref()
            .context("AUTOMATION_URL must be set")?;
        let client = AutomationClient::new(url);
        Ok(match &self.automation_api_key {
            Some(key) => client.with_api_key(key),
            None => client,
        })
    }
}
