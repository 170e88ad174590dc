//! Configuration types for the scraper and the batch runner.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for running a single target through the page workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScraperConfig {
    /// Directory holding one pagination state file per (session, vendor, category).
    pub state_dir: PathBuf,

    /// Directory holding one session file per (session, vendor, category).
    pub output_dir: PathBuf,

    /// Directory receiving timestamped session-file backups.
    pub backup_dir: PathBuf,

    /// Extractions attempted per page before the page is skipped.
    ///
    /// Default: 3.
    pub max_extraction_attempts: u32,

    /// Navigation attempts per page-cycle for transient errors.
    ///
    /// Default: 2.
    pub max_navigation_attempts: u32,

    /// Freshness window for resume discovery, in days. Default: 7.
    pub resume_window_days: i64,

    /// Backups kept per session file. Default: 5.
    pub backup_retention: usize,

    /// Share of raw records on a page that must normalize cleanly for the
    /// page to pass validation. Default: 0.7.
    pub min_valid_ratio: f64,

    /// Overlays dismissed per navigation at most. Default: 3.
    pub max_overlay_dismissals: usize,

    /// Pause between page-cycles.
    #[serde(with = "duration_millis")]
    pub page_delay: Duration,

    /// Instruction text handed to the automation collaborator.
    #[serde(default)]
    pub instructions: PageInstructions,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from("data/state"),
            output_dir: PathBuf::from("data/sessions"),
            backup_dir: PathBuf::from("data/backups"),
            max_extraction_attempts: 3,
            max_navigation_attempts: 2,
            resume_window_days: 7,
            backup_retention: 5,
            min_valid_ratio: 0.7,
            max_overlay_dismissals: 3,
            page_delay: Duration::ZERO,
            instructions: PageInstructions::default(),
        }
    }
}

impl ScraperConfig {
    /// Create a new config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Root all three directories under `root` (`state/`, `sessions/`, `backups/`).
    pub fn rooted_at(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            state_dir: root.join("state"),
            output_dir: root.join("sessions"),
            backup_dir: root.join("backups"),
            ..Self::default()
        }
    }

    pub fn with_state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.state_dir = dir.into();
        self
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn with_backup_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.backup_dir = dir.into();
        self
    }

    /// Set the per-page extraction budget (minimum 1).
    pub fn with_max_extraction_attempts(mut self, attempts: u32) -> Self {
        self.max_extraction_attempts = attempts.max(1);
        self
    }

    /// Set the per-page navigation budget (minimum 1).
    pub fn with_max_navigation_attempts(mut self, attempts: u32) -> Self {
        self.max_navigation_attempts = attempts.max(1);
        self
    }

    pub fn with_resume_window_days(mut self, days: i64) -> Self {
        self.resume_window_days = days;
        self
    }

    pub fn with_backup_retention(mut self, keep: usize) -> Self {
        self.backup_retention = keep;
        self
    }

    /// Set the valid-record ratio, clamped to [0, 1].
    pub fn with_min_valid_ratio(mut self, ratio: f64) -> Self {
        self.min_valid_ratio = ratio.clamp(0.0, 1.0);
        self
    }

    pub fn with_max_overlay_dismissals(mut self, max: usize) -> Self {
        self.max_overlay_dismissals = max;
        self
    }

    pub fn with_page_delay(mut self, delay: Duration) -> Self {
        self.page_delay = delay;
        self
    }

    pub fn with_instructions(mut self, instructions: PageInstructions) -> Self {
        self.instructions = instructions;
        self
    }
}

/// Natural-language instructions sent to the automation collaborator.
///
/// `{page}` in `go_to_page` is replaced with the target page number.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageInstructions {
    pub extract_products: String,
    pub find_overlays: String,
    pub dismiss_overlay: String,
    pub go_to_page: String,
}

impl Default for PageInstructions {
    fn default() -> Self {
        Self {
            extract_products: "Extract every product listed on this page with its name, \
                description, price and currency, main image URL and weight or size if shown. \
                Also report whether a further page of results exists, the total number of \
                pages if visible, and the URL of the next page if there is one."
                .to_string(),
            find_overlays: "Find cookie banners, newsletter popups or modal dialogs that \
                cover the product listing."
                .to_string(),
            dismiss_overlay: "Close or accept the overlay: {overlay}".to_string(),
            go_to_page: "Go to page {page} of the product listing".to_string(),
        }
    }
}

impl PageInstructions {
    pub fn go_to_page_for(&self, page: u32) -> String {
        self.go_to_page.replace("{page}", &page.to_string())
    }

    pub fn dismiss_overlay_for(&self, overlay: &str) -> String {
        self.dismiss_overlay.replace("{overlay}", overlay)
    }

    /// The extraction instruction with validation feedback appended.
    pub fn extract_with_feedback(&self, issues: &[String], suggestions: &[String]) -> String {
        if issues.is_empty() && suggestions.is_empty() {
            return self.extract_products.clone();
        }

        let mut instruction = self.extract_products.clone();
        if !issues.is_empty() {
            instruction.push_str("\n\nThe previous extraction had these problems:\n");
            for issue in issues {
                instruction.push_str("- ");
                instruction.push_str(issue);
                instruction.push('\n');
            }
        }
        if !suggestions.is_empty() {
            instruction.push_str("\nPlease:\n");
            for suggestion in suggestions {
                instruction.push_str("- ");
                instruction.push_str(suggestion);
                instruction.push('\n');
            }
        }
        instruction
    }
}

/// Configuration for the batch job runner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Worker tasks launched by `run_to_completion`. Default: 3.
    pub workers: usize,

    /// Retries granted to jobs added without an explicit budget. Default: 3.
    pub default_max_retries: u32,

    /// Jobs of one vendor allowed to run at the same time.
    ///
    /// `None` disables the limit. Default: 2.
    pub max_concurrent_per_vendor: Option<usize>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            workers: 3,
            default_max_retries: 3,
            max_concurrent_per_vendor: Some(2),
        }
    }
}

impl RunnerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the worker count (minimum 1).
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_default_max_retries(mut self, retries: u32) -> Self {
        self.default_max_retries = retries;
        self
    }

    pub fn with_max_concurrent_per_vendor(mut self, limit: Option<usize>) -> Self {
        self.max_concurrent_per_vendor = limit.map(|l| l.max(1));
        self
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ScraperConfig::default();
        assert_eq!(config.max_extraction_attempts, 3);
        assert_eq!(config.resume_window_days, 7);
        assert_eq!(config.page_delay, Duration::ZERO);

        let runner = RunnerConfig::default();
        assert_eq!(runner.workers, 3);
        assert_eq!(runner.max_concurrent_per_vendor, Some(2));
    }

    #[test]
    fn test_builders_clamp() {
        let config = ScraperConfig::new()
            .with_max_extraction_attempts(0)
            .with_min_valid_ratio(1.5);
        assert_eq!(config.max_extraction_attempts, 1);
        assert_eq!(config.min_valid_ratio, 1.0);
    }

    #[test]
    fn test_feedback_instruction() {
        let instructions = PageInstructions::default();
        assert_eq!(
            instructions.extract_with_feedback(&[], &[]),
            instructions.extract_products
        );

        let with_feedback = instructions.extract_with_feedback(
            &["2 products missing price".to_string()],
            &["Read the price next to each product".to_string()],
        );
        assert!(with_feedback.contains("- 2 products missing price"));
        assert!(with_feedback.contains("Please:"));
        assert_eq!(instructions.go_to_page_for(4), "Go to page 4 of the product listing");
    }

    #[test]
    fn test_page_delay_serializes_as_millis() {
        let config = ScraperConfig::new().with_page_delay(Duration::from_millis(2000));
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["page_delay"], 2000);

        let back: ScraperConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back.page_delay, Duration::from_millis(2000));
    }
}
