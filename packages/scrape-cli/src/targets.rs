//! Targets file parsing and session ids.

use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

/// One entry of the targets file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Target {
    pub vendor: String,
    pub category: String,
    pub url: String,
    #[serde(default)]
    pub max_pages: Option<u32>,
}

/// Read `[{vendor, category, url, max_pages?}]` from `path`.
pub fn load(path: &Path) -> Result<Vec<Target>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read targets file {}", path.display()))?;
    parse(&raw).with_context(|| format!("invalid targets file {}", path.display()))
}

pub fn parse(raw: &str) -> Result<Vec<Target>> {
    let targets: Vec<Target> = serde_json::from_str(raw)?;
    if targets.is_empty() {
        bail!("no targets listed");
    }
    for target in &targets {
        if target.vendor.trim().is_empty() || target.category.trim().is_empty() {
            bail!("every target needs a vendor and a category");
        }
        if !target.url.starts_with("http://") && !target.url.starts_with("https://") {
            bail!("target {}/{} has a non-http url", target.vendor, target.category);
        }
    }
    Ok(targets)
}

/// `scraping_YYYYMMDD_HHMMSS_<8 hex>`
pub fn new_session_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!(
        "scraping_{}_{}",
        Utc::now().format("%Y%m%d_%H%M%S"),
        &suffix[..8]
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_targets() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[
                {{"vendor": "asda", "category": "fruit", "url": "https://groceries.example/fruit", "max_pages": 3}},
                {{"vendor": "tesco", "category": "veg", "url": "https://tesco.example/veg"}}
            ]"#
        )
        .unwrap();

        let targets = load(file.path()).unwrap();
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].max_pages, Some(3));
        assert_eq!(targets[1].max_pages, None);
    }

    #[test]
    fn test_rejects_bad_targets() {
        assert!(parse("[]").is_err());
        assert!(parse(r#"[{"vendor": "", "category": "x", "url": "https://x"}]"#).is_err());
        assert!(parse(r#"[{"vendor": "a", "category": "x", "url": "ftp://x"}]"#).is_err());
        assert!(parse(r#"{"vendor": "a"}"#).is_err());
    }

    #[test]
    fn test_session_id_format() {
        let id = new_session_id();
        let parts: Vec<&str> = id.split('_').collect();
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[0], "scraping");
        assert_eq!(parts[1].len(), 8);
        assert_eq!(parts[2].len(), 6);
        assert_eq!(parts[3].len(), 8);
        assert!(parts[3].chars().all(|c| c.is_ascii_hexdigit()));
    }
}
