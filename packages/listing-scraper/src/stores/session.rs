//! Deduplicating, backup-protected session files.
//!
//! Each mutation follows the same path: take the file lock, copy the current
//! document into the backup directory, apply the change in memory, write the
//! result with an atomic replace, then prune old backups. If any step before
//! the replace fails, the previous document is left untouched.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use lazy_static::lazy_static;
use regex::Regex;
use tracing::{debug, warn};

use super::fs::{self, FileLocks};
use crate::error::{StoreError, StoreResult};
use crate::types::pagination::StateStatus;
use crate::types::product::ProductRecord;
use crate::types::session::{
    MergeResult, PageValidationInfo, ScrapeSession, SessionFile, SessionHandle,
};

lazy_static! {
    static ref BACKUP_STAMP: Regex = Regex::new(r"^\d{8}_\d{6}_\d{6}$").unwrap();
}

pub struct SessionStore {
    output_dir: PathBuf,
    backup_dir: PathBuf,
    backup_retention: usize,
    locks: FileLocks,
}

impl SessionStore {
    pub fn new(output_dir: impl Into<PathBuf>, backup_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            backup_dir: backup_dir.into(),
            backup_retention: 5,
            locks: FileLocks::default(),
        }
    }

    /// Number of backups kept per session file.
    pub fn with_backup_retention(mut self, keep: usize) -> Self {
        self.backup_retention = keep;
        self
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    pub fn handle_for(&self, session_id: &str, vendor: &str, category: &str) -> SessionHandle {
        SessionHandle {
            session_id: session_id.to_string(),
            vendor: vendor.to_string(),
            category: category.to_string(),
            path: self
                .output_dir
                .join(fs::target_file_name(session_id, vendor, category)),
        }
    }

    /// Write an empty session file. Fails if one exists for the triple.
    pub async fn create_session_file(
        &self,
        vendor: &str,
        category: &str,
        session_id: &str,
        category_url: &str,
        max_pages: Option<u32>,
    ) -> StoreResult<SessionHandle> {
        let handle = self.handle_for(session_id, vendor, category);
        let lock = self.locks.for_path(&handle.path);
        let _guard = lock.lock().await;

        if self.exists(&handle.path).await? {
            return Err(StoreError::AlreadyExists { path: handle.path });
        }

        let now = Utc::now();
        let file = SessionFile::new(ScrapeSession {
            session_id: session_id.to_string(),
            vendor: vendor.to_string(),
            category: category.to_string(),
            category_url: category_url.to_string(),
            created_at: now,
            last_updated: now,
            max_pages,
            status: StateStatus::Active,
        });
        fs::write_json_atomic(&handle.path, &file).await?;
        debug!(
            session_id = %session_id,
            vendor = %vendor,
            category = %category,
            path = %handle.path.display(),
            "session file created"
        );
        Ok(handle)
    }

    /// Reopen the session file for the triple, creating it when absent.
    pub async fn open_or_create(
        &self,
        vendor: &str,
        category: &str,
        session_id: &str,
        category_url: &str,
        max_pages: Option<u32>,
    ) -> StoreResult<SessionHandle> {
        let handle = self.handle_for(session_id, vendor, category);
        if self.exists(&handle.path).await? {
            // Fail early on a corrupt or foreign document rather than at the first merge.
            self.load(&handle).await?;
            return Ok(handle);
        }
        match self
            .create_session_file(vendor, category, session_id, category_url, max_pages)
            .await
        {
            Err(StoreError::AlreadyExists { .. }) => Ok(handle),
            other => other,
        }
    }

    /// Read the session file, rejecting one written for another key.
    pub async fn load(&self, handle: &SessionHandle) -> StoreResult<SessionFile> {
        let file: SessionFile = fs::read_json(&handle.path).await?;
        let session = &file.scraping_session;
        if session.session_id != handle.session_id
            || session.vendor != handle.vendor
            || session.category != handle.category
        {
            return Err(StoreError::key_mismatch(
                &handle.path,
                (handle.session_id.as_str(), handle.vendor.as_str(), handle.category.as_str()),
                (session.session_id.as_str(), session.vendor.as_str(), session.category.as_str()),
            ));
        }
        Ok(file)
    }

    /// Merge a page of products into the session file.
    ///
    /// Records sharing an identity key keep the more complete version
    /// (ties go to the incoming record), so merging the same batch twice
    /// leaves the product set unchanged. Page statistics are only counted
    /// for pages past `last_page_processed`, so replaying a page after a
    /// crash does not count it twice.
    pub async fn merge_products(
        &self,
        handle: &SessionHandle,
        new_products: &[ProductRecord],
        page_number: u32,
        validation_info: Option<&PageValidationInfo>,
    ) -> StoreResult<MergeResult> {
        let result = self
            .mutate(handle, |file| {
                let mut result = merge_into(&mut file.products, new_products);

                let stats = &mut file.session_statistics;
                let replayed = stats
                    .last_page_processed
                    .is_some_and(|last| page_number <= last);
                if !replayed {
                    let found = validation_info.map_or(new_products.len(), |v| v.raw_count);
                    stats.total_products_found += found as u64;
                    stats.total_products_validated += new_products.len() as u64;
                    stats.validation_success_rate = if stats.total_products_found == 0 {
                        0.0
                    } else {
                        stats.total_products_validated as f64 / stats.total_products_found as f64
                    };
                    stats.pages_processed += 1;
                    if validation_info.map_or(true, |v| v.passed) {
                        stats.pages_passed_validation += 1;
                    }
                    stats.last_page_processed = Some(page_number);
                }
                stats.products_added += result.products_added as u64;
                stats.products_updated += result.products_updated as u64;

                result.total_products = file.products.len();
                result
            })
            .await?;

        debug!(
            session_id = %handle.session_id,
            vendor = %handle.vendor,
            category = %handle.category,
            page = page_number,
            added = result.products_added,
            updated = result.products_updated,
            duplicates = result.duplicates_removed,
            total = result.total_products,
            "products merged"
        );
        Ok(result)
    }

    /// Record the run status in the session metadata.
    pub async fn set_status(&self, handle: &SessionHandle, status: StateStatus) -> StoreResult<()> {
        self.mutate(handle, |file| file.scraping_session.status = status)
            .await
    }

    async fn mutate<R>(
        &self,
        handle: &SessionHandle,
        apply: impl FnOnce(&mut SessionFile) -> R,
    ) -> StoreResult<R> {
        let lock = self.locks.for_path(&handle.path);
        let _guard = lock.lock().await;

        let mut file = self.load(handle).await?;
        self.backup(&handle.path).await?;

        let result = apply(&mut file);
        file.scraping_session.last_updated = Utc::now();
        fs::write_json_atomic(&handle.path, &file).await?;

        if let Err(e) = self.prune_backups(&handle.path).await {
            warn!(path = %handle.path.display(), error = %e, "failed to prune backups");
        }
        Ok(result)
    }

    async fn exists(&self, path: &Path) -> StoreResult<bool> {
        tokio::fs::try_exists(path)
            .await
            .map_err(|e| StoreError::io(path, e))
    }

    async fn backup(&self, path: &Path) -> StoreResult<PathBuf> {
        fs::ensure_dir(&self.backup_dir).await?;
        let target = self.backup_dir.join(format!(
            "{}.{}.json",
            file_stem(path),
            Utc::now().format("%Y%m%d_%H%M%S_%6f")
        ));
        tokio::fs::copy(path, &target)
            .await
            .map_err(|e| StoreError::io(&target, e))?;
        Ok(target)
    }

    /// Backups of `path` (`{stem}.{timestamp}.json`), oldest first.
    pub async fn backups_of(&self, path: &Path) -> StoreResult<Vec<PathBuf>> {
        let prefix = format!("{}.", file_stem(path));
        let mut backups: Vec<PathBuf> = fs::list_documents(&self.backup_dir)
            .await?
            .into_iter()
            .filter(|p| {
                p.file_stem()
                    .and_then(|s| s.to_str())
                    .and_then(|s| s.strip_prefix(&prefix))
                    .is_some_and(|stamp| BACKUP_STAMP.is_match(stamp))
            })
            .collect();
        backups.sort();
        Ok(backups)
    }

    async fn prune_backups(&self, path: &Path) -> StoreResult<()> {
        let backups = self.backups_of(path).await?;
        let excess = backups.len().saturating_sub(self.backup_retention);
        for old in backups.into_iter().take(excess) {
            tokio::fs::remove_file(&old)
                .await
                .map_err(|e| StoreError::io(&old, e))?;
        }
        Ok(())
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("session")
        .to_string()
}

/// Deduplicating merge of `incoming` into `products`.
fn merge_into(products: &mut Vec<ProductRecord>, incoming: &[ProductRecord]) -> MergeResult {
    let mut index: HashMap<_, usize> = products
        .iter()
        .enumerate()
        .map(|(i, p)| (p.key(), i))
        .collect();

    let mut result = MergeResult::default();
    for record in incoming {
        let key = record.key();
        match index.get(&key) {
            Some(&i) => {
                if record.completeness() >= products[i].completeness() {
                    products[i] = record.clone();
                    result.products_updated += 1;
                } else {
                    result.duplicates_removed += 1;
                }
            }
            None => {
                index.insert(key, products.len());
                products.push(record.clone());
                result.products_added += 1;
            }
        }
    }
    result
}
