//! File-backed store of [`PaginationState`] records.
//!
//! One JSON file per (session, vendor, category) under the state directory.
//! Every write is an atomic replace, and writes to the same key are
//! serialized through a per-file lock.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{Duration, Utc};
use tracing::{debug, info, warn};

use super::fs::{self, FileLocks};
use crate::error::{StoreError, StoreResult};
use crate::types::pagination::{PaginationState, SessionSummary, StateStatus};

pub struct PaginationStateStore {
    dir: PathBuf,
    locks: FileLocks,
}

impl PaginationStateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            locks: FileLocks::default(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, session_id: &str, vendor: &str, category: &str) -> PathBuf {
        self.dir
            .join(fs::target_file_name(session_id, vendor, category))
    }

    fn path_of(&self, state: &PaginationState) -> PathBuf {
        self.path_for(&state.session_id, &state.vendor, &state.category)
    }

    /// Create a fresh state (`current_page = 1`, `active`) for a key.
    ///
    /// Fails with [`StoreError::AlreadyExists`] when the key is taken.
    pub async fn create(
        &self,
        session_id: &str,
        vendor: &str,
        category: &str,
        max_pages: Option<u32>,
    ) -> StoreResult<PaginationState> {
        let state = PaginationState::new(session_id, vendor, category, max_pages);
        self.insert(&state).await?;
        Ok(state)
    }

    /// Persist a new state built by the caller; same uniqueness rule as
    /// [`create`](Self::create).
    pub async fn insert(&self, state: &PaginationState) -> StoreResult<()> {
        let path = self.path_of(state);
        let lock = self.locks.for_path(&path);
        let _guard = lock.lock().await;

        if tokio::fs::try_exists(&path)
            .await
            .map_err(|e| StoreError::io(&path, e))?
        {
            return Err(StoreError::AlreadyExists { path });
        }
        fs::write_json_atomic(&path, state).await?;
        debug!(
            session_id = %state.session_id,
            vendor = %state.vendor,
            category = %state.category,
            "pagination state created"
        );
        Ok(())
    }

    pub async fn get(
        &self,
        session_id: &str,
        vendor: &str,
        category: &str,
    ) -> StoreResult<PaginationState> {
        self.find(session_id, vendor, category)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                what: format!("pagination state {}/{}/{}", session_id, vendor, category),
            })
    }

    /// Like [`get`](Self::get) but a missing key is `None`.
    pub async fn find(
        &self,
        session_id: &str,
        vendor: &str,
        category: &str,
    ) -> StoreResult<Option<PaginationState>> {
        let path = self.path_for(session_id, vendor, category);
        read_key(&path, (session_id, vendor, category)).await
    }

    /// Persist the full state, replacing the previous document atomically.
    pub async fn update(&self, state: &PaginationState) -> StoreResult<()> {
        let path = self.path_of(state);
        let lock = self.locks.for_path(&path);
        let _guard = lock.lock().await;
        fs::write_json_atomic(&path, state).await
    }

    /// Persist a running target's state without losing a concurrent
    /// [`pause`](Self::pause).
    ///
    /// If `state` is active but the stored document was moved to paused or
    /// cancelled since it was read, `state.status` takes the stored status
    /// before the write. Callers check `state.status` afterwards.
    pub async fn checkpoint(&self, state: &mut PaginationState) -> StoreResult<()> {
        let path = self.path_of(state);
        let lock = self.locks.for_path(&path);
        let _guard = lock.lock().await;

        if state.status == StateStatus::Active {
            let key = (
                state.session_id.as_str(),
                state.vendor.as_str(),
                state.category.as_str(),
            );
            if let Some(stored) = read_key(&path, key).await? {
                if matches!(stored.status, StateStatus::Paused | StateStatus::Cancelled) {
                    info!(
                        session_id = %state.session_id,
                        vendor = %state.vendor,
                        category = %state.category,
                        status = %stored.status,
                        "target halted while running"
                    );
                    state.status = stored.status;
                }
            }
        }
        fs::write_json_atomic(&path, state).await
    }

    /// Every readable state in the directory. Unreadable files are skipped.
    pub async fn list_all(&self) -> StoreResult<Vec<PaginationState>> {
        let mut states = Vec::new();
        for path in fs::list_documents(&self.dir).await? {
            match fs::read_json::<PaginationState>(&path).await {
                Ok(state) => states.push(state),
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable state file"),
            }
        }
        Ok(states)
    }

    pub async fn list_session(&self, session_id: &str) -> StoreResult<Vec<PaginationState>> {
        Ok(self
            .list_all()
            .await?
            .into_iter()
            .filter(|s| s.session_id == session_id)
            .collect())
    }

    /// Sessions with states that are active, paused or errored and were
    /// updated within `max_age_days`, newest first.
    pub async fn list_resumable(&self, max_age_days: i64) -> StoreResult<Vec<SessionSummary>> {
        let cutoff = Utc::now() - Duration::days(max_age_days);

        let mut by_session: BTreeMap<String, Vec<PaginationState>> = BTreeMap::new();
        for state in self.list_all().await? {
            if state.status.is_resumable() && state.last_updated >= cutoff {
                by_session
                    .entry(state.session_id.clone())
                    .or_default()
                    .push(state);
            }
        }

        let mut summaries: Vec<SessionSummary> = by_session
            .iter()
            .filter_map(|(id, states)| SessionSummary::from_states(id, states))
            .collect();
        summaries.sort_by(|a, b| b.last_updated.cmp(&a.last_updated));
        Ok(summaries)
    }

    pub async fn session_summary(&self, session_id: &str) -> StoreResult<SessionSummary> {
        let states = self.list_session(session_id).await?;
        SessionSummary::from_states(session_id, &states).ok_or_else(|| StoreError::NotFound {
            what: format!("session {}", session_id),
        })
    }

    /// Move every active state of the session to paused. Returns how many changed.
    pub async fn pause(&self, session_id: &str) -> StoreResult<usize> {
        let changed = self
            .transition(session_id, StateStatus::Active, StateStatus::Paused)
            .await?;
        info!(session_id = %session_id, changed, "session paused");
        Ok(changed)
    }

    /// Move every paused state of the session back to active.
    pub async fn resume(&self, session_id: &str) -> StoreResult<usize> {
        let changed = self
            .transition(session_id, StateStatus::Paused, StateStatus::Active)
            .await?;
        info!(session_id = %session_id, changed, "session resumed");
        Ok(changed)
    }

    async fn transition(
        &self,
        session_id: &str,
        from: StateStatus,
        to: StateStatus,
    ) -> StoreResult<usize> {
        let mut changed = 0;
        for path in fs::list_documents(&self.dir).await? {
            let lock = self.locks.for_path(&path);
            let _guard = lock.lock().await;

            // Re-read under the lock so a concurrent update is not lost.
            let mut state: PaginationState = match fs::read_json(&path).await {
                Ok(state) => state,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable state file");
                    continue;
                }
            };
            if state.session_id != session_id || state.status != from {
                continue;
            }
            state.status = to;
            state.touch();
            fs::write_json_atomic(&path, &state).await?;
            changed += 1;
        }
        Ok(changed)
    }

    /// Delete the states of sessions that are entirely completed and whose
    /// states were all last updated more than `days` ago. Returns the removed
    /// session ids.
    pub async fn cleanup_old_sessions(&self, days: i64) -> StoreResult<Vec<String>> {
        let cutoff = Utc::now() - Duration::days(days);

        let mut by_session: BTreeMap<String, Vec<(PathBuf, PaginationState)>> = BTreeMap::new();
        for path in fs::list_documents(&self.dir).await? {
            if let Ok(state) = fs::read_json::<PaginationState>(&path).await {
                by_session
                    .entry(state.session_id.clone())
                    .or_default()
                    .push((path, state));
            }
        }

        let mut removed = Vec::new();
        for (session_id, entries) in by_session {
            let expired = entries.iter().all(|(_, s)| {
                s.status == StateStatus::Completed && s.last_updated < cutoff
            });
            if !expired {
                continue;
            }
            for (path, _) in &entries {
                let lock = self.locks.for_path(path);
                let _guard = lock.lock().await;
                if let Err(e) = tokio::fs::remove_file(path).await {
                    warn!(path = %path.display(), error = %e, "failed to remove state file");
                }
            }
            info!(session_id = %session_id, "cleaned up old session");
            removed.push(session_id);
        }
        Ok(removed)
    }
}

/// Read the state at `path`, rejecting a document stored for another key.
async fn read_key(
    path: &Path,
    (session_id, vendor, category): (&str, &str, &str),
) -> StoreResult<Option<PaginationState>> {
    let state: PaginationState = match fs::read_json(path).await {
        Ok(state) => state,
        Err(StoreError::Io { source, .. }) if source.kind() == std::io::ErrorKind::NotFound => {
            return Ok(None)
        }
        Err(e) => return Err(e),
    };
    if state.session_id != session_id || state.vendor != vendor || state.category != category {
        return Err(StoreError::key_mismatch(
            path,
            (session_id, vendor, category),
            (state.session_id.as_str(), state.vendor.as_str(), state.category.as_str()),
        ));
    }
    Ok(Some(state))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_create_get_update() {
        let dir = TempDir::new().unwrap();
        let store = PaginationStateStore::new(dir.path());

        let mut state = store.create("s1", "shop", "toys", Some(5)).await.unwrap();
        assert_eq!(state.current_page, 1);
        assert_eq!(state.status, StateStatus::Active);

        state.advance_page();
        state.record_progress(12, 12, None);
        store.update(&state).await.unwrap();

        let loaded = store.get("s1", "shop", "toys").await.unwrap();
        assert_eq!(loaded.current_page, 2);
        assert_eq!(loaded.products_scraped, 12);
    }

    #[tokio::test]
    async fn test_create_twice_fails() {
        let dir = TempDir::new().unwrap();
        let store = PaginationStateStore::new(dir.path());

        store.create("s1", "shop", "toys", None).await.unwrap();
        let err = store.create("s1", "shop", "toys", None).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn test_keys_with_shared_underscores_stay_separate() {
        let dir = TempDir::new().unwrap();
        let store = PaginationStateStore::new(dir.path());

        let mut uk = store.create("s1", "shop_uk", "toys", None).await.unwrap();
        uk.current_page = 7;
        store.update(&uk).await.unwrap();

        assert!(store.find("s1", "shop", "uk_toys").await.unwrap().is_none());
        store.create("s1", "shop", "uk_toys", None).await.unwrap();
        store.create("s1", "pets", "dog/food", None).await.unwrap();
        store.create("s1", "pets", "dog food", None).await.unwrap();

        let other = store.get("s1", "shop", "uk_toys").await.unwrap();
        assert_eq!(other.current_page, 1);
        assert_eq!(store.get("s1", "shop_uk", "toys").await.unwrap().current_page, 7);
        assert_eq!(store.list_session("s1").await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_find_rejects_document_of_another_key() {
        let dir = TempDir::new().unwrap();
        let store = PaginationStateStore::new(dir.path());

        store.create("s1", "shop", "toys", None).await.unwrap();
        std::fs::copy(
            store.path_for("s1", "shop", "toys"),
            store.path_for("s1", "shop", "food"),
        )
        .unwrap();

        let err = store.find("s1", "shop", "food").await.unwrap_err();
        assert!(matches!(err, StoreError::KeyMismatch { .. }));
        assert_eq!(store.get("s1", "shop", "toys").await.unwrap().category, "toys");
    }

    #[tokio::test]
    async fn test_checkpoint_keeps_concurrent_pause() {
        let dir = TempDir::new().unwrap();
        let store = PaginationStateStore::new(dir.path());

        let mut running = store.create("s1", "shop", "toys", None).await.unwrap();
        assert_eq!(store.pause("s1").await.unwrap(), 1);

        running.advance_page();
        store.checkpoint(&mut running).await.unwrap();
        assert_eq!(running.status, StateStatus::Paused);

        let stored = store.get("s1", "shop", "toys").await.unwrap();
        assert_eq!(stored.status, StateStatus::Paused);
        assert_eq!(stored.current_page, 2);

        // without a concurrent pause the write goes through unchanged
        store.resume("s1").await.unwrap();
        let mut running = store.get("s1", "shop", "toys").await.unwrap();
        running.advance_page();
        store.checkpoint(&mut running).await.unwrap();
        assert_eq!(running.status, StateStatus::Active);
        assert_eq!(store.get("s1", "shop", "toys").await.unwrap().current_page, 3);
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = PaginationStateStore::new(dir.path());

        let err = store.get("s1", "shop", "toys").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
        assert!(store.find("s1", "shop", "toys").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_pause_and_resume_only_touch_matching_states() {
        let dir = TempDir::new().unwrap();
        let store = PaginationStateStore::new(dir.path());

        store.create("s1", "shop", "toys", None).await.unwrap();
        let mut done = store.create("s1", "shop", "food", None).await.unwrap();
        done.mark_complete();
        store.update(&done).await.unwrap();
        store.create("s2", "shop", "toys", None).await.unwrap();

        assert_eq!(store.pause("s1").await.unwrap(), 1);
        assert_eq!(
            store.get("s1", "shop", "toys").await.unwrap().status,
            StateStatus::Paused
        );
        assert_eq!(
            store.get("s1", "shop", "food").await.unwrap().status,
            StateStatus::Completed
        );
        assert_eq!(
            store.get("s2", "shop", "toys").await.unwrap().status,
            StateStatus::Active
        );

        assert_eq!(store.resume("s1").await.unwrap(), 1);
        assert_eq!(
            store.get("s1", "shop", "toys").await.unwrap().status,
            StateStatus::Active
        );
    }

    #[tokio::test]
    async fn test_list_resumable_filters_status_and_age() {
        let dir = TempDir::new().unwrap();
        let store = PaginationStateStore::new(dir.path());

        store.create("fresh", "shop", "toys", None).await.unwrap();

        let mut stale = PaginationState::new("stale", "shop", "toys", None);
        stale.last_updated = Utc::now() - Duration::days(10);
        store.insert(&stale).await.unwrap();

        let mut finished = PaginationState::new("finished", "shop", "toys", None);
        finished.mark_complete();
        store.insert(&finished).await.unwrap();

        let resumable = store.list_resumable(7).await.unwrap();
        let ids: Vec<_> = resumable.iter().map(|s| s.session_id.as_str()).collect();
        assert_eq!(ids, vec!["fresh"]);

        let wider = store.list_resumable(30).await.unwrap();
        assert_eq!(wider.len(), 2);
    }

    #[tokio::test]
    async fn test_cleanup_removes_only_old_completed_sessions() {
        let dir = TempDir::new().unwrap();
        let store = PaginationStateStore::new(dir.path());

        let mut old_done = PaginationState::new("old", "shop", "toys", None);
        old_done.mark_complete();
        old_done.last_updated = Utc::now() - Duration::days(30);
        store.insert(&old_done).await.unwrap();

        let mut old_active = PaginationState::new("mixed", "shop", "toys", None);
        old_active.last_updated = Utc::now() - Duration::days(30);
        store.insert(&old_active).await.unwrap();

        let removed = store.cleanup_old_sessions(7).await.unwrap();
        assert_eq!(removed, vec!["old".to_string()]);
        assert!(store.find("old", "shop", "toys").await.unwrap().is_none());
        assert!(store.find("mixed", "shop", "toys").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_session_summary() {
        let dir = TempDir::new().unwrap();
        let store = PaginationStateStore::new(dir.path());

        let mut a = store.create("s1", "shop", "toys", Some(4)).await.unwrap();
        a.record_progress(10, 10, None);
        store.update(&a).await.unwrap();
        store.create("s1", "shop", "food", None).await.unwrap();

        let summary = store.session_summary("s1").await.unwrap();
        assert_eq!(summary.total_targets, 2);
        assert_eq!(summary.total_products_scraped, 10);
        assert_eq!(summary.overall_status, StateStatus::Active);

        assert!(matches!(
            store.session_summary("nope").await,
            Err(StoreError::NotFound { .. })
        ));
    }
}
