//! Durable JSON file primitives and per-file lock registry.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};

const TEMP_MARKER: &str = ".tmp-";

/// Serializes writers of the same file within this process.
#[derive(Default)]
pub(crate) struct FileLocks {
    locks: DashMap<PathBuf, Arc<Mutex<()>>>,
}

impl FileLocks {
    pub(crate) fn for_path(&self, path: &Path) -> Arc<Mutex<()>> {
        self.locks
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

/// Separates the key parts of a file name; never produced by [`encode_component`].
pub const KEY_SEPARATOR: char = '+';

/// Percent-encode a key part so it is safe in a file name and reversible.
///
/// Only `[A-Za-z0-9_~-]` stay literal; `.` is encoded too, so no part can
/// start a hidden file or look like a temp suffix.
pub fn encode_component(value: &str) -> String {
    urlencoding::encode(value).replace('.', "%2E")
}

/// `{session}+{vendor}+{category}.json`, each part percent-encoded.
pub fn target_file_name(session_id: &str, vendor: &str, category: &str) -> String {
    format!(
        "{}{sep}{}{sep}{}.json",
        encode_component(session_id),
        encode_component(vendor),
        encode_component(category),
        sep = KEY_SEPARATOR,
    )
}

/// Leftovers of interrupted writes; never treated as documents.
pub(crate) fn is_temp_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.contains(TEMP_MARKER))
}

pub(crate) fn is_document(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "json") && !is_temp_file(path)
}

pub(crate) async fn ensure_dir(dir: &Path) -> StoreResult<()> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| StoreError::io(dir, e))
}

/// Write `value` as JSON so that `path` holds either its old content or the
/// complete new document, never a partial one.
pub(crate) async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> StoreResult<()> {
    let bytes = serde_json::to_vec_pretty(value).map_err(|e| StoreError::json(path, e))?;

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    ensure_dir(dir).await?;

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("document");
    let tmp = dir.join(format!(".{}{}{}", file_name, TEMP_MARKER, Uuid::new_v4()));

    let written = write_and_sync(&tmp, &bytes).await;
    let result = match written {
        Ok(()) => tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| StoreError::io(path, e)),
        Err(e) => Err(e),
    };

    if result.is_err() {
        let _ = tokio::fs::remove_file(&tmp).await;
    }
    result
}

async fn write_and_sync(tmp: &Path, bytes: &[u8]) -> StoreResult<()> {
    let mut file = tokio::fs::File::create(tmp)
        .await
        .map_err(|e| StoreError::io(tmp, e))?;
    file.write_all(bytes)
        .await
        .map_err(|e| StoreError::io(tmp, e))?;
    file.sync_all().await.map_err(|e| StoreError::io(tmp, e))
}

pub(crate) async fn read_json<T: DeserializeOwned>(path: &Path) -> StoreResult<T> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| StoreError::io(path, e))?;
    serde_json::from_slice(&bytes).map_err(|e| StoreError::json(path, e))
}

/// Documents directly under `dir`; a missing directory is empty.
pub(crate) async fn list_documents(dir: &Path) -> StoreResult<Vec<PathBuf>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(StoreError::io(dir, e)),
    };

    let mut paths = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| StoreError::io(dir, e))?
    {
        let path = entry.path();
        if is_document(&path) {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}
