//! JSON-lines file audit store
//!
//! Each record is one line of JSON, appended and `fsync`ed before it
//! becomes visible to readers. An in-memory index mirrors the file for
//! queries. Purges rewrite the surviving records to a temp file and
//! atomically rename it over the log, so a crash mid-purge leaves either
//! the old or the new file, never a mix.

use super::{AuditStore, StoreInfo};
use crate::error::{AuditError, Result};
use crate::types::{EventRecord, RecordFilter};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, RwLock};

/// Marker line preserving the highest id ever assigned across purges
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HighWaterMark {
    high_water_mark: u64,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StoredLine {
    Record(Box<EventRecord>),
    Mark(HighWaterMark),
}

/// File-backed `AuditStore`
pub struct FileAuditStore {
    path: PathBuf,

    /// id → record, mirrors the file contents
    index: RwLock<BTreeMap<u64, EventRecord>>,

    /// Append handle; held for the whole of a purge rewrite
    writer: Mutex<File>,

    high_water: AtomicU64,
}

impl FileAuditStore {
    /// Open (or create) a log file, loading existing records
    ///
    /// A truncated final line left by a crash mid-append is dropped and
    /// the file is repaired. Corruption anywhere else is an error.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                AuditError::storage(
                    "open",
                    format!("Failed to create log directory {}: {}", parent.display(), e),
                )
            })?;
        }

        let (index, high_water, truncated) = load(&path)?;
        let writer = if truncated {
            tracing::warn!(path = %path.display(), "Dropping truncated trailing audit record");
            let survivors: Vec<&EventRecord> = index.values().collect();
            write_atomic(&path, high_water, &survivors)?
        } else {
            open_append(&path)?
        };

        tracing::debug!(
            path = %path.display(),
            records = index.len(),
            high_water,
            "Audit log file opened"
        );

        Ok(Self {
            path,
            index: RwLock::new(index),
            writer: Mutex::new(writer),
            high_water: AtomicU64::new(high_water),
        })
    }

    /// Get the file path
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl AuditStore for FileAuditStore {
    async fn insert(&self, record: &EventRecord) -> Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let mut writer = self.writer.lock().await;

        if self.index.read().await.contains_key(&record.id) {
            return Err(AuditError::storage(
                "append",
                format!("record id {} already exists", record.id),
            ));
        }

        let offset = writer
            .metadata()
            .map_err(|e| AuditError::storage("append", e))?
            .len();

        if let Err(e) = writer
            .write_all(line.as_bytes())
            .and_then(|_| writer.sync_data())
        {
            // Never leave a partial line for the next append to follow
            if let Err(trunc) = writer.set_len(offset) {
                tracing::error!(
                    path = %self.path.display(),
                    error = %trunc,
                    "Failed to truncate partial audit record"
                );
            }
            return Err(AuditError::storage("append", e));
        }

        self.high_water.fetch_max(record.id, Ordering::SeqCst);
        self.index.write().await.insert(record.id, record.clone());
        Ok(())
    }

    async fn scan(&self, filter: &RecordFilter) -> Result<Vec<EventRecord>> {
        let index = self.index.read().await;
        Ok(index
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect())
    }

    async fn last_id(&self) -> Result<u64> {
        Ok(self.high_water.load(Ordering::SeqCst))
    }

    async fn expired_ids(&self, cutoff: u64) -> Result<Vec<u64>> {
        let index = self.index.read().await;
        Ok(super::expired_prefixes(&index, cutoff))
    }

    async fn remove(&self, ids: &[u64]) -> Result<u64> {
        let doomed: HashSet<u64> = ids.iter().copied().collect();
        let mut writer = self.writer.lock().await;

        let (removed, rewritten) = {
            let index = self.index.read().await;
            let removed = index.keys().filter(|id| doomed.contains(*id)).count() as u64;
            if removed == 0 {
                return Ok(0);
            }
            let survivors: Vec<&EventRecord> = index
                .values()
                .filter(|r| !doomed.contains(&r.id))
                .collect();
            let rewritten =
                write_atomic(&self.path, self.high_water.load(Ordering::SeqCst), &survivors)?;
            (removed, rewritten)
        };

        // Nothing fallible between the rename and the swap: the old handle
        // points at the unlinked file and must not see another append
        *writer = rewritten;

        let mut index = self.index.write().await;
        index.retain(|id, _| !doomed.contains(id));
        Ok(removed)
    }

    async fn info(&self) -> Result<StoreInfo> {
        let index = self.index.read().await;
        Ok(StoreInfo {
            provider: "file".to_string(),
            records: index.len() as u64,
            oldest_id: index.keys().next().copied(),
            newest_id: index.keys().next_back().copied(),
        })
    }

    fn name(&self) -> &str {
        "file"
    }
}

/// Parse a log file into (index, high water mark, truncated tail?)
fn load(path: &Path) -> Result<(BTreeMap<u64, EventRecord>, u64, bool)> {
    let mut index = BTreeMap::new();
    if !path.exists() {
        return Ok((index, 0, false));
    }

    let content = std::fs::read_to_string(path).map_err(|e| {
        AuditError::storage(
            "open",
            format!("Failed to read log file {}: {}", path.display(), e),
        )
    })?;

    let mut high_water = 0;
    let mut truncated = false;
    let lines: Vec<&str> = content.split('\n').collect();
    let last = lines.len().saturating_sub(1);

    for (n, line) in lines.iter().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<StoredLine>(line) {
            Ok(StoredLine::Record(record)) => {
                high_water = high_water.max(record.id);
                index.insert(record.id, *record);
            }
            Ok(StoredLine::Mark(mark)) => {
                high_water = high_water.max(mark.high_water_mark);
            }
            // Only an unterminated final line can be a torn write
            Err(_) if n == last => truncated = true,
            Err(e) => {
                return Err(AuditError::storage(
                    "open",
                    format!("Corrupt record at {}:{}: {}", path.display(), n + 1, e),
                ));
            }
        }
    }

    Ok((index, high_water, truncated))
}

fn open_append(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| {
            AuditError::storage(
                "open",
                format!("Failed to open log file {}: {}", path.display(), e),
            )
        })
}

/// Atomic rewrite: write to temp file, fsync, then rename
///
/// Returns an append handle to the new file, opened before the rename so
/// that a successful rename always comes with a usable writer.
fn write_atomic(path: &Path, high_water: u64, records: &[&EventRecord]) -> Result<File> {
    let tmp_path = path.with_extension("tmp");

    let mut buf = serde_json::to_string(&HighWaterMark {
        high_water_mark: high_water,
    })?;
    buf.push('\n');
    for record in records {
        buf.push_str(&serde_json::to_string(record)?);
        buf.push('\n');
    }

    // Leftover from a rewrite that crashed before its rename
    match std::fs::remove_file(&tmp_path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
            return Err(AuditError::storage(
                "purge",
                format!("Failed to clear {}: {}", tmp_path.display(), e),
            ));
        }
        _ => {}
    }

    let mut tmp = OpenOptions::new()
        .create_new(true)
        .append(true)
        .open(&tmp_path)
        .map_err(|e| {
            AuditError::storage(
                "purge",
                format!("Failed to create {}: {}", tmp_path.display(), e),
            )
        })?;
    tmp.write_all(buf.as_bytes())
        .and_then(|_| tmp.sync_all())
        .map_err(|e| {
            AuditError::storage(
                "purge",
                format!("Failed to write {}: {}", tmp_path.display(), e),
            )
        })?;

    std::fs::rename(&tmp_path, path).map_err(|e| {
        AuditError::storage(
            "purge",
            format!(
                "Failed to rename {} → {}: {}",
                tmp_path.display(),
                path.display(),
                e
            ),
        )
    })?;

    tracing::debug!(path = %path.display(), records = records.len(), "Audit log rewritten");
    Ok(tmp)
}
