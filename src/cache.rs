//! Persistent storage for reading positions, one record per book.
//!
//! Records live under the configured cache directory in a subdirectory named
//! by a hash of the book identifier, so arbitrary ids (paths, URLs, titles)
//! map to safe filenames. Each record is a small TOML file written through a
//! temporary sibling and renamed into place.

use crate::position::PositionRecord;
use anyhow::{Context, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, trace};

const PROGRESS_FILE: &str = "progress.toml";

/// Key-value persistence of the last reading position per book.
#[async_trait]
pub trait ProgressStore: Send + Sync {
    /// Returns `Ok(None)` when nothing has been saved for `book_id`.
    async fn get_progress(&self, book_id: &str) -> Result<Option<PositionRecord>>;

    async fn save_progress(&self, book_id: &str, record: &PositionRecord) -> Result<()>;

    async fn remove_progress(&self, book_id: &str) -> Result<()>;
}

/// Filesystem-backed store rooted at a cache directory.
#[derive(Debug, Clone)]
pub struct FileProgressStore {
    root: PathBuf,
}

impl FileProgressStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn hash_dir(&self, book_id: &str) -> PathBuf {
        hash_dir(&self.root, book_id)
    }

    pub fn progress_path(&self, book_id: &str) -> PathBuf {
        self.hash_dir(book_id).join(PROGRESS_FILE)
    }
}

#[async_trait]
impl ProgressStore for FileProgressStore {
    async fn get_progress(&self, book_id: &str) -> Result<Option<PositionRecord>> {
        let path = self.progress_path(book_id);
        let data = match tokio::fs::read_to_string(&path).await {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                trace!(path = %path.display(), "No saved progress");
                return Ok(None);
            }
            Err(err) => {
                return Err(err).with_context(|| format!("reading {}", path.display()));
            }
        };
        let record = toml::from_str::<PositionRecord>(&data)
            .with_context(|| format!("parsing {}", path.display()))?;
        debug!(path = %path.display(), chapter = record.chapter_index, "Loaded saved progress");
        Ok(Some(record))
    }

    async fn save_progress(&self, book_id: &str, record: &PositionRecord) -> Result<()> {
        let dir = self.hash_dir(book_id);
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("creating {}", dir.display()))?;
        let contents = toml::to_string(record).context("serializing progress record")?;
        let path = dir.join(PROGRESS_FILE);
        let tmp = dir.join(format!("{PROGRESS_FILE}.tmp"));
        tokio::fs::write(&tmp, contents)
            .await
            .with_context(|| format!("writing {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("replacing {}", path.display()))?;
        debug!(
            path = %path.display(),
            chapter = record.chapter_index,
            block = record.block_id.as_deref().unwrap_or("-"),
            "Saved progress"
        );
        Ok(())
    }

    async fn remove_progress(&self, book_id: &str) -> Result<()> {
        let path = self.progress_path(book_id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| format!("removing {}", path.display())),
        }
    }
}

pub fn hash_dir(root: &Path, book_id: &str) -> PathBuf {
    let mut hasher = Sha256::new();
    hasher.update(book_id.as_bytes());
    let hash = format!("{:x}", hasher.finalize());
    root.join(hash)
}

/// In-process store. Can simulate slow or failing writes.
#[derive(Debug, Default)]
pub struct MemoryProgressStore {
    records: Mutex<HashMap<String, PositionRecord>>,
    writes: AtomicUsize,
    fail_writes: AtomicBool,
    write_delay: Mutex<Option<Duration>>,
}

impl MemoryProgressStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_record(book_id: &str, record: PositionRecord) -> Self {
        let store = Self::default();
        store.insert(book_id, record);
        store
    }

    pub fn insert(&self, book_id: &str, record: PositionRecord) {
        if let Ok(mut records) = self.records.lock() {
            records.insert(book_id.to_string(), record);
        }
    }

    pub fn record(&self, book_id: &str) -> Option<PositionRecord> {
        self.records
            .lock()
            .ok()
            .and_then(|records| records.get(book_id).cloned())
    }

    /// Number of successful writes so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn set_write_delay(&self, delay: Option<Duration>) {
        if let Ok(mut slot) = self.write_delay.lock() {
            *slot = delay;
        }
    }

    fn delay(&self) -> Option<Duration> {
        self.write_delay.lock().ok().and_then(|slot| *slot)
    }
}

#[async_trait]
impl ProgressStore for MemoryProgressStore {
    async fn get_progress(&self, book_id: &str) -> Result<Option<PositionRecord>> {
        Ok(self.record(book_id))
    }

    async fn save_progress(&self, book_id: &str, record: &PositionRecord) -> Result<()> {
        if let Some(delay) = self.delay() {
            tokio::time::sleep(delay).await;
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            anyhow::bail!("simulated write failure for {book_id}");
        }
        self.insert(book_id, record.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn remove_progress(&self, book_id: &str) -> Result<()> {
        if let Ok(mut records) = self.records.lock() {
            records.remove(book_id);
        }
        Ok(())
    }
}
