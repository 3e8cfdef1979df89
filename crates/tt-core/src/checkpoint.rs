//! Checkpoint persistence seam.
//!
//! The agent run-loop writes checkpoints; the orchestration core only lists,
//! reads, and deletes them through [`CheckpointStore`]. Two stores ship with
//! the crate: [`MemoryCheckpointStore`] for tests and embedding, and
//! [`FileCheckpointStore`], which keeps one JSON document per thread.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::types::{parse_thread_id, thread_id_for, ParsedThreadId, TaskId};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Listing entry for one persisted thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadSummary {
    pub thread_id: String,
    pub last_checkpoint_id: String,
    /// Human-readable last message.
    pub preview: String,
    pub last_updated: DateTime<Utc>,
}

/// The execution state captured by a checkpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckpointState {
    /// Nodes still scheduled to run. Empty means the thread finished.
    #[serde(default)]
    pub next: Vec<String>,
    #[serde(default)]
    pub values: serde_json::Value,
}

impl CheckpointState {
    pub fn pending(next: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            next: next.into_iter().map(Into::into).collect(),
            values: serde_json::Value::Null,
        }
    }

    pub fn completed() -> Self {
        Self::default()
    }

    pub fn is_complete(&self) -> bool {
        self.next.is_empty()
    }
}

/// A full persisted checkpoint, as written by the agent run-loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub user_id: String,
    pub thread_id: String,
    pub checkpoint_id: String,
    pub preview: String,
    pub updated_at: DateTime<Utc>,
    pub state: CheckpointState,
}

impl CheckpointRecord {
    pub fn new(
        user_id: impl Into<String>,
        task_id: &TaskId,
        checkpoint_id: impl Into<String>,
        preview: impl Into<String>,
        state: CheckpointState,
    ) -> Self {
        let user_id = user_id.into();
        Self {
            thread_id: thread_id_for(&user_id, task_id),
            user_id,
            checkpoint_id: checkpoint_id.into(),
            preview: preview.into(),
            updated_at: Utc::now(),
            state,
        }
    }

    pub fn updated_at(mut self, at: DateTime<Utc>) -> Self {
        self.updated_at = at;
        self
    }

    pub fn summary(&self) -> ThreadSummary {
        ThreadSummary {
            thread_id: self.thread_id.clone(),
            last_checkpoint_id: self.checkpoint_id.clone(),
            preview: self.preview.clone(),
            last_updated: self.updated_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("checkpoint backend error: {0}")]
    Backend(String),
}

pub type Result<T> = std::result::Result<T, CheckpointError>;

// ---------------------------------------------------------------------------
// CheckpointStore
// ---------------------------------------------------------------------------

/// Durable key-value store of execution snapshots keyed by thread id.
///
/// Implementations provide per-thread atomicity for reads and deletes; the
/// orchestration core adds no locking of its own.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// All threads owned by `user_id`, most recently updated first.
    async fn list_user_threads(&self, user_id: &str) -> Result<Vec<ThreadSummary>>;

    /// Latest execution state of a thread, `None` when nothing is stored.
    async fn load_state(&self, thread_id: &str) -> Result<Option<CheckpointState>>;

    /// Remove every checkpoint of a thread. Deleting a missing thread is not an error.
    async fn delete_thread(&self, thread_id: &str) -> Result<()>;

    fn parse_thread_id(&self, thread_id: &str) -> Option<ParsedThreadId> {
        parse_thread_id(thread_id)
    }
}

// ---------------------------------------------------------------------------
// MemoryCheckpointStore
// ---------------------------------------------------------------------------

/// In-process store backed by a concurrent map.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    records: DashMap<String, CheckpointRecord>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the latest checkpoint of a thread.
    pub fn put(&self, record: CheckpointRecord) {
        self.records.insert(record.thread_id.clone(), record);
    }

    pub fn get(&self, thread_id: &str) -> Option<CheckpointRecord> {
        self.records.get(thread_id).map(|r| r.clone())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn list_user_threads(&self, user_id: &str) -> Result<Vec<ThreadSummary>> {
        let mut threads: Vec<ThreadSummary> = self
            .records
            .iter()
            .filter(|r| r.user_id == user_id)
            .map(|r| r.summary())
            .collect();
        threads.sort_by(|a, b| b.last_updated.cmp(&a.last_updated));
        Ok(threads)
    }

    async fn load_state(&self, thread_id: &str) -> Result<Option<CheckpointState>> {
        Ok(self.records.get(thread_id).map(|r| r.state.clone()))
    }

    async fn delete_thread(&self, thread_id: &str) -> Result<()> {
        self.records.remove(thread_id);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FileCheckpointStore
// ---------------------------------------------------------------------------

/// File-system-backed store: one `<encoded thread id>.json` per thread under
/// a base directory. Writes go through a temporary file and a rename so a
/// crash never leaves a half-written checkpoint behind.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    base_dir: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &PathBuf {
        &self.base_dir
    }

    /// Insert or replace the latest checkpoint of a thread.
    pub async fn put(&self, record: &CheckpointRecord) -> Result<()> {
        tokio::fs::create_dir_all(&self.base_dir).await?;
        let path = self.thread_path(&record.thread_id);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_vec_pretty(record)?;
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!(thread_id = %record.thread_id, "checkpoint written");
        Ok(())
    }

    pub async fn get(&self, thread_id: &str) -> Result<Option<CheckpointRecord>> {
        match tokio::fs::read(self.thread_path(thread_id)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn thread_path(&self, thread_id: &str) -> PathBuf {
        self.base_dir.join(format!("{}.json", encode_file_stem(thread_id)))
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn list_user_threads(&self, user_id: &str) -> Result<Vec<ThreadSummary>> {
        let mut entries = match tokio::fs::read_dir(&self.base_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut threads = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = match tokio::fs::read(&path).await {
                Ok(b) => b,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable checkpoint");
                    continue;
                }
            };
            match serde_json::from_slice::<CheckpointRecord>(&bytes) {
                Ok(record) if record.user_id == user_id => threads.push(record.summary()),
                Ok(_) => {}
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping malformed checkpoint");
                }
            }
        }
        threads.sort_by(|a, b| b.last_updated.cmp(&a.last_updated));
        Ok(threads)
    }

    async fn load_state(&self, thread_id: &str) -> Result<Option<CheckpointState>> {
        Ok(self.get(thread_id).await?.map(|r| r.state))
    }

    async fn delete_thread(&self, thread_id: &str) -> Result<()> {
        match tokio::fs::remove_file(self.thread_path(thread_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Percent-encode everything outside `[A-Za-z0-9_.-]` so thread ids map to
/// portable, collision-free file names.
fn encode_file_stem(thread_id: &str) -> String {
    let mut out = String::with_capacity(thread_id.len());
    for b in thread_id.bytes() {
        if b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.') {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{b:02X}"));
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
