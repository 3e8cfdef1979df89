use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{debug, info, warn};
use tt_bridge::event_bus::EventBus;
use tt_bridge::protocol::{BridgeEvent, EventKind};
use tt_core::checkpoint::{CheckpointStore, ThreadSummary};
use tt_core::config::{RecoveryConfig, RecoveryModeSetting};
use tt_core::types::{thread_id_for, IncompleteThread, TaskId};

use crate::classifier::{ErrorClassification, ErrorClassifier, ErrorReport};

// ---------------------------------------------------------------------------
// RecoveryMode
// ---------------------------------------------------------------------------

/// How a checkpointed thread is judged unfinished.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RecoveryMode {
    /// Non-empty `state.next` in the latest checkpoint.
    #[default]
    Authoritative,
    /// Updated within `window` of now, whatever the stored state says.
    Heuristic { window: Duration },
}

impl RecoveryMode {
    pub const DEFAULT_WINDOW_SECS: i64 = 3600;

    pub fn heuristic_default() -> Self {
        RecoveryMode::Heuristic {
            window: Duration::seconds(Self::DEFAULT_WINDOW_SECS),
        }
    }

    pub fn from_config(config: &RecoveryConfig) -> Self {
        match config.mode {
            RecoveryModeSetting::Authoritative => RecoveryMode::Authoritative,
            RecoveryModeSetting::Heuristic => RecoveryMode::Heuristic {
                window: Duration::seconds(
                    i64::try_from(config.recency_window_secs)
                        .unwrap_or(i64::MAX)
                        .min(i64::MAX / 1000),
                ),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// RecoveryManager
// ---------------------------------------------------------------------------

/// Finds checkpointed threads that never finished and triages run errors.
///
/// Nothing here fails outward: a missing store means there is nothing to
/// recover, and per-thread problems are logged and skipped.
pub struct RecoveryManager {
    user_id: String,
    store: Option<Arc<dyn CheckpointStore>>,
    mode: RecoveryMode,
    classifier: ErrorClassifier,
}

impl RecoveryManager {
    pub fn new(user_id: impl Into<String>, store: Option<Arc<dyn CheckpointStore>>) -> Self {
        let classifier = ErrorClassifier::new(store.is_some());
        Self {
            user_id: user_id.into(),
            store,
            mode: RecoveryMode::default(),
            classifier,
        }
    }

    pub fn from_config(
        user_id: impl Into<String>,
        store: Option<Arc<dyn CheckpointStore>>,
        config: &RecoveryConfig,
    ) -> Self {
        Self::new(user_id, store).with_mode(RecoveryMode::from_config(config))
    }

    pub fn with_mode(mut self, mode: RecoveryMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn mode(&self) -> RecoveryMode {
        self.mode
    }

    pub fn has_store(&self) -> bool {
        self.store.is_some()
    }

    pub fn classifier(&self) -> ErrorClassifier {
        self.classifier
    }

    /// Threads of `user_id` that were interrupted, newest first.
    pub async fn detect_incomplete_threads(&self, user_id: &str) -> Vec<IncompleteThread> {
        let Some(store) = &self.store else {
            debug!("no checkpoint store configured, nothing to recover");
            return Vec::new();
        };

        let threads = match store.list_user_threads(user_id).await {
            Ok(threads) => threads,
            Err(e) => {
                warn!(user_id, error = %e, "failed to list checkpointed threads");
                return Vec::new();
            }
        };

        let mut incomplete = Vec::new();
        for summary in threads {
            if let Some(thread) = self.inspect(store.as_ref(), user_id, summary).await {
                incomplete.push(thread);
            }
        }
        incomplete.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        debug!(user_id, count = incomplete.len(), "incomplete thread scan finished");
        incomplete
    }

    async fn inspect(
        &self,
        store: &dyn CheckpointStore,
        user_id: &str,
        summary: ThreadSummary,
    ) -> Option<IncompleteThread> {
        let Some(parsed) = store.parse_thread_id(&summary.thread_id) else {
            warn!(thread_id = %summary.thread_id, "skipping thread with unparsable id");
            return None;
        };
        if parsed.user_id != user_id {
            debug!(thread_id = %summary.thread_id, "skipping thread owned by another user");
            return None;
        }

        let unfinished = match self.mode {
            RecoveryMode::Authoritative => match store.load_state(&summary.thread_id).await {
                Ok(Some(state)) => !state.is_complete(),
                Ok(None) => false,
                Err(e) => {
                    warn!(thread_id = %summary.thread_id, error = %e, "failed to load checkpoint state");
                    return None;
                }
            },
            RecoveryMode::Heuristic { window } => Utc::now() - summary.last_updated <= window,
        };
        if !unfinished {
            return None;
        }

        Some(IncompleteThread {
            thread_id: summary.thread_id,
            task_id: parsed.task_id,
            last_checkpoint_id: summary.last_checkpoint_id,
            last_message: summary.preview,
            timestamp: summary.last_updated,
        })
    }

    /// Publish one `recovery.incomplete_tasks` event when anything was found.
    /// Returns the number of threads reported.
    pub async fn recover_interrupted_tasks(&self, user_id: &str, bus: &EventBus) -> usize {
        let threads = self.detect_incomplete_threads(user_id).await;
        if threads.is_empty() {
            return 0;
        }
        let count = threads.len();
        info!(user_id, count, "found interrupted tasks");
        bus.publish(BridgeEvent::global(EventKind::RecoveryIncompleteTasks { threads }));
        count
    }

    pub fn classify_error(&self, report: &ErrorReport) -> ErrorClassification {
        self.classifier.classify(report)
    }

    /// Forget a task's checkpoint before it is retried from scratch.
    pub async fn clear_task_checkpoint(&self, task_id: &TaskId) {
        self.clear_thread(&thread_id_for(&self.user_id, task_id)).await;
    }

    /// Delete one checkpoint thread by its full id. Failures are logged and
    /// swallowed.
    pub async fn clear_thread(&self, thread_id: &str) {
        let Some(store) = &self.store else {
            return;
        };
        match store.delete_thread(thread_id).await {
            Ok(()) => info!(thread_id, "checkpoint cleared"),
            Err(e) => warn!(thread_id, error = %e, "failed to clear checkpoint"),
        }
    }
}

impl std::fmt::Debug for RecoveryManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryManager")
            .field("user_id", &self.user_id)
            .field("has_store", &self.has_store())
            .field("mode", &self.mode)
            .finish()
    }
}
