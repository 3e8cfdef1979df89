use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tt_agents::classifier::{ErrorReport, ErrorType};
use tt_agents::recovery::{RecoveryManager, RecoveryMode};
use tt_bridge::event_bus::EventBus;
use tt_bridge::protocol::EventKind;
use tt_core::checkpoint::{
    CheckpointError, CheckpointRecord, CheckpointState, CheckpointStore, FileCheckpointStore,
    MemoryCheckpointStore, ThreadSummary,
};
use tt_core::types::TaskId;

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn record(user: &str, task: &str, next: &[&str], age_mins: i64) -> CheckpointRecord {
    CheckpointRecord::new(
        user,
        &TaskId::from(task),
        format!("cp-{task}"),
        format!("working on {task}"),
        CheckpointState::pending(next.iter().copied()),
    )
    .updated_at(Utc::now() - Duration::minutes(age_mins))
}

fn seeded_store() -> Arc<MemoryCheckpointStore> {
    let store = MemoryCheckpointStore::new();
    store.put(record("alice", "task_1_newpending", &["agent"], 1));
    store.put(record("alice", "task_2_completeddd", &[], 2));
    store.put(record("alice", "task_3_oldpending", &["tools"], 180));
    store.put(record("bob", "task_4_bobspendin", &["agent"], 1));
    Arc::new(store)
}

/// Wraps a memory store and fails on command.
struct FlakyStore {
    inner: Arc<MemoryCheckpointStore>,
    fail_load_for: Option<String>,
    fail_listing: bool,
    fail_delete: bool,
    extra_summaries: Vec<ThreadSummary>,
}

impl FlakyStore {
    fn new(inner: Arc<MemoryCheckpointStore>) -> Self {
        Self {
            inner,
            fail_load_for: None,
            fail_listing: false,
            fail_delete: false,
            extra_summaries: Vec::new(),
        }
    }
}

#[async_trait]
impl CheckpointStore for FlakyStore {
    async fn list_user_threads(&self, user_id: &str) -> tt_core::checkpoint::Result<Vec<ThreadSummary>> {
        if self.fail_listing {
            return Err(CheckpointError::Backend("listing unavailable".into()));
        }
        let mut threads = self.inner.list_user_threads(user_id).await?;
        threads.extend(self.extra_summaries.iter().cloned());
        Ok(threads)
    }

    async fn load_state(&self, thread_id: &str) -> tt_core::checkpoint::Result<Option<CheckpointState>> {
        if self.fail_load_for.as_deref() == Some(thread_id) {
            return Err(CheckpointError::Backend(format!("corrupt checkpoint {thread_id}")));
        }
        self.inner.load_state(thread_id).await
    }

    async fn delete_thread(&self, thread_id: &str) -> tt_core::checkpoint::Result<()> {
        if self.fail_delete {
            return Err(CheckpointError::Backend("read-only store".into()));
        }
        self.inner.delete_thread(thread_id).await
    }
}

fn task_ids(threads: &[tt_core::types::IncompleteThread]) -> Vec<&str> {
    threads.iter().map(|t| t.task_id.as_str()).collect()
}

// ---------------------------------------------------------------------------
// Detection
// ---------------------------------------------------------------------------

#[tokio::test]
async fn completed_threads_are_not_offered_for_recovery() {
    let manager = RecoveryManager::new("alice", Some(seeded_store()));
    let threads = manager.detect_incomplete_threads("alice").await;

    assert_eq!(task_ids(&threads), vec!["task_1_newpending", "task_3_oldpending"]);
    let first = &threads[0];
    assert_eq!(first.thread_id, "alice:task_1_newpending");
    assert_eq!(first.last_checkpoint_id, "cp-task_1_newpending");
    assert_eq!(first.last_message, "working on task_1_newpending");
}

#[tokio::test]
async fn detection_is_scoped_to_the_user() {
    let manager = RecoveryManager::new("alice", Some(seeded_store()));
    let threads = manager.detect_incomplete_threads("bob").await;
    assert_eq!(task_ids(&threads), vec!["task_4_bobspendin"]);
    assert!(manager.detect_incomplete_threads("carol").await.is_empty());
}

#[tokio::test]
async fn one_failing_thread_does_not_abort_the_scan() {
    let mut store = FlakyStore::new(seeded_store());
    store.fail_load_for = Some("alice:task_1_newpending".into());
    let manager = RecoveryManager::new("alice", Some(Arc::new(store)));

    let threads = manager.detect_incomplete_threads("alice").await;
    assert_eq!(task_ids(&threads), vec!["task_3_oldpending"]);
}

#[tokio::test]
async fn unparsable_thread_ids_are_skipped() {
    let mut store = FlakyStore::new(seeded_store());
    store.extra_summaries.push(ThreadSummary {
        thread_id: "legacy-thread-without-separator".into(),
        last_checkpoint_id: "cp-x".into(),
        preview: "???".into(),
        last_updated: Utc::now(),
    });
    let manager = RecoveryManager::new("alice", Some(Arc::new(store)));

    let threads = manager.detect_incomplete_threads("alice").await;
    assert_eq!(threads.len(), 2);
}

#[tokio::test]
async fn listing_failure_yields_empty_list() {
    let mut store = FlakyStore::new(seeded_store());
    store.fail_listing = true;
    let manager = RecoveryManager::new("alice", Some(Arc::new(store)));
    assert!(manager.detect_incomplete_threads("alice").await.is_empty());
}

#[tokio::test]
async fn heuristic_mode_uses_recency_window() {
    let manager = RecoveryManager::new("alice", Some(seeded_store())).with_mode(RecoveryMode::Heuristic {
        window: Duration::minutes(60),
    });

    // Recent threads count regardless of state; the three-hour-old one does not.
    let threads = manager.detect_incomplete_threads("alice").await;
    assert_eq!(task_ids(&threads), vec!["task_1_newpending", "task_2_completeddd"]);
    assert_eq!(
        RecoveryMode::heuristic_default(),
        RecoveryMode::Heuristic {
            window: Duration::seconds(3600)
        }
    );
}

#[tokio::test]
async fn file_store_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileCheckpointStore::new(dir.path().join("checkpoints"));
    store
        .put(&record("alice", "task_5_filepends", &["agent"], 5))
        .await
        .unwrap();
    store
        .put(&record("alice", "task_6_filedoneee", &[], 1))
        .await
        .unwrap();

    let manager = RecoveryManager::new("alice", Some(Arc::new(store)));
    let threads = manager.detect_incomplete_threads("alice").await;
    assert_eq!(task_ids(&threads), vec!["task_5_filepends"]);
}

// ---------------------------------------------------------------------------
// Recovery notification
// ---------------------------------------------------------------------------

#[tokio::test]
async fn recovery_publishes_one_event_with_all_threads() {
    let manager = RecoveryManager::new("alice", Some(seeded_store()));
    let bus = EventBus::new();
    let sub = bus.subscribe();

    assert_eq!(manager.recover_interrupted_tasks("alice", &bus).await, 2);

    let event = sub.recv_timeout(StdDuration::from_secs(1)).await.unwrap();
    assert!(event.task_id.is_none());
    match event.kind {
        EventKind::RecoveryIncompleteTasks { threads } => {
            assert_eq!(task_ids(&threads), vec!["task_1_newpending", "task_3_oldpending"])
        }
        other => panic!("unexpected event {other:?}"),
    }
    assert!(sub.try_recv().is_none());
}

#[tokio::test]
async fn recovery_is_silent_when_nothing_is_incomplete() {
    let manager = RecoveryManager::new("carol", Some(seeded_store()));
    let bus = EventBus::new();
    let sub = bus.subscribe();

    assert_eq!(manager.recover_interrupted_tasks("carol", &bus).await, 0);
    assert!(sub.try_recv().is_none());
}

// ---------------------------------------------------------------------------
// Checkpoint clearing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn clear_task_checkpoint_deletes_the_thread() {
    let store = seeded_store();
    let manager = RecoveryManager::new("alice", Some(store.clone()));

    manager
        .clear_task_checkpoint(&TaskId::from("task_1_newpending"))
        .await;
    assert!(store.get("alice:task_1_newpending").is_none());
    assert_eq!(store.len(), 3);

    // Clearing a thread that does not exist is fine too.
    manager
        .clear_task_checkpoint(&TaskId::from("task_9_missingggg"))
        .await;
}

#[tokio::test]
async fn clear_thread_deletes_by_full_thread_id() {
    let store = seeded_store();
    let manager = RecoveryManager::new("alice", Some(store.clone()));

    // Another user's thread can be cleared when named explicitly.
    manager.clear_thread("bob:task_4_bobspendin").await;
    assert!(store.get("bob:task_4_bobspendin").is_none());
    assert!(store.get("alice:task_1_newpending").is_some());
    assert_eq!(store.len(), 3);
}

#[tokio::test]
async fn clear_failures_are_swallowed() {
    let inner = seeded_store();
    let mut store = FlakyStore::new(inner.clone());
    store.fail_delete = true;
    let manager = RecoveryManager::new("alice", Some(Arc::new(store)));

    manager
        .clear_task_checkpoint(&TaskId::from("task_1_newpending"))
        .await;
    assert!(inner.get("alice:task_1_newpending").is_some());
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

#[test]
fn refused_connection_is_recoverable_network_error() {
    let manager = RecoveryManager::new("alice", None);
    let c = manager.classify_error(&ErrorReport::new("fetch failed: ECONNREFUSED"));
    assert_eq!(c.error_type, ErrorType::Network);
    assert!(c.recoverable);
    assert!(c.can_resume);
    assert!(c.can_retry);
}

#[test]
fn unauthorized_is_not_recoverable() {
    let manager = RecoveryManager::new("alice", None);
    let c = manager.classify_error(&ErrorReport::new("401 Unauthorized"));
    assert_eq!(c.error_type, ErrorType::BadRequest);
    assert!(!c.recoverable);
    assert!(!c.can_resume);
    assert!(c.can_retry);
}

#[test]
fn classification_is_deterministic() {
    let with_store = RecoveryManager::new("alice", Some(seeded_store()));
    for message in [
        "fetch failed: ECONNREFUSED",
        "upstream returned 504",
        "403 Forbidden",
        "Uncaught TypeError: x is undefined",
        "something odd",
    ] {
        let report = ErrorReport::new(message).with_stack("at main (index.js:1:1)");
        assert_eq!(with_store.classify_error(&report), with_store.classify_error(&report.clone()));
    }
}

#[test]
fn unknown_errors_depend_on_checkpointing() {
    let report = ErrorReport::new("something odd");
    let with_store = RecoveryManager::new("alice", Some(seeded_store())).classify_error(&report);
    let without = RecoveryManager::new("alice", None).classify_error(&report);

    assert_eq!(with_store.error_type, ErrorType::Unknown);
    assert!(with_store.recoverable && with_store.can_resume);
    assert!(!without.recoverable && !without.can_resume);
    assert!(with_store.can_retry && without.can_retry);
}
