pub mod classify;
pub mod clear;
pub mod config;
pub mod recover;

use std::sync::Arc;

use tt_agents::recovery::RecoveryManager;
use tt_core::checkpoint::{CheckpointStore, FileCheckpointStore};
use tt_core::config::Config;

/// Recovery manager over the file-backed checkpoint store named by `config`.
pub fn recovery_manager(config: &Config, user: Option<&str>) -> RecoveryManager {
    let user = user.unwrap_or(&config.general.user_id);
    let store: Arc<dyn CheckpointStore> = Arc::new(FileCheckpointStore::new(config.checkpoint_dir()));
    RecoveryManager::from_config(user, Some(store), &config.recovery)
}
