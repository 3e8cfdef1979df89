use tracing::info;
use tt_core::config::Config;
use tt_core::types::TaskId;

use super::recovery_manager;

pub async fn run(config: &Config, task_id: &str, user: Option<&str>) -> anyhow::Result<()> {
    let task_id = TaskId::from(task_id);
    if !task_id.is_well_formed() {
        anyhow::bail!("invalid task id {task_id:?}: must be non-empty and must not contain ':'");
    }
    let manager = recovery_manager(config, user);
    info!(task_id = %task_id, user_id = manager.user_id(), "clearing checkpoint");
    manager.clear_task_checkpoint(&task_id).await;
    println!("Cleared checkpoint for {task_id} (user {:?}).", manager.user_id());
    Ok(())
}
