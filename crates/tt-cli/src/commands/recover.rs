use tracing::info;
use tt_core::config::Config;

use super::recovery_manager;

pub async fn run(config: &Config, user: Option<&str>, json_output: bool) -> anyhow::Result<()> {
    let manager = recovery_manager(config, user);
    let threads = manager.detect_incomplete_threads(manager.user_id()).await;
    info!(user_id = manager.user_id(), count = threads.len(), mode = ?manager.mode(), "recovery scan finished");

    if json_output {
        println!("{}", serde_json::to_string_pretty(&threads)?);
        return Ok(());
    }

    if threads.is_empty() {
        println!("No interrupted tasks for user {:?}.", manager.user_id());
        return Ok(());
    }

    println!("{:<36} {:<20} {:<25} LAST MESSAGE", "TASK", "CHECKPOINT", "UPDATED");
    for thread in &threads {
        println!(
            "{:<36} {:<20} {:<25} {}",
            thread.task_id,
            thread.last_checkpoint_id,
            thread.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
            thread.last_message.lines().next().unwrap_or_default()
        );
    }
    println!();
    println!(
        "{} interrupted task(s). Resume one by starting it again with resume enabled, or `tether clear <task>` to discard it.",
        threads.len()
    );
    Ok(())
}
