use tracing::debug;
use tt_agents::classifier::ErrorReport;
use tt_core::config::Config;

use super::recovery_manager;

pub fn run(config: &Config, message: &str, stack: Option<&str>) -> anyhow::Result<()> {
    let mut report = ErrorReport::new(message);
    if let Some(stack) = stack {
        report = report.with_stack(stack);
    }
    let classification = recovery_manager(config, None).classify_error(&report);
    debug!(error_type = %classification.error_type, "error classified");
    println!("{}", serde_json::to_string_pretty(&classification)?);
    Ok(())
}
