use tracing_subscriber::{fmt, EnvFilter};
use tt_core::config::{LogFormat, LoggingConfig};

/// Crates whose events are interesting at the configured level. Everything
/// else (tokio internals, hyper, ...) is capped at `warn`.
const TETHER_TARGETS: &[&str] = &[
    "tt_core",
    "tt_harness",
    "tt_bridge",
    "tt_agents",
    "tt_cli",
    "tether",
];

/// Build the filter used by [`init_logging`].
///
/// `RUST_LOG` wins when it is set and parses; otherwise the workspace crates
/// log at `level` and third-party crates at `warn`.
pub fn build_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives(level)))
}

fn default_directives(level: &str) -> String {
    let level = level.trim();
    let level = if level.is_empty() { "info" } else { level };
    let mut directives = vec!["warn".to_string()];
    directives.extend(TETHER_TARGETS.iter().map(|t| format!("{t}={level}")));
    directives.join(",")
}

/// Install the global subscriber.
///
/// Safe to call multiple times (e.g. in tests) -- subsequent calls are no-ops.
pub fn init_logging(service_name: &str, level: &str, format: LogFormat) {
    let filter = build_filter(level);

    let installed = match format {
        LogFormat::Human => fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_level(true)
            .try_init()
            .is_ok(),
        LogFormat::Json => fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .with_current_span(true)
            .with_level(true)
            .try_init()
            .is_ok(),
    };

    if installed {
        tracing::info!(service = service_name, format = ?format, "logging initialised");
    }
}

/// Convenience wrapper over [`init_logging`] for a loaded config section.
pub fn init_from_config(service_name: &str, config: &LoggingConfig) {
    init_logging(service_name, &config.level, config.format);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directives_cap_third_party_crates() {
        let d = default_directives("debug");
        assert!(d.starts_with("warn,"));
        assert!(d.contains("tt_agents=debug"));
        assert!(d.contains("tt_bridge=debug"));
    }

    #[test]
    fn blank_level_falls_back_to_info() {
        let d = default_directives("  ");
        assert!(d.contains("tt_core=info"));
    }
}
