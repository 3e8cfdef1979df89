use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level configuration loaded from `~/.tether/config.toml`.
///
/// Every section is optional in the file; missing sections and keys fall back
/// to the defaults below.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub approval: ApprovalConfig,
    #[serde(default)]
    pub recovery: RecoveryConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load config from `~/.tether/config.toml`, falling back to defaults
    /// when the file does not exist.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(path)
        } else {
            let cfg = Config::default();
            cfg.validate()?;
            Ok(cfg)
        }
    }

    /// Load from a specific path.
    pub fn load_from(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let text = std::fs::read_to_string(&path).map_err(|e| ConfigError::Io(e.to_string()))?;
        Self::from_toml(&text)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let cfg: Config = toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Serialize config to TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        self.validate()?;
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Semantic validation for settings that are not fully expressible via type checks.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.general.user_id.trim().is_empty() {
            return Err(ConfigError::Validation(
                "general.user_id must not be empty".to_string(),
            ));
        }
        if self.bridge.tool_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "bridge.tool_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.recovery.recency_window_secs == 0 {
            return Err(ConfigError::Validation(
                "recovery.recency_window_secs must be greater than zero".to_string(),
            ));
        }
        self.approval.validate()
    }

    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Directory used by the file-backed checkpoint store unless overridden.
    pub fn checkpoint_dir(&self) -> PathBuf {
        self.general
            .checkpoint_dir
            .clone()
            .unwrap_or_else(|| Self::home_dir().join("checkpoints"))
    }

    fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".tether")
    }
}

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(String),
    #[error("parse: {0}")]
    Parse(String),
    #[error("validation: {0}")]
    Validation(String),
}

// ---------------------------------------------------------------------------
// Section structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Owner of checkpoint threads created by this process.
    #[serde(default = "default_user_id")]
    pub user_id: String,
    /// Fallback workspace when a start request does not name one.
    #[serde(default)]
    pub workspace_root: Option<PathBuf>,
    #[serde(default)]
    pub checkpoint_dir: Option<PathBuf>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            user_id: default_user_id(),
            workspace_root: None,
            checkpoint_dir: None,
        }
    }
}

fn default_user_id() -> String {
    "local".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default = "default_tool_timeout")]
    pub tool_timeout_secs: u64,
}

impl BridgeConfig {
    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            tool_timeout_secs: default_tool_timeout(),
        }
    }
}

fn default_tool_timeout() -> u64 {
    120
}

/// Policy governing whether a tool invocation may proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalPolicy {
    /// Trusted tool, runs without human intervention.
    AutoApprove,
    /// Risky tool, the task pauses until a human approves or rejects.
    RequireApproval,
    /// Never allowed.
    Deny,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalConfig {
    /// Policy for tools not listed below.
    #[serde(default = "default_approval_policy")]
    pub default_policy: ApprovalPolicy,
    #[serde(default = "default_require_approval")]
    pub require_approval: Vec<String>,
    #[serde(default)]
    pub deny: Vec<String>,
}

impl ApprovalConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let gated: BTreeSet<&str> = self.require_approval.iter().map(String::as_str).collect();
        if let Some(both) = self.deny.iter().find(|t| gated.contains(t.as_str())) {
            return Err(ConfigError::Validation(format!(
                "approval: tool '{both}' is listed in both require_approval and deny"
            )));
        }
        Ok(())
    }
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            default_policy: default_approval_policy(),
            require_approval: default_require_approval(),
            deny: Vec::new(),
        }
    }
}

fn default_approval_policy() -> ApprovalPolicy {
    ApprovalPolicy::AutoApprove
}
fn default_require_approval() -> Vec<String> {
    vec!["run_terminal_command".to_string()]
}

/// Which signal decides that a checkpointed thread is unfinished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryModeSetting {
    /// Non-empty `state.next` in the persisted checkpoint.
    Authoritative,
    /// Last update within `recency_window_secs`.
    Heuristic,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    #[serde(default = "default_recovery_mode")]
    pub mode: RecoveryModeSetting,
    #[serde(default = "default_recency_window")]
    pub recency_window_secs: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            mode: default_recovery_mode(),
            recency_window_secs: default_recency_window(),
        }
    }
}

fn default_recovery_mode() -> RecoveryModeSetting {
    RecoveryModeSetting::Authoritative
}
fn default_recency_window() -> u64 {
    3600
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Human,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}
fn default_log_format() -> LogFormat {
    LogFormat::Human
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = Config::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.general.user_id, "local");
        assert_eq!(cfg.bridge.tool_timeout(), Duration::from_secs(120));
        assert_eq!(cfg.recovery.mode, RecoveryModeSetting::Authoritative);
        assert_eq!(cfg.recovery.recency_window_secs, 3600);
        assert_eq!(cfg.approval.default_policy, ApprovalPolicy::AutoApprove);
        assert_eq!(cfg.approval.require_approval, vec!["run_terminal_command"]);
    }

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let cfg = Config::from_toml(
            r#"
            [general]
            user_id = "alice"

            [recovery]
            mode = "heuristic"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.general.user_id, "alice");
        assert_eq!(cfg.recovery.mode, RecoveryModeSetting::Heuristic);
        assert_eq!(cfg.recovery.recency_window_secs, 3600);
        assert_eq!(cfg.bridge.tool_timeout_secs, 120);
        assert_eq!(cfg.logging.format, LogFormat::Human);
    }

    #[test]
    fn toml_roundtrip_preserves_values() {
        let mut cfg = Config::default();
        cfg.general.user_id = "bob".into();
        cfg.approval.deny = vec!["delete_file".into()];
        cfg.logging.format = LogFormat::Json;

        let text = cfg.to_toml().unwrap();
        let back = Config::from_toml(&text).unwrap();
        assert_eq!(back.general.user_id, "bob");
        assert_eq!(back.approval.deny, vec!["delete_file"]);
        assert_eq!(back.logging.format, LogFormat::Json);
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let err = Config::from_toml("[bridge]\ntool_timeout_secs = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn tool_both_gated_and_denied_is_rejected() {
        let err = Config::from_toml(
            "[approval]\nrequire_approval = [\"write_file\"]\ndeny = [\"write_file\"]\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("write_file"));
    }

    #[test]
    fn empty_user_id_is_rejected() {
        let err = Config::from_toml("[general]\nuser_id = \"  \"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let err = Config::from_toml("[general\nuser_id = 1").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn checkpoint_dir_override() {
        let mut cfg = Config::default();
        assert!(cfg.checkpoint_dir().ends_with("checkpoints"));
        cfg.general.checkpoint_dir = Some(PathBuf::from("/var/lib/tether"));
        assert_eq!(cfg.checkpoint_dir(), PathBuf::from("/var/lib/tether"));
    }
}
