use std::path::PathBuf;

use tt_core::config::{ApprovalPolicy, Config, ConfigError, LogFormat, RecoveryModeSetting};

#[test]
fn load_from_reads_a_full_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        r#"
[general]
user_id = "alice"
workspace_root = "/srv/repo"

[bridge]
tool_timeout_secs = 30

[approval]
default_policy = "require_approval"
require_approval = []
deny = ["force_push"]

[recovery]
mode = "heuristic"
recency_window_secs = 900

[logging]
level = "debug"
format = "json"
"#,
    )
    .expect("write config");

    let cfg = Config::load_from(&path).expect("load config");
    assert_eq!(cfg.general.user_id, "alice");
    assert_eq!(cfg.general.workspace_root, Some(PathBuf::from("/srv/repo")));
    assert_eq!(cfg.bridge.tool_timeout_secs, 30);
    assert_eq!(cfg.approval.default_policy, ApprovalPolicy::RequireApproval);
    assert!(cfg.approval.require_approval.is_empty());
    assert_eq!(cfg.approval.deny, vec!["force_push"]);
    assert_eq!(cfg.recovery.mode, RecoveryModeSetting::Heuristic);
    assert_eq!(cfg.recovery.recency_window_secs, 900);
    assert_eq!(cfg.logging.level, "debug");
    assert_eq!(cfg.logging.format, LogFormat::Json);
}

#[test]
fn load_from_missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let err = Config::load_from(dir.path().join("absent.toml")).expect_err("should fail");
    assert!(matches!(err, ConfigError::Io(_)));
}

#[test]
fn written_config_loads_back() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("config.toml");

    let mut cfg = Config::default();
    cfg.general.checkpoint_dir = Some(dir.path().join("checkpoints"));
    cfg.bridge.tool_timeout_secs = 45;
    std::fs::write(&path, cfg.to_toml().expect("serialize")).expect("write");

    let back = Config::load_from(&path).expect("load");
    assert_eq!(back.checkpoint_dir(), dir.path().join("checkpoints"));
    assert_eq!(back.bridge.tool_timeout_secs, 45);
}

#[test]
fn unknown_policy_name_is_a_parse_error() {
    let err = Config::from_toml("[approval]\ndefault_policy = \"sometimes\"\n").expect_err("should fail");
    assert!(matches!(err, ConfigError::Parse(_)));
}
