use std::fs;

use serial_test::serial;
use tempfile::TempDir;

use super::load_config_from;
use super::settings::{PartialSettings, Settings};

#[test]
fn test_default_settings() {
    let settings = Settings::default();
    assert_eq!(settings.broker.max_inflight, 20);
    assert_eq!(settings.broker.max_queued, 100);
    assert_eq!(settings.broker.retry_interval_secs, 20);
    assert_eq!(settings.broker.store_memory_limit, 0);
    assert_eq!(settings.sys.interval_secs, 10);
    assert!(!settings.persistence.enabled);
    assert_eq!(settings.persistence.path, "mqdb_store");
    assert_eq!(settings.persistence.autosave_interval_secs, 1800);
    assert_eq!(settings.log.level, "info");
}

#[test]
fn test_empty_partial_merges_to_defaults() {
    assert_eq!(PartialSettings::default().merge(), Settings::default());
}

#[test]
fn test_limits_follow_broker_settings() {
    let mut settings = Settings::default();
    settings.broker.max_inflight = 3;
    settings.broker.store_memory_limit = 4096;
    let limits = settings.broker.limits();
    assert_eq!(limits.max_inflight, 3);
    assert_eq!(limits.max_queued, 100);
    assert_eq!(limits.memory_limit, 4096);
}

#[test]
#[serial]
fn test_missing_file_gives_defaults() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("nope");
    let cfg = temp_env::with_vars_unset(
        ["MQDB_BROKER__MAX_INFLIGHT", "MQDB_LOG__LEVEL"],
        || load_config_from(path.to_str().unwrap()),
    )
    .unwrap();
    assert_eq!(cfg, Settings::default());
}

#[test]
#[serial]
fn test_file_overrides_defaults() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("default.toml");
    fs::write(
        &path,
        r#"
            [broker]
            max_inflight = 5
            max_queued = 0

            [persistence]
            enabled = true
            path = "/var/lib/mqdb"
        "#,
    )
    .unwrap();

    let cfg = load_config_from(path.to_str().unwrap()).unwrap();
    assert_eq!(cfg.broker.max_inflight, 5);
    assert_eq!(cfg.broker.max_queued, 0);
    assert_eq!(cfg.broker.retry_interval_secs, 20);
    assert!(cfg.persistence.enabled);
    assert_eq!(cfg.persistence.path, "/var/lib/mqdb");
    assert_eq!(cfg.sys.interval_secs, 10);
}

#[test]
#[serial]
fn test_environment_overrides_file() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("default.toml");
    fs::write(&path, "[broker]\nmax_inflight = 5\n").unwrap();

    let cfg = temp_env::with_vars(
        [
            ("MQDB_BROKER__MAX_INFLIGHT", Some("7")),
            ("MQDB_SYS__INTERVAL_SECS", Some("0")),
            ("MQDB_LOG__LEVEL", Some("debug")),
        ],
        || load_config_from(path.to_str().unwrap()),
    )
    .unwrap();

    assert_eq!(cfg.broker.max_inflight, 7);
    assert_eq!(cfg.sys.interval_secs, 0);
    assert_eq!(cfg.log.level, "debug");
}
