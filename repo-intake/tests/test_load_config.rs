use repo_intake::load_config::{load_config, ENV_BROKER_URL, ENV_ORG_ID, ENV_STAGING_ROOT};
use repo_intake_core::config::ConcurrencyPolicy;
use serial_test::serial;
use std::env;
use std::fs::write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

fn clear_overrides() {
    env::remove_var(ENV_STAGING_ROOT);
    env::remove_var(ENV_ORG_ID);
    env::remove_var(ENV_BROKER_URL);
}

/// A full config file maps onto every section.
#[tokio::test]
#[serial]
async fn test_load_config_reads_all_sections() {
    clear_overrides();
    let config_yaml = r#"
staging_root: /srv/intake/repos
organization_id: acme
ingest_timeout_secs: 120
concurrency: reject
upload:
  chunk_size: 4096
  max_bytes: 1048576
remote:
  git_binary: /usr/local/bin/git
  fetch_timeout_secs: 60
publisher:
  endpoint: http://broker:8082
  topics: [static-analysis, secrets, licenses]
"#;
    let config_file = NamedTempFile::new().expect("temp file");
    write(config_file.path(), config_yaml).unwrap();

    let config = load_config(Some(config_file.path())).expect("Config should load");

    assert_eq!(config.staging_root, PathBuf::from("/srv/intake/repos"));
    assert_eq!(config.organization_id, "acme");
    assert_eq!(config.ingest_timeout_secs, 120);
    assert_eq!(config.concurrency, ConcurrencyPolicy::Reject);
    assert_eq!(config.upload.chunk_size, 4096);
    assert_eq!(config.upload.max_bytes, 1048576);
    assert_eq!(config.remote.git_binary, PathBuf::from("/usr/local/bin/git"));
    assert_eq!(config.remote.fetch_timeout_secs, 60);
    assert_eq!(config.remote.depth, 1, "unset fields keep their defaults");
    assert_eq!(config.publisher.endpoint.as_deref(), Some("http://broker:8082"));
    assert_eq!(config.publisher.topics.len(), 3);
}

/// No file and an empty file both give the defaults.
#[tokio::test]
#[serial]
async fn test_load_config_defaults() {
    clear_overrides();
    let config = load_config(None::<&Path>).expect("Defaults should load");
    assert_eq!(config.staging_root, PathBuf::from("/data/repos"));
    assert_eq!(config.concurrency, ConcurrencyPolicy::Wait);
    assert!(config.publisher.endpoint.is_none());

    let empty = NamedTempFile::new().expect("temp file");
    let config = load_config(Some(empty.path())).expect("Empty file should load");
    assert_eq!(config.publisher.topics, vec!["static-analysis", "secrets"]);
}

/// Environment variables win over the file.
#[tokio::test]
#[serial]
async fn test_load_config_env_overrides() {
    let config_file = NamedTempFile::new().expect("temp file");
    write(config_file.path(), "staging_root: /from/file\norganization_id: filed\n").unwrap();

    env::set_var(ENV_STAGING_ROOT, "/from/env");
    env::set_var(ENV_ORG_ID, "envorg");
    env::set_var(ENV_BROKER_URL, "http://localhost:8082");
    let config = load_config(Some(config_file.path())).expect("Config should load");
    clear_overrides();

    assert_eq!(config.staging_root, PathBuf::from("/from/env"));
    assert_eq!(config.organization_id, "envorg");
    assert_eq!(config.publisher.endpoint.as_deref(), Some("http://localhost:8082"));
}

/// If the config file is not valid YAML, load_config errors and reports as such.
#[tokio::test]
#[serial]
async fn test_load_config_errors_for_invalid_file() {
    clear_overrides();
    let config_file = NamedTempFile::new().expect("temp file");
    write(config_file.path(), b"not-yaml: [:::").unwrap();

    let err = load_config(Some(config_file.path())).unwrap_err();
    let msg = err.to_string();
    assert!(
        msg.contains("parse") || msg.contains("YAML"),
        "Parse error expected, got: {msg}"
    );
}

#[tokio::test]
#[serial]
async fn test_load_config_errors_for_missing_file() {
    clear_overrides();
    let err = load_config(Some("/nonexistent/intake.yaml")).unwrap_err();
    assert!(err.to_string().contains("Failed to read config file"));
}

#[tokio::test]
#[serial]
async fn test_load_config_rejects_unknown_policy() {
    clear_overrides();
    let config_file = NamedTempFile::new().expect("temp file");
    write(config_file.path(), "concurrency: sometimes\n").unwrap();
    assert!(load_config(Some(config_file.path())).is_err());
}
