/// Integration tests for relay config loading.
///
/// Tests default values, overrides and value validation.
use relay::config::{ConfigError, load_config_from_path, load_config_from_str};
use std::io::Write;

fn write_config(toml: &str) -> tempfile::NamedTempFile {
    let mut f = tempfile::NamedTempFile::new().expect("create temp file");
    write!(f, "{toml}").expect("write config");
    f
}

#[test]
fn full_config_loads_ok() {
    let file = write_config(
        r#"
[server]
bind = "127.0.0.1:9000"
workers = 2

[broker]
url = "redis://cache:6379"
pool_size = 8
topic = "lobby"

[cors]
allow_origins = ["https://a.example", "https://b.example"]
allow_credentials = false
"#,
    );
    let cfg = load_config_from_path(file.path()).expect("should load");
    assert_eq!(cfg.server.bind.to_string(), "127.0.0.1:9000");
    assert_eq!(cfg.server.workers, Some(2));
    assert_eq!(cfg.broker.url, "redis://cache:6379");
    assert_eq!(cfg.broker.pool_size, 8);
    assert_eq!(cfg.broker.topic, "lobby");
    assert_eq!(cfg.cors.allow_origins.len(), 2);
    assert!(!cfg.cors.is_wildcard());
    assert!(!cfg.cors.allow_credentials);
}

#[test]
fn partial_sections_fill_defaults() {
    let cfg = load_config_from_str("[broker]\npool_size = 2\n").unwrap();
    assert_eq!(cfg.broker.pool_size, 2);
    assert_eq!(cfg.broker.url, "memory://");
    assert_eq!(cfg.broker.topic, "general");
    assert_eq!(cfg.server.bind.to_string(), "0.0.0.0:8080");
    assert_eq!(cfg.server.workers, None);
    assert!(cfg.cors.allow_credentials);
}

#[test]
fn missing_file_is_io_error() {
    let err = load_config_from_path(std::path::Path::new("/nonexistent/relay.toml")).unwrap_err();
    assert!(matches!(err, ConfigError::Io(_)));
}

#[test]
fn invalid_toml_is_parse_error() {
    let err = load_config_from_str("[broker\nurl = ").unwrap_err();
    assert!(matches!(err, ConfigError::Parse(_)));
}

#[test]
fn unknown_key_is_parse_error() {
    let err = load_config_from_str("[broker]\nhost = \"x\"\n").unwrap_err();
    assert!(matches!(err, ConfigError::Parse(_)));
}

#[test]
fn zero_pool_size_rejected() {
    let err = load_config_from_str("[broker]\npool_size = 0\n").unwrap_err();
    assert!(matches!(err, ConfigError::InvalidValue(_)));
}

#[test]
fn zero_workers_rejected() {
    let err = load_config_from_str("[server]\nworkers = 0\n").unwrap_err();
    assert!(matches!(err, ConfigError::InvalidValue(_)));
}

#[test]
fn empty_topic_rejected() {
    let err = load_config_from_str("[broker]\ntopic = \"\"\n").unwrap_err();
    assert!(matches!(err, ConfigError::InvalidValue(_)));
}

#[test]
fn empty_origin_list_rejected() {
    let err = load_config_from_str("[cors]\nallow_origins = []\n").unwrap_err();
    assert!(matches!(err, ConfigError::InvalidValue(_)));
}

#[test]
fn bad_bind_rejected() {
    let err = load_config_from_str("[server]\nbind = \"not-an-addr\"\n").unwrap_err();
    assert!(matches!(err, ConfigError::InvalidValue(_)));
}
