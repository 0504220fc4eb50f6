//! Persisted run config and service config loading

use mqtt_publisher::config::{ConfigError, ConfigStore, RunConfig, ServiceConfig};
use serde_json::json;
use std::io::Write;
use std::sync::Arc;
use tempfile::{tempdir, NamedTempFile};

mod test_helpers;
use test_helpers::test_run_config;

#[tokio::test]
async fn test_round_trip_is_field_for_field_equal() {
    let dir = tempdir().unwrap();
    let store = ConfigStore::new(dir.path().join("config.json"));

    let mut config = test_run_config(5, 10);
    config.interval_seconds = 0.75;
    config.clean_session = Some(true);
    config.client_id_prefix = Some("bench".to_string());

    store.save(&config).await.unwrap();
    assert_eq!(store.load().await.unwrap(), config);
    assert_eq!(store.replace(&config).await.unwrap(), config);
}

#[tokio::test]
async fn test_persisted_document_uses_wire_keys() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.json");
    let store = ConfigStore::new(&path);
    store.save(&test_run_config(2, 3)).await.unwrap();

    let raw: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    for key in [
        "topic",
        "messageCount",
        "intervalSeconds",
        "username",
        "password",
        "messagePath",
        "protocol",
        "MQTTbrokerAddress",
        "useUrls",
        "clientCount",
    ] {
        assert!(raw.get(key).is_some(), "missing key {key}");
    }
    assert!(raw.get("cleanSession").is_none());
    assert!(!dir.path().join("config.json.tmp").exists());
}

#[tokio::test]
async fn test_pascal_case_records_are_accepted() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(
        &path,
        json!({
            "Topic": "plant/a",
            "MessageCount": 4,
            "IntervalSeconds": 1,
            "Username": "u",
            "Password": "p",
            "MessagePath": "all",
            "Protocol": "WS",
            "MQTTbrokerAddress": "broker:9001",
            "UseUrls": "http://*:5000",
            "ClientCount": 2
        })
        .to_string(),
    )
    .unwrap();

    let config = ConfigStore::new(&path).load().await.unwrap();
    assert_eq!(config.topic, "plant/a");
    assert_eq!(config.message_count, 4);
    assert_eq!(config.interval_seconds, 1.0);
    assert_eq!(config.broker_address, "broker:9001");
    assert_eq!(config.client_count, 2);
}

#[tokio::test]
async fn test_missing_file_is_an_error() {
    let dir = tempdir().unwrap();
    let store = ConfigStore::new(dir.path().join("absent.json"));
    assert!(matches!(store.load().await, Err(ConfigError::FileRead(_))));
}

#[tokio::test]
async fn test_concurrent_saves_never_expose_partial_writes() {
    let dir = tempdir().unwrap();
    let store = Arc::new(ConfigStore::new(dir.path().join("config.json")));
    store.save(&test_run_config(1, 1)).await.unwrap();

    let writers: Vec<_> = (0..8u32)
        .map(|i| {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                let mut config = test_run_config(i, i);
                config.topic = format!("topic/{i}");
                store.save(&config).await.unwrap();
            })
        })
        .collect();
    let readers: Vec<_> = (0..8)
        .map(|_| {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                let config: RunConfig = store.load().await.unwrap();
                assert!(config.topic.starts_with("sensors/") || config.topic.starts_with("topic/"));
            })
        })
        .collect();

    for handle in writers.into_iter().chain(readers) {
        handle.await.unwrap();
    }
}

#[test]
fn test_service_config_defaults_from_empty_file() {
    let temp_file = NamedTempFile::new().unwrap();
    let config = ServiceConfig::load_from_file(temp_file.path()).unwrap();

    assert_eq!(config, ServiceConfig::default());
    assert_eq!(config.runs.max_concurrent_runs, 4);
    assert_eq!(config.runs.queue_capacity, 16);
    assert!(config.runs.run_on_startup);
    assert_eq!(config.mqtt.publish_timeout_secs, 10);
}

#[test]
fn test_service_config_loads_sections() {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(
        temp_file,
        r#"
[server]
listen = "127.0.0.1:8081"

[files]
config_path = "/var/lib/publisher/config.json"
data_path = "/var/lib/publisher/data.json"

[runs]
max_concurrent_runs = 2
queue_capacity = 4
run_on_startup = false

[mqtt]
keep_alive_secs = 30
connect_timeout_secs = 5
publish_timeout_secs = 3
"#
    )
    .unwrap();

    let config = ServiceConfig::load_from_file(temp_file.path()).unwrap();
    assert_eq!(config.listen_addr(None).to_string(), "127.0.0.1:8081");
    assert_eq!(config.runs.max_concurrent_runs, 2);
    assert!(!config.runs.run_on_startup);
    assert_eq!(config.mqtt.keep_alive_secs, 30);
    assert_eq!(
        config.files.data_path.to_str(),
        Some("/var/lib/publisher/data.json")
    );
}

#[test]
fn test_service_config_rejects_zero_workers() {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(temp_file, "[runs]\nmax_concurrent_runs = 0").unwrap();

    assert!(matches!(
        ServiceConfig::load_from_file(temp_file.path()),
        Err(ConfigError::InvalidConfig(_))
    ));
}

#[test]
fn test_listen_address_falls_back_to_use_urls() {
    let config = ServiceConfig::default();
    let mut run_config = test_run_config(1, 1);
    run_config.use_urls = "http://*:5050;http://localhost:6060".to_string();

    assert_eq!(
        config.listen_addr(Some(&run_config)).to_string(),
        "0.0.0.0:5050"
    );
    assert_eq!(config.listen_addr(None).to_string(), "0.0.0.0:5000");
}
