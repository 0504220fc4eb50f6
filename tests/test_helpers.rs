//! Test helpers and utilities for integration tests

use mqtt_publisher::config::{MqttSection, RunConfig};
use mqtt_publisher::publisher::RunCoordinator;
use mqtt_publisher::testing::MockConnectionFactory;
use serde_json::{json, Value};
use tokio::sync::watch;

/// Run configuration pointing at a broker that is never dialed by mocks
#[allow(dead_code)]
pub fn test_run_config(client_count: u32, message_count: u32) -> RunConfig {
    RunConfig {
        topic: "sensors/line-1".to_string(),
        message_count,
        interval_seconds: 0.0,
        username: "publisher".to_string(),
        password: "s3cret".to_string(),
        message_path: "reading.value".to_string(),
        protocol: "TCP".to_string(),
        broker_address: "localhost".to_string(),
        use_urls: "http://localhost:5000".to_string(),
        client_count,
        clean_session: None,
        client_id_prefix: None,
    }
}

/// Data document matching [`test_run_config`]'s message path
#[allow(dead_code)]
pub fn test_document() -> Value {
    json!({
        "reading": {"value": "21.5", "unit": "C"},
        "history": [{"value": 20.0}, {"value": 20.5}]
    })
}

#[allow(dead_code)]
pub fn mock_coordinator(factory: &MockConnectionFactory) -> RunCoordinator<MockConnectionFactory> {
    RunCoordinator::new(factory.clone(), MqttSection::default())
}

/// Cancellation receiver that never fires
#[allow(dead_code)]
pub fn never_cancelled() -> watch::Receiver<bool> {
    let (_tx, rx) = watch::channel(false);
    rx
}
