//! Configurable multi-client MQTT publisher
//!
//! An operator posts a run configuration (broker, protocol, credentials,
//! topic, message count and interval, number of simulated clients, payload
//! path) to a small HTTP control API. The service connects that many MQTT
//! clients, publishes a payload drawn from a local JSON document to all of
//! them round after round, and disconnects everything it created.
//!
//! # Quick Start
//!
//! ```rust
//! use mqtt_publisher::config::{MqttSection, RunConfig};
//! use mqtt_publisher::publisher::RunCoordinator;
//! use mqtt_publisher::testing::MockConnectionFactory;
//! use serde_json::json;
//! use tokio::sync::watch;
//!
//! # tokio_test::block_on(async {
//! let config: RunConfig = serde_json::from_value(json!({
//!     "topic": "sensors/line-1",
//!     "messageCount": 2,
//!     "intervalSeconds": 0,
//!     "messagePath": "reading.value",
//!     "protocol": "TCP",
//!     "MQTTbrokerAddress": "localhost",
//!     "clientCount": 3
//! }))
//! .unwrap();
//!
//! let factory = MockConnectionFactory::new();
//! let coordinator = RunCoordinator::new(factory.clone(), MqttSection::default());
//! let (_cancel_tx, cancel_rx) = watch::channel(false);
//!
//! let document = json!({"reading": {"value": 21.5}});
//! let summary = coordinator
//!     .execute_run(&config, &document, cancel_rx)
//!     .await
//!     .unwrap();
//!
//! assert_eq!(summary.publish_attempts, 6);
//! assert_eq!(summary.disconnects_succeeded, 3);
//! # });
//! ```

pub mod config;
pub mod control;
pub mod error;
pub mod observability;
pub mod payload;
pub mod publisher;
pub mod testing;
pub mod transport;

pub use config::{ConfigError, ConfigStore, Protocol, RunConfig, ServiceConfig};
pub use error::{RunError, RunResult};
pub use payload::{PayloadError, PayloadResolver};
pub use publisher::{RunCoordinator, RunSummary};
pub use transport::{BrokerConnection, ConnectionFactory, MqttConnectionFactory};
