//! MQTT v5 broker connections backed by rumqttc
//!
//! The module is split into three focused sub-modules:
//!
//! - [`connection`] - Pure endpoint and option construction, error type
//! - [`message_handler`] - Pure routing of rumqttc events
//! - [`client`] - Impure I/O: event loop task, connect/publish/disconnect
//!
//! # Usage
//!
//! ```rust,no_run
//! use bytes::Bytes;
//! use mqtt_publisher::config::Protocol;
//! use mqtt_publisher::transport::mqtt::MqttClient;
//! use mqtt_publisher::transport::{BrokerConnection, ConnectionSettings};
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let settings = ConnectionSettings {
//!     protocol: Protocol::Tcp,
//!     broker_address: "localhost".to_string(),
//!     username: String::new(),
//!     password: String::new(),
//!     clean_session: false,
//!     client_id_prefix: "mqtt-publish".to_string(),
//!     keep_alive: Duration::from_secs(60),
//!     connect_timeout: Duration::from_secs(10),
//!     publish_timeout: Duration::from_secs(10),
//! };
//!
//! let mut client = MqttClient::new(0, settings);
//! client.connect().await?;
//! client.publish("sensors/line-1", Bytes::from("{}")).await?;
//! client.disconnect().await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # }).unwrap();
//! ```

pub mod client;
pub mod connection;
pub mod message_handler;

pub use client::{MqttClient, MqttClientFactory};
pub use connection::{
    configure_mqtt_options, BrokerEndpoint, ConnectionState, MqttError, DEFAULT_TCP_PORT,
    WEBSOCKET_PATH,
};
pub use message_handler::{EventRoute, MessageHandler};
