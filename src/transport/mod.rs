//! Broker connection abstraction
//!
//! The publisher core only needs three capabilities from a broker session:
//! connect, publish with exactly-once intent, and disconnect. This module
//! defines them as traits so the pool and scheduler can be driven by the
//! rumqttc implementation in production and by mocks in tests.

use crate::config::Protocol;
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;

pub mod mqtt;

pub use mqtt::MqttError;

/// Lifecycle of one logical broker connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    /// Created, connect not attempted yet
    Idle,
    /// Session established and usable for publishing
    Connected,
    /// Connect attempt failed; excluded from publishing
    Failed,
    /// Torn down
    Disconnected,
}

/// Per-run connection parameters shared by every connection of a pool
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionSettings {
    pub protocol: Protocol,
    pub broker_address: String,
    pub username: String,
    pub password: String,
    /// Start without resuming a previous broker session
    pub clean_session: bool,
    /// Client identifiers are `<prefix>-<index>`
    pub client_id_prefix: String,
    pub keep_alive: Duration,
    /// Bound on waiting for CONNACK
    pub connect_timeout: Duration,
    /// Bound on waiting for the broker to complete one exactly-once publish
    pub publish_timeout: Duration,
}

impl ConnectionSettings {
    /// Client identifier for the connection at `index`
    pub fn client_id(&self, index: usize) -> String {
        format!("{}-{}", self.client_id_prefix, index)
    }
}

/// One logical broker session
#[async_trait]
pub trait BrokerConnection: Send + Sync {
    /// Creation order inside the pool
    fn index(&self) -> usize;

    fn protocol(&self) -> Protocol;

    fn liveness(&self) -> Liveness;

    /// Establish the session. Failure leaves the connection `Failed`.
    async fn connect(&mut self) -> Result<(), MqttError>;

    /// Send one message with exactly-once delivery and wait for the broker
    /// to complete the exchange
    async fn publish(&mut self, topic: &str, payload: Bytes) -> Result<(), MqttError>;

    /// Close the session. Always leaves the connection `Disconnected`;
    /// a connection that never reached `Connected` succeeds trivially.
    async fn disconnect(&mut self) -> Result<(), MqttError>;
}

/// Creates the connections of a pool
pub trait ConnectionFactory: Send + Sync {
    type Connection: BrokerConnection + 'static;

    fn create(&self, index: usize, settings: &ConnectionSettings) -> Self::Connection;
}

/// Factory for real broker sessions
pub type MqttConnectionFactory = mqtt::MqttClientFactory;
