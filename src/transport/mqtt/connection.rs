//! Pure connection configuration for MQTT sessions
//!
//! Endpoint construction, option building and the error type shared by the
//! impure client. Nothing in here touches the network.

use crate::config::Protocol;
use crate::transport::{ConnectionSettings, Liveness};
use rumqttc::v5::MqttOptions;
use rumqttc::Transport as RumqttcTransport;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Default MQTT port for TCP brokers
pub const DEFAULT_TCP_PORT: u16 = 1883;

/// Path of the MQTT endpoint on WebSocket brokers
pub const WEBSOCKET_PATH: &str = "/mqtt";

const MIN_KEEP_ALIVE: Duration = Duration::from_secs(5);

/// Session state published by the event loop task
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    /// Waiting for CONNACK
    Connecting,
    /// CONNACK received
    Connected,
    /// Event loop stopped with reason
    Disconnected(String),
}

/// MQTT transport errors
#[derive(Debug, Error)]
pub enum MqttError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Connection failed: {0}")]
    ConnectionFailedStr(String),
    #[error("Publishing failed: {0}")]
    PublishFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Publishing failed: {0}")]
    PublishFailedStr(String),
    #[error("Disconnect failed: {0}")]
    DisconnectFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Invalid broker address: {0}")]
    InvalidBrokerAddress(String),
    #[error("Not connected - current state: {state:?}")]
    NotConnected { state: Liveness },
    #[error("Timed out after {timeout:?} waiting for {waiting_for}")]
    Timeout {
        timeout: Duration,
        waiting_for: &'static str,
    },
}

/// Where a connection dials
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerEndpoint {
    Tcp { host: String, port: u16 },
    WebSocket { url: String, port: u16 },
}

impl BrokerEndpoint {
    /// Build the endpoint for `address`.
    ///
    /// TCP dials `<address>:1883` unless the address carries its own port.
    /// WebSocket dials `ws://<address>/mqtt`.
    pub fn resolve(protocol: Protocol, address: &str) -> Result<Self, MqttError> {
        let address = address.trim();
        if address.is_empty() || address.contains("://") || address.contains('/') {
            return Err(MqttError::InvalidBrokerAddress(address.to_string()));
        }

        match protocol {
            Protocol::Tcp => {
                let (host, port) = match address.rsplit_once(':') {
                    Some((host, port)) if !host.contains(':') => {
                        let port = port
                            .parse::<u16>()
                            .map_err(|_| MqttError::InvalidBrokerAddress(address.to_string()))?;
                        (host, port)
                    }
                    _ => (address, DEFAULT_TCP_PORT),
                };
                if host.is_empty() {
                    return Err(MqttError::InvalidBrokerAddress(address.to_string()));
                }
                Ok(BrokerEndpoint::Tcp {
                    host: host.to_string(),
                    port,
                })
            }
            Protocol::WebSocket => {
                let raw = format!("ws://{address}{WEBSOCKET_PATH}");
                let url = Url::parse(&raw)
                    .map_err(|_| MqttError::InvalidBrokerAddress(address.to_string()))?;
                if url.host_str().map_or(true, str::is_empty) {
                    return Err(MqttError::InvalidBrokerAddress(address.to_string()));
                }
                let port = url.port_or_known_default().unwrap_or(80);
                Ok(BrokerEndpoint::WebSocket { url: raw, port })
            }
        }
    }
}

/// Build rumqttc options for the connection at `index`
pub fn configure_mqtt_options(
    index: usize,
    settings: &ConnectionSettings,
) -> Result<MqttOptions, MqttError> {
    let endpoint = BrokerEndpoint::resolve(settings.protocol, &settings.broker_address)?;
    let client_id = settings.client_id(index);

    let mut mqtt_options = match endpoint {
        BrokerEndpoint::Tcp { host, port } => MqttOptions::new(client_id, host, port),
        BrokerEndpoint::WebSocket { url, port } => {
            let mut options = MqttOptions::new(client_id, url, port);
            options.set_transport(RumqttcTransport::Ws);
            options
        }
    };

    if !settings.username.is_empty() {
        mqtt_options.set_credentials(settings.username.clone(), settings.password.clone());
    }

    mqtt_options.set_keep_alive(settings.keep_alive.max(MIN_KEEP_ALIVE));
    mqtt_options.set_clean_start(settings.clean_session);

    Ok(mqtt_options)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_settings(protocol: Protocol, address: &str) -> ConnectionSettings {
        ConnectionSettings {
            protocol,
            broker_address: address.to_string(),
            username: "user".to_string(),
            password: "pass".to_string(),
            clean_session: protocol.default_clean_session(),
            client_id_prefix: "mqtt-publish".to_string(),
            keep_alive: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(10),
            publish_timeout: Duration::from_secs(10),
        }
    }

    #[test]
    fn test_tcp_endpoint_uses_default_port() {
        assert_eq!(
            BrokerEndpoint::resolve(Protocol::Tcp, "broker.local").unwrap(),
            BrokerEndpoint::Tcp {
                host: "broker.local".to_string(),
                port: 1883
            }
        );
    }

    #[test]
    fn test_tcp_endpoint_explicit_port() {
        assert_eq!(
            BrokerEndpoint::resolve(Protocol::Tcp, "10.0.0.5:11883").unwrap(),
            BrokerEndpoint::Tcp {
                host: "10.0.0.5".to_string(),
                port: 11883
            }
        );
        assert!(matches!(
            BrokerEndpoint::resolve(Protocol::Tcp, "broker:notaport"),
            Err(MqttError::InvalidBrokerAddress(_))
        ));
    }

    #[test]
    fn test_websocket_endpoint() {
        assert_eq!(
            BrokerEndpoint::resolve(Protocol::WebSocket, "broker.local:8083").unwrap(),
            BrokerEndpoint::WebSocket {
                url: "ws://broker.local:8083/mqtt".to_string(),
                port: 8083
            }
        );
        assert_eq!(
            BrokerEndpoint::resolve(Protocol::WebSocket, "broker.local").unwrap(),
            BrokerEndpoint::WebSocket {
                url: "ws://broker.local/mqtt".to_string(),
                port: 80
            }
        );
    }

    #[test]
    fn test_invalid_addresses() {
        for address in ["", "  ", "mqtt://broker", "broker/path", ":1883"] {
            assert!(
                BrokerEndpoint::resolve(Protocol::Tcp, address).is_err(),
                "expected rejection of {address:?}"
            );
        }
        assert!(BrokerEndpoint::resolve(Protocol::WebSocket, "ws://broker").is_err());
    }

    #[test]
    fn test_client_ids_follow_index() {
        let settings = test_settings(Protocol::Tcp, "localhost");
        let first = configure_mqtt_options(0, &settings).unwrap();
        let third = configure_mqtt_options(2, &settings).unwrap();
        assert_eq!(first.client_id(), "mqtt-publish-0");
        assert_eq!(third.client_id(), "mqtt-publish-2");
    }

    #[test]
    fn test_configure_tcp_options() {
        let settings = test_settings(Protocol::Tcp, "localhost");
        let options = configure_mqtt_options(0, &settings).unwrap();
        assert_eq!(options.broker_address(), ("localhost".to_string(), 1883));
    }

    #[test]
    fn test_configure_websocket_options() {
        let settings = test_settings(Protocol::WebSocket, "localhost:9001");
        let options = configure_mqtt_options(1, &settings).unwrap();
        assert_eq!(
            options.broker_address(),
            ("ws://localhost:9001/mqtt".to_string(), 9001)
        );
    }

    #[test]
    fn test_configure_rejects_bad_address() {
        let settings = test_settings(Protocol::Tcp, "mqtt://localhost");
        assert!(matches!(
            configure_mqtt_options(0, &settings),
            Err(MqttError::InvalidBrokerAddress(_))
        ));
    }

    #[test]
    fn test_mqtt_error_display() {
        let errors = vec![
            MqttError::ConnectionFailed("refused".to_string().into()),
            MqttError::ConnectionFailedStr("refused".to_string()),
            MqttError::PublishFailed("closed".to_string().into()),
            MqttError::PublishFailedStr("closed".to_string()),
            MqttError::DisconnectFailed("closed".to_string().into()),
            MqttError::InvalidBrokerAddress("x".to_string()),
            MqttError::NotConnected {
                state: Liveness::Failed,
            },
            MqttError::Timeout {
                timeout: Duration::from_secs(1),
                waiting_for: "CONNACK",
            },
        ];

        for error in errors {
            assert!(!error.to_string().is_empty());
        }
    }
}
