//! Configuration for the publisher service
//!
//! Two documents live here:
//!
//! - [`RunConfig`]: the JSON record posted through the control API and
//!   persisted by [`ConfigStore`]. It describes one publish run.
//! - [`ServiceConfig`]: the TOML settings of the service process itself
//!   (listen address, file locations, worker pool size, MQTT timeouts).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use url::Url;

/// Default client identifier prefix; each connection appends its index
pub const DEFAULT_CLIENT_ID_PREFIX: &str = "mqtt-publish";

/// Sentinel message path selecting the whole data document
pub const MESSAGE_PATH_ALL: &str = "all";

const DEFAULT_LISTEN: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 5000);

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Failed to serialize TOML: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),
    #[error("Unrecognized protocol: {0}")]
    UnknownProtocol(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Broker transport variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    /// Raw MQTT over TCP
    Tcp,
    /// MQTT over WebSocket at `/mqtt`
    WebSocket,
}

impl Protocol {
    /// Parse the persisted protocol label ("TCP" or "WS", case-insensitive)
    pub fn parse(label: &str) -> Result<Self, ConfigError> {
        match label.trim().to_ascii_uppercase().as_str() {
            "TCP" => Ok(Protocol::Tcp),
            "WS" | "WEBSOCKET" => Ok(Protocol::WebSocket),
            _ => Err(ConfigError::UnknownProtocol(label.to_string())),
        }
    }

    /// Session-resume preference used when a run does not set one.
    /// TCP resumes a previous session, WebSocket always starts clean.
    pub fn default_clean_session(self) -> bool {
        match self {
            Protocol::Tcp => false,
            Protocol::WebSocket => true,
        }
    }

    /// Label written back to the persisted record
    pub fn label(self) -> &'static str {
        match self {
            Protocol::Tcp => "TCP",
            Protocol::WebSocket => "WS",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Publish run configuration as persisted and exchanged over HTTP
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RunConfig {
    #[serde(alias = "Topic")]
    pub topic: String,
    #[serde(alias = "MessageCount")]
    pub message_count: u32,
    /// Delay between rounds in seconds
    #[serde(alias = "IntervalSeconds")]
    pub interval_seconds: f64,
    #[serde(alias = "Username", default)]
    pub username: String,
    #[serde(alias = "Password", default)]
    pub password: String,
    /// `"all"` or a navigation path into the data document
    #[serde(alias = "MessagePath")]
    pub message_path: String,
    /// `"TCP"` or `"WS"`; validated when a run starts
    #[serde(alias = "Protocol")]
    pub protocol: String,
    #[serde(rename = "MQTTbrokerAddress", alias = "mqttBrokerAddress")]
    pub broker_address: String,
    /// Listen URL(s) of the control API
    #[serde(alias = "UseUrls", default)]
    pub use_urls: String,
    #[serde(alias = "ClientCount")]
    pub client_count: u32,
    /// Overrides the protocol's session-resume default when set
    #[serde(
        alias = "CleanSession",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub clean_session: Option<bool>,
    #[serde(
        alias = "ClientIdPrefix",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub client_id_prefix: Option<String>,
}

impl RunConfig {
    /// Check the record and resolve its protocol
    pub fn validate(&self) -> Result<Protocol, ConfigError> {
        let protocol = Protocol::parse(&self.protocol)?;

        if self.broker_address.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "MQTTbrokerAddress must not be empty".to_string(),
            ));
        }
        if self.topic.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "topic must not be empty".to_string(),
            ));
        }
        if !self.interval_seconds.is_finite() || self.interval_seconds < 0.0 {
            return Err(ConfigError::InvalidConfig(format!(
                "intervalSeconds must be a non-negative number, got {}",
                self.interval_seconds
            )));
        }

        Ok(protocol)
    }

    /// Delay between rounds; call after [`RunConfig::validate`]
    pub fn interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.interval_seconds).unwrap_or(Duration::ZERO)
    }

    /// Effective clean-session flag for the given protocol
    pub fn resolved_clean_session(&self, protocol: Protocol) -> bool {
        self.clean_session
            .unwrap_or_else(|| protocol.default_clean_session())
    }

    /// Effective client identifier prefix
    pub fn client_id_prefix(&self) -> &str {
        self.client_id_prefix
            .as_deref()
            .filter(|prefix| !prefix.is_empty())
            .unwrap_or(DEFAULT_CLIENT_ID_PREFIX)
    }

    /// First usable socket address in `useUrls`, if any.
    /// `*` and `+` hosts bind every interface.
    pub fn listen_addr(&self) -> Option<SocketAddr> {
        self.use_urls
            .split(';')
            .map(str::trim)
            .filter(|candidate| !candidate.is_empty())
            .find_map(parse_listen_url)
    }
}

fn parse_listen_url(candidate: &str) -> Option<SocketAddr> {
    let normalized = candidate.replace("://*", "://0.0.0.0").replace("://+", "://0.0.0.0");
    let url = Url::parse(&normalized).ok()?;
    let port = url.port_or_known_default()?;
    let ip = match url.host()? {
        url::Host::Ipv4(ip) => IpAddr::V4(ip),
        url::Host::Ipv6(ip) => IpAddr::V6(ip),
        url::Host::Domain("localhost") => IpAddr::V4(Ipv4Addr::LOCALHOST),
        url::Host::Domain(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
    };
    Some(SocketAddr::new(ip, port))
}

/// Service process configuration (TOML)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ServiceConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub files: FilesSection,
    #[serde(default)]
    pub runs: RunsSection,
    #[serde(default)]
    pub mqtt: MqttSection,
}

/// Control API section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ServerSection {
    /// Explicit listen address; falls back to the run config's `useUrls`
    pub listen: Option<SocketAddr>,
}

/// File locations
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FilesSection {
    /// Persisted run configuration (JSON)
    #[serde(default = "default_config_path")]
    pub config_path: PathBuf,
    /// Input data document (JSON)
    #[serde(default = "default_data_path")]
    pub data_path: PathBuf,
}

impl Default for FilesSection {
    fn default() -> Self {
        Self {
            config_path: default_config_path(),
            data_path: default_data_path(),
        }
    }
}

fn default_config_path() -> PathBuf {
    PathBuf::from("config.json")
}

fn default_data_path() -> PathBuf {
    PathBuf::from("data.json")
}

/// Run worker pool section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunsSection {
    /// Number of runs executing at once
    #[serde(default = "default_max_concurrent_runs")]
    pub max_concurrent_runs: usize,
    /// Pending run requests accepted before the API answers 503
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Submit one run with the persisted config when the service boots
    #[serde(default = "default_run_on_startup")]
    pub run_on_startup: bool,
}

impl Default for RunsSection {
    fn default() -> Self {
        Self {
            max_concurrent_runs: default_max_concurrent_runs(),
            queue_capacity: default_queue_capacity(),
            run_on_startup: default_run_on_startup(),
        }
    }
}

fn default_max_concurrent_runs() -> usize {
    4
}

fn default_queue_capacity() -> usize {
    16
}

fn default_run_on_startup() -> bool {
    true
}

/// MQTT session timing section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MqttSection {
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    /// Bound on waiting for CONNACK
    #[serde(default = "default_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Bound on waiting for the PUBCOMP of one message
    #[serde(default = "default_timeout_secs")]
    pub publish_timeout_secs: u64,
}

impl Default for MqttSection {
    fn default() -> Self {
        Self {
            keep_alive_secs: default_keep_alive_secs(),
            connect_timeout_secs: default_timeout_secs(),
            publish_timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_keep_alive_secs() -> u64 {
    60
}

fn default_timeout_secs() -> u64 {
    10
}

impl ServiceConfig {
    /// Load service configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: ServiceConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the worker pool or the MQTT layer cannot honor
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.runs.max_concurrent_runs == 0 {
            return Err(ConfigError::InvalidConfig(
                "runs.max_concurrent_runs must be at least 1".to_string(),
            ));
        }
        if self.runs.queue_capacity == 0 {
            return Err(ConfigError::InvalidConfig(
                "runs.queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.mqtt.connect_timeout_secs == 0 || self.mqtt.publish_timeout_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "mqtt timeouts must be at least 1 second".to_string(),
            ));
        }
        Ok(())
    }

    /// Address the control API binds to
    pub fn listen_addr(&self, run_config: Option<&RunConfig>) -> SocketAddr {
        self.server
            .listen
            .or_else(|| run_config.and_then(RunConfig::listen_addr))
            .unwrap_or(DEFAULT_LISTEN)
    }

    /// Render as TOML for `config --show`
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

/// Serialized access to the persisted [`RunConfig`] document.
///
/// Saves hold the write lock across the temp-file write and rename, so a
/// concurrent load never observes a partially written record.
#[derive(Debug)]
pub struct ConfigStore {
    path: PathBuf,
    lock: RwLock<()>,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: RwLock::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the persisted record
    pub async fn load(&self) -> Result<RunConfig, ConfigError> {
        let _guard = self.lock.read().await;
        let content = tokio::fs::read_to_string(&self.path).await?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Replace the persisted record
    pub async fn save(&self, config: &RunConfig) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(config)?;
        let _guard = self.lock.write().await;

        let mut tmp_name = self
            .path
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_else(|| "config.json".into());
        tmp_name.push(".tmp");
        let tmp_path = self.path.with_file_name(tmp_name);

        tokio::fs::write(&tmp_path, content).await?;
        tokio::fs::rename(&tmp_path, &self.path).await?;
        Ok(())
    }

    /// Save, then read back what was written
    pub async fn replace(&self, config: &RunConfig) -> Result<RunConfig, ConfigError> {
        self.save(config).await?;
        self.load().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_run_config() -> RunConfig {
        RunConfig {
            topic: "sensors/line-1".to_string(),
            message_count: 3,
            interval_seconds: 1.5,
            username: "user".to_string(),
            password: "pass".to_string(),
            message_path: "all".to_string(),
            protocol: "TCP".to_string(),
            broker_address: "localhost".to_string(),
            use_urls: "http://*:5000".to_string(),
            client_count: 2,
            clean_session: None,
            client_id_prefix: None,
        }
    }

    #[test]
    fn test_protocol_parse() {
        assert_eq!(Protocol::parse("TCP").unwrap(), Protocol::Tcp);
        assert_eq!(Protocol::parse("tcp").unwrap(), Protocol::Tcp);
        assert_eq!(Protocol::parse("WS").unwrap(), Protocol::WebSocket);
        assert_eq!(Protocol::parse("WebSocket").unwrap(), Protocol::WebSocket);
        assert!(matches!(
            Protocol::parse("UDP"),
            Err(ConfigError::UnknownProtocol(p)) if p == "UDP"
        ));
    }

    #[test]
    fn test_clean_session_defaults_follow_protocol() {
        let config = sample_run_config();
        assert!(!config.resolved_clean_session(Protocol::Tcp));
        assert!(config.resolved_clean_session(Protocol::WebSocket));

        let explicit = RunConfig {
            clean_session: Some(true),
            ..sample_run_config()
        };
        assert!(explicit.resolved_clean_session(Protocol::Tcp));
    }

    #[test]
    fn test_client_id_prefix_default() {
        let mut config = sample_run_config();
        assert_eq!(config.client_id_prefix(), DEFAULT_CLIENT_ID_PREFIX);
        config.client_id_prefix = Some(String::new());
        assert_eq!(config.client_id_prefix(), DEFAULT_CLIENT_ID_PREFIX);
        config.client_id_prefix = Some("line-sim".to_string());
        assert_eq!(config.client_id_prefix(), "line-sim");
    }

    #[test]
    fn test_validate_rejects_bad_records() {
        let bad_protocol = RunConfig {
            protocol: "QUIC".to_string(),
            ..sample_run_config()
        };
        assert!(matches!(
            bad_protocol.validate(),
            Err(ConfigError::UnknownProtocol(_))
        ));

        let negative_interval = RunConfig {
            interval_seconds: -1.0,
            ..sample_run_config()
        };
        assert!(matches!(
            negative_interval.validate(),
            Err(ConfigError::InvalidConfig(_))
        ));

        let empty_broker = RunConfig {
            broker_address: " ".to_string(),
            ..sample_run_config()
        };
        assert!(empty_broker.validate().is_err());

        assert_eq!(sample_run_config().validate().unwrap(), Protocol::Tcp);
    }

    #[test]
    fn test_interval_conversion() {
        let config = sample_run_config();
        assert_eq!(config.interval(), Duration::from_millis(1500));
    }

    #[test]
    fn test_run_config_json_keys() {
        let value = serde_json::to_value(sample_run_config()).unwrap();
        assert_eq!(value["MQTTbrokerAddress"], "localhost");
        assert_eq!(value["messageCount"], 3);
        assert_eq!(value["useUrls"], "http://*:5000");
        assert!(value.get("cleanSession").is_none());
    }

    #[test]
    fn test_run_config_accepts_pascal_case() {
        let config: RunConfig = serde_json::from_value(json!({
            "Topic": "t",
            "MessageCount": 2,
            "IntervalSeconds": 1,
            "Username": "u",
            "Password": "p",
            "MessagePath": "data.value",
            "Protocol": "WS",
            "MQTTbrokerAddress": "broker.local:8083",
            "UseUrls": "http://localhost:5000",
            "ClientCount": 4
        }))
        .unwrap();

        assert_eq!(config.topic, "t");
        assert_eq!(config.client_count, 4);
        assert_eq!(config.interval_seconds, 1.0);
        assert_eq!(config.validate().unwrap(), Protocol::WebSocket);
    }

    #[test]
    fn test_listen_addr_from_use_urls() {
        let config = sample_run_config();
        assert_eq!(
            config.listen_addr(),
            Some("0.0.0.0:5000".parse().unwrap())
        );

        let localhost = RunConfig {
            use_urls: "http://localhost:5050;https://localhost:5051".to_string(),
            ..sample_run_config()
        };
        assert_eq!(
            localhost.listen_addr(),
            Some("127.0.0.1:5050".parse().unwrap())
        );

        let unusable = RunConfig {
            use_urls: String::new(),
            ..sample_run_config()
        };
        assert_eq!(unusable.listen_addr(), None);
    }

    #[test]
    fn test_service_config_defaults() {
        let config: ServiceConfig = toml::from_str("").unwrap();
        assert_eq!(config.files.config_path, PathBuf::from("config.json"));
        assert_eq!(config.files.data_path, PathBuf::from("data.json"));
        assert_eq!(config.runs.max_concurrent_runs, 4);
        assert!(config.runs.run_on_startup);
        assert_eq!(config.mqtt.publish_timeout_secs, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_service_listen_precedence() {
        let mut service = ServiceConfig::default();
        let run = sample_run_config();
        assert_eq!(
            service.listen_addr(Some(&run)),
            "0.0.0.0:5000".parse::<SocketAddr>().unwrap()
        );

        service.server.listen = Some("127.0.0.1:8088".parse().unwrap());
        assert_eq!(
            service.listen_addr(Some(&run)),
            "127.0.0.1:8088".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(service.listen_addr(None), service.server.listen.unwrap());
    }

    #[test]
    fn test_service_config_validation() {
        let mut config = ServiceConfig::default();
        config.runs.max_concurrent_runs = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidConfig(_))
        ));
    }
}
