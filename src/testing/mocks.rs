//! Mock broker connections for testing
//!
//! [`MockConnectionFactory`] hands out [`MockConnection`]s that record every
//! call in a shared journal and fail on demand, so pool, scheduler and
//! coordinator behavior can be checked without a broker.

use crate::config::Protocol;
use crate::transport::{BrokerConnection, ConnectionFactory, ConnectionSettings, Liveness, MqttError};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// One recorded call against a mock connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Created {
        client: usize,
        client_id: String,
        clean_session: bool,
    },
    Connect {
        client: usize,
        succeeded: bool,
    },
    Publish {
        client: usize,
        topic: String,
        payload: String,
        succeeded: bool,
        at: Instant,
    },
    Disconnect {
        client: usize,
        succeeded: bool,
    },
}

type Journal = Arc<Mutex<Vec<ConnectionEvent>>>;
type SpanLog = Arc<Mutex<Vec<Option<&'static str>>>>;

#[derive(Debug, Clone, Default)]
struct Behavior {
    fail_connect: HashSet<usize>,
    fail_publish: HashSet<usize>,
    fail_disconnect: HashSet<usize>,
    panic_on_publish: Option<usize>,
    publish_delay: Option<Duration>,
    cancel_after: Option<(usize, Arc<watch::Sender<bool>>)>,
}

/// Factory producing journaled mock connections
#[derive(Debug, Clone, Default)]
pub struct MockConnectionFactory {
    journal: Journal,
    spans: SpanLog,
    behavior: Arc<Behavior>,
    publishes: Arc<AtomicUsize>,
}

impl MockConnectionFactory {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_behavior(mut self, update: impl FnOnce(&mut Behavior)) -> Self {
        let mut behavior = (*self.behavior).clone();
        update(&mut behavior);
        self.behavior = Arc::new(behavior);
        self
    }

    /// Connections at these indices fail to connect
    pub fn failing_connect(self, indices: impl IntoIterator<Item = usize>) -> Self {
        self.with_behavior(|b| b.fail_connect.extend(indices))
    }

    /// Connections at these indices fail every publish
    pub fn failing_publish(self, indices: impl IntoIterator<Item = usize>) -> Self {
        self.with_behavior(|b| b.fail_publish.extend(indices))
    }

    /// Connections at these indices fail to disconnect
    pub fn failing_disconnect(self, indices: impl IntoIterator<Item = usize>) -> Self {
        self.with_behavior(|b| b.fail_disconnect.extend(indices))
    }

    /// The connection at `index` panics when asked to publish
    pub fn panicking_publish(self, index: usize) -> Self {
        self.with_behavior(|b| b.panic_on_publish = Some(index))
    }

    /// Every publish takes `delay` before completing
    pub fn with_publish_delay(self, delay: Duration) -> Self {
        self.with_behavior(|b| b.publish_delay = Some(delay))
    }

    /// Raise `cancel` once `count` publishes have been attempted
    pub fn cancel_after_publishes(self, count: usize, cancel: watch::Sender<bool>) -> Self {
        self.with_behavior(|b| b.cancel_after = Some((count, Arc::new(cancel))))
    }

    /// Everything recorded so far, in call order
    pub fn journal(&self) -> Vec<ConnectionEvent> {
        self.journal.lock().map(|j| j.clone()).unwrap_or_default()
    }

    /// Name of the tracing span active during each connect, publish and
    /// disconnect call, in call order
    pub fn operation_spans(&self) -> Vec<Option<&'static str>> {
        self.spans.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Indices of created connections, in creation order
    pub fn created(&self) -> Vec<usize> {
        self.journal()
            .into_iter()
            .filter_map(|event| match event {
                ConnectionEvent::Created { client, .. } => Some(client),
                _ => None,
            })
            .collect()
    }

    /// Client ids handed to created connections
    pub fn client_ids(&self) -> Vec<String> {
        self.journal()
            .into_iter()
            .filter_map(|event| match event {
                ConnectionEvent::Created { client_id, .. } => Some(client_id),
                _ => None,
            })
            .collect()
    }

    /// Indices of connect attempts, in call order
    pub fn connect_attempts(&self) -> Vec<usize> {
        self.journal()
            .into_iter()
            .filter_map(|event| match event {
                ConnectionEvent::Connect { client, .. } => Some(client),
                _ => None,
            })
            .collect()
    }

    /// `(client, payload)` of every publish attempt, in call order
    pub fn publish_attempts(&self) -> Vec<(usize, String)> {
        self.journal()
            .into_iter()
            .filter_map(|event| match event {
                ConnectionEvent::Publish {
                    client, payload, ..
                } => Some((client, payload)),
                _ => None,
            })
            .collect()
    }

    /// Instants of every publish attempt, in call order
    pub fn publish_times(&self) -> Vec<Instant> {
        self.journal()
            .into_iter()
            .filter_map(|event| match event {
                ConnectionEvent::Publish { at, .. } => Some(at),
                _ => None,
            })
            .collect()
    }

    /// Indices of disconnect attempts, in call order
    pub fn disconnect_attempts(&self) -> Vec<usize> {
        self.journal()
            .into_iter()
            .filter_map(|event| match event {
                ConnectionEvent::Disconnect { client, .. } => Some(client),
                _ => None,
            })
            .collect()
    }
}

impl ConnectionFactory for MockConnectionFactory {
    type Connection = MockConnection;

    fn create(&self, index: usize, settings: &ConnectionSettings) -> MockConnection {
        record(
            &self.journal,
            ConnectionEvent::Created {
                client: index,
                client_id: settings.client_id(index),
                clean_session: settings.clean_session,
            },
        );
        MockConnection {
            index,
            protocol: settings.protocol,
            liveness: Liveness::Idle,
            journal: Arc::clone(&self.journal),
            spans: Arc::clone(&self.spans),
            behavior: Arc::clone(&self.behavior),
            publishes: Arc::clone(&self.publishes),
        }
    }
}

fn record_span(spans: &SpanLog) {
    let name = tracing::Span::current().metadata().map(|m| m.name());
    if let Ok(mut entries) = spans.lock() {
        entries.push(name);
    }
}

fn record(journal: &Journal, event: ConnectionEvent) {
    if let Ok(mut entries) = journal.lock() {
        entries.push(event);
    }
}

/// Connection that only talks to the journal
#[derive(Debug)]
pub struct MockConnection {
    index: usize,
    protocol: Protocol,
    liveness: Liveness,
    journal: Journal,
    spans: SpanLog,
    behavior: Arc<Behavior>,
    publishes: Arc<AtomicUsize>,
}

#[async_trait]
impl BrokerConnection for MockConnection {
    fn index(&self) -> usize {
        self.index
    }

    fn protocol(&self) -> Protocol {
        self.protocol
    }

    fn liveness(&self) -> Liveness {
        self.liveness
    }

    async fn connect(&mut self) -> Result<(), MqttError> {
        record_span(&self.spans);
        let succeeded = !self.behavior.fail_connect.contains(&self.index);
        record(
            &self.journal,
            ConnectionEvent::Connect {
                client: self.index,
                succeeded,
            },
        );

        if succeeded {
            self.liveness = Liveness::Connected;
            Ok(())
        } else {
            self.liveness = Liveness::Failed;
            Err(MqttError::ConnectionFailedStr(format!(
                "mock broker refused client {}",
                self.index
            )))
        }
    }

    async fn publish(&mut self, topic: &str, payload: Bytes) -> Result<(), MqttError> {
        if self.liveness != Liveness::Connected {
            return Err(MqttError::NotConnected {
                state: self.liveness,
            });
        }
        record_span(&self.spans);
        if self.behavior.panic_on_publish == Some(self.index) {
            panic!("mock publish panic on client {}", self.index);
        }
        if let Some(delay) = self.behavior.publish_delay {
            tokio::time::sleep(delay).await;
        }

        let succeeded = !self.behavior.fail_publish.contains(&self.index);
        record(
            &self.journal,
            ConnectionEvent::Publish {
                client: self.index,
                topic: topic.to_string(),
                payload: String::from_utf8_lossy(&payload).into_owned(),
                succeeded,
                at: Instant::now(),
            },
        );

        let attempted = self.publishes.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((count, cancel)) = &self.behavior.cancel_after {
            if attempted >= *count {
                let _ = cancel.send(true);
            }
        }

        if succeeded {
            Ok(())
        } else {
            Err(MqttError::PublishFailedStr(format!(
                "mock publish rejected for client {}",
                self.index
            )))
        }
    }

    async fn disconnect(&mut self) -> Result<(), MqttError> {
        record_span(&self.spans);
        let succeeded = !self.behavior.fail_disconnect.contains(&self.index);
        record(
            &self.journal,
            ConnectionEvent::Disconnect {
                client: self.index,
                succeeded,
            },
        );
        self.liveness = Liveness::Disconnected;

        if succeeded {
            Ok(())
        } else {
            Err(MqttError::DisconnectFailed(
                format!("mock disconnect failed for client {}", self.index).into(),
            ))
        }
    }
}
