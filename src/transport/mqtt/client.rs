//! Impure I/O for one MQTT publishing session
//!
//! Each [`MqttClient`] owns a rumqttc `AsyncClient` and drives its event loop
//! on a dedicated task. The task reports session state over a watch channel
//! and forwards the packet ids of outgoing publishes and incoming PUBCOMPs, so
//! `publish` waits for the broker to finish the exactly-once exchange for its
//! own message and nothing else.

use super::connection::{configure_mqtt_options, ConnectionState, MqttError};
use super::message_handler::{EventRoute, MessageHandler};
use crate::config::Protocol;
use crate::transport::{BrokerConnection, ConnectionFactory, ConnectionSettings, Liveness};
use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::v5::{AsyncClient, EventLoop};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const REQUEST_CHANNEL_CAPACITY: usize = 10;
const EVENT_LOOP_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Publish progress forwarded by the event loop task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PublishProgress {
    Sent(u16),
    Completed(u16),
}

/// rumqttc-backed broker connection
pub struct MqttClient {
    index: usize,
    settings: ConnectionSettings,
    liveness: Liveness,
    client: Option<AsyncClient>,
    event_loop_handle: Option<JoinHandle<()>>,
    state_rx: Option<watch::Receiver<ConnectionState>>,
    progress_rx: Option<mpsc::UnboundedReceiver<PublishProgress>>,
    /// Publishes handed to rumqttc whose packet id has not been seen yet
    unsent_publishes: usize,
}

impl MqttClient {
    pub fn new(index: usize, settings: ConnectionSettings) -> Self {
        Self {
            index,
            settings,
            liveness: Liveness::Idle,
            client: None,
            event_loop_handle: None,
            state_rx: None,
            progress_rx: None,
            unsent_publishes: 0,
        }
    }

    /// Current session state as seen by the event loop task
    pub fn connection_state(&self) -> Option<ConnectionState> {
        self.state_rx.as_ref().map(|rx| rx.borrow().clone())
    }

    /// Poll the event loop until the session ends
    async fn drive_event_loop(
        index: usize,
        mut event_loop: EventLoop,
        state_tx: watch::Sender<ConnectionState>,
        progress_tx: mpsc::UnboundedSender<PublishProgress>,
    ) {
        loop {
            match event_loop.poll().await {
                Ok(event) => match MessageHandler::route_mqtt_event(&event) {
                    EventRoute::ConnectionAcknowledged => {
                        let _ = state_tx.send(ConnectionState::Connected);
                    }
                    EventRoute::ConnectionRefused(code) => {
                        let _ = state_tx.send(ConnectionState::Disconnected(format!(
                            "Broker refused connection: {code}"
                        )));
                        break;
                    }
                    EventRoute::PublishSent { packet_id } => {
                        let _ = progress_tx.send(PublishProgress::Sent(packet_id));
                    }
                    EventRoute::PublishCompleted { packet_id } => {
                        debug!(client = index, packet_id, "PUBCOMP received");
                        let _ = progress_tx.send(PublishProgress::Completed(packet_id));
                    }
                    EventRoute::Disconnected => {
                        let _ = state_tx.send(ConnectionState::Disconnected(
                            "Broker closed the session".to_string(),
                        ));
                        break;
                    }
                    EventRoute::InfrastructureEvent(event_str) => {
                        tracing::trace!(target: "mqtt_transport", client = index, "MQTT event: {}", event_str);
                    }
                    EventRoute::OutgoingEvent => {}
                },
                Err(e) => {
                    let _ = state_tx.send(ConnectionState::Disconnected(e.to_string()));
                    break;
                }
            }
        }
        debug!(client = index, "MQTT event loop stopped");
    }

    /// Wait for CONNACK with timeout
    async fn wait_for_connection_confirmation(
        mut state_rx: watch::Receiver<ConnectionState>,
        timeout: Duration,
    ) -> Result<(), MqttError> {
        let timeout_result = tokio::time::timeout(timeout, async {
            loop {
                let changed = state_rx.changed().await;
                match &*state_rx.borrow() {
                    ConnectionState::Connected => return Ok(()),
                    ConnectionState::Disconnected(reason) => {
                        return Err(MqttError::ConnectionFailedStr(reason.clone()));
                    }
                    ConnectionState::Connecting => {}
                }
                if changed.is_err() {
                    return Err(MqttError::ConnectionFailedStr(
                        "Event loop stopped before CONNACK".to_string(),
                    ));
                }
            }
        })
        .await;

        match timeout_result {
            Ok(result) => result,
            Err(_) => Err(MqttError::Timeout {
                timeout,
                waiting_for: "CONNACK",
            }),
        }
    }

    /// Wait for the PUBCOMP answering the most recently queued publish.
    ///
    /// Publishes are sent in the order they are queued, so the packet id of
    /// the newest one is the one that arrives once `unsent` drops to zero.
    /// Completions for any other packet id belong to publishes that already
    /// gave up waiting.
    async fn await_own_completion(
        index: usize,
        progress: &mut mpsc::UnboundedReceiver<PublishProgress>,
        unsent: &mut usize,
    ) -> Option<u16> {
        let mut own_packet_id = None;
        while let Some(event) = progress.recv().await {
            match event {
                PublishProgress::Sent(packet_id) => {
                    *unsent = unsent.saturating_sub(1);
                    if *unsent == 0 {
                        own_packet_id = Some(packet_id);
                    }
                }
                PublishProgress::Completed(packet_id) if own_packet_id == Some(packet_id) => {
                    return Some(packet_id);
                }
                PublishProgress::Completed(packet_id) => {
                    debug!(client = index, packet_id, "Ignoring PUBCOMP for an abandoned publish");
                }
            }
        }
        None
    }

    fn abort_event_loop(&mut self) {
        if let Some(handle) = self.event_loop_handle.take() {
            handle.abort();
        }
    }

    fn session_end_reason(&self) -> String {
        match self.connection_state() {
            Some(ConnectionState::Disconnected(reason)) => reason,
            _ => "session closed".to_string(),
        }
    }
}

#[async_trait]
impl BrokerConnection for MqttClient {
    fn index(&self) -> usize {
        self.index
    }

    fn protocol(&self) -> Protocol {
        self.settings.protocol
    }

    fn liveness(&self) -> Liveness {
        self.liveness
    }

    async fn connect(&mut self) -> Result<(), MqttError> {
        if self.liveness != Liveness::Idle {
            return Err(MqttError::ConnectionFailedStr(format!(
                "Connect already attempted (state {:?})",
                self.liveness
            )));
        }

        let mqtt_options = match configure_mqtt_options(self.index, &self.settings) {
            Ok(options) => options,
            Err(e) => {
                self.liveness = Liveness::Failed;
                return Err(e);
            }
        };

        let (client, event_loop) = AsyncClient::new(mqtt_options, REQUEST_CHANNEL_CAPACITY);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let (progress_tx, progress_rx) = mpsc::unbounded_channel();

        let handle = tokio::spawn(Self::drive_event_loop(
            self.index,
            event_loop,
            state_tx,
            progress_tx,
        ));

        self.client = Some(client);
        self.event_loop_handle = Some(handle);
        self.state_rx = Some(state_rx.clone());
        self.progress_rx = Some(progress_rx);

        match Self::wait_for_connection_confirmation(state_rx, self.settings.connect_timeout).await
        {
            Ok(()) => {
                self.liveness = Liveness::Connected;
                Ok(())
            }
            Err(e) => {
                self.liveness = Liveness::Failed;
                self.client = None;
                self.abort_event_loop();
                Err(e)
            }
        }
    }

    async fn publish(&mut self, topic: &str, payload: Bytes) -> Result<(), MqttError> {
        if self.liveness != Liveness::Connected {
            return Err(MqttError::NotConnected {
                state: self.liveness,
            });
        }
        if !matches!(self.connection_state(), Some(ConnectionState::Connected)) {
            return Err(MqttError::PublishFailedStr(self.session_end_reason()));
        }

        let client = self.client.as_ref().ok_or(MqttError::NotConnected {
            state: self.liveness,
        })?;
        let progress = self.progress_rx.as_mut().ok_or(MqttError::NotConnected {
            state: Liveness::Idle,
        })?;

        client
            .publish(topic, MessageHandler::publish_qos(), false, payload)
            .await
            .map_err(|e| MqttError::PublishFailed(Box::new(e)))?;
        self.unsent_publishes += 1;

        let index = self.index;
        let timeout = self.settings.publish_timeout;
        let waited = tokio::time::timeout(
            timeout,
            Self::await_own_completion(index, progress, &mut self.unsent_publishes),
        )
        .await;

        match waited {
            Ok(Some(packet_id)) => {
                debug!(client = index, packet_id, "Publish completed");
                Ok(())
            }
            Ok(None) => Err(MqttError::PublishFailedStr(format!(
                "Session ended before PUBCOMP: {}",
                self.session_end_reason()
            ))),
            Err(_) => Err(MqttError::Timeout {
                timeout,
                waiting_for: "PUBCOMP",
            }),
        }
    }

    async fn disconnect(&mut self) -> Result<(), MqttError> {
        let previous = self.liveness;
        self.liveness = Liveness::Disconnected;

        if previous != Liveness::Connected {
            self.client = None;
            self.abort_event_loop();
            return Ok(());
        }

        let result = match self.client.take() {
            Some(client) => client
                .disconnect()
                .await
                .map_err(|e| MqttError::DisconnectFailed(Box::new(e))),
            None => Ok(()),
        };

        if let Some(handle) = self.event_loop_handle.take() {
            let abort_handle = handle.abort_handle();
            match tokio::time::timeout(EVENT_LOOP_SHUTDOWN_GRACE, handle).await {
                Ok(Ok(())) => {
                    debug!(client = self.index, "Event loop task shut down gracefully");
                }
                Ok(Err(e)) if !e.is_cancelled() => {
                    warn!(client = self.index, "Event loop task ended with error: {}", e);
                }
                Err(_) => {
                    warn!(
                        client = self.index,
                        "Event loop task didn't shut down gracefully, forcing abort"
                    );
                    abort_handle.abort();
                }
                _ => {}
            }
        }

        result
    }
}

impl Drop for MqttClient {
    fn drop(&mut self) {
        self.abort_event_loop();
    }
}

/// Creates rumqttc-backed connections
#[derive(Debug, Clone, Default)]
pub struct MqttClientFactory;

impl MqttClientFactory {
    pub fn new() -> Self {
        info!("Using rumqttc MQTT v5 transport");
        Self
    }
}

impl ConnectionFactory for MqttClientFactory {
    type Connection = MqttClient;

    fn create(&self, index: usize, settings: &ConnectionSettings) -> MqttClient {
        MqttClient::new(index, settings.clone())
    }
}
