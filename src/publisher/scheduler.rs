//! Round/interval state machine driving the publishes of one run
//!
//! For every round the payload is resolved once and then published to each
//! live connection in pool order. Rounds never overlap: the inter-round
//! delay only starts after the last publish attempt of a round, and there is
//! no delay after the final round. Publish failures are logged and counted,
//! never propagated.

use super::pool::ClientPool;
use crate::client_span;
use crate::config::RunConfig;
use crate::error::sanitize_error_message;
use crate::payload::PayloadResolver;
use crate::transport::BrokerConnection;
use bytes::Bytes;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn, Instrument};

/// Scheduler progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running { round: u32 },
    Done,
}

/// Result of one publish attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishOutcome {
    pub round: u32,
    pub client: usize,
    pub succeeded: bool,
    pub error_detail: Option<String>,
}

/// Aggregated scheduler results
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScheduleReport {
    pub rounds_completed: u32,
    pub publish_attempts: u64,
    pub publishes_succeeded: u64,
    pub publishes_failed: u64,
    /// Inter-round delays started
    pub delays: u32,
    /// Rounds skipped because the payload could not be resolved
    pub round_failures: u32,
    pub cancelled: bool,
}

impl ScheduleReport {
    fn record(&mut self, outcome: &PublishOutcome) {
        self.publish_attempts += 1;
        if outcome.succeeded {
            self.publishes_succeeded += 1;
        } else {
            self.publishes_failed += 1;
        }
    }
}

/// Drives the publish rounds of one run
pub struct PublishScheduler {
    topic: String,
    message_count: u32,
    interval: Duration,
    resolver: PayloadResolver,
    cancel: watch::Receiver<bool>,
    state: SchedulerState,
}

impl PublishScheduler {
    pub fn new(
        topic: impl Into<String>,
        message_count: u32,
        interval: Duration,
        resolver: PayloadResolver,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        Self {
            topic: topic.into(),
            message_count,
            interval,
            resolver,
            cancel,
            state: SchedulerState::Idle,
        }
    }

    /// Scheduler for a validated run configuration
    pub fn from_config(
        config: &RunConfig,
        resolver: PayloadResolver,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        Self::new(
            config.topic.clone(),
            config.message_count,
            config.interval(),
            resolver,
            cancel,
        )
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Publish `message_count` rounds across the live connections of `pool`
    pub async fn run<C: BrokerConnection>(
        &mut self,
        pool: &mut ClientPool<C>,
        document: &Value,
    ) -> ScheduleReport {
        let mut report = ScheduleReport::default();

        for round in 0..self.message_count {
            if self.is_cancelled() {
                report.cancelled = true;
                break;
            }
            self.state = SchedulerState::Running { round };

            match self.resolver.resolve(document) {
                Ok(payload) => {
                    let payload = Bytes::from(payload);
                    for connection in pool.live_mut() {
                        if *self.cancel.borrow() {
                            report.cancelled = true;
                            break;
                        }
                        let outcome =
                            publish_one(round, connection, &self.topic, payload.clone()).await;
                        report.record(&outcome);
                    }
                    if !report.cancelled {
                        report.rounds_completed += 1;
                    }
                }
                Err(e) => {
                    error!(round, "Skipping round: {}", e);
                    report.round_failures += 1;
                }
            }

            if report.cancelled {
                break;
            }

            if round + 1 < self.message_count {
                info!(
                    round,
                    "Waiting {} seconds before the next round...",
                    self.interval.as_secs_f64()
                );
                report.delays += 1;
                if !interruptible_sleep(&mut self.cancel, self.interval).await {
                    report.cancelled = true;
                    break;
                }
            }
        }

        if report.cancelled {
            warn!(
                rounds_completed = report.rounds_completed,
                "Run cancelled, skipping remaining rounds"
            );
        }

        self.state = SchedulerState::Done;
        report
    }
}

async fn publish_one<C: BrokerConnection>(
    round: u32,
    connection: &mut C,
    topic: &str,
    payload: Bytes,
) -> PublishOutcome {
    let client = connection.index();
    let published = connection
        .publish(topic, payload)
        .instrument(client_span!(client = client, round = round))
        .await;
    match published {
        Ok(()) => {
            info!(client, round, "Message sent.");
            PublishOutcome {
                round,
                client,
                succeeded: true,
                error_detail: None,
            }
        }
        Err(e) => {
            let detail = sanitize_error_message(&e.to_string());
            warn!(client, round, "Publishing failed: {}", detail);
            PublishOutcome {
                round,
                client,
                succeeded: false,
                error_detail: Some(detail),
            }
        }
    }
}

/// Sleep for `delay` unless cancellation is raised first.
/// Returns true if the full delay elapsed.
async fn interruptible_sleep(cancel: &mut watch::Receiver<bool>, delay: Duration) -> bool {
    if *cancel.borrow() {
        return false;
    }

    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            _ = &mut sleep => return true,
            changed = cancel.changed() => match changed {
                Ok(()) => {
                    if *cancel.borrow() {
                        info!("Cancellation received during round delay");
                        return false;
                    }
                }
                Err(_) => {
                    // Sender gone: nobody can cancel any more
                    (&mut sleep).await;
                    return true;
                }
            }
        }
    }
}
