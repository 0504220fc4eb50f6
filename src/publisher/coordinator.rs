//! One publish run from validation to teardown

use super::pool::ClientPool;
use super::scheduler::{PublishScheduler, ScheduleReport};
use crate::config::{MqttSection, Protocol, RunConfig};
use crate::error::{RunError, RunResult};
use crate::payload::PayloadResolver;
use crate::run_span;
use crate::transport::{ConnectionFactory, ConnectionSettings};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, Instrument};
use uuid::Uuid;

/// Outcome counts of one run
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub protocol: String,
    pub clients_requested: u32,
    pub connects_succeeded: usize,
    pub connects_failed: usize,
    pub rounds_completed: u32,
    pub publish_attempts: u64,
    pub publishes_succeeded: u64,
    pub publishes_failed: u64,
    pub delays: u32,
    pub round_failures: u32,
    pub disconnects_succeeded: usize,
    pub disconnects_failed: usize,
    pub cancelled: bool,
    /// The round loop panicked; teardown still ran
    pub aborted: bool,
}

/// Wires resolver, pool and scheduler together for each run
pub struct RunCoordinator<F> {
    factory: F,
    timing: MqttSection,
}

impl<F: ConnectionFactory> RunCoordinator<F> {
    pub fn new(factory: F, timing: MqttSection) -> Self {
        Self { factory, timing }
    }

    /// Connection parameters shared by the whole pool of a run
    pub fn connection_settings(&self, config: &RunConfig, protocol: Protocol) -> ConnectionSettings {
        ConnectionSettings {
            protocol,
            broker_address: config.broker_address.trim().to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
            clean_session: config.resolved_clean_session(protocol),
            client_id_prefix: config.client_id_prefix().to_string(),
            keep_alive: Duration::from_secs(self.timing.keep_alive_secs),
            connect_timeout: Duration::from_secs(self.timing.connect_timeout_secs),
            publish_timeout: Duration::from_secs(self.timing.publish_timeout_secs),
        }
    }

    /// Execute one run under a fresh run id
    pub async fn execute_run(
        &self,
        config: &RunConfig,
        document: &Value,
        cancel: watch::Receiver<bool>,
    ) -> RunResult<RunSummary> {
        self.execute_run_with_id(Uuid::new_v4(), config, document, cancel)
            .await
    }

    /// Execute one run.
    ///
    /// Only configuration problems are returned as errors, and those are
    /// detected before any connection is created. Connect, publish and
    /// disconnect failures are counted in the summary. Every connection
    /// created is disconnected exactly once, even if the round loop panics.
    pub async fn execute_run_with_id(
        &self,
        run_id: Uuid,
        config: &RunConfig,
        document: &Value,
        cancel: watch::Receiver<bool>,
    ) -> RunResult<RunSummary> {
        let span = run_span!(run_id = %run_id);
        self.run_inner(run_id, config, document, cancel)
            .instrument(span)
            .await
    }

    async fn run_inner(
        &self,
        run_id: Uuid,
        config: &RunConfig,
        document: &Value,
        cancel: watch::Receiver<bool>,
    ) -> RunResult<RunSummary> {
        let started_at = Utc::now();

        let protocol = config
            .validate()
            .map_err(|e| RunError::configuration(e.to_string()))?;
        let resolver = if config.message_count > 0 && config.client_count > 0 {
            let resolver = PayloadResolver::new(&config.message_path)?;
            // A path that matches nothing would fail every round
            resolver.resolve(document)?;
            resolver
        } else {
            // Nothing will be published, so the path is never consulted
            PayloadResolver::whole_document()
        };

        info!(
            protocol = %protocol,
            broker = %config.broker_address,
            clients = config.client_count,
            rounds = config.message_count,
            interval_secs = config.interval_seconds,
            topic = %config.topic,
            "Run started"
        );

        let settings = self.connection_settings(config, protocol);
        let (mut pool, connects) =
            ClientPool::initialize(&self.factory, config.client_count, &settings).await;

        let mut scheduler = PublishScheduler::from_config(config, resolver, cancel);
        let scheduled = AssertUnwindSafe(scheduler.run(&mut pool, document))
            .catch_unwind()
            .await;

        let teardown = pool.teardown().await;

        let (report, aborted) = match scheduled {
            Ok(report) => (report, false),
            Err(_) => {
                error!("Publish loop panicked; connections were still torn down");
                (ScheduleReport::default(), true)
            }
        };

        let summary = RunSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            protocol: protocol.label().to_string(),
            clients_requested: config.client_count,
            connects_succeeded: connects.succeeded,
            connects_failed: connects.failed,
            rounds_completed: report.rounds_completed,
            publish_attempts: report.publish_attempts,
            publishes_succeeded: report.publishes_succeeded,
            publishes_failed: report.publishes_failed,
            delays: report.delays,
            round_failures: report.round_failures,
            disconnects_succeeded: teardown.succeeded,
            disconnects_failed: teardown.failed,
            cancelled: report.cancelled,
            aborted,
        };

        info!(
            connects_ok = summary.connects_succeeded,
            connects_failed = summary.connects_failed,
            rounds = summary.rounds_completed,
            published = summary.publishes_succeeded,
            publish_failures = summary.publishes_failed,
            disconnect_failures = summary.disconnects_failed,
            cancelled = summary.cancelled,
            "Run finished"
        );

        Ok(summary)
    }
}
