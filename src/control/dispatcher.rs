//! Bounded worker queue executing run requests
//!
//! The control API never runs a publish plan itself. It submits a
//! [`RunRequest`] and returns; a fixed number of workers drain the queue.
//! A full queue rejects the request instead of blocking the caller.

use crate::config::RunConfig;
use crate::error::sanitize_error_message;
use crate::observability::PublisherMetrics;
use crate::payload::load_document;
use crate::publisher::RunCoordinator;
use crate::transport::ConnectionFactory;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// One queued publish run
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub run_id: Uuid,
    pub config: RunConfig,
    /// Data document, read fresh when the run starts
    pub data_path: PathBuf,
}

impl RunRequest {
    pub fn new(config: RunConfig, data_path: impl Into<PathBuf>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            config,
            data_path: data_path.into(),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Run queue is full")]
    QueueFull,
    #[error("Run dispatcher is stopped")]
    Stopped,
}

type SharedReceiver = Arc<Mutex<mpsc::Receiver<RunRequest>>>;

/// Worker pool fed by a bounded queue
pub struct RunDispatcher {
    sender: std::sync::Mutex<Option<mpsc::Sender<RunRequest>>>,
    cancel_tx: watch::Sender<bool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    metrics: Arc<PublisherMetrics>,
}

impl RunDispatcher {
    /// Spawn `workers` tasks draining a queue of `capacity` pending requests
    pub fn start<F>(
        coordinator: Arc<RunCoordinator<F>>,
        workers: usize,
        capacity: usize,
        metrics: Arc<PublisherMetrics>,
    ) -> Arc<Self>
    where
        F: ConnectionFactory + 'static,
    {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let receiver: SharedReceiver = Arc::new(Mutex::new(receiver));

        let handles = (0..workers.max(1))
            .map(|worker| {
                tokio::spawn(worker_loop(
                    worker,
                    Arc::clone(&coordinator),
                    Arc::clone(&receiver),
                    cancel_rx.clone(),
                    Arc::clone(&metrics),
                ))
            })
            .collect();

        info!(workers, capacity, "Run dispatcher started");

        Arc::new(Self {
            sender: std::sync::Mutex::new(Some(sender)),
            cancel_tx,
            workers: Mutex::new(handles),
            metrics,
        })
    }

    /// Queue a run without waiting for room
    pub fn submit(&self, request: RunRequest) -> Result<Uuid, DispatchError> {
        let run_id = request.run_id;
        let sender = self
            .sender
            .lock()
            .ok()
            .and_then(|guard| guard.clone())
            .ok_or(DispatchError::Stopped);

        let result = sender.and_then(|sender| {
            sender.try_send(request).map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => DispatchError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => DispatchError::Stopped,
            })
        });

        match result {
            Ok(()) => {
                self.metrics.run_submitted();
                debug!(run_id = %run_id, "Run queued");
                Ok(run_id)
            }
            Err(e) => {
                self.metrics.run_rejected();
                warn!(run_id = %run_id, "Run rejected: {}", e);
                Err(e)
            }
        }
    }

    pub fn metrics(&self) -> &Arc<PublisherMetrics> {
        &self.metrics
    }

    /// Cancel in-flight runs, stop accepting requests and wait for the
    /// workers. Queued requests that no worker picked up are dropped.
    pub async fn shutdown(&self) {
        info!("Shutting down run dispatcher");
        let _ = self.cancel_tx.send(true);

        if let Ok(mut sender) = self.sender.lock() {
            sender.take();
        }

        let handles: Vec<_> = self.workers.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    error!("Run worker ended abnormally: {}", e);
                }
            }
        }
        info!("Run dispatcher stopped");
    }
}

async fn worker_loop<F: ConnectionFactory>(
    worker: usize,
    coordinator: Arc<RunCoordinator<F>>,
    receiver: SharedReceiver,
    cancel: watch::Receiver<bool>,
    metrics: Arc<PublisherMetrics>,
) {
    loop {
        if *cancel.borrow() {
            break;
        }
        let request = {
            let mut receiver = receiver.lock().await;
            receiver.recv().await
        };
        let Some(request) = request else {
            break;
        };
        if *cancel.borrow() {
            debug!(worker, run_id = %request.run_id, "Dropping queued run after shutdown");
            break;
        }

        execute(worker, &coordinator, request, cancel.clone(), &metrics).await;
    }
    debug!(worker, "Run worker exiting");
}

async fn execute<F: ConnectionFactory>(
    worker: usize,
    coordinator: &RunCoordinator<F>,
    request: RunRequest,
    cancel: watch::Receiver<bool>,
    metrics: &PublisherMetrics,
) {
    let run_id = request.run_id;
    let active = metrics.run_started();
    info!(worker, run_id = %run_id, active_runs = active, "run started");

    let document = match load_document(&request.data_path).await {
        Ok(document) => document,
        Err(e) => {
            let active = metrics.run_failed();
            error!(
                worker,
                run_id = %run_id,
                active_runs = active,
                "run failed: {}",
                sanitize_error_message(&e.to_string())
            );
            return;
        }
    };

    match coordinator
        .execute_run_with_id(run_id, &request.config, &document, cancel)
        .await
    {
        Ok(summary) => {
            let active = metrics.run_finished(&summary);
            info!(
                worker,
                run_id = %run_id,
                active_runs = active,
                published = summary.publishes_succeeded,
                publish_failures = summary.publishes_failed,
                cancelled = summary.cancelled,
                "run finished"
            );
        }
        Err(e) => {
            let active = metrics.run_failed();
            error!(
                worker,
                run_id = %run_id,
                active_runs = active,
                "run failed: {}",
                sanitize_error_message(&e.to_string())
            );
        }
    }
}
