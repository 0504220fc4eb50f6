//! Run metrics
//!
//! Atomic counters shared through an `Arc` by the dispatcher and the control
//! API. There is no process-global instance: whoever starts the service owns
//! the collector and hands it out.

use crate::publisher::RunSummary;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const MAX_DURATION_SAMPLES: usize = 1000;

/// Counters describing every run this process has handled
#[derive(Debug)]
pub struct PublisherMetrics {
    // Run lifecycle
    runs_submitted: AtomicU64,
    runs_rejected: AtomicU64,
    runs_active: AtomicU64,
    runs_completed: AtomicU64,
    runs_failed: AtomicU64,
    runs_cancelled: AtomicU64,

    // Broker traffic, summed over finished runs
    connections_established: AtomicU64,
    connection_failures: AtomicU64,
    messages_published: AtomicU64,
    publish_failures: AtomicU64,
    disconnect_failures: AtomicU64,
    round_failures: AtomicU64,

    run_durations: Mutex<Vec<u64>>, // milliseconds
    started_at: u64,
}

impl PublisherMetrics {
    pub fn new() -> Self {
        Self {
            runs_submitted: AtomicU64::new(0),
            runs_rejected: AtomicU64::new(0),
            runs_active: AtomicU64::new(0),
            runs_completed: AtomicU64::new(0),
            runs_failed: AtomicU64::new(0),
            runs_cancelled: AtomicU64::new(0),
            connections_established: AtomicU64::new(0),
            connection_failures: AtomicU64::new(0),
            messages_published: AtomicU64::new(0),
            publish_failures: AtomicU64::new(0),
            disconnect_failures: AtomicU64::new(0),
            round_failures: AtomicU64::new(0),
            run_durations: Mutex::new(Vec::new()),
            started_at: current_timestamp(),
        }
    }

    /// A run request entered the queue
    pub fn run_submitted(&self) {
        self.runs_submitted.fetch_add(1, Ordering::Relaxed);
    }

    /// A run request was turned away (queue full or dispatcher stopped)
    pub fn run_rejected(&self) {
        self.runs_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// A worker picked up a run; returns the new active count
    pub fn run_started(&self) -> u64 {
        self.runs_active.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Fold a finished run into the totals; returns the new active count
    pub fn run_finished(&self, summary: &RunSummary) -> u64 {
        self.runs_completed.fetch_add(1, Ordering::Relaxed);
        if summary.cancelled {
            self.runs_cancelled.fetch_add(1, Ordering::Relaxed);
        }

        self.connections_established
            .fetch_add(summary.connects_succeeded as u64, Ordering::Relaxed);
        self.connection_failures
            .fetch_add(summary.connects_failed as u64, Ordering::Relaxed);
        self.messages_published
            .fetch_add(summary.publishes_succeeded, Ordering::Relaxed);
        self.publish_failures
            .fetch_add(summary.publishes_failed, Ordering::Relaxed);
        self.disconnect_failures
            .fetch_add(summary.disconnects_failed as u64, Ordering::Relaxed);
        self.round_failures
            .fetch_add(u64::from(summary.round_failures), Ordering::Relaxed);

        if let Ok(duration) = (summary.finished_at - summary.started_at).to_std() {
            self.record_duration(duration);
        }

        self.leave_active()
    }

    /// A run ended with an error before producing a summary; returns the
    /// new active count
    pub fn run_failed(&self) -> u64 {
        self.runs_failed.fetch_add(1, Ordering::Relaxed);
        self.leave_active()
    }

    fn leave_active(&self) -> u64 {
        let previous = self
            .runs_active
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                Some(n.saturating_sub(1))
            })
            .unwrap_or(0);
        previous.saturating_sub(1)
    }

    fn record_duration(&self, duration: Duration) {
        if let Ok(mut durations) = self.run_durations.lock() {
            durations.push(duration.as_millis() as u64);
            if durations.len() > MAX_DURATION_SAMPLES {
                durations.remove(0);
            }
        }
    }

    pub fn active_runs(&self) -> u64 {
        self.runs_active.load(Ordering::Relaxed)
    }

    fn duration_statistics(&self) -> RunDurationSnapshot {
        let mut sorted = match self.run_durations.lock() {
            Ok(durations) => durations.clone(),
            Err(_) => Vec::new(),
        };
        if sorted.is_empty() {
            return RunDurationSnapshot::default();
        }
        sorted.sort_unstable();

        let sum: u64 = sorted.iter().sum();
        RunDurationSnapshot {
            samples: sorted.len(),
            avg_ms: sum as f64 / sorted.len() as f64,
            p50_ms: percentile(&sorted, 50.0),
            p95_ms: percentile(&sorted, 95.0),
            max_ms: sorted.last().copied().unwrap_or(0),
        }
    }

    /// Point-in-time copy of every counter
    pub fn snapshot(&self) -> MetricsSnapshot {
        let now = current_timestamp();
        MetricsSnapshot {
            timestamp: now,
            uptime_seconds: now.saturating_sub(self.started_at),
            runs: RunCounters {
                submitted: self.runs_submitted.load(Ordering::Relaxed),
                rejected: self.runs_rejected.load(Ordering::Relaxed),
                active: self.runs_active.load(Ordering::Relaxed),
                completed: self.runs_completed.load(Ordering::Relaxed),
                failed: self.runs_failed.load(Ordering::Relaxed),
                cancelled: self.runs_cancelled.load(Ordering::Relaxed),
            },
            mqtt: BrokerCounters {
                connections_established: self.connections_established.load(Ordering::Relaxed),
                connection_failures: self.connection_failures.load(Ordering::Relaxed),
                messages_published: self.messages_published.load(Ordering::Relaxed),
                publish_failures: self.publish_failures.load(Ordering::Relaxed),
                disconnect_failures: self.disconnect_failures.load(Ordering::Relaxed),
                round_failures: self.round_failures.load(Ordering::Relaxed),
            },
            run_durations: self.duration_statistics(),
        }
    }
}

impl Default for PublisherMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub timestamp: u64,
    pub uptime_seconds: u64,
    pub runs: RunCounters,
    pub mqtt: BrokerCounters,
    pub run_durations: RunDurationSnapshot,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunCounters {
    pub submitted: u64,
    pub rejected: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BrokerCounters {
    pub connections_established: u64,
    pub connection_failures: u64,
    pub messages_published: u64,
    pub publish_failures: u64,
    pub disconnect_failures: u64,
    pub round_failures: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunDurationSnapshot {
    pub samples: usize,
    pub avg_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub max_ms: u64,
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn percentile(sorted_data: &[u64], percentile: f64) -> f64 {
    if sorted_data.is_empty() {
        return 0.0;
    }
    if sorted_data.len() == 1 {
        return sorted_data[0] as f64;
    }

    let index = (percentile / 100.0) * (sorted_data.len() - 1) as f64;
    let lower = index.floor() as usize;
    let upper = index.ceil() as usize;

    if lower == upper {
        sorted_data[lower] as f64
    } else {
        let weight = index - lower as f64;
        sorted_data[lower] as f64 * (1.0 - weight) + sorted_data[upper] as f64 * weight
    }
}
