//! Observability: structured logging setup and run metrics

pub mod logging;
pub mod metrics;

pub use logging::{init_default_logging, init_logging, LogFormat};
pub use metrics::{MetricsSnapshot, PublisherMetrics};

// Span macros for structured logging
pub use logging::{client_span, run_span};
