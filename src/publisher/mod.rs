//! Multi-client publish orchestration
//!
//! A run connects a fixed pool of clients ([`ClientPool`]), publishes a
//! payload drawn from the data document to every live client for a number
//! of rounds ([`PublishScheduler`]) and disconnects everything it created
//! ([`RunCoordinator`]).

pub mod coordinator;
pub mod pool;
pub mod scheduler;

pub use coordinator::{RunCoordinator, RunSummary};
pub use pool::{ClientPool, ConnectStats, TeardownStats};
pub use scheduler::{PublishOutcome, PublishScheduler, ScheduleReport, SchedulerState};
