//! Control surface: HTTP API and the run worker queue behind it

pub mod dispatcher;
pub mod routes;
pub mod server;

pub use dispatcher::{DispatchError, RunDispatcher, RunRequest};
pub use routes::{routes, ApiState, RUN_ACCEPTED_MESSAGE};
pub use server::{ControlServer, ServerError};
