//! HTTP server hosting the control API

use super::routes::{routes, ApiState};
use std::future::Future;
use std::net::SocketAddr;
use thiserror::Error;
use tracing::info;
use warp::Filter;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Failed to bind control API on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: warp::Error,
    },
}

/// Control API server
pub struct ControlServer {
    addr: SocketAddr,
    state: ApiState,
}

impl ControlServer {
    pub fn new(addr: SocketAddr, state: ApiState) -> Self {
        Self { addr, state }
    }

    /// Bind and serve until `shutdown` resolves. A port that cannot be bound
    /// is reported as [`ServerError::Bind`].
    pub async fn run(
        self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), ServerError> {
        let filter = routes(self.state).with(warp::trace::request());

        let (bound, server) = warp::serve(filter)
            .try_bind_with_graceful_shutdown(self.addr, shutdown)
            .map_err(|source| ServerError::Bind {
                addr: self.addr,
                source,
            })?;

        info!(addr = %bound, "Control API listening");
        server.await;
        info!("Control API stopped");
        Ok(())
    }
}
