//! Fixed-size pool of broker connections for one run

use crate::client_span;
use crate::error::sanitize_error_message;
use crate::transport::{BrokerConnection, ConnectionFactory, ConnectionSettings, Liveness};
use tracing::{error, info, warn, Instrument};

/// Connect results of pool initialization
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectStats {
    pub succeeded: usize,
    pub failed: usize,
}

/// Disconnect results of pool teardown
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TeardownStats {
    pub succeeded: usize,
    pub failed: usize,
}

/// Every connection created for a run, in creation order.
///
/// Connections that failed to connect stay in the pool so teardown reaches
/// them, but [`ClientPool::live_mut`] never yields them. Membership is fixed
/// after [`ClientPool::initialize`].
pub struct ClientPool<C> {
    members: Vec<C>,
}

impl<C: BrokerConnection> ClientPool<C> {
    /// Create `count` connections one after another and connect each.
    /// A failed connect is logged and the remaining creations continue.
    pub async fn initialize<F>(
        factory: &F,
        count: u32,
        settings: &ConnectionSettings,
    ) -> (Self, ConnectStats)
    where
        F: ConnectionFactory<Connection = C>,
    {
        let mut members = Vec::with_capacity(count as usize);
        let mut stats = ConnectStats::default();

        for index in 0..count as usize {
            let mut connection = factory.create(index, settings);
            let connected = connection
                .connect()
                .instrument(client_span!(client = index))
                .await;
            match connected {
                Ok(()) => {
                    info!(
                        client = index,
                        protocol = %connection.protocol(),
                        "Client {} connected to the broker.",
                        index
                    );
                    stats.succeeded += 1;
                }
                Err(e) => {
                    error!(
                        client = index,
                        "Client {} connection failed: {}",
                        index,
                        sanitize_error_message(&e.to_string())
                    );
                    stats.failed += 1;
                }
            }
            members.push(connection);
        }

        (Self { members }, stats)
    }

    /// Number of connections ever created
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Connections currently usable for publishing
    pub fn live_count(&self) -> usize {
        self.members
            .iter()
            .filter(|connection| connection.liveness() == Liveness::Connected)
            .count()
    }

    /// Live connections in pool order
    pub fn live_mut(&mut self) -> impl Iterator<Item = &mut C> + '_ {
        self.members
            .iter_mut()
            .filter(|connection| connection.liveness() == Liveness::Connected)
    }

    /// Live connection at position `position` of the live set
    pub fn live_at(&mut self, position: usize) -> Option<&mut C> {
        self.live_mut().nth(position)
    }

    pub fn members(&self) -> &[C] {
        &self.members
    }

    /// Disconnect every member exactly once. The pool is empty afterwards,
    /// so a second call does nothing.
    pub async fn teardown(&mut self) -> TeardownStats {
        let mut stats = TeardownStats::default();

        for mut connection in std::mem::take(&mut self.members) {
            let index = connection.index();
            let disconnected = connection
                .disconnect()
                .instrument(client_span!(client = index))
                .await;
            match disconnected {
                Ok(()) => {
                    info!(client = index, "Client {} disconnected.", index);
                    stats.succeeded += 1;
                }
                Err(e) => {
                    warn!(
                        client = index,
                        "Client {} disconnection failed: {}",
                        index,
                        sanitize_error_message(&e.to_string())
                    );
                    stats.failed += 1;
                }
            }
        }

        stats
    }
}
