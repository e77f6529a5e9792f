//! Status queries against the monitored server.

pub mod fetcher;
pub mod java;

use std::future::Future;

use mcwatch_store::{Player, Snapshot};

use crate::error::StatusError;

pub use fetcher::{FetchOptions, FetchOutcome, FetchResult, Progress, StatusFetcher};
pub use java::JavaStatusClient;

/// One status response.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerStatus {
    /// Online count reported by the server
    pub online: u32,
    /// Player sample, possibly shorter than `online`
    pub players: Vec<Player>,
    /// Round trip latency in milliseconds, when measured
    pub ping: Option<f64>,
}

impl ServerStatus {
    pub fn into_snapshot(self, time: f64) -> Snapshot {
        Snapshot::new(time, self.online, self.players, self.ping.unwrap_or(0.0))
    }

    /// Whether the sample lists every online player.
    pub fn is_complete(&self) -> bool {
        self.players.len() >= self.online as usize
    }
}

/// Anything that can report the server's presence status.
pub trait StatusSource: Send + Sync {
    fn query(&self, with_ping: bool) -> impl Future<Output = Result<ServerStatus, StatusError>> + Send;
}
