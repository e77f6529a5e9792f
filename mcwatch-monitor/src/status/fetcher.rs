//! Fetch protocol: bounded retries, then optional reconciliation of the full
//! player list when the server only returns a sample.

use std::time::Duration;

use mcwatch_store::{Player, Snapshot};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::{ServerStatus, StatusSource};
use crate::helpers::{merge_players, now};

/// Successful reconciliation attempts in a row without a new name before
/// giving up.
pub const STALL_LIMIT: u32 = 4;

#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Query attempts per fetch
    pub retry_times: u32,
    /// Bound of a single query
    pub time_out: Duration,
    pub enable_full_players: bool,
    /// Wait between reconciliation queries
    pub fp_re_status_inv: Duration,
    /// Reconciliation attempts, and restarts after the online count changed
    pub fp_max_try: u32,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            retry_times: 3,
            time_out: Duration::from_secs(5),
            enable_full_players: false,
            fp_re_status_inv: Duration::from_secs(1),
            fp_max_try: 20,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Sample was complete, or reconciliation is disabled
    Ok,
    /// Every attempt failed
    Error,
    /// Full player list recovered
    FpOk,
    /// Reconciliation gave up; the snapshot holds what was collected
    FpError,
    /// Reconciliation was interrupted by a control signal
    Aborted,
}

#[derive(Debug, Clone)]
pub struct FetchResult {
    pub outcome: FetchOutcome,
    /// Absent only for `Error`
    pub point: Option<Snapshot>,
}

impl FetchResult {
    fn new(outcome: FetchOutcome, point: Snapshot) -> Self {
        Self {
            outcome,
            point: Some(point),
        }
    }
}

/// What the fetch loop is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    Waiting,
    Fetching,
    FpWaiting { attempt: u32, missing: u32 },
    FpFetching { attempt: u32, missing: u32 },
    Paused,
}

pub struct StatusFetcher<S> {
    source: S,
    options: FetchOptions,
    progress: watch::Sender<Progress>,
}

impl<S: StatusSource> StatusFetcher<S> {
    pub fn new(source: S, options: FetchOptions) -> Self {
        let (progress, _) = watch::channel(Progress::Waiting);
        Self {
            source,
            options,
            progress,
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn subscribe(&self) -> watch::Receiver<Progress> {
        self.progress.subscribe()
    }

    pub fn set_progress(&self, progress: Progress) {
        self.progress.send_replace(progress);
    }

    /// Fetch one snapshot.
    ///
    /// A change on `cancel` aborts a reconciliation at its next wait. Changes
    /// already marked seen on the receiver are ignored.
    pub async fn fetch(&self, cancel: &mut watch::Receiver<()>) -> FetchResult {
        self.set_progress(Progress::Fetching);
        let Some(status) = self.query_with_retry(true).await else {
            warn!(attempts = self.options.retry_times, "server unreachable");
            return FetchResult {
                outcome: FetchOutcome::Error,
                point: None,
            };
        };

        let time = now();
        if !self.options.enable_full_players || status.is_complete() {
            return FetchResult::new(FetchOutcome::Ok, status.into_snapshot(time));
        }
        self.reconcile(status, time, cancel).await
    }

    /// Up to `retry_times` queries, each bounded by `time_out`.
    async fn query_with_retry(&self, with_ping: bool) -> Option<ServerStatus> {
        for attempt in 1..=self.options.retry_times {
            match tokio::time::timeout(self.options.time_out, self.source.query(with_ping)).await {
                Ok(Ok(status)) => return Some(status),
                Ok(Err(e)) => warn!(attempt, error = %e, "status query failed"),
                Err(_) => warn!(attempt, timeout = ?self.options.time_out, "status query timed out"),
            }
        }
        None
    }

    async fn reconcile(
        &self,
        first: ServerStatus,
        time: f64,
        cancel: &mut watch::Receiver<()>,
    ) -> FetchResult {
        let ping = first.ping.unwrap_or(0.0);
        let mut target = first.online;
        let mut players: Vec<Player> = Vec::with_capacity(target as usize);
        merge_players(&mut players, first.players);

        let partial = |outcome, online, players: Vec<Player>| {
            FetchResult::new(outcome, Snapshot::new(time, online, players, ping))
        };

        info!(online = target, sample = players.len(), "collecting full player list");
        let mut attempt = 0;
        let mut stalled = 0;
        let mut restarts = 0;

        loop {
            if attempt >= self.options.fp_max_try {
                warn!(
                    attempts = attempt,
                    found = players.len(),
                    online = target,
                    "full player list incomplete"
                );
                return partial(FetchOutcome::FpError, target, players);
            }
            attempt += 1;
            let missing = target.saturating_sub(players.len() as u32);

            self.set_progress(Progress::FpWaiting { attempt, missing });
            tokio::select! {
                _ = tokio::time::sleep(self.options.fp_re_status_inv) => {}
                _ = cancel.changed() => {
                    info!(attempt, missing, "full player collection aborted");
                    return partial(FetchOutcome::Aborted, target, players);
                }
            }

            self.set_progress(Progress::FpFetching { attempt, missing });
            let Some(status) = self.query_with_retry(false).await else {
                continue;
            };

            if status.online != target {
                restarts += 1;
                target = status.online;
                players.clear();
                merge_players(&mut players, status.players);
                if restarts > self.options.fp_max_try {
                    warn!(restarts, online = target, "online count keeps changing, giving up");
                    return partial(FetchOutcome::FpError, target, players);
                }
                info!(online = target, "online count changed, restarting");
                attempt = 0;
                stalled = 0;
            } else {
                let added = merge_players(&mut players, status.players);
                debug!(attempt, added, found = players.len(), online = target, "merged sample");
                if added == 0 {
                    stalled += 1;
                    if stalled > STALL_LIMIT {
                        warn!(
                            attempt,
                            found = players.len(),
                            online = target,
                            "no new players in a row, giving up"
                        );
                        return partial(FetchOutcome::FpError, target, players);
                    }
                } else {
                    stalled = 0;
                }
            }

            if players.len() >= target as usize {
                info!(attempt, online = target, "full player list collected");
                return partial(FetchOutcome::FpOk, target, players);
            }
        }
    }
}
