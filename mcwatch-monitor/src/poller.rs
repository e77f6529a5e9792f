//! The polling loop and its control handle.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use mcwatch_store::PointManager;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::status::{FetchOutcome, FetchResult, Progress, StatusFetcher, StatusSource};

#[derive(Debug)]
struct Control {
    paused: AtomicBool,
    fetch_now: AtomicBool,
    stopped: AtomicBool,
    signal: watch::Sender<()>,
}

impl Control {
    fn new() -> Self {
        let (signal, _) = watch::channel(());
        Self {
            paused: AtomicBool::new(false),
            fetch_now: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            signal,
        }
    }

    fn set(&self, flag: &AtomicBool, value: bool) {
        flag.store(value, Ordering::SeqCst);
        self.signal.send_replace(());
    }

    fn paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    fn stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

/// Clonable remote control for a running [`Poller`].
///
/// Every signal wakes the poller immediately. `fetch_now`, `pause` and `stop`
/// also interrupt a full player collection in progress.
#[derive(Debug, Clone)]
pub struct PollerHandle {
    control: Arc<Control>,
}

impl PollerHandle {
    pub fn fetch_now(&self) {
        self.control.set(&self.control.fetch_now, true);
    }

    pub fn pause(&self) {
        self.control.set(&self.control.paused, true);
    }

    pub fn resume(&self) {
        self.control.set(&self.control.paused, false);
    }

    pub fn stop(&self) {
        self.control.set(&self.control.stopped, true);
    }

    pub fn is_paused(&self) -> bool {
        self.control.paused()
    }

    pub fn is_stopped(&self) -> bool {
        self.control.stopped()
    }
}

/// Fetches a snapshot every `check_inv`, feeds it to the point manager and
/// publishes the result.
pub struct Poller<S> {
    fetcher: StatusFetcher<S>,
    manager: PointManager,
    check_inv: Duration,
    control: Arc<Control>,
    signals: watch::Receiver<()>,
    results: watch::Sender<Option<FetchResult>>,
}

impl<S: StatusSource + 'static> Poller<S> {
    pub fn new(fetcher: StatusFetcher<S>, manager: PointManager, check_inv: Duration) -> Self {
        let (results, _) = watch::channel(None);
        let control = Control::new();
        let signals = control.signal.subscribe();
        Self {
            fetcher,
            manager,
            check_inv,
            control: Arc::new(control),
            signals,
            results,
        }
    }

    pub fn handle(&self) -> PollerHandle {
        PollerHandle {
            control: Arc::clone(&self.control),
        }
    }

    pub fn subscribe_progress(&self) -> watch::Receiver<Progress> {
        self.fetcher.subscribe()
    }

    /// Latest fetch result, `None` until the first fetch finishes.
    pub fn subscribe_results(&self) -> watch::Receiver<Option<FetchResult>> {
        self.results.subscribe()
    }

    /// Run until [`PollerHandle::stop`]. The first fetch happens immediately.
    pub async fn run(mut self) {
        info!(interval = ?self.check_inv, "poller started");

        while !self.control.stopped() {
            if self.control.paused() {
                self.wait_while_paused().await;
                continue;
            }

            self.control.fetch_now.store(false, Ordering::SeqCst);
            self.signals.borrow_and_update();
            let result = self.fetcher.fetch(&mut self.signals).await;
            let aborted = result.outcome == FetchOutcome::Aborted;
            self.record(result).await;

            self.fetcher.set_progress(Progress::Waiting);
            if !aborted {
                self.wait_next().await;
            }
        }
        info!("poller stopped");
    }

    async fn wait_while_paused(&mut self) {
        self.fetcher.set_progress(Progress::Paused);
        info!("polling paused");
        loop {
            self.signals.borrow_and_update();
            if !self.control.paused() || self.control.stopped() {
                break;
            }
            if self.signals.changed().await.is_err() {
                break;
            }
        }
        if !self.control.stopped() {
            info!("polling resumed");
        }
    }

    /// Sleep until the next fetch is due or a control signal needs handling.
    async fn wait_next(&mut self) {
        let deadline = Instant::now() + self.check_inv;
        loop {
            self.signals.borrow_and_update();
            if self.control.stopped() || self.control.paused() {
                return;
            }
            if self.control.fetch_now.load(Ordering::SeqCst) {
                info!("immediate fetch requested");
                return;
            }
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => return,
                changed = self.signals.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
            }
        }
    }

    async fn record(&self, result: FetchResult) {
        match result.outcome {
            FetchOutcome::Ok | FetchOutcome::FpOk => {
                if let Some(point) = &result.point {
                    debug!(
                        online = point.online,
                        players = point.players.len(),
                        ping = point.ping,
                        "fetched status"
                    );
                }
            }
            FetchOutcome::FpError => warn!("storing incomplete player list"),
            FetchOutcome::Error => {}
            FetchOutcome::Aborted => debug!("discarding interrupted fetch"),
        }

        // An interrupted collection is retried right away, so its partial
        // snapshot is not stored.
        if result.outcome != FetchOutcome::Aborted {
            if let Some(point) = result.point.clone() {
                if let Err(e) = self.manager.add(point).await {
                    error!(error = %e, "automatic save failed");
                }
            }
        }
        self.results.send_replace(Some(result));
    }
}
