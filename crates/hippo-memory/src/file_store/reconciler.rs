//! Background reconciliation: filesystem notifications plus a periodic full rescan.
//!
//! Notifications are forwarded from the watcher callback into a channel and processed on a
//! dedicated thread, so the callback never touches the cache. Bursts are debounced into a
//! single rescan, and changes carrying one of our own self-write markers are dropped.

use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use notify::{RecommendedWatcher, RecursiveMode, Watcher};

use super::{insight_id_from_path, StoreShared};
use crate::error::{StoreError, StoreResult};

enum ReconcileMessage {
    Changed(Vec<PathBuf>),
    WatchFailed(String),
    Shutdown,
}

pub(super) struct Reconciler {
    sender: Sender<ReconcileMessage>,
    watcher: Option<RecommendedWatcher>,
    worker: Option<JoinHandle<()>>,
    finished: Receiver<()>,
}

impl Reconciler {
    pub(super) fn start(shared: Arc<StoreShared>) -> StoreResult<Self> {
        let (sender, receiver) = mpsc::channel();
        let (finished_sender, finished) = mpsc::channel();

        let watcher = if shared.config.enable_watching {
            match start_watcher(&shared.insights_dir, sender.clone()) {
                Ok(watcher) => Some(watcher),
                Err(error) => {
                    tracing::warn!(
                        insights_dir = %shared.insights_dir.display(),
                        %error,
                        "file watching unavailable; relying on periodic refresh"
                    );
                    None
                }
            }
        } else {
            None
        };

        let insights_dir = shared.insights_dir.clone();
        let worker = thread::Builder::new()
            .name("hippo-reconciler".to_string())
            .spawn(move || {
                run(&shared, &receiver);
                let _ = finished_sender.send(());
            })
            .map_err(|error| StoreError::io(insights_dir, error))?;

        Ok(Self {
            sender,
            watcher,
            worker: Some(worker),
            finished,
        })
    }

    pub(super) fn is_watching(&self) -> bool {
        self.watcher.is_some()
    }

    /// Stops notifications first, then the timer thread, waiting at most `timeout`.
    pub(super) fn shutdown(mut self, timeout: Duration) {
        drop(self.watcher.take());
        let _ = self.sender.send(ReconcileMessage::Shutdown);
        match self.finished.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if let Some(worker) = self.worker.take() {
                    if worker.join().is_err() {
                        tracing::warn!("reconciler thread panicked");
                    }
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    "reconciler did not stop in time; detaching"
                );
            }
        }
    }
}

fn start_watcher(
    dir: &Path,
    sender: Sender<ReconcileMessage>,
) -> StoreResult<RecommendedWatcher> {
    let mut watcher = notify::recommended_watcher(move |result: notify::Result<notify::Event>| {
        let message = match result {
            Ok(event) => {
                if !(event.kind.is_create() || event.kind.is_modify() || event.kind.is_remove()) {
                    return;
                }
                let paths = event
                    .paths
                    .into_iter()
                    .filter(|path| insight_id_from_path(path).is_some())
                    .collect::<Vec<_>>();
                if paths.is_empty() {
                    return;
                }
                ReconcileMessage::Changed(paths)
            }
            Err(error) => ReconcileMessage::WatchFailed(error.to_string()),
        };
        let _ = sender.send(message);
    })?;
    watcher.watch(dir, RecursiveMode::NonRecursive)?;
    tracing::debug!(insights_dir = %dir.display(), "watching for record changes");
    Ok(watcher)
}

fn run(shared: &StoreShared, receiver: &Receiver<ReconcileMessage>) {
    let interval = shared.config.cache_refresh_interval();
    let debounce = shared.config.file_event_debounce();
    let mut next_periodic = Instant::now() + interval;
    let mut pending_refresh: Option<Instant> = None;

    loop {
        let deadline = pending_refresh.map_or(next_periodic, |due| due.min(next_periodic));
        match receiver.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
            Ok(ReconcileMessage::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Ok(ReconcileMessage::Changed(paths)) => {
                let foreign = paths
                    .iter()
                    .filter_map(|path| insight_id_from_path(path))
                    .filter(|id| !shared.take_self_write(*id))
                    .count();
                if foreign > 0 {
                    // A later change pushes the rescan out again.
                    pending_refresh = Some(Instant::now() + debounce);
                }
            }
            Ok(ReconcileMessage::WatchFailed(error)) => {
                tracing::warn!(%error, "file watcher reported an error");
            }
            Err(RecvTimeoutError::Timeout) => {}
        }

        let now = Instant::now();
        if pending_refresh.is_some_and(|due| due <= now) {
            pending_refresh = None;
            tracing::debug!("refreshing cache after external change");
            shared.refresh();
        }
        if next_periodic <= now {
            next_periodic = now + interval;
            shared.refresh();
        }
    }
    tracing::debug!("reconciler stopped");
}
