//! Shared state of a single mirror run, observable from other threads while the run is going.

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    mpsc::{channel, Receiver, Sender},
    Arc, Mutex, MutexGuard,
};

use serde::Serialize;

use crate::types::{DownloadFailure, MirrorStatus};

/// Cooperative, sticky cancellation flag.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    Validating,
    LocatingMetadata,
    ParsingMetadata,
    BuildingIndex,
    Downloading,
    Crawling,
    Finished(MirrorStatus),
    Error,
}

impl Phase {
    /// Label shown to the user.
    pub fn label(&self) -> &'static str {
        match self {
            Phase::Validating => "Validating input…",
            Phase::LocatingMetadata => "Searching repo metadata files…",
            Phase::ParsingMetadata | Phase::BuildingIndex => "Parsing Packages file…",
            Phase::Downloading => "Downloading .deb files…",
            Phase::Crawling => "Mirroring remaining files…",
            Phase::Finished(MirrorStatus::Cancelled) => "Download cancelled",
            Phase::Finished(_) => "Download complete",
            Phase::Error => "Error",
        }
    }
}

/// Point-in-time copy of the run state.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ProgressSnapshot {
    pub files_total: usize,
    pub files_downloaded: usize,
    pub phase: &'static str,
    pub cancelled: bool,
    pub failures: usize,
    pub log: String,
}

struct HandleState {
    files_total: AtomicUsize,
    files_downloaded: AtomicUsize,
    cancel: CancellationToken,
    phase: Mutex<Phase>,
    log: Mutex<Vec<String>>,
    failures: Mutex<Vec<DownloadFailure>>,
    listeners: Mutex<Vec<Sender<String>>>,
}

// a panicking observer must not take the whole run down with it
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Handle on a mirror run.
///
/// The orchestrator is the only writer, any number of clones may read [snapshot]s, subscribe to
/// log lines or request cancellation.
///
/// [snapshot]: MirrorHandle::snapshot
#[derive(Clone)]
pub struct MirrorHandle {
    state: Arc<HandleState>,
}

impl Default for MirrorHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl MirrorHandle {
    pub fn new() -> Self {
        Self::with_cancellation(CancellationToken::new())
    }

    pub fn with_cancellation(cancel: CancellationToken) -> Self {
        Self {
            state: Arc::new(HandleState {
                files_total: AtomicUsize::new(0),
                files_downloaded: AtomicUsize::new(0),
                cancel,
                phase: Mutex::new(Phase::Validating),
                log: Mutex::new(Vec::new()),
                failures: Mutex::new(Vec::new()),
                listeners: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.state.cancel.clone()
    }

    pub fn cancel(&self) {
        self.state.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.cancel.is_cancelled()
    }

    /// Receive every log line from now on. The channel closes once the run is finalized.
    pub fn subscribe(&self) -> Receiver<String> {
        let (sender, receiver) = channel();
        lock(&self.state.listeners).push(sender);
        receiver
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            files_total: self.files_total(),
            files_downloaded: self.files_downloaded(),
            phase: self.phase().label(),
            cancelled: self.is_cancelled(),
            failures: lock(&self.state.failures).len(),
            log: self.log_text(),
        }
    }

    pub fn files_total(&self) -> usize {
        self.state.files_total.load(Ordering::SeqCst)
    }

    pub fn files_downloaded(&self) -> usize {
        self.state.files_downloaded.load(Ordering::SeqCst)
    }

    pub fn phase(&self) -> Phase {
        *lock(&self.state.phase)
    }

    pub fn failures(&self) -> Vec<DownloadFailure> {
        lock(&self.state.failures).clone()
    }

    pub fn log_lines(&self) -> Vec<String> {
        lock(&self.state.log).clone()
    }

    pub fn log_text(&self) -> String {
        let mut text = lock(&self.state.log).join("\n");
        if !text.is_empty() {
            text.push('\n');
        }
        text
    }

    pub(crate) fn set_phase(&self, phase: Phase) {
        tracing::info!("{}", phase.label());
        *lock(&self.state.phase) = phase;
    }

    pub(crate) fn add_total(&self, count: usize) {
        self.state.files_total.fetch_add(count, Ordering::SeqCst);
    }

    pub(crate) fn file_done(&self) {
        self.state.files_downloaded.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn log(&self, line: impl Into<String>) {
        let line = line.into();
        tracing::debug!("{line}");

        lock(&self.state.listeners).retain(|listener| listener.send(line.clone()).is_ok());
        lock(&self.state.log).push(line);
    }

    pub(crate) fn record_failure(&self, path: &str, error: impl ToString) {
        let failure = DownloadFailure {
            path: path.to_string(),
            error: error.to_string(),
        };
        tracing::warn!("failed to fetch '{}' - {}", failure.path, failure.error);
        self.log(format!("ERROR: {} - {}", failure.path, failure.error));
        lock(&self.state.failures).push(failure);
    }

    /// Drop all subscriptions, ending the receivers' iteration.
    pub fn close(&self) {
        lock(&self.state.listeners).clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_is_shared_and_sticky() {
        let handle = MirrorHandle::new();
        let token = handle.cancellation_token();
        let observer = handle.clone();

        assert!(!observer.is_cancelled());
        token.cancel();
        token.cancel();
        assert!(observer.is_cancelled());
        assert!(handle.snapshot().cancelled);
    }

    #[test]
    fn subscribers_see_lines_until_close() {
        let handle = MirrorHandle::new();
        let receiver = handle.subscribe();

        handle.log("first");
        handle.record_failure("debs/a.deb", "HTTP 404 Not Found");
        handle.close();
        handle.log("after close");

        let lines: Vec<String> = receiver.iter().collect();
        assert_eq!(lines, ["first", "ERROR: debs/a.deb - HTTP 404 Not Found"]);
        assert_eq!(handle.log_lines().len(), 3);
        assert_eq!(handle.failures().len(), 1);
    }

    #[test]
    fn snapshot_reports_counters_and_phase() {
        let handle = MirrorHandle::new();
        handle.set_phase(Phase::Downloading);
        handle.add_total(3);
        handle.file_done();

        let snapshot = handle.snapshot();
        assert_eq!(snapshot.files_total, 3);
        assert_eq!(snapshot.files_downloaded, 1);
        assert_eq!(snapshot.phase, "Downloading .deb files…");
    }
}
