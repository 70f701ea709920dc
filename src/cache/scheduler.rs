//! Debounced regeneration scheduler.
//!
//! Submissions are keyed by [`CacheKey`]. A burst of submissions for the same
//! key collapses into one pending job whose due time is pushed back on every
//! submission, and at most one job per key runs at a time. A submission that
//! arrives while its key is executing schedules exactly one follow-up run.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::FutureExt;
use metrics::{counter, gauge, histogram};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::application::repos::{ContentStore, StoreError};
use crate::config::MirrorSettings;
use crate::domain::pages::PageSnapshot;

use super::fetch::{FetchError, PageFetcher};
use super::lock::lock;
use super::target::{CacheKey, CacheTarget};
use super::writer::{self, WriteError};

const OWNER: &str = "cache::scheduler";
const METRIC_JOBS_TOTAL: &str = "wikimirror_jobs_total";
const METRIC_JOB_MS: &str = "wikimirror_job_ms";
const METRIC_FETCH_FAILURES: &str = "wikimirror_fetch_failures_total";
const METRIC_PENDING_KEYS: &str = "wikimirror_pending_keys";

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("mirror is not configured")]
    NotConfigured,
    #[error("regeneration scheduler has been shut down")]
    Stopped,
}

#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Write(#[from] WriteError),
}

/// Where a key currently sits in the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyPhase {
    Pending,
    Executing,
}

/// Result of one regeneration job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// The page was fetched and written to this many paths.
    Written { paths: usize },
    /// The page carries the no-cache label; its outputs were only removed.
    Evicted,
    /// The page no longer exists; its outputs were removed.
    Removed,
    /// The mirror was unconfigured when the job came due.
    Skipped,
}

impl JobOutcome {
    fn label(&self) -> &'static str {
        match self {
            JobOutcome::Written { .. } => "written",
            JobOutcome::Evicted => "evicted",
            JobOutcome::Removed => "removed",
            JobOutcome::Skipped => "skipped",
        }
    }
}

/// Acknowledgement returned by [`RegenerationScheduler::submit`].
#[derive(Debug, Clone)]
pub struct PendingHandle {
    pub target: CacheTarget,
    /// True when the submission merged into an already pending or running job.
    pub coalesced: bool,
    pub due_in: Duration,
}

#[derive(Debug)]
enum Slot {
    Pending { due: Instant, seq: u64 },
    Executing { follow_up: bool },
}

/// Per-key state machine: absent (idle) → pending → executing → absent or pending.
#[derive(Debug, Default)]
struct KeyTable {
    slots: HashMap<CacheKey, Slot>,
    next_seq: u64,
    stopped: bool,
}

impl KeyTable {
    /// Returns true when the submission coalesced into existing work.
    fn schedule(&mut self, key: CacheKey, due: Instant) -> bool {
        match self.slots.get_mut(&key) {
            Some(Slot::Pending { due: current, .. }) => {
                *current = due;
                true
            }
            Some(Slot::Executing { follow_up }) => {
                *follow_up = true;
                true
            }
            None => {
                let seq = self.bump_seq();
                self.slots.insert(key, Slot::Pending { due, seq });
                false
            }
        }
    }

    fn bump_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    /// Earliest pending key, ties broken by submission order.
    fn next_due(&self) -> Option<(CacheKey, Instant)> {
        self.slots
            .iter()
            .filter_map(|(key, slot)| match slot {
                Slot::Pending { due, seq } => Some((key, *due, *seq)),
                Slot::Executing { .. } => None,
            })
            .min_by_key(|(_, due, seq)| (*due, *seq))
            .map(|(key, due, _)| (key.clone(), due))
    }

    /// Move a due key to executing. Fails if the key was pushed back meanwhile.
    fn begin(&mut self, key: &CacheKey, now: Instant) -> bool {
        let Some(slot) = self.slots.get_mut(key) else {
            return false;
        };
        if !matches!(slot, Slot::Pending { due, .. } if *due <= now) {
            return false;
        }
        *slot = Slot::Executing { follow_up: false };
        true
    }

    /// Retire an executing key. Returns true when a follow-up run was queued.
    fn finish(&mut self, key: &CacheKey, follow_up_due: Instant) -> bool {
        match self.slots.remove(key) {
            Some(Slot::Executing { follow_up: true }) if !self.stopped => {
                let seq = self.bump_seq();
                self.slots.insert(
                    key.clone(),
                    Slot::Pending {
                        due: follow_up_due,
                        seq,
                    },
                );
                true
            }
            _ => false,
        }
    }

    fn phase(&self, key: &CacheKey) -> Option<KeyPhase> {
        self.slots.get(key).map(|slot| match slot {
            Slot::Pending { .. } => KeyPhase::Pending,
            Slot::Executing { .. } => KeyPhase::Executing,
        })
    }

    /// Drop every pending key; an executing key stays until its job retires it.
    fn abandon_pending(&mut self) -> usize {
        self.stopped = true;
        let before = self.slots.len();
        self.slots
            .retain(|_, slot| matches!(slot, Slot::Executing { .. }));
        before - self.slots.len()
    }

    fn len(&self) -> usize {
        self.slots.len()
    }

    fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

struct Shared {
    settings: Arc<MirrorSettings>,
    store: Arc<dyn ContentStore>,
    fetcher: Arc<dyn PageFetcher>,
    debounce: Duration,
    table: Mutex<KeyTable>,
    wake: Notify,
    idle: Notify,
    shutdown: watch::Sender<bool>,
}

/// Debounced, per-key single-flight regeneration of mirror artifacts.
///
/// Jobs run on one background worker started by [`RegenerationScheduler::start`].
/// Submissions are accepted before the worker starts and simply wait.
///
/// ```ignore
/// let scheduler = RegenerationScheduler::new(settings, store, fetcher);
/// scheduler.start();
/// scheduler.submit(&page, false).await?;
/// ```
pub struct RegenerationScheduler {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl RegenerationScheduler {
    /// Create a scheduler using the debounce interval from `settings`.
    pub fn new(
        settings: Arc<MirrorSettings>,
        store: Arc<dyn ContentStore>,
        fetcher: Arc<dyn PageFetcher>,
    ) -> Self {
        let debounce = settings.debounce;
        let (shutdown, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                settings,
                store,
                fetcher,
                debounce,
                table: Mutex::new(KeyTable::default()),
                wake: Notify::new(),
                idle: Notify::new(),
                shutdown,
            }),
            worker: Mutex::new(None),
        }
    }

    pub fn settings(&self) -> &MirrorSettings {
        &self.shared.settings
    }

    /// Spawn the background worker. Calling this more than once is a no-op.
    pub fn start(&self) {
        let mut worker = lock(&self.worker, OWNER, "start");
        if worker.is_some() {
            return;
        }
        let shared = Arc::clone(&self.shared);
        let shutdown = self.shared.shutdown.subscribe();
        *worker = Some(tokio::spawn(run_worker(shared, shutdown)));
        info!(
            debounce_ms = self.shared.debounce.as_millis() as u64,
            "Regeneration worker started"
        );
    }

    /// Request (re)generation of `page`.
    ///
    /// With `evict_immediately` the page's current artifacts are removed before
    /// this call returns, so a stale copy is never served while the job waits.
    pub async fn submit(
        &self,
        page: &PageSnapshot,
        evict_immediately: bool,
    ) -> Result<PendingHandle, SubmitError> {
        let layout = self
            .shared
            .settings
            .layout()
            .ok_or(SubmitError::NotConfigured)?;
        if lock(&self.shared.table, OWNER, "submit").stopped {
            return Err(SubmitError::Stopped);
        }

        let target = layout.target(page);
        if evict_immediately {
            if let Err(err) = writer::remove_all(&target.output_paths).await {
                warn!(key = %target.key, error = %err, "Immediate eviction failed");
            }
        }

        let due = Instant::now() + self.shared.debounce;
        let coalesced = {
            let mut table = lock(&self.shared.table, OWNER, "submit");
            if table.stopped {
                return Err(SubmitError::Stopped);
            }
            let coalesced = table.schedule(target.key.clone(), due);
            gauge!(METRIC_PENDING_KEYS).set(table.len() as f64);
            coalesced
        };
        self.shared.wake.notify_one();

        debug!(
            key = %target.key,
            coalesced,
            evicted = evict_immediately,
            "Regeneration submitted"
        );

        Ok(PendingHandle {
            target,
            coalesced,
            due_in: self.shared.debounce,
        })
    }

    /// Number of keys that are pending or executing.
    pub fn pending_len(&self) -> usize {
        lock(&self.shared.table, OWNER, "pending_len").len()
    }

    pub fn phase(&self, key: &CacheKey) -> Option<KeyPhase> {
        lock(&self.shared.table, OWNER, "phase").phase(key)
    }

    /// Resolve once no key is pending or executing.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.shared.idle.notified();
            if lock(&self.shared.table, OWNER, "wait_idle").is_empty() {
                return;
            }
            notified.await;
        }
    }

    /// Stop accepting work, let the running job finish and abandon pending keys.
    pub async fn shutdown(&self) {
        self.shared.shutdown.send_replace(true);
        let handle = lock(&self.worker, OWNER, "shutdown").take();
        match handle {
            Some(handle) => {
                if let Err(err) = handle.await {
                    error!(error = %err, "Regeneration worker terminated abnormally");
                }
            }
            None => self.shared.abandon_pending(),
        }
    }
}

impl Drop for RegenerationScheduler {
    fn drop(&mut self) {
        self.shared.shutdown.send_replace(true);
    }
}

async fn run_worker(shared: Arc<Shared>, mut shutdown: watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            break;
        }

        let next = lock(&shared.table, OWNER, "next_due").next_due();
        match next {
            Some((key, due)) if due <= Instant::now() => {
                let began = lock(&shared.table, OWNER, "begin").begin(&key, Instant::now());
                if began {
                    shared.execute(&key).await;
                    shared.finish(&key);
                }
            }
            Some((_, due)) => {
                tokio::select! {
                    _ = tokio::time::sleep_until(due) => {}
                    _ = shared.wake.notified() => {}
                    _ = shutdown.changed() => {}
                }
            }
            None => {
                tokio::select! {
                    _ = shared.wake.notified() => {}
                    _ = shutdown.changed() => {}
                }
            }
        }
    }

    shared.abandon_pending();
    info!("Regeneration worker stopped");
}

impl Shared {
    async fn execute(&self, key: &CacheKey) {
        let started = std::time::Instant::now();
        let job_id = Uuid::new_v4();
        let span = info_span!("regenerate", %job_id, %key);

        let result = AssertUnwindSafe(self.regenerate(key).instrument(span))
            .catch_unwind()
            .await;

        let outcome = match result {
            Ok(Ok(outcome)) => {
                info!(%job_id, %key, outcome = ?outcome, "Regeneration finished");
                outcome.label()
            }
            Ok(Err(err)) => {
                if let JobError::Fetch(fetch) = &err {
                    counter!(METRIC_FETCH_FAILURES).increment(1);
                    warn!(
                        %job_id,
                        %key,
                        url = fetch.url(),
                        error = %err,
                        "Fetch failed; artifact stays absent until the page changes again"
                    );
                } else {
                    warn!(%job_id, %key, error = %err, "Regeneration failed");
                }
                "failed"
            }
            Err(panic) => {
                error!(
                    %job_id,
                    %key,
                    panic = panic_message(panic.as_ref()),
                    "Regeneration job panicked"
                );
                "panicked"
            }
        };

        counter!(METRIC_JOBS_TOTAL, "outcome" => outcome).increment(1);
        histogram!(METRIC_JOB_MS).record(started.elapsed().as_secs_f64() * 1000.0);
    }

    /// Delete the current artifacts, then fetch and write them again if the page is cacheable.
    async fn regenerate(&self, key: &CacheKey) -> Result<JobOutcome, JobError> {
        let Some(layout) = self.settings.layout() else {
            debug!("Mirror not configured; skipping job");
            return Ok(JobOutcome::Skipped);
        };

        let Some(page) = self.store.find_page(&key.space_key, &key.title).await? else {
            writer::remove_all(&layout.output_paths(key)).await?;
            return Ok(JobOutcome::Removed);
        };

        let target = layout.target(&page);
        writer::remove_all(&target.output_paths).await?;
        if !target.cacheable {
            return Ok(JobOutcome::Evicted);
        }

        debug!(url = %target.source_url, "Fetching page");
        let html = self.fetcher.fetch(&target.source_url).await?;
        match writer::write_all(&target.output_paths, html.into_bytes()).await {
            Ok(paths) => Ok(JobOutcome::Written { paths }),
            Err(err) => {
                // A partial batch must not leave one spelling behind.
                if let Err(cleanup) = writer::remove_all(&target.output_paths).await {
                    warn!(error = %cleanup, "Failed to roll back partially written artifacts");
                }
                Err(err.into())
            }
        }
    }

    fn finish(&self, key: &CacheKey) {
        let mut table = lock(&self.table, OWNER, "finish");
        let rescheduled = table.finish(key, Instant::now() + self.debounce);
        let remaining = table.len();
        drop(table);

        gauge!(METRIC_PENDING_KEYS).set(remaining as f64);
        if rescheduled {
            debug!(%key, "Follow-up regeneration scheduled");
        }
        if remaining == 0 {
            self.idle.notify_waiters();
        }
    }

    fn abandon_pending(&self) {
        let mut table = lock(&self.table, OWNER, "abandon_pending");
        let abandoned = table.abandon_pending();
        let remaining = table.len();
        drop(table);

        gauge!(METRIC_PENDING_KEYS).set(remaining as f64);
        if abandoned > 0 {
            warn!(abandoned, "Pending regenerations abandoned at shutdown");
        }
        if remaining == 0 {
            self.idle.notify_waiters();
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
