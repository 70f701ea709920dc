//! Batch repair of one space's mirror directory.
//!
//! Every current page of the space is scheduled for regeneration, and every
//! `.html` file in the space directory that no cacheable page accounts for is
//! deleted as an orphan.

use std::collections::BTreeSet;
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use metrics::counter;
use serde::Serialize;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, info, instrument, warn};

use crate::application::repos::{ContentStore, StoreError};
use crate::domain::pages::SpaceRecord;

use super::scheduler::{RegenerationScheduler, SubmitError};
use super::target::ARTIFACT_EXTENSION;

const METRIC_ORPHANS_REMOVED: &str = "wikimirror_orphans_removed_total";

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Submit(#[from] SubmitError),
    #[error("failed to list cache directory `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Summary of one reconciliation pass over a space.
#[derive(Debug, Clone, Serialize)]
pub struct ReconcileReport {
    pub space_key: String,
    /// Personal spaces and unconfigured mirrors are skipped entirely.
    pub skipped: bool,
    pub scheduled: usize,
    pub orphans_removed: Vec<String>,
    /// Set when this space could not be reconciled during a full sweep.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub finished_at: OffsetDateTime,
}

impl ReconcileReport {
    fn skipped(space_key: &str) -> Self {
        Self {
            space_key: space_key.to_string(),
            skipped: true,
            scheduled: 0,
            orphans_removed: Vec::new(),
            error: None,
            finished_at: OffsetDateTime::now_utc(),
        }
    }

    fn failed(space_key: &str, err: &ReconcileError) -> Self {
        Self {
            skipped: false,
            error: Some(err.to_string()),
            ..Self::skipped(space_key)
        }
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }
}

pub struct Reconciler {
    store: Arc<dyn ContentStore>,
    scheduler: Arc<RegenerationScheduler>,
}

impl Reconciler {
    pub fn new(store: Arc<dyn ContentStore>, scheduler: Arc<RegenerationScheduler>) -> Self {
        Self { store, scheduler }
    }

    /// Reconcile every space known to the content store.
    ///
    /// A space that fails is logged and reported with its error; the sweep
    /// continues with the remaining spaces.
    pub async fn reconcile_all(&self) -> Result<Vec<ReconcileReport>, ReconcileError> {
        if !self.scheduler.settings().is_configured() {
            debug!("Mirror not configured; skipping full reconciliation");
            return Ok(Vec::new());
        }

        let spaces = self.store.list_spaces().await?;
        let mut reports = Vec::with_capacity(spaces.len());
        for space in &spaces {
            match self.reconcile(space).await {
                Ok(report) => reports.push(report),
                Err(err) => {
                    warn!(space = %space.key, error = %err, "Space reconciliation failed");
                    reports.push(ReconcileReport::failed(&space.key, &err));
                }
            }
        }

        let scheduled: usize = reports.iter().map(|report| report.scheduled).sum();
        let orphans: usize = reports
            .iter()
            .map(|report| report.orphans_removed.len())
            .sum();
        let failed = reports.iter().filter(|report| report.is_failed()).count();
        info!(
            spaces = reports.len(),
            scheduled, orphans, failed, "Full reconciliation finished"
        );
        Ok(reports)
    }

    /// Reconcile the space named `space_key`; `None` when the store does not know it.
    pub async fn reconcile_key(
        &self,
        space_key: &str,
    ) -> Result<Option<ReconcileReport>, ReconcileError> {
        match self.store.find_space(space_key).await? {
            Some(space) => Ok(Some(self.reconcile(&space).await?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(self, space), fields(space = %space.key))]
    pub async fn reconcile(&self, space: &SpaceRecord) -> Result<ReconcileReport, ReconcileError> {
        if space.personal {
            debug!("Personal space; skipping");
            return Ok(ReconcileReport::skipped(&space.key));
        }
        let Some(layout) = self.scheduler.settings().layout() else {
            debug!("Mirror not configured; skipping");
            return Ok(ReconcileReport::skipped(&space.key));
        };

        let space_dir = layout.space_dir(&space.key);
        let mut candidates = list_artifacts(&space_dir).await?;

        let pages = self.store.list_pages(&space.key, true).await?;
        let mut scheduled = 0;
        for page in &pages {
            let handle = self.scheduler.submit(page, false).await?;
            scheduled += 1;
            if handle.target.cacheable {
                for name in handle.target.file_names_in(&space_dir) {
                    candidates.remove(name);
                }
            }
        }

        let mut orphans_removed = Vec::new();
        for name in candidates {
            let path = space_dir.join(&name);
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    debug!(path = %path.display(), "Orphan removed");
                    orphans_removed.push(name.to_string_lossy().into_owned());
                }
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "Failed to remove orphan");
                }
            }
        }
        counter!(METRIC_ORPHANS_REMOVED).increment(orphans_removed.len() as u64);

        info!(
            scheduled,
            orphans = orphans_removed.len(),
            "Space reconciled"
        );
        Ok(ReconcileReport {
            space_key: space.key.clone(),
            skipped: false,
            scheduled,
            orphans_removed,
            error: None,
            finished_at: OffsetDateTime::now_utc(),
        })
    }
}

/// File names in `dir` carrying the artifact extension. A missing directory is empty.
async fn list_artifacts(dir: &Path) -> Result<BTreeSet<OsString>, ReconcileError> {
    let io_error = |source| ReconcileError::Io {
        path: dir.to_path_buf(),
        source,
    };

    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(BTreeSet::new()),
        Err(err) => return Err(io_error(err)),
    };

    let mut names = BTreeSet::new();
    while let Some(entry) = entries.next_entry().await.map_err(io_error)? {
        let path = entry.path();
        let is_artifact = path
            .extension()
            .is_some_and(|extension| extension == ARTIFACT_EXTENSION);
        if !is_artifact {
            continue;
        }
        if entry.file_type().await.map_err(io_error)?.is_file() {
            names.insert(entry.file_name());
        }
    }
    Ok(names)
}
