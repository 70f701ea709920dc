//! Static mirror maintenance.
//!
//! Each wiki page maps to a [`CacheTarget`]: a key, the URL its rendered HTML is
//! fetched from, and the files it is written to under the mirror root.
//!
//! - [`RegenerationScheduler`] debounces and coalesces regeneration per key and
//!   runs the jobs on a single worker.
//! - [`EventRouter`] turns content notifications into submissions and deletions.
//! - [`Reconciler`] repairs a whole space directory against the page list.
//! - [`writer`] performs the temp-file-and-rename writes every artifact goes through.

mod fetch;
pub(crate) mod lock;
mod reconcile;
mod router;
mod scheduler;
mod target;
mod transform;
pub mod writer;

pub use fetch::{Credentials, FetchError, HttpFetcher, PageFetcher};
pub use reconcile::{ReconcileError, ReconcileReport, Reconciler};
pub use router::{EventRouter, RouteOutcome};
pub use scheduler::{
    JobError, JobOutcome, KeyPhase, PendingHandle, RegenerationScheduler, SubmitError,
};
pub use target::{
    ARTIFACT_EXTENSION, CacheKey, CacheLayout, CacheTarget, DEFAULT_NOCACHE_LABEL,
};
pub use transform::{USER_MENU_ID, hide_user_menu};
pub use writer::WriteError;
