//! Crash-safe artifact writes and tolerant removal.
//!
//! Every artifact is written to a sibling temporary file, flushed and then
//! renamed over the destination, so readers only ever observe the previous
//! complete file, the new complete file, or no file at all.

use std::collections::BTreeSet;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum WriteError {
    #[error("failed to write `{path}`: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to remove `{path}`: {source}")]
    Remove {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("write task aborted: {0}")]
    Join(String),
}

/// Atomically replace every path in `paths` with `contents`.
///
/// Returns the number of artifacts written. Paths are processed in order and
/// the first failure stops the batch; earlier paths keep their new content.
pub async fn write_all(
    paths: &BTreeSet<PathBuf>,
    contents: impl Into<Arc<[u8]>>,
) -> Result<usize, WriteError> {
    let contents: Arc<[u8]> = contents.into();
    let mut written = 0;
    for path in paths {
        write_atomic(path.clone(), Arc::clone(&contents)).await?;
        written += 1;
    }
    Ok(written)
}

/// Atomically replace a single file.
pub async fn write_atomic(path: PathBuf, contents: Arc<[u8]>) -> Result<(), WriteError> {
    tokio::task::spawn_blocking(move || {
        write_blocking(&path, &contents).map_err(|source| WriteError::Write {
            path: path.clone(),
            source,
        })?;
        debug!(path = %path.display(), bytes = contents.len(), "Artifact written");
        Ok(())
    })
    .await
    .map_err(|err| WriteError::Join(err.to_string()))?
}

fn write_blocking(path: &Path, contents: &[u8]) -> io::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no parent"))?;
    std::fs::create_dir_all(parent)?;

    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let prefix = format!(".{file_name}.");
    let mut tmp = tempfile::Builder::new()
        .prefix(&prefix)
        .suffix(".tmp")
        .tempfile_in(parent)?;

    tmp.write_all(contents)?;
    tmp.flush()?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tmp.as_file()
            .set_permissions(std::fs::Permissions::from_mode(0o644))?;
    }
    tmp.as_file().sync_all()?;

    // A failed persist drops the temporary file, which removes it.
    tmp.persist(path).map_err(|err| err.error)?;
    Ok(())
}

/// Remove every path in `paths`, treating already-missing files as removed.
///
/// All paths are attempted; the first failure is returned afterwards.
pub async fn remove_all<'a>(
    paths: impl IntoIterator<Item = &'a PathBuf>,
) -> Result<usize, WriteError> {
    let mut removed = 0;
    let mut first_error = None;
    for path in paths {
        match tokio::fs::remove_file(path).await {
            Ok(()) => {
                removed += 1;
                debug!(path = %path.display(), "Artifact removed");
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(source) => {
                if first_error.is_none() {
                    first_error = Some(WriteError::Remove {
                        path: path.clone(),
                        source,
                    });
                }
            }
        }
    }
    match first_error {
        Some(err) => Err(err),
        None => Ok(removed),
    }
}
