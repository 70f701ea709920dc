//! Page and space snapshots as seen by the mirror.

use serde::{Deserialize, Serialize};

/// Point-in-time view of one wiki page.
///
/// Snapshots are never cached across the debounce window; the scheduler
/// always asks the content store for a fresh one before touching disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageSnapshot {
    pub space_key: String,
    pub title: String,
    /// Path of the rendered page relative to the render endpoint, e.g. `/display/DOC/Home`.
    pub url_path: String,
    #[serde(default)]
    pub labels: Vec<String>,
}

impl PageSnapshot {
    pub fn new(
        space_key: impl Into<String>,
        title: impl Into<String>,
        url_path: impl Into<String>,
    ) -> Self {
        Self {
            space_key: space_key.into(),
            title: title.into(),
            url_path: url_path.into(),
            labels: Vec::new(),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.labels.push(label.into());
        self
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|candidate| candidate == label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpaceRecord {
    pub key: String,
    /// Personal spaces are never mirrored.
    #[serde(default)]
    pub personal: bool,
}

impl SpaceRecord {
    pub fn global(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            personal: false,
        }
    }

    pub fn personal(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            personal: true,
        }
    }
}
