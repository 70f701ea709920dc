//! Repository traits describing content-store adapters.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::pages::{PageSnapshot, SpaceRecord};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("content store request failed: {0}")]
    Transport(String),
    #[error("content store returned status {status} for `{url}`")]
    Status { url: String, status: u16 },
    #[error("content store response could not be decoded: {0}")]
    Decode(String),
}

impl StoreError {
    pub fn transport(err: impl std::fmt::Display) -> Self {
        Self::Transport(err.to_string())
    }

    pub fn decode(err: impl std::fmt::Display) -> Self {
        Self::Decode(err.to_string())
    }
}

/// Read-only view of the authoritative page tree.
#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn list_spaces(&self) -> Result<Vec<SpaceRecord>, StoreError>;

    /// Pages of a space. With `include_descendants` false only top-level pages are returned.
    async fn list_pages(
        &self,
        space_key: &str,
        include_descendants: bool,
    ) -> Result<Vec<PageSnapshot>, StoreError>;

    /// Current snapshot of the page identified by `(space_key, title)`, if it still exists.
    async fn find_page(
        &self,
        space_key: &str,
        title: &str,
    ) -> Result<Option<PageSnapshot>, StoreError>;

    async fn find_space(&self, space_key: &str) -> Result<Option<SpaceRecord>, StoreError> {
        Ok(self
            .list_spaces()
            .await?
            .into_iter()
            .find(|space| space.key == space_key))
    }
}
