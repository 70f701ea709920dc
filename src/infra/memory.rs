//! In-process content store.
//!
//! Used when no REST endpoint is configured and as the store behind the
//! integration tests.

use std::sync::RwLock;

use async_trait::async_trait;

use crate::application::repos::{ContentStore, StoreError};
use crate::cache::lock::{read, write};
use crate::domain::pages::{PageSnapshot, SpaceRecord};

const OWNER: &str = "infra::memory";

#[derive(Debug, Clone)]
struct StoredPage {
    page: PageSnapshot,
    parent: Option<String>,
}

#[derive(Debug, Default)]
struct MemoryState {
    spaces: Vec<SpaceRecord>,
    pages: Vec<StoredPage>,
}

#[derive(Debug, Default)]
pub struct MemoryContentStore {
    state: RwLock<MemoryState>,
}

impl MemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a space by key.
    pub fn upsert_space(&self, space: SpaceRecord) {
        let mut state = write(&self.state, OWNER, "upsert_space");
        match state.spaces.iter_mut().find(|known| known.key == space.key) {
            Some(known) => *known = space,
            None => state.spaces.push(space),
        }
    }

    /// Insert or replace a top-level page.
    pub fn upsert_page(&self, page: PageSnapshot) {
        self.store(page, None);
    }

    /// Insert or replace a page nested under `parent_title` in the same space.
    pub fn upsert_child_page(&self, page: PageSnapshot, parent_title: impl Into<String>) {
        self.store(page, Some(parent_title.into()));
    }

    fn store(&self, page: PageSnapshot, parent: Option<String>) {
        let mut state = write(&self.state, OWNER, "upsert_page");
        let entry = StoredPage { page, parent };
        match state.pages.iter_mut().find(|stored| {
            stored.page.space_key == entry.page.space_key && stored.page.title == entry.page.title
        }) {
            Some(stored) => *stored = entry,
            None => state.pages.push(entry),
        }
    }

    pub fn remove_page(&self, space_key: &str, title: &str) -> Option<PageSnapshot> {
        let mut state = write(&self.state, OWNER, "remove_page");
        let index = state
            .pages
            .iter()
            .position(|stored| stored.page.space_key == space_key && stored.page.title == title)?;
        Some(state.pages.remove(index).page)
    }
}

#[async_trait]
impl ContentStore for MemoryContentStore {
    async fn list_spaces(&self) -> Result<Vec<SpaceRecord>, StoreError> {
        Ok(read(&self.state, OWNER, "list_spaces").spaces.clone())
    }

    async fn list_pages(
        &self,
        space_key: &str,
        include_descendants: bool,
    ) -> Result<Vec<PageSnapshot>, StoreError> {
        let state = read(&self.state, OWNER, "list_pages");
        Ok(state
            .pages
            .iter()
            .filter(|stored| stored.page.space_key == space_key)
            .filter(|stored| include_descendants || stored.parent.is_none())
            .map(|stored| stored.page.clone())
            .collect())
    }

    async fn find_page(
        &self,
        space_key: &str,
        title: &str,
    ) -> Result<Option<PageSnapshot>, StoreError> {
        let state = read(&self.state, OWNER, "find_page");
        Ok(state
            .pages
            .iter()
            .find(|stored| stored.page.space_key == space_key && stored.page.title == title)
            .map(|stored| stored.page.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn root_listing_excludes_children() {
        let store = MemoryContentStore::new();
        store.upsert_space(SpaceRecord::global("DOC"));
        store.upsert_page(PageSnapshot::new("DOC", "Home", "/display/DOC/Home"));
        store.upsert_child_page(PageSnapshot::new("DOC", "Child", "/display/DOC/Child"), "Home");
        store.upsert_page(PageSnapshot::new("OPS", "Runbook", "/display/OPS/Runbook"));

        let roots = store.list_pages("DOC", false).await.expect("roots");
        let all = store.list_pages("DOC", true).await.expect("all");

        assert_eq!(roots.len(), 1);
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn upsert_replaces_by_identity() {
        let store = MemoryContentStore::new();
        store.upsert_page(PageSnapshot::new("DOC", "Home", "/display/DOC/Home"));
        store.upsert_page(PageSnapshot::new("DOC", "Home", "/display/DOC/Home").with_label("nocache"));

        let page = store.find_page("DOC", "Home").await.expect("lookup").expect("present");
        assert!(page.has_label("nocache"));
        assert_eq!(store.list_pages("DOC", true).await.expect("all").len(), 1);
    }

    #[tokio::test]
    async fn removed_pages_are_no_longer_found() {
        let store = MemoryContentStore::new();
        store.upsert_page(PageSnapshot::new("DOC", "Home", "/display/DOC/Home"));

        assert!(store.remove_page("DOC", "Home").is_some());
        assert!(store.find_page("DOC", "Home").await.expect("lookup").is_none());
        assert!(store.remove_page("DOC", "Home").is_none());
    }

    #[tokio::test]
    async fn find_space_uses_listing() {
        let store = MemoryContentStore::new();
        store.upsert_space(SpaceRecord::personal("~bob"));

        let space = store.find_space("~bob").await.expect("lookup");
        assert_eq!(space, Some(SpaceRecord::personal("~bob")));
        assert!(store.find_space("DOC").await.expect("lookup").is_none());
    }
}
