//! Content-change notifications delivered by the wiki's event bus.

use serde::{Deserialize, Serialize};

use super::pages::PageSnapshot;

/// Content that a label or comment is attached to.
///
/// Only pages are mirrored; everything else (blog posts, attachments, spaces)
/// arrives as [`ContentOwner::Other`] and is ignored by the router.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContentOwner {
    Page(PageSnapshot),
    Other { content_type: String },
}

impl ContentOwner {
    pub fn as_page(&self) -> Option<&PageSnapshot> {
        match self {
            ContentOwner::Page(page) => Some(page),
            ContentOwner::Other { .. } => None,
        }
    }
}

/// One content change, as a closed set of notification kinds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentEvent {
    PageCreated {
        page: PageSnapshot,
    },
    PageUpdated {
        page: PageSnapshot,
        /// Snapshot before the update; present when the bus reports it.
        #[serde(default)]
        original: Option<PageSnapshot>,
    },
    PageMoved {
        page: PageSnapshot,
        #[serde(default)]
        original: Option<PageSnapshot>,
    },
    PageRemoved {
        page: PageSnapshot,
    },
    LabelAdded {
        owner: ContentOwner,
        label: String,
    },
    LabelRemoved {
        owner: ContentOwner,
        label: String,
    },
    CommentAdded {
        owner: ContentOwner,
    },
    CommentRemoved {
        owner: ContentOwner,
    },
}

impl ContentEvent {
    /// Short stable name used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ContentEvent::PageCreated { .. } => "page_created",
            ContentEvent::PageUpdated { .. } => "page_updated",
            ContentEvent::PageMoved { .. } => "page_moved",
            ContentEvent::PageRemoved { .. } => "page_removed",
            ContentEvent::LabelAdded { .. } => "label_added",
            ContentEvent::LabelRemoved { .. } => "label_removed",
            ContentEvent::CommentAdded { .. } => "comment_added",
            ContentEvent::CommentRemoved { .. } => "comment_removed",
        }
    }
}
