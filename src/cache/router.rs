//! Maps content-change notifications onto scheduler submissions and deletions.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use crate::domain::events::{ContentEvent, ContentOwner};
use crate::domain::pages::PageSnapshot;

use super::scheduler::{RegenerationScheduler, SubmitError};
use super::target::{CacheKey, CacheLayout};
use super::writer;

/// What the router did with one notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RouteOutcome {
    NotConfigured,
    Ignored {
        reason: String,
    },
    Removed {
        key: CacheKey,
    },
    Scheduled {
        key: CacheKey,
        #[serde(skip_serializing_if = "Option::is_none")]
        renamed_from: Option<CacheKey>,
    },
}

pub struct EventRouter {
    scheduler: Arc<RegenerationScheduler>,
}

impl EventRouter {
    pub fn new(scheduler: Arc<RegenerationScheduler>) -> Self {
        Self { scheduler }
    }

    pub async fn route(&self, event: ContentEvent) -> Result<RouteOutcome, SubmitError> {
        let Some(layout) = self.scheduler.settings().layout() else {
            debug!(event = event.kind(), "Mirror not configured; ignoring event");
            return Ok(RouteOutcome::NotConfigured);
        };
        let kind = event.kind();

        let outcome = match event {
            ContentEvent::PageRemoved { page } => {
                let key = CacheKey::of(&page);
                remove_outputs(&layout, &key).await;
                RouteOutcome::Removed { key }
            }
            ContentEvent::PageCreated { page } => self.schedule(&page, None).await?,
            ContentEvent::PageUpdated { page, original }
            | ContentEvent::PageMoved { page, original } => {
                let handle = self.schedule(&page, original.as_ref()).await?;
                if let RouteOutcome::Scheduled {
                    renamed_from: Some(old_key),
                    ..
                } = &handle
                {
                    remove_outputs(&layout, old_key).await;
                }
                handle
            }
            ContentEvent::LabelAdded { owner, .. }
            | ContentEvent::LabelRemoved { owner, .. }
            | ContentEvent::CommentAdded { owner }
            | ContentEvent::CommentRemoved { owner } => match owner {
                ContentOwner::Page(page) => self.schedule(&page, None).await?,
                ContentOwner::Other { content_type } => RouteOutcome::Ignored {
                    reason: format!("owner is a {content_type}, not a page"),
                },
            },
        };

        debug!(event = kind, outcome = ?outcome, "Event routed");
        Ok(outcome)
    }

    async fn schedule(
        &self,
        page: &PageSnapshot,
        original: Option<&PageSnapshot>,
    ) -> Result<RouteOutcome, SubmitError> {
        let handle = self.scheduler.submit(page, true).await?;
        let renamed_from = original
            .map(CacheKey::of)
            .filter(|old_key| *old_key != handle.target.key);
        Ok(RouteOutcome::Scheduled {
            key: handle.target.key,
            renamed_from,
        })
    }
}

async fn remove_outputs(layout: &CacheLayout, key: &CacheKey) {
    if let Err(err) = writer::remove_all(&layout.output_paths(key)).await {
        warn!(%key, error = %err, "Failed to remove page artifacts");
    }
}
