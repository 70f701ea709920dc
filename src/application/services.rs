//! Wiring of the mirror components around one scheduler.

use std::sync::Arc;

use crate::application::repos::ContentStore;
use crate::cache::{EventRouter, PageFetcher, Reconciler, RegenerationScheduler};
use crate::config::MirrorSettings;
use crate::infra::http::AdminState;

/// The scheduler plus the router and reconciler that feed it.
#[derive(Clone)]
pub struct MirrorServices {
    pub store: Arc<dyn ContentStore>,
    pub scheduler: Arc<RegenerationScheduler>,
    pub router: Arc<EventRouter>,
    pub reconciler: Arc<Reconciler>,
}

impl MirrorServices {
    /// Build the services. The scheduler worker is not started.
    pub fn new(
        settings: Arc<MirrorSettings>,
        store: Arc<dyn ContentStore>,
        fetcher: Arc<dyn PageFetcher>,
    ) -> Self {
        let scheduler = Arc::new(RegenerationScheduler::new(
            settings,
            Arc::clone(&store),
            fetcher,
        ));
        let router = Arc::new(EventRouter::new(Arc::clone(&scheduler)));
        let reconciler = Arc::new(Reconciler::new(
            Arc::clone(&store),
            Arc::clone(&scheduler),
        ));
        Self {
            store,
            scheduler,
            router,
            reconciler,
        }
    }

    pub fn admin_state(&self) -> AdminState {
        AdminState {
            router: Arc::clone(&self.router),
            reconciler: Arc::clone(&self.reconciler),
            scheduler: Arc::clone(&self.scheduler),
        }
    }
}
