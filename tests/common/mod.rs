#![allow(dead_code)]

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use url::Url;
use wikimirror::application::repos::ContentStore;
use wikimirror::application::services::MirrorServices;
use wikimirror::cache::{CacheKey, Credentials, FetchError, KeyPhase, PageFetcher};
use wikimirror::config::MirrorSettings;
use wikimirror::domain::pages::{PageSnapshot, SpaceRecord};
use wikimirror::infra::memory::MemoryContentStore;

pub const RENDER_BASE: &str = "http://wiki.test/";
pub const DEBOUNCE: Duration = Duration::from_millis(20);
pub const WAIT: Duration = Duration::from_secs(5);

/// Fetcher double that records calls and the peak number of overlapping fetches.
#[derive(Default)]
pub struct RecordingFetcher {
    delay: Duration,
    failing: Mutex<HashSet<String>>,
    panicking: Mutex<HashSet<String>>,
    calls: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl RecordingFetcher {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn fail_on(&self, url: &str) {
        self.failing.lock().expect("lock").insert(url.to_string());
    }

    pub fn panic_on(&self, url: &str) {
        self.panicking.lock().expect("lock").insert(url.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("lock").clone()
    }

    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PageFetcher for RecordingFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        self.calls.lock().expect("lock").push(url.to_string());
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(current, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let explode = self.panicking.lock().expect("lock").contains(url);
        if explode {
            panic!("fetcher exploded for {url}");
        }
        if self.failing.lock().expect("lock").contains(url) {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: 503,
            });
        }
        Ok(format!("<html><body>{url}</body></html>"))
    }
}

pub struct Harness {
    pub root: TempDir,
    pub store: Arc<MemoryContentStore>,
    pub fetcher: Arc<RecordingFetcher>,
    pub services: MirrorServices,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_fetcher(RecordingFetcher::default())
    }

    pub fn with_fetcher(fetcher: RecordingFetcher) -> Self {
        let root = tempfile::tempdir().expect("tempdir");
        let settings = configured(&root);
        Self::build(root, settings, fetcher, |store| store)
    }

    /// Configured harness whose services see the memory store through `wrap`.
    pub fn with_store_wrapper(
        wrap: impl FnOnce(Arc<dyn ContentStore>) -> Arc<dyn ContentStore>,
    ) -> Self {
        let root = tempfile::tempdir().expect("tempdir");
        let settings = configured(&root);
        Self::build(root, settings, RecordingFetcher::default(), wrap)
    }

    pub fn unconfigured() -> Self {
        let root = tempfile::tempdir().expect("tempdir");
        Self::build(
            root,
            MirrorSettings::default(),
            RecordingFetcher::default(),
            |store| store,
        )
    }

    fn build(
        root: TempDir,
        settings: MirrorSettings,
        fetcher: RecordingFetcher,
        wrap: impl FnOnce(Arc<dyn ContentStore>) -> Arc<dyn ContentStore>,
    ) -> Self {
        let store = Arc::new(MemoryContentStore::new());
        store.upsert_space(SpaceRecord::global("DOC"));
        let fetcher = Arc::new(fetcher);
        let services = MirrorServices::new(
            Arc::new(settings),
            wrap(Arc::clone(&store) as Arc<dyn ContentStore>),
            Arc::clone(&fetcher) as _,
        );
        Self {
            root,
            store,
            fetcher,
            services,
        }
    }

    pub fn space_dir(&self) -> PathBuf {
        self.root.path().join("DOC")
    }

    pub fn artifact(&self, file_name: &str) -> PathBuf {
        self.space_dir().join(file_name)
    }

    pub fn seed(&self, file_name: &str, contents: &str) -> PathBuf {
        let path = self.artifact(file_name);
        std::fs::create_dir_all(self.space_dir()).expect("space dir");
        std::fs::write(&path, contents).expect("seed artifact");
        path
    }

    pub fn add_page(&self, title: &str) -> PageSnapshot {
        let page = page(title);
        self.store.upsert_page(page.clone());
        page
    }

    pub async fn drain(&self) {
        tokio::time::timeout(WAIT, self.services.scheduler.wait_idle())
            .await
            .expect("scheduler should drain");
    }

    pub async fn wait_for_phase(&self, key: &CacheKey, phase: KeyPhase) {
        tokio::time::timeout(WAIT, async {
            while self.services.scheduler.phase(key) != Some(phase) {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("key should reach phase");
    }
}

fn configured(root: &TempDir) -> MirrorSettings {
    MirrorSettings::configured(
        root.path(),
        Url::parse(RENDER_BASE).expect("render base"),
        Credentials::new("mirror", "secret"),
    )
    .with_debounce(DEBOUNCE)
}

pub fn page(title: &str) -> PageSnapshot {
    PageSnapshot::new(
        "DOC",
        title,
        format!("/display/DOC/{}", title.replace(' ', "+")),
    )
}

pub fn source_url(page: &PageSnapshot) -> String {
    format!("http://wiki.test{}", page.url_path)
}

pub fn read(path: &Path) -> String {
    std::fs::read_to_string(path).expect("artifact should exist")
}
