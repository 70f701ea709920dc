//! Content store backed by the wiki's REST API.

use std::num::NonZeroU32;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, header::ACCEPT};
use serde::{Deserialize, de::DeserializeOwned};
use tracing::debug;
use url::Url;

use crate::application::repos::{ContentStore, StoreError};
use crate::cache::Credentials;
use crate::domain::pages::{PageSnapshot, SpaceRecord};

const PAGE_EXPAND: &str = "space,metadata.labels";
const PERSONAL_SPACE_TYPE: &str = "personal";

pub struct RestContentStore {
    client: Client,
    base: Url,
    credentials: Credentials,
    page_limit: u32,
}

impl RestContentStore {
    pub fn new(
        base: Url,
        credentials: Credentials,
        page_limit: NonZeroU32,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(concat!("wikimirror/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            base: with_trailing_slash(base),
            credentials,
            page_limit: page_limit.get(),
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, StoreError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| StoreError::transport(format!("`{}` cannot be a base URL", self.base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, StoreError> {
        let response = self
            .client
            .get(url.clone())
            .basic_auth(&self.credentials.username, Some(&self.credentials.password))
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(StoreError::transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(StoreError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let bytes = response.bytes().await.map_err(StoreError::transport)?;
        serde_json::from_slice(&bytes).map_err(StoreError::decode)
    }

    /// Follow `start`/`limit` pagination until the server stops advertising a next page.
    async fn collect_pages<T: DeserializeOwned>(
        &self,
        mut url: Url,
        query: &[(&str, &str)],
    ) -> Result<Vec<T>, StoreError> {
        url.query_pairs_mut().extend_pairs(query);
        let limit = self.page_limit.to_string();

        let mut items = Vec::new();
        let mut start = 0usize;
        loop {
            let mut page_url = url.clone();
            page_url
                .query_pairs_mut()
                .append_pair("start", &start.to_string())
                .append_pair("limit", &limit);

            let page: Paged<T> = self.get_json(page_url).await?;
            let fetched = page.results.len();
            items.extend(page.results);
            if fetched == 0 || page.links.next.is_none() {
                break;
            }
            start += fetched;
        }
        Ok(items)
    }
}

#[async_trait]
impl ContentStore for RestContentStore {
    async fn list_spaces(&self) -> Result<Vec<SpaceRecord>, StoreError> {
        let url = self.endpoint(&["rest", "api", "space"])?;
        let spaces: Vec<RawSpace> = self.collect_pages(url, &[]).await?;
        debug!(count = spaces.len(), "Listed spaces");
        Ok(spaces.into_iter().map(RawSpace::into_record).collect())
    }

    async fn list_pages(
        &self,
        space_key: &str,
        include_descendants: bool,
    ) -> Result<Vec<PageSnapshot>, StoreError> {
        let pages: Vec<RawPage> = if include_descendants {
            let url = self.endpoint(&["rest", "api", "content"])?;
            let query = [
                ("spaceKey", space_key),
                ("type", "page"),
                ("expand", PAGE_EXPAND),
            ];
            self.collect_pages(url, &query).await?
        } else {
            let url = self.endpoint(&["rest", "api", "space", space_key, "content", "page"])?;
            let query = [("depth", "root"), ("expand", PAGE_EXPAND)];
            self.collect_pages(url, &query).await?
        };
        debug!(space = space_key, count = pages.len(), "Listed pages");
        Ok(pages
            .into_iter()
            .map(|page| page.into_snapshot(space_key))
            .collect())
    }

    async fn find_page(
        &self,
        space_key: &str,
        title: &str,
    ) -> Result<Option<PageSnapshot>, StoreError> {
        let mut url = self.endpoint(&["rest", "api", "content"])?;
        url.query_pairs_mut()
            .append_pair("spaceKey", space_key)
            .append_pair("title", title)
            .append_pair("type", "page")
            .append_pair("expand", PAGE_EXPAND);

        let page: Paged<RawPage> = self.get_json(url).await?;
        Ok(page
            .results
            .into_iter()
            .next()
            .map(|page| page.into_snapshot(space_key)))
    }

    async fn find_space(&self, space_key: &str) -> Result<Option<SpaceRecord>, StoreError> {
        let url = self.endpoint(&["rest", "api", "space", space_key])?;
        match self.get_json::<RawSpace>(url).await {
            Ok(space) => Ok(Some(space.into_record())),
            Err(StoreError::Status { status: 404, .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }
}

fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

#[derive(Debug, Deserialize)]
struct Paged<T> {
    results: Vec<T>,
    #[serde(default, rename = "_links")]
    links: PageLinks,
}

#[derive(Debug, Default, Deserialize)]
struct PageLinks {
    #[serde(default)]
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawSpace {
    key: String,
    #[serde(default, rename = "type")]
    kind: String,
}

impl RawSpace {
    fn into_record(self) -> SpaceRecord {
        SpaceRecord {
            personal: self.kind == PERSONAL_SPACE_TYPE,
            key: self.key,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawPage {
    title: String,
    #[serde(default)]
    space: Option<RawSpaceRef>,
    #[serde(default)]
    metadata: Option<RawMetadata>,
    #[serde(rename = "_links")]
    links: RawPageLinks,
}

#[derive(Debug, Deserialize)]
struct RawSpaceRef {
    key: String,
}

#[derive(Debug, Deserialize)]
struct RawMetadata {
    #[serde(default)]
    labels: Option<Paged<RawLabel>>,
}

#[derive(Debug, Deserialize)]
struct RawLabel {
    name: String,
}

#[derive(Debug, Deserialize)]
struct RawPageLinks {
    webui: String,
}

impl RawPage {
    fn into_snapshot(self, fallback_space: &str) -> PageSnapshot {
        let space_key = self
            .space
            .map(|space| space.key)
            .unwrap_or_else(|| fallback_space.to_string());
        let labels = self
            .metadata
            .and_then(|metadata| metadata.labels)
            .map(|labels| labels.results.into_iter().map(|label| label.name).collect())
            .unwrap_or_default();
        PageSnapshot {
            space_key,
            title: self.title,
            url_path: self.links.webui,
            labels,
        }
    }
}
