//! Authenticated retrieval of rendered pages.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use thiserror::Error;
use tracing::debug;

use super::transform;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to `{url}` failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("request to `{url}` returned status {status}")]
    Status { url: String, status: u16 },
    #[error("failed to rewrite `{url}`: {message}")]
    Transform { url: String, message: String },
}

impl FetchError {
    pub fn url(&self) -> &str {
        match self {
            FetchError::Transport { url, .. }
            | FetchError::Status { url, .. }
            | FetchError::Transform { url, .. } => url,
        }
    }
}

/// Basic-auth credentials of the account used to render pages.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Source of rendered page bodies.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Fetch `url` and return the final (already transformed) HTML.
    async fn fetch(&self, url: &str) -> Result<String, FetchError>;
}

/// Fetches pages from the live wiki over HTTP with Basic authentication.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    credentials: Credentials,
}

impl HttpFetcher {
    pub fn new(credentials: Credentials, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(user_agent())
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            credentials,
        })
    }
}

pub(crate) fn user_agent() -> &'static str {
    concat!("wikimirror/", env!("CARGO_PKG_VERSION"))
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let response = self
            .client
            .get(url)
            .basic_auth(&self.credentials.username, Some(&self.credentials.password))
            .send()
            .await
            .map_err(|source| FetchError::Transport {
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|source| FetchError::Transport {
                url: url.to_string(),
                source,
            })?;
        debug!(url, bytes = body.len(), "Fetched rendered page");

        transform::hide_user_menu(&body).map_err(|message| FetchError::Transform {
            url: url.to_string(),
            message,
        })
    }
}
