//! Release listing client for GitHub-compatible APIs.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::MirrorOptions;
use crate::contract::{Release, ReleaseFetcher};
use crate::error::SyncError;

/// Largest page the listing API serves.
pub const MAX_PAGE_SIZE: usize = 100;

const GITHUB_JSON: &str = "application/vnd.github+json";

/// Shared HTTP client for listing and asset requests.
pub fn http_client(options: &MirrorOptions) -> Result<Client, SyncError> {
    Client::builder()
        .user_agent(concat!("release-mirror/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(options.fetch_timeout)
        .build()
        .map_err(|e| SyncError::Configuration(format!("failed to build HTTP client: {e}")))
}

/// Attaches `Authorization: token <credential>` when a credential is configured.
pub(crate) fn authorize(request: RequestBuilder, token: Option<&str>) -> RequestBuilder {
    match token {
        Some(token) => request.header(reqwest::header::AUTHORIZATION, format!("token {token}")),
        None => request,
    }
}

/// Items requested per page. Held constant for the whole fetch so that page
/// offsets (`(page - 1) * per_page`) stay aligned.
pub fn page_size(max_versions: usize) -> usize {
    max_versions.clamp(1, MAX_PAGE_SIZE)
}

#[derive(Deserialize)]
struct ReadmeInfo {
    download_url: Option<String>,
}

pub struct GithubReleaseFetcher {
    client: Client,
    api_base_url: String,
    token: Option<String>,
    fetch_timeout: Duration,
}

impl GithubReleaseFetcher {
    pub fn new(client: Client, options: &MirrorOptions) -> Self {
        Self {
            client,
            api_base_url: options.api_base_url.trim_end_matches('/').to_string(),
            token: options.token.clone(),
            fetch_timeout: options.fetch_timeout,
        }
    }

    fn repo_url(&self, owner: &str, name: &str, suffix: &str) -> String {
        format!("{}/repos/{owner}/{name}/{suffix}", self.api_base_url)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, SyncError> {
        let request = self
            .client
            .get(url)
            .query(query)
            .header(ACCEPT, GITHUB_JSON)
            .timeout(self.fetch_timeout);
        let response = authorize(request, self.token.as_deref())
            .send()
            .await
            .map_err(|e| SyncError::transport(url, e))?;

        let status = response.status();
        if !status.is_success() {
            if status.as_u16() == 403 || status.as_u16() == 429 {
                let remaining = response
                    .headers()
                    .get("x-ratelimit-remaining")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("unknown")
                    .to_string();
                warn!(url = %url, status = %status, ratelimit_remaining = %remaining, "Listing request refused, possibly rate limited");
            }
            return Err(SyncError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| SyncError::transport(url, e))
    }
}

#[async_trait]
impl ReleaseFetcher for GithubReleaseFetcher {
    async fn fetch_releases(
        &self,
        owner: &str,
        name: &str,
        max_versions: usize,
    ) -> Result<Vec<Release>, SyncError> {
        let url = self.repo_url(owner, name, "releases");
        let per_page = page_size(max_versions);
        let mut releases: Vec<Release> = Vec::with_capacity(per_page);
        let mut page: u32 = 1;

        while releases.len() < max_versions {
            let batch: Vec<Release> = self
                .get_json(
                    &url,
                    &[("page", page.to_string()), ("per_page", per_page.to_string())],
                )
                .await?;
            let returned = batch.len();
            debug!(url = %url, page, per_page, returned, "Fetched release page");
            if returned == 0 {
                break;
            }

            let remaining = max_versions - releases.len();
            releases.extend(batch.into_iter().take(remaining));
            if returned < per_page {
                break;
            }
            page += 1;
        }

        info!(owner = %owner, name = %name, releases = releases.len(), "Fetched releases");
        Ok(releases)
    }

    async fn fetch_readme(&self, owner: &str, name: &str) -> Result<String, SyncError> {
        let url = self.repo_url(owner, name, "readme");
        let info: ReadmeInfo = self.get_json(&url, &[]).await?;
        let download_url = info.download_url.ok_or_else(|| SyncError::Transport {
            url: url.clone(),
            reason: "README response has no download_url".to_string(),
        })?;

        let request = self.client.get(&download_url).timeout(self.fetch_timeout);
        let response = authorize(request, self.token.as_deref())
            .send()
            .await
            .map_err(|e| SyncError::transport(&download_url, e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::HttpStatus {
                url: download_url,
                status: status.as_u16(),
            });
        }
        response
            .text()
            .await
            .map_err(|e| SyncError::transport(&download_url, e))
    }
}
