//! # contract: seams between the orchestrator and its collaborators
//!
//! The orchestrator in [`crate::synchronise`] only talks to the three traits
//! defined here, so each collaborator can be replaced by a real client, an
//! in-memory fake or a `mockall` mock:
//!
//! - [`ReleaseFetcher`]: paginated release listing (and README capture)
//! - [`AssetDownloader`]: idempotent transfer of one asset to disk
//! - [`StateStore`]: durable record of handled asset ids
//!
//! Mocks are generated for tests and, with the default `test-export-mocks`
//! feature, exported so integration tests outside the crate can use them.

use std::path::Path;

use async_trait::async_trait;
use mockall::automock;
use serde::{Deserialize, Serialize};

use crate::error::SyncError;
use crate::state::GlobalState;

/// One upstream-published version. Refetched every run, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Release {
    pub tag_name: String,
    #[serde(default)]
    pub assets: Vec<Asset>,
}

/// One downloadable file attached to a release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    /// Upstream-assigned, stable and unique within one repository.
    pub id: u64,
    pub name: String,
    #[serde(rename = "size")]
    pub size_bytes: u64,
    #[serde(rename = "browser_download_url")]
    pub download_url: String,
}

/// An asset not yet recorded in its target's state, paired with the
/// filesystem-safe label of the release it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingAsset {
    pub asset: Asset,
    pub version_label: String,
}

/// Successful result of a single asset download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// A file of matching size was already on disk; no request was made.
    AlreadyPresent,
    Transferred { bytes: u64 },
}

impl DownloadOutcome {
    pub fn bytes_transferred(&self) -> u64 {
        match self {
            DownloadOutcome::AlreadyPresent => 0,
            DownloadOutcome::Transferred { bytes } => *bytes,
        }
    }
}

/// Upstream release listing.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait ReleaseFetcher: Send + Sync {
    /// Up to `max_versions` releases, newest first. Any transport or status
    /// error fails the whole call; partial lists are never returned.
    async fn fetch_releases(
        &self,
        owner: &str,
        name: &str,
        max_versions: usize,
    ) -> Result<Vec<Release>, SyncError>;

    /// Raw text of the repository README.
    async fn fetch_readme(&self, owner: &str, name: &str) -> Result<String, SyncError>;
}

/// Transfers one asset to `destination_root/version_label/asset.name`.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait AssetDownloader: Send + Sync {
    async fn download(
        &self,
        asset: &Asset,
        version_label: &str,
        destination_root: &Path,
    ) -> Result<DownloadOutcome, SyncError>;
}

/// Durable record of which assets each target has already handled.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
pub trait StateStore: Send + Sync {
    /// Never fails on a malformed document; that degrades to an empty state.
    fn load(&self) -> Result<GlobalState, SyncError>;

    /// Overwrites the stored document with `state` in full.
    fn save(&self, state: &GlobalState) -> Result<(), SyncError>;
}
