//! High-level pipeline: drives every configured target through fetch → diff → download → persist.
//!
//! Each target walks the phases of [`TargetPhase`]:
//!
//! ```text
//! INIT → FETCH → DIFF → DOWNLOAD → PERSIST → DONE
//!          └──────── fetch failed ─────────────┘
//! ```
//!
//! A failed fetch skips straight to `DONE` and leaves the target's state
//! untouched. During `DOWNLOAD` every pending asset is attempted on its own; a
//! failed asset is reported and the rest continue. Only assets that succeeded
//! are recorded, and `PERSIST` writes the whole [`GlobalState`] exactly once
//! per target, before the next target is fetched. A crash therefore loses at
//! most the target that was in flight.
//!
//! # Major Types
//! - [`SyncEngine`]: owns the fetcher, downloader and state store
//! - [`SynchroniseReport`] / [`TargetReport`]: what each run did, for the CLI and tests
//!
//! # Cancellation
//! The [`CancellationToken`] is checked between assets and between targets.
//! When it fires mid-target, the assets already completed are recorded and
//! persisted, then the batch stops.
//!
//! # Error Handling
//! Only configuration errors and state-load failures abort a batch (they are
//! returned before any network activity). Everything else is logged and
//! surfaced in the report.

use std::path::Path;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{validate_targets, MirrorOptions, SyncTarget};
use crate::contract::{AssetDownloader, DownloadOutcome, ReleaseFetcher, StateStore};
use crate::diff::diff;
use crate::download::HttpAssetDownloader;
use crate::error::SyncError;
use crate::fetch::{http_client, GithubReleaseFetcher};
use crate::state::{GlobalState, JsonStateStore};

pub const README_FILE_NAME: &str = "ReadMe.md";

/// Phases a single target moves through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetPhase {
    Init,
    Fetch,
    Diff,
    Download,
    Persist,
    Done,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetOutcome {
    Synchronised,
    /// The release listing could not be fetched; state was left unchanged.
    FetchFailed { reason: String },
    /// Cancellation arrived while this target was downloading.
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedAsset {
    pub asset_id: u64,
    pub name: String,
    pub version_label: String,
    pub outcome: DownloadOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetFailure {
    pub asset_id: u64,
    pub name: String,
    pub version_label: String,
    pub reason: String,
}

#[derive(Debug)]
pub struct TargetReport {
    pub state_key: String,
    pub releases_fetched: usize,
    pub pending: usize,
    pub downloaded: Vec<DownloadedAsset>,
    pub failed: Vec<AssetFailure>,
    pub outcome: TargetOutcome,
    /// Whether the state write for this target succeeded.
    pub persisted: bool,
    pub readme_saved: bool,
}

impl TargetReport {
    fn new(state_key: &str) -> Self {
        Self {
            state_key: state_key.to_string(),
            releases_fetched: 0,
            pending: 0,
            downloaded: Vec::new(),
            failed: Vec::new(),
            outcome: TargetOutcome::Synchronised,
            persisted: false,
            readme_saved: false,
        }
    }

    /// Assets that needed a network transfer in this run.
    pub fn transferred(&self) -> usize {
        self.downloaded
            .iter()
            .filter(|d| matches!(d.outcome, DownloadOutcome::Transferred { .. }))
            .count()
    }

    /// Assets found already complete on disk.
    pub fn skipped(&self) -> usize {
        self.downloaded.len() - self.transferred()
    }
}

#[derive(Debug, Default)]
pub struct SynchroniseReport {
    pub targets: Vec<TargetReport>,
    /// Set when the batch stopped early because of cancellation.
    pub cancelled: bool,
}

impl SynchroniseReport {
    pub fn total_transferred(&self) -> usize {
        self.targets.iter().map(TargetReport::transferred).sum()
    }

    pub fn total_failed(&self) -> usize {
        self.targets.iter().map(|t| t.failed.len()).sum()
    }
}

fn enter(target: &SyncTarget, phase: TargetPhase) {
    debug!(state_key = %target.state_key, phase = ?phase, "[SYNC] Entering phase");
}

pub struct SyncEngine<F, D, S> {
    fetcher: F,
    downloader: D,
    store: S,
    max_versions: usize,
}

impl SyncEngine<GithubReleaseFetcher, HttpAssetDownloader, JsonStateStore> {
    /// The production stack: HTTP fetcher and downloader sharing one client,
    /// and the locked JSON state file named in `options`.
    pub fn from_options(options: &MirrorOptions) -> Result<Self, SyncError> {
        options.validate()?;
        let client = http_client(options)?;
        let store = JsonStateStore::open(&options.state_file)?;
        Ok(Self::new(
            GithubReleaseFetcher::new(client.clone(), options),
            HttpAssetDownloader::new(client, options),
            store,
            options.max_versions,
        ))
    }
}

impl<F, D, S> SyncEngine<F, D, S>
where
    F: ReleaseFetcher,
    D: AssetDownloader,
    S: StateStore,
{
    pub fn new(fetcher: F, downloader: D, store: S, max_versions: usize) -> Self {
        Self {
            fetcher,
            downloader,
            store,
            max_versions,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Runs the batch: targets strictly in order, one state write after each.
    pub async fn synchronise(
        &self,
        targets: &[SyncTarget],
        cancel: &CancellationToken,
    ) -> Result<SynchroniseReport, SyncError> {
        if self.max_versions == 0 {
            return Err(SyncError::Configuration(
                "max_versions must be at least 1".to_string(),
            ));
        }
        validate_targets(targets)?;
        let mut state = self.store.load()?;

        info!(targets = targets.len(), max_versions = self.max_versions, "[SYNC] Starting batch");
        let mut report = SynchroniseReport::default();

        for (i, target) in targets.iter().enumerate() {
            if cancel.is_cancelled() {
                warn!(remaining = targets.len() - i, "[SYNC] Cancelled, not starting remaining targets");
                report.cancelled = true;
                break;
            }

            info!(
                index = i + 1,
                total = targets.len(),
                repo = %format!("{}/{}", target.owner, target.name),
                "[SYNC] Processing target"
            );
            let target_report = self.sync_target(target, &mut state, cancel).await;
            let stop = target_report.outcome == TargetOutcome::Cancelled;
            report.targets.push(target_report);
            if stop {
                report.cancelled = true;
                break;
            }
        }

        info!(
            targets = report.targets.len(),
            transferred = report.total_transferred(),
            failed = report.total_failed(),
            cancelled = report.cancelled,
            "[SYNC] Batch finished"
        );
        Ok(report)
    }

    /// Drives one target through every phase, persisting `state` at the end.
    pub async fn sync_target(
        &self,
        target: &SyncTarget,
        state: &mut GlobalState,
        cancel: &CancellationToken,
    ) -> TargetReport {
        let mut report = TargetReport::new(&target.state_key);
        let repo_root = target.repo_root();

        enter(target, TargetPhase::Init);
        let recorded = state.get(&target.state_key).map_or(0, |s| s.len());
        info!(
            state_key = %target.state_key,
            repo_root = %repo_root.display(),
            recorded,
            "[SYNC] Target initialised"
        );

        enter(target, TargetPhase::Fetch);
        let releases = match self
            .fetcher
            .fetch_releases(&target.owner, &target.name, self.max_versions)
            .await
        {
            Ok(releases) => releases,
            Err(e) => {
                error!(state_key = %target.state_key, error = %e, "[SYNC][ERROR] Fetching releases failed, skipping target");
                report.outcome = TargetOutcome::FetchFailed {
                    reason: e.to_string(),
                };
                enter(target, TargetPhase::Done);
                return report;
            }
        };
        report.releases_fetched = releases.len();
        if releases.is_empty() {
            warn!(state_key = %target.state_key, "[SYNC] No releases found (repository has none or access is denied)");
        }

        enter(target, TargetPhase::Diff);
        let pending = match state.get(&target.state_key) {
            Some(current) => diff(&releases, current),
            None => diff(&releases, &Default::default()),
        };
        report.pending = pending.len();
        info!(
            state_key = %target.state_key,
            releases = releases.len(),
            pending = pending.len(),
            "[SYNC] Computed pending assets"
        );

        enter(target, TargetPhase::Download);
        for item in &pending {
            if cancel.is_cancelled() {
                warn!(state_key = %target.state_key, "[SYNC] Cancelled between assets");
                report.outcome = TargetOutcome::Cancelled;
                break;
            }

            match self
                .downloader
                .download(&item.asset, &item.version_label, &repo_root)
                .await
            {
                Ok(outcome) => {
                    state
                        .target_mut(&target.state_key)
                        .record(item.asset.id, item.asset.name.clone());
                    report.downloaded.push(DownloadedAsset {
                        asset_id: item.asset.id,
                        name: item.asset.name.clone(),
                        version_label: item.version_label.clone(),
                        outcome,
                    });
                }
                Err(e) => {
                    warn!(
                        state_key = %target.state_key,
                        asset = %item.asset.name,
                        version = %item.version_label,
                        error = %e,
                        "[SYNC] Asset download failed"
                    );
                    report.failed.push(AssetFailure {
                        asset_id: item.asset.id,
                        name: item.asset.name.clone(),
                        version_label: item.version_label.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        enter(target, TargetPhase::Persist);
        let total_recorded = state.target_mut(&target.state_key).len();
        match self.store.save(state) {
            Ok(()) => report.persisted = true,
            Err(e) => {
                error!(state_key = %target.state_key, error = %e, "[SYNC][ERROR] Persisting state failed");
            }
        }
        info!(
            state_key = %target.state_key,
            downloaded = report.downloaded.len(),
            transferred = report.transferred(),
            failed = report.failed.len(),
            total_recorded,
            "[SYNC] Target processed"
        );

        if target.save_readme
            && report.outcome == TargetOutcome::Synchronised
            && !cancel.is_cancelled()
        {
            report.readme_saved = self.capture_readme(target, &repo_root).await;
        }

        enter(target, TargetPhase::Done);
        report
    }

    async fn capture_readme(&self, target: &SyncTarget, repo_root: &Path) -> bool {
        let text = match self.fetcher.fetch_readme(&target.owner, &target.name).await {
            Ok(text) => text,
            Err(e) => {
                warn!(state_key = %target.state_key, error = %e, "[SYNC] Could not fetch README");
                return false;
            }
        };
        let path = repo_root.join(README_FILE_NAME);
        let written = async {
            tokio::fs::create_dir_all(repo_root).await?;
            tokio::fs::write(&path, text.as_bytes()).await
        }
        .await;
        match written {
            Ok(()) => {
                info!(path = %path.display(), "[SYNC] Saved README");
                true
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "[SYNC] Could not write README");
                false
            }
        }
    }
}
