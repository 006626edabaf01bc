//! Sync targets and run-wide options, with validation done before any I/O.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::error::SyncError;

pub const DEFAULT_API_BASE_URL: &str = "https://api.github.com";
pub const DEFAULT_MAX_VERSIONS: usize = 5;
pub const DEFAULT_STATE_FILE: &str = "./repo_states/downloaded_assets.json";
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(60);

/// One upstream repository to mirror. Identity is `state_key`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncTarget {
    pub owner: String,
    pub name: String,
    pub base_save_dir: PathBuf,
    pub state_key: String,
    #[serde(default)]
    pub save_readme: bool,
}

impl SyncTarget {
    pub fn new(
        owner: impl Into<String>,
        name: impl Into<String>,
        base_save_dir: impl Into<PathBuf>,
        state_key: impl Into<String>,
    ) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
            base_save_dir: base_save_dir.into(),
            state_key: state_key.into(),
            save_readme: false,
        }
    }

    /// `base_save_dir/repo_name`, the root every version directory lives under.
    pub fn repo_root(&self) -> PathBuf {
        self.base_save_dir.join(&self.name)
    }

    pub fn trace_loaded(&self) {
        info!(
            owner = %self.owner,
            name = %self.name,
            base_save_dir = %self.base_save_dir.display(),
            state_key = %self.state_key,
            "Loaded sync target"
        );
    }

    fn validate(&self, index: usize) -> Result<(), SyncError> {
        let fields = [
            ("owner", self.owner.as_str()),
            ("name", self.name.as_str()),
            ("state_key", self.state_key.as_str()),
        ];
        for (field, value) in fields {
            if value.trim().is_empty() {
                return Err(SyncError::Configuration(format!(
                    "target #{index}: field `{field}` must not be empty"
                )));
            }
        }
        if self.base_save_dir.as_os_str().is_empty() {
            return Err(SyncError::Configuration(format!(
                "target #{index}: field `base_save_dir` must not be empty"
            )));
        }
        Ok(())
    }
}

/// Checks every target before the batch touches the network or disk.
///
/// Indices in error messages are 1-based. Duplicate `state_key`s are rejected
/// because two repositories would then share one asset-id namespace.
pub fn validate_targets(targets: &[SyncTarget]) -> Result<(), SyncError> {
    let mut seen = HashSet::new();
    for (i, target) in targets.iter().enumerate() {
        let index = i + 1;
        target.validate(index)?;
        if !seen.insert(target.state_key.as_str()) {
            return Err(SyncError::Configuration(format!(
                "target #{index}: duplicate state_key `{}`",
                target.state_key
            )));
        }
    }
    Ok(())
}

/// Run-wide settings, built once by the caller and handed to the engine.
#[derive(Debug, Clone)]
pub struct MirrorOptions {
    pub api_base_url: String,
    pub token: Option<String>,
    pub state_file: PathBuf,
    pub max_versions: usize,
    pub fetch_timeout: Duration,
    pub download_timeout: Duration,
}

impl Default for MirrorOptions {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            token: None,
            state_file: PathBuf::from(DEFAULT_STATE_FILE),
            max_versions: DEFAULT_MAX_VERSIONS,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            download_timeout: DEFAULT_DOWNLOAD_TIMEOUT,
        }
    }
}

impl MirrorOptions {
    /// Empty tokens count as absent.
    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token.filter(|t| !t.trim().is_empty());
        self
    }

    pub fn with_state_file(mut self, path: impl AsRef<Path>) -> Self {
        self.state_file = path.as_ref().to_path_buf();
        self
    }

    pub fn validate(&self) -> Result<(), SyncError> {
        if self.max_versions == 0 {
            return Err(SyncError::Configuration(
                "max_versions must be at least 1".to_string(),
            ));
        }
        if self.api_base_url.trim().is_empty() {
            return Err(SyncError::Configuration(
                "api_base_url must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn trace_loaded(&self) {
        info!(
            api_base_url = %self.api_base_url,
            state_file = %self.state_file.display(),
            max_versions = self.max_versions,
            authenticated = self.token.is_some(),
            "Loaded mirror options"
        );
        debug!(
            fetch_timeout = ?self.fetch_timeout,
            download_timeout = ?self.download_timeout,
            "Mirror timeouts"
        );
    }
}
