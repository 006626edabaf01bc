//! # state: durable record of already-handled assets
//!
//! The persisted document is one JSON object mapping each target's
//! `state_key` to an object of `"<asset_id>": "<asset_name>"` pairs:
//!
//! ```json
//! {
//!   "dnspy": { "2048": "dnSpy-net472.zip" }
//! }
//! ```
//!
//! [`JsonStateStore`] is the file backend used by the CLI; [`MemoryStateStore`]
//! backs orchestrator tests. Both implement [`StateStore`].
//!
//! A document that cannot be parsed is moved aside to `<file>.bak` and the
//! store starts over from an empty state. Saving writes a temporary sibling and
//! renames it over the primary file; the rename is atomic on POSIX filesystems
//! and a best-effort replace elsewhere.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::contract::StateStore;
use crate::error::SyncError;

/// Asset ids already handled for one target, with the name they were saved under.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DownloadState(BTreeMap<u64, String>);

impl DownloadState {
    pub fn contains(&self, asset_id: u64) -> bool {
        self.0.contains_key(&asset_id)
    }

    /// Returns `true` when the id was not recorded before.
    pub fn record(&mut self, asset_id: u64, asset_name: impl Into<String>) -> bool {
        self.0.insert(asset_id, asset_name.into()).is_none()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = u64> + '_ {
        self.0.keys().copied()
    }

    pub fn name_of(&self, asset_id: u64) -> Option<&str> {
        self.0.get(&asset_id).map(String::as_str)
    }
}

/// Per-target [`DownloadState`]s keyed by `state_key`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GlobalState(BTreeMap<String, DownloadState>);

impl GlobalState {
    pub fn get(&self, state_key: &str) -> Option<&DownloadState> {
        self.0.get(state_key)
    }

    /// The target's state, created empty on first sight of `state_key`.
    pub fn target_mut(&mut self, state_key: &str) -> &mut DownloadState {
        self.0.entry(state_key.to_string()).or_default()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

/// JSON file backend. Holds an exclusive lock on `<file>.lock` while alive so
/// only one batch run writes the document at a time.
#[derive(Debug)]
pub struct JsonStateStore {
    path: PathBuf,
    _lock: File,
}

impl JsonStateStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, SyncError> {
        let path = path.into();
        let dir = parent_dir(&path);
        fs::create_dir_all(dir).map_err(|e| SyncError::io(dir, e))?;

        let lock_path = sibling_with_suffix(&path, ".lock");
        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .map_err(|e| SyncError::io(&lock_path, e))?;
        lock.try_lock_exclusive().map_err(|e| {
            if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() {
                SyncError::StateLocked(path.clone())
            } else {
                SyncError::io(&lock_path, e)
            }
        })?;

        debug!(path = %path.display(), "Acquired state file lock");
        Ok(Self { path, _lock: lock })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn backup_path(&self) -> PathBuf {
        sibling_with_suffix(&self.path, ".bak")
    }
}

impl StateStore for JsonStateStore {
    fn load(&self) -> Result<GlobalState, SyncError> {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!(path = %self.path.display(), "No state file yet, starting from empty state");
                return Ok(GlobalState::default());
            }
            Err(e) => return Err(SyncError::io(&self.path, e)),
        };

        match serde_json::from_slice::<GlobalState>(&raw) {
            Ok(state) => {
                info!(
                    path = %self.path.display(),
                    targets = state.len(),
                    "Loaded download state"
                );
                Ok(state)
            }
            Err(parse_err) => {
                let backup = self.backup_path();
                match fs::rename(&self.path, &backup) {
                    Ok(()) => warn!(
                        path = %self.path.display(),
                        backup = %backup.display(),
                        error = %parse_err,
                        "State file is malformed; backed it up and starting from empty state"
                    ),
                    Err(rename_err) => warn!(
                        path = %self.path.display(),
                        error = %parse_err,
                        rename_error = %rename_err,
                        "State file is malformed and could not be backed up; starting from empty state"
                    ),
                }
                Ok(GlobalState::default())
            }
        }
    }

    fn save(&self, state: &GlobalState) -> Result<(), SyncError> {
        let dir = parent_dir(&self.path);
        fs::create_dir_all(dir).map_err(|e| SyncError::io(dir, e))?;

        let json = serde_json::to_vec_pretty(state)
            .map_err(|e| SyncError::StateParse(format!("failed to serialise state: {e}")))?;

        let mut tmp = NamedTempFile::new_in(dir).map_err(|e| SyncError::io(dir, e))?;
        tmp.write_all(&json)
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|e| SyncError::io(tmp.path(), e))?;
        tmp.persist(&self.path)
            .map_err(|e| SyncError::io(&self.path, e.error))?;

        debug!(path = %self.path.display(), targets = state.len(), "Saved download state");
        Ok(())
    }
}

/// In-memory backend that counts saves.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    state: Mutex<GlobalState>,
    saves: AtomicUsize,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: GlobalState) -> Self {
        Self {
            state: Mutex::new(state),
            saves: AtomicUsize::new(0),
        }
    }

    pub fn snapshot(&self) -> GlobalState {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self) -> Result<GlobalState, SyncError> {
        Ok(self.snapshot())
    }

    fn save(&self, state: &GlobalState) -> Result<(), SyncError> {
        *self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = state.clone();
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
