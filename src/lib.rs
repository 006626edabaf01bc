#![doc = "release-mirror: core engine for mirroring GitHub release assets to local disk."]

//! This crate holds the data model, the HTTP clients, the state store and the
//! orchestrator. The `release-mirror-cli` crate wraps it with YAML config
//! loading, signal handling and the `release-mirror` binary.
//!
//! # Usage
//! Build a [`SyncEngine`] (either [`SyncEngine::from_options`] for the real
//! HTTP stack, or [`SyncEngine::new`] with custom collaborators) and call
//! [`SyncEngine::synchronise`] with the list of targets.

pub mod config;
pub mod contract;
pub mod diff;
pub mod download;
pub mod error;
pub mod fetch;
pub mod state;
pub mod synchronise;

pub use config::{validate_targets, MirrorOptions, SyncTarget};
pub use contract::{Asset, AssetDownloader, DownloadOutcome, PendingAsset, Release, ReleaseFetcher, StateStore};
pub use error::SyncError;
pub use state::{DownloadState, GlobalState, JsonStateStore, MemoryStateStore};
pub use synchronise::{SyncEngine, SynchroniseReport, TargetOutcome, TargetReport};
