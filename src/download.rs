//! # download: idempotent transfer of one release asset
//!
//! Files land at `destination_root/version_label/asset_name`. A file that is
//! already there and whose size is within 0.01 MB of the declared size is
//! taken as complete and no request is made; a corrupt file of the right size
//! is therefore not detected.
//!
//! Bodies are streamed straight into the destination in writes of at most
//! [`CHUNK_SIZE`] bytes. If the transfer fails, the file is removed only when
//! it is smaller than the declared size, so a file that finished before the
//! error surfaced is kept.

use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::Client;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::config::MirrorOptions;
use crate::contract::{Asset, AssetDownloader, DownloadOutcome};
use crate::error::SyncError;
use crate::fetch::authorize;

pub const CHUNK_SIZE: usize = 8 * 1024;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;
const SIZE_TOLERANCE_MB: f64 = 0.01;

/// `destination_root/version_label/asset_name`.
pub fn destination_path(destination_root: &Path, version_label: &str, asset_name: &str) -> PathBuf {
    destination_root.join(version_label).join(asset_name)
}

pub fn within_size_tolerance(local_bytes: u64, declared_bytes: u64) -> bool {
    let diff_mb = (local_bytes as f64 - declared_bytes as f64).abs() / BYTES_PER_MB;
    diff_mb < SIZE_TOLERANCE_MB
}

fn ensure_single_segment(name: &str) -> Result<(), SyncError> {
    let unsafe_name = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\');
    if unsafe_name {
        return Err(SyncError::UnsafeAssetName(name.to_string()));
    }
    Ok(())
}

async fn already_complete(path: &Path, declared_bytes: u64) -> bool {
    match fs::metadata(path).await {
        Ok(meta) if meta.is_file() => within_size_tolerance(meta.len(), declared_bytes),
        _ => false,
    }
}

/// Removes a partially written file, keeping anything that reached the declared size.
async fn discard_partial(path: &Path, declared_bytes: u64) {
    match fs::metadata(path).await {
        Ok(meta) if meta.len() < declared_bytes => {
            if let Err(e) = fs::remove_file(path).await {
                warn!(path = %path.display(), error = %e, "Failed to remove partial download");
            } else {
                debug!(path = %path.display(), written = meta.len(), declared = declared_bytes, "Removed partial download");
            }
        }
        Ok(meta) => {
            debug!(path = %path.display(), written = meta.len(), "Keeping file that reached declared size");
        }
        Err(_) => {}
    }
}

async fn write_stream<S, B, E>(
    stream: S,
    path: &Path,
    declared_bytes: u64,
    content_length: Option<u64>,
    stall_timeout: Duration,
    url: &str,
) -> Result<u64, SyncError>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Display,
{
    let mut stream = std::pin::pin!(stream);
    let mut file = fs::File::create(path)
        .await
        .map_err(|e| SyncError::io(path, e))?;

    let mut written: u64 = 0;
    let mut reported_decile: u64 = 0;
    loop {
        let chunk = match tokio::time::timeout(stall_timeout, stream.next()).await {
            Err(_) => {
                return Err(SyncError::Transport {
                    url: url.to_string(),
                    reason: format!("no data received for {stall_timeout:?}"),
                })
            }
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                return Err(SyncError::Transport {
                    url: url.to_string(),
                    reason: e.to_string(),
                })
            }
            Ok(Some(Ok(chunk))) => chunk,
        };

        for piece in chunk.as_ref().chunks(CHUNK_SIZE) {
            file.write_all(piece)
                .await
                .map_err(|e| SyncError::io(path, e))?;
            written += piece.len() as u64;
        }

        if let Some(total) = content_length.filter(|t| *t > 0) {
            let decile = written.saturating_mul(10) / total;
            if decile > reported_decile {
                reported_decile = decile;
                debug!(
                    path = %path.display(),
                    progress = %format!("{:.1}%", written as f64 * 100.0 / total as f64),
                    "Download progress"
                );
            }
        }
    }

    file.flush().await.map_err(|e| SyncError::io(path, e))?;
    file.sync_all().await.map_err(|e| SyncError::io(path, e))?;

    if written < declared_bytes && !within_size_tolerance(written, declared_bytes) {
        return Err(SyncError::Transport {
            url: url.to_string(),
            reason: format!("transfer ended after {written} of {declared_bytes} bytes"),
        });
    }
    Ok(written)
}

/// Streams `stream` into `path`; on failure applies the partial-file rule.
pub async fn transfer_to_file<S, B, E>(
    stream: S,
    path: &Path,
    declared_bytes: u64,
    content_length: Option<u64>,
    stall_timeout: Duration,
    url: &str,
) -> Result<u64, SyncError>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Display,
{
    let result = write_stream(stream, path, declared_bytes, content_length, stall_timeout, url).await;
    if result.is_err() {
        discard_partial(path, declared_bytes).await;
    }
    result
}

pub struct HttpAssetDownloader {
    client: Client,
    token: Option<String>,
    download_timeout: Duration,
}

impl HttpAssetDownloader {
    pub fn new(client: Client, options: &MirrorOptions) -> Self {
        Self {
            client,
            token: options.token.clone(),
            download_timeout: options.download_timeout,
        }
    }
}

#[async_trait]
impl AssetDownloader for HttpAssetDownloader {
    async fn download(
        &self,
        asset: &Asset,
        version_label: &str,
        destination_root: &Path,
    ) -> Result<DownloadOutcome, SyncError> {
        ensure_single_segment(&asset.name)?;
        ensure_single_segment(version_label)?;

        let version_dir = destination_root.join(version_label);
        let path = version_dir.join(&asset.name);
        let size_mb = asset.size_bytes as f64 / BYTES_PER_MB;

        if already_complete(&path, asset.size_bytes).await {
            info!(asset = %asset.name, size_mb = %format!("{size_mb:.2}"), "Asset already present, skipping");
            return Ok(DownloadOutcome::AlreadyPresent);
        }

        fs::create_dir_all(&version_dir)
            .await
            .map_err(|e| SyncError::io(&version_dir, e))?;

        info!(asset = %asset.name, size_mb = %format!("{size_mb:.2}"), path = %path.display(), "Downloading asset");
        let request = self.client.get(&asset.download_url);
        let response = tokio::time::timeout(
            self.download_timeout,
            authorize(request, self.token.as_deref()).send(),
        )
        .await
        .map_err(|_| SyncError::Transport {
            url: asset.download_url.clone(),
            reason: format!("timed out: no response headers within {:?}", self.download_timeout),
        })?
        .map_err(|e| SyncError::transport(&asset.download_url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::HttpStatus {
                url: asset.download_url.clone(),
                status: status.as_u16(),
            });
        }

        let content_length = response.content_length();
        let bytes = transfer_to_file(
            response.bytes_stream(),
            &path,
            asset.size_bytes,
            content_length,
            self.download_timeout,
            &asset.download_url,
        )
        .await?;

        info!(asset = %asset.name, bytes, "Download complete");
        Ok(DownloadOutcome::Transferred { bytes })
    }
}
