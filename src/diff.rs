//! Pure comparison of fetched releases against recorded state.

use crate::contract::{PendingAsset, Release};
use crate::state::DownloadState;

const DISALLOWED_LABEL_CHARS: [char; 9] = ['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

/// Makes a release tag safe to use as a single directory name.
pub fn sanitize_version(tag_name: &str) -> String {
    tag_name.replace(&DISALLOWED_LABEL_CHARS[..], "-")
}

/// Assets whose id is not yet in `state`, in release order then in-release
/// asset order.
pub fn diff(releases: &[Release], state: &DownloadState) -> Vec<PendingAsset> {
    releases
        .iter()
        .flat_map(|release| {
            let version_label = sanitize_version(&release.tag_name);
            release
                .assets
                .iter()
                .filter(|asset| !state.contains(asset.id))
                .map(move |asset| PendingAsset {
                    asset: asset.clone(),
                    version_label: version_label.clone(),
                })
        })
        .collect()
}
