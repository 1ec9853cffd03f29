//! Sidecar marking a partial output file that must not be trusted.
//!
//! `/out/clip.mov` -> `/out/clip.mov.incomplete`, holding the failure reason.

use std::io;
use std::path::{Path, PathBuf};

pub const MARKER_SUFFIX: &str = ".incomplete";

pub fn marker_path(output: &Path) -> PathBuf {
    let mut marker = output.as_os_str().to_owned();
    marker.push(MARKER_SUFFIX);
    PathBuf::from(marker)
}

/// Flag `output` as incomplete. Returns `None` when there is no file to flag.
pub async fn mark_incomplete(output: &Path, reason: &str) -> io::Result<Option<PathBuf>> {
    if tokio::fs::metadata(output).await.is_err() {
        return Ok(None);
    }
    let marker = marker_path(output);
    tokio::fs::write(&marker, format!("{}\n", reason)).await?;
    Ok(Some(marker))
}

/// Remove a stale marker left by an earlier failed run of the same output
pub async fn clear_marker(output: &Path) -> io::Result<()> {
    match tokio::fs::remove_file(marker_path(output)).await {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}
