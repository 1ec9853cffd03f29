//! # Path Resolution Module
//!
//! Centralizza tutta la logica di calcolo dei path di output di una run.
//!
//! ## Layout prodotto:
//! ```text
//! <output_base>/<timestamp>/
//!     process.log
//!     summary.json
//!     <sottocartella relativa>/<stem>_<timestamp>_<profilo>.<ext>
//! ```

use crate::config::CodecProfile;
use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Timestamp format of run directories and output file names
pub const RUN_TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// Resolves output paths below one run directory
#[derive(Debug, Clone)]
pub struct PathResolver {
    input_root: PathBuf,
    run_dir: PathBuf,
    timestamp: String,
}

impl PathResolver {
    pub fn new(input_root: impl Into<PathBuf>, run_dir: impl Into<PathBuf>, timestamp: impl Into<String>) -> Self {
        Self {
            input_root: input_root.into(),
            run_dir: run_dir.into(),
            timestamp: timestamp.into(),
        }
    }

    pub fn timestamp(now: &DateTime<Local>) -> String {
        now.format(RUN_TIMESTAMP_FORMAT).to_string()
    }

    /// Create `<output_base>/<timestamp>`. A run started within the same
    /// second gets a numeric suffix instead of sharing the directory.
    pub async fn create_run_dir(output_base: &Path, timestamp: &str) -> Result<PathBuf> {
        tokio::fs::create_dir_all(output_base)
            .await
            .with_context(|| format!("Failed to create output directory {}", output_base.display()))?;

        let mut candidate = output_base.join(timestamp);
        let mut attempt = 1;
        loop {
            match tokio::fs::create_dir(&candidate).await {
                Ok(()) => return Ok(candidate),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    attempt += 1;
                    candidate = output_base.join(format!("{}_{}", timestamp, attempt));
                }
                Err(e) => {
                    return Err(e).with_context(|| format!("Failed to create run directory {}", candidate.display()))
                }
            }
        }
    }

    /// Output path for `input`, mirroring its sub-directory below the input root
    pub fn output_path(&self, input: &Path, profile: CodecProfile) -> Result<PathBuf> {
        self.numbered_output_path(input, profile, 1)
    }

    /// Like [`output_path`](Self::output_path), but never returns a path
    /// already in `taken`. Inputs sharing a stem (`clip.mov`, `clip.mp4`)
    /// get `clip_2_...`, `clip_3_...` in discovery order.
    pub fn unique_output_path(
        &self,
        input: &Path,
        profile: CodecProfile,
        taken: &mut HashSet<PathBuf>,
    ) -> Result<PathBuf> {
        let mut attempt = 1;
        loop {
            let candidate = self.numbered_output_path(input, profile, attempt)?;
            if taken.insert(candidate.clone()) {
                if attempt > 1 {
                    warn!(
                        "Output name already used by another input, writing {} as {}",
                        input.display(),
                        candidate.display()
                    );
                }
                return Ok(candidate);
            }
            attempt += 1;
        }
    }

    fn numbered_output_path(&self, input: &Path, profile: CodecProfile, attempt: usize) -> Result<PathBuf> {
        let file_stem = input
            .file_stem()
            .ok_or_else(|| anyhow::anyhow!("Invalid file name: {}", input.display()))?
            .to_string_lossy();
        let stem = match attempt {
            1 => file_stem.to_string(),
            n => format!("{}_{}", file_stem, n),
        };

        let filename = format!(
            "{}_{}_{}.{}",
            stem,
            self.timestamp,
            profile.name(),
            profile.extension()
        );

        let relative = input
            .strip_prefix(&self.input_root)
            .ok()
            .and_then(Path::parent)
            .unwrap_or(Path::new(""));

        let result = self.run_dir.join(relative).join(filename);
        debug!("Resolved output path: {} -> {}", input.display(), result.display());
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    #[test]
    fn test_timestamp_format() {
        let now = Local.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        assert_eq!(PathResolver::timestamp(&now), "2024-03-09_07-05-01");
    }

    #[test]
    fn test_output_path_mirrors_sub_directories() {
        let resolver = PathResolver::new("/in", "/out/2024-03-09_07-05-01", "2024-03-09_07-05-01");

        let top = resolver
            .output_path(Path::new("/in/clip.mp4"), CodecProfile::ProRes422Hq10Bit)
            .unwrap();
        assert_eq!(
            top,
            PathBuf::from("/out/2024-03-09_07-05-01/clip_2024-03-09_07-05-01_prores_422_hq_10bit.mov")
        );

        let nested = resolver
            .output_path(Path::new("/in/day1/cam/a.MXF"), CodecProfile::Ffv1_12Bit444)
            .unwrap();
        assert_eq!(
            nested,
            PathBuf::from("/out/2024-03-09_07-05-01/day1/cam/a_2024-03-09_07-05-01_ffv1_12bit_444.mkv")
        );
    }

    #[test]
    fn test_output_path_outside_root_lands_in_run_dir() {
        let resolver = PathResolver::new("/in", "/out/run", "ts");
        let path = resolver
            .output_path(Path::new("/elsewhere/b.mov"), CodecProfile::ProRes444_16Bit)
            .unwrap();
        assert_eq!(path, PathBuf::from("/out/run/b_ts_prores_444_16bit.mov"));
    }

    #[test]
    fn test_unique_output_path_numbers_shared_stems() {
        let resolver = PathResolver::new("/in", "/out/run", "ts");
        let mut taken = HashSet::new();
        let profile = CodecProfile::ProRes422Hq10Bit;

        let mov = resolver.unique_output_path(Path::new("/in/clip.mov"), profile, &mut taken).unwrap();
        let mp4 = resolver.unique_output_path(Path::new("/in/clip.mp4"), profile, &mut taken).unwrap();
        let avi = resolver.unique_output_path(Path::new("/in/clip.avi"), profile, &mut taken).unwrap();
        let nested = resolver
            .unique_output_path(Path::new("/in/day1/clip.mov"), profile, &mut taken)
            .unwrap();

        assert_eq!(mov, PathBuf::from("/out/run/clip_ts_prores_422_hq_10bit.mov"));
        assert_eq!(mp4, PathBuf::from("/out/run/clip_2_ts_prores_422_hq_10bit.mov"));
        assert_eq!(avi, PathBuf::from("/out/run/clip_3_ts_prores_422_hq_10bit.mov"));
        assert_eq!(nested, PathBuf::from("/out/run/day1/clip_ts_prores_422_hq_10bit.mov"));
    }

    #[tokio::test]
    async fn test_create_run_dir_never_reuses_a_directory() {
        let temp = TempDir::new().unwrap();
        let base = temp.path().join("vapourized");

        let first = PathResolver::create_run_dir(&base, "2024-03-09_07-05-01").await.unwrap();
        let second = PathResolver::create_run_dir(&base, "2024-03-09_07-05-01").await.unwrap();

        assert_eq!(first, base.join("2024-03-09_07-05-01"));
        assert_eq!(second, base.join("2024-03-09_07-05-01_2"));
        assert!(first.is_dir() && second.is_dir());
    }
}
