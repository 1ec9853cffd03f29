//! # File Management Module
//!
//! Questo modulo gestisce la discovery dei file video in input.
//!
//! ## Responsabilità:
//! - Discovery dei file video in una directory (opzionalmente ricorsiva)
//! - Determinazione dei formati supportati
//! - Utilità per dimensioni file e formattazione human-readable
//!
//! ## Formati supportati:
//! - **Video**: MP4, MOV, AVI, MKV, MXF, M2V
//!
//! ## Esempio:
//! ```rust
//! # use std::path::Path;
//! # use dithery_doo::file_manager::FileManager;
//! let files = FileManager::find_video_files(Path::new("/path/to/input"), true)?;
//! for file in files {
//!     // una Job per file
//! }
//! # Ok::<(), anyhow::Error>(())
//! ```

use anyhow::Result;
use std::path::{Path, PathBuf};
use tokio::fs;
use walkdir::WalkDir;

const SUPPORTED_EXTENSIONS: &[&str] = &["mp4", "mov", "avi", "mkv", "mxf", "m2v"];

/// Manages file operations and discovery
pub struct FileManager;

impl FileManager {
    /// Find all supported video files in a directory, sorted by path.
    /// Without `recursive` only the directory's own entries are considered.
    pub fn find_video_files(input_dir: &Path, recursive: bool) -> Result<Vec<PathBuf>> {
        if !input_dir.is_dir() {
            return Err(anyhow::anyhow!("Input directory does not exist: {}", input_dir.display()));
        }

        let mut walker = WalkDir::new(input_dir).follow_links(true);
        if !recursive {
            walker = walker.max_depth(1);
        }

        let mut files: Vec<PathBuf> = walker
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|path| Self::is_supported_format(path))
            .collect();

        files.sort();
        Ok(files)
    }

    /// Check if a file format is supported
    pub fn is_supported_format(path: &Path) -> bool {
        if let Some(ext) = path.extension() {
            let ext_lower = ext.to_string_lossy().to_lowercase();
            SUPPORTED_EXTENSIONS.contains(&ext_lower.as_str())
        } else {
            false
        }
    }

    /// Size of a file in bytes, 0 when it does not exist
    pub async fn file_size(path: &Path) -> u64 {
        fs::metadata(path).await.map(|m| m.len()).unwrap_or(0)
    }

    /// Get human-readable file size
    pub fn format_size(size: u64) -> String {
        const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
        let mut size = size as f64;
        let mut unit_index = 0;

        while size >= 1024.0 && unit_index < UNITS.len() - 1 {
            size /= 1024.0;
            unit_index += 1;
        }

        if unit_index == 0 {
            format!("{} {}", size as u64, UNITS[unit_index])
        } else {
            format!("{:.2} {}", size, UNITS[unit_index])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(path: &Path) {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, b"x").unwrap();
    }

    #[test]
    fn test_find_video_files_flat_and_recursive() {
        let dir = TempDir::new().unwrap();
        touch(&dir.path().join("b.mkv"));
        touch(&dir.path().join("a.MOV"));
        touch(&dir.path().join("notes.txt"));
        touch(&dir.path().join("nested").join("c.mxf"));

        let flat = FileManager::find_video_files(dir.path(), false).unwrap();
        let names: Vec<_> = flat
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.MOV", "b.mkv"]);

        let deep = FileManager::find_video_files(dir.path(), true).unwrap();
        assert_eq!(deep.len(), 3);
        assert!(deep.iter().any(|p| p.ends_with("nested/c.mxf")));
    }

    #[test]
    fn test_missing_directory() {
        let dir = TempDir::new().unwrap();
        assert!(FileManager::find_video_files(&dir.path().join("nope"), false).is_err());
    }

    #[test]
    fn test_supported_formats() {
        assert!(FileManager::is_supported_format(Path::new("clip.m2v")));
        assert!(FileManager::is_supported_format(Path::new("clip.MP4")));
        assert!(!FileManager::is_supported_format(Path::new("clip.webm")));
        assert!(!FileManager::is_supported_format(Path::new("clip")));
    }

    #[test]
    fn test_format_size() {
        assert_eq!(FileManager::format_size(512), "512 B");
        assert_eq!(FileManager::format_size(2048), "2.00 KB");
        assert_eq!(FileManager::format_size(5 * 1024 * 1024), "5.00 MB");
    }
}
