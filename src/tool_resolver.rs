//! # Tool Path Resolver
//!
//! This module handles finding the external executables in different environments:
//! - Explicit paths from the configuration
//! - A tools directory pointed at by `DITHERY_TOOLS_DIR`
//! - System-installed tools on `PATH`

use std::env;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Environment variable naming a directory with bundled executables
pub const TOOLS_DIR_ENV: &str = "DITHERY_TOOLS_DIR";

/// Resolved executables for one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toolchain {
    pub frame_source: PathBuf,
    pub encoder: PathBuf,
}

/// Tool path resolver for different deployment environments
pub struct ToolPathResolver {
    /// Directory checked before `PATH`
    tools_dir: Option<PathBuf>,
}

impl ToolPathResolver {
    /// Create a new path resolver
    pub fn new() -> Self {
        Self {
            tools_dir: Self::detect_tools_dir(),
        }
    }

    /// Resolver with an explicit tools directory
    pub fn with_tools_dir(tools_dir: Option<PathBuf>) -> Self {
        Self { tools_dir }
    }

    fn detect_tools_dir() -> Option<PathBuf> {
        let tools_dir = env::var_os(TOOLS_DIR_ENV).map(PathBuf::from)?;
        debug!("Checking {} environment variable: {:?}", TOOLS_DIR_ENV, tools_dir);
        if tools_dir.is_dir() {
            Some(tools_dir)
        } else {
            warn!("{} points to a missing directory: {}", TOOLS_DIR_ENV, tools_dir.display());
            None
        }
    }

    /// Resolve a configured tool, either a bare name or a path
    pub fn resolve_tool(&self, configured: &Path) -> Option<PathBuf> {
        debug!("Resolving tool: {}", configured.display());

        // Anything with a directory component is taken literally
        if configured.components().count() > 1 || configured.is_absolute() {
            return configured.is_file().then(|| configured.to_path_buf());
        }

        if let Some(ref tools_dir) = self.tools_dir {
            let bundled_path = tools_dir.join(Self::with_exe_suffix(configured));
            if bundled_path.is_file() {
                debug!("Using bundled tool: {} -> {:?}", configured.display(), bundled_path);
                return Some(bundled_path);
            }
        }

        match which::which(configured) {
            Ok(path) => {
                debug!("Using system tool: {} -> {:?}", configured.display(), path);
                Some(path)
            }
            Err(_) => {
                warn!("Tool not found: {}", configured.display());
                None
            }
        }
    }

    fn with_exe_suffix(name: &Path) -> PathBuf {
        if cfg!(windows) && name.extension().is_none() {
            name.with_extension("exe")
        } else {
            name.to_path_buf()
        }
    }

    /// Check if a tool is available and provide installation instructions if not
    pub fn check_tool_with_instructions(&self, configured: &Path) -> Result<PathBuf, String> {
        if let Some(path) = self.resolve_tool(configured) {
            return Ok(path);
        }

        let name = configured
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| configured.display().to_string());

        if cfg!(target_os = "linux") {
            Err(format!(
                "'{}' not found (install with: {})",
                configured.display(),
                Self::get_linux_install_instructions(&name)
            ))
        } else {
            Err(format!(
                "'{}' not found, ensure it is installed and on PATH or in {}",
                configured.display(),
                TOOLS_DIR_ENV
            ))
        }
    }

    /// Get installation instructions for a tool on Linux
    fn get_linux_install_instructions(tool_name: &str) -> String {
        match tool_name {
            "vspipe" => "sudo apt-get install vapoursynth  # or build from https://github.com/vapoursynth/vapoursynth".to_string(),
            "ffmpeg" => "sudo apt-get install ffmpeg".to_string(),
            _ => format!("sudo apt-get install {}", tool_name),
        }
    }
}

impl Default for ToolPathResolver {
    fn default() -> Self {
        Self::new()
    }
}
