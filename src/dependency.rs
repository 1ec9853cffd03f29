//! # Dependency Verification Module
//!
//! Controlla, prima di avviare qualsiasi job, che tutto ciò che serve alla
//! pipeline sia presente e abbastanza recente.
//!
//! ## Responsabilità:
//! - Risolve gli eseguibili del frame source (`vspipe`) e dell'encoder (`ffmpeg`)
//! - Interroga la versione di ciascuno e la confronta con il minimo richiesto
//! - Verifica uno per uno i plugin richiesti dalla configurazione attiva
//! - Riporta **tutti** i requisiti mancanti, non solo il primo
//!
//! Nessun effetto collaterale oltre ai processi lanciati per le query.
//!
//! ## Esempio:
//! ```rust
//! let verifier = DependencyVerifier::new(&config)?;
//! let toolchain = verifier.ensure().await?;
//! ```

use crate::config::Config;
use crate::error::{ConfigurationError, DependencyError, DitherError};
use crate::filter_graph::{plugin_probe_script, FilterGraphBuilder};
use crate::tool_resolver::{ToolPathResolver, Toolchain};
use regex::Regex;
use semver::Version;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::OnceLock;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

const VERSION_QUERY_TIMEOUT: Duration = Duration::from_secs(15);
const PLUGIN_PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// Oldest VapourSynth core release with the `-c y4m` output switch
const MIN_FRAME_SOURCE_VERSION: Version = Version::new(55, 0, 0);
const MIN_ENCODER_VERSION: Version = Version::new(4, 4, 0);

/// One executable the pipeline cannot run without
struct ToolRequirement {
    configured: PathBuf,
    version_arg: &'static str,
    min_version: Version,
}

impl ToolRequirement {
    fn name(&self) -> String {
        self.configured
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.configured.display().to_string())
    }
}

/// Checks executables and plugins needed by a configuration
pub struct DependencyVerifier {
    resolver: ToolPathResolver,
    frame_source: ToolRequirement,
    encoder: ToolRequirement,
    plugins: Vec<&'static str>,
}

impl DependencyVerifier {
    pub fn new(config: &Config) -> Result<Self, ConfigurationError> {
        Self::with_resolver(config, ToolPathResolver::new())
    }

    pub fn with_resolver(config: &Config, resolver: ToolPathResolver) -> Result<Self, ConfigurationError> {
        Ok(Self {
            resolver,
            frame_source: ToolRequirement {
                configured: config.frame_source_path.clone(),
                version_arg: "--version",
                min_version: MIN_FRAME_SOURCE_VERSION,
            },
            encoder: ToolRequirement {
                configured: config.encoder_path.clone(),
                version_arg: "-version",
                min_version: MIN_ENCODER_VERSION,
            },
            plugins: FilterGraphBuilder::required_plugins(config)?,
        })
    }

    /// Every missing or incompatible requirement, empty when all is well
    pub async fn verify(&self) -> Vec<DependencyError> {
        self.check().await.0
    }

    /// Verify and hand back the resolved executables
    pub async fn ensure(&self) -> Result<Toolchain, DitherError> {
        match self.check().await {
            (missing, Some(toolchain)) if missing.is_empty() => Ok(toolchain),
            (missing, _) => Err(DitherError::Dependency(missing)),
        }
    }

    async fn check(&self) -> (Vec<DependencyError>, Option<Toolchain>) {
        let mut missing = Vec::new();

        let frame_source = self.check_tool(&self.frame_source, &mut missing).await;
        let encoder = self.check_tool(&self.encoder, &mut missing).await;

        match frame_source {
            Some(ref vspipe) => {
                for plugin in &self.plugins {
                    if let Err(reason) = probe_plugin(vspipe, plugin).await {
                        missing.push(DependencyError::new(format!("plugin:{}", plugin), reason));
                    } else {
                        info!("Plugin '{}' available", plugin);
                    }
                }
            }
            None => {
                for plugin in &self.plugins {
                    missing.push(DependencyError::new(
                        format!("plugin:{}", plugin),
                        "cannot be checked without a working frame source",
                    ));
                }
            }
        }

        for dep in &missing {
            warn!("Dependency check failed: {}", dep);
        }

        let toolchain = match (frame_source, encoder) {
            (Some(frame_source), Some(encoder)) => Some(Toolchain { frame_source, encoder }),
            _ => None,
        };
        (missing, toolchain)
    }

    async fn check_tool(&self, req: &ToolRequirement, missing: &mut Vec<DependencyError>) -> Option<PathBuf> {
        let path = match self.resolver.check_tool_with_instructions(&req.configured) {
            Ok(path) => path,
            Err(reason) => {
                missing.push(DependencyError::new(req.name(), reason));
                return None;
            }
        };

        let output = match query_version(&path, req.version_arg).await {
            Ok(output) => output,
            Err(reason) => {
                missing.push(DependencyError::new(req.name(), reason));
                return None;
            }
        };

        match parse_version(&output) {
            Some(version) if version < req.min_version => {
                missing.push(DependencyError::new(
                    req.name(),
                    format!("version {} is older than the required {}", version, req.min_version),
                ));
                None
            }
            Some(version) => {
                info!("{} {} found at {}", req.name(), version, path.display());
                Some(path)
            }
            None => {
                warn!(
                    "Could not determine the version of {}, assuming it is recent enough",
                    path.display()
                );
                Some(path)
            }
        }
    }
}

async fn query_version(path: &Path, arg: &str) -> Result<String, String> {
    debug!("Querying version: {} {}", path.display(), arg);

    let child = Command::new(path)
        .arg(arg)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output();

    let output = match tokio::time::timeout(VERSION_QUERY_TIMEOUT, child).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => return Err(format!("version query could not run: {}", e)),
        Err(_) => return Err(format!("version query timed out after {:?}", VERSION_QUERY_TIMEOUT)),
    };

    if !output.status.success() {
        return Err(format!("version query exited with {}", output.status));
    }

    let mut text = String::from_utf8_lossy(&output.stdout).to_string();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    Ok(text)
}

/// Extract a version from tool output such as `ffmpeg version 6.1.1` or `Core R65`
pub fn parse_version(output: &str) -> Option<Version> {
    static VERSION_RE: OnceLock<Option<Regex>> = OnceLock::new();
    let re = VERSION_RE
        .get_or_init(|| Regex::new(r"(?:[Vv]ersion\s+n?|\bR)(\d+)(?:\.(\d+))?(?:\.(\d+))?").ok())
        .as_ref()?;

    let caps = re.captures(output)?;
    let part = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u64>().ok());
    Some(Version::new(part(1)?, part(2).unwrap_or(0), part(3).unwrap_or(0)))
}

/// Load a one-line script that fails unless the plugin namespace exists
async fn probe_plugin(frame_source: &Path, plugin: &str) -> Result<(), String> {
    let mut script = tempfile::Builder::new()
        .prefix("dithery-probe-")
        .suffix(".vpy")
        .tempfile()
        .map_err(|e| format!("could not create probe script: {}", e))?;
    script
        .write_all(plugin_probe_script(plugin).as_bytes())
        .map_err(|e| format!("could not write probe script: {}", e))?;

    let child = Command::new(frame_source)
        .arg("--info")
        .arg(script.path())
        .arg("-")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output();

    let output = match tokio::time::timeout(PLUGIN_PROBE_TIMEOUT, child).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => return Err(format!("probe could not run: {}", e)),
        Err(_) => return Err(format!("probe timed out after {:?}", PLUGIN_PROBE_TIMEOUT)),
    };

    if output.status.success() {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    let detail = stderr.lines().rev().find(|l| !l.trim().is_empty()).unwrap_or("not loaded");
    Err(format!("not loaded ({})", detail.trim()))
}
