//! # Error Types Module
//!
//! Questo modulo definisce tutti i tipi di errore custom della pipeline.
//!
//! ## Responsabilità:
//! - Definisce la tassonomia degli errori: dipendenze, configurazione, avvio
//!   processi, pipeline, cancellazione
//! - Distingue gli errori fatali per l'intero batch da quelli contenuti nel
//!   singolo job
//! - Integra con `thiserror` per conversioni automatiche
//!
//! ## Categorie di errori:
//! - `DependencyError`: tool o plugin mancante/incompatibile (fatale per il batch)
//! - `ConfigurationError`: combinazione di opzioni non valida (fatale per il batch)
//! - `PipelineError::Launch`: un sottoprocesso non parte (fatale per il job)
//! - `PipelineError::Stage`: exit code non zero, stream chiuso, output vuoto
//! - `PipelineError::Cancelled`: richiesta di stop esterna o timeout del job
//!
//! ## Esempio:
//! ```rust
//! let missing = verifier.verify().await;
//! if !missing.is_empty() {
//!     return Err(DitherError::Dependency(missing));
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// A required executable or plugin that is missing or too old
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{name}: {reason}")]
pub struct DependencyError {
    pub name: String,
    pub reason: String,
}

impl DependencyError {
    pub fn new(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

/// Invalid or conflicting option combination, raised before any process spawns
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("Configuration error: {0}")]
pub struct ConfigurationError(pub String);

impl ConfigurationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// The part of a job an error is attributed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    FrameSource,
    Encoder,
    Output,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::FrameSource => "frame-source",
            Stage::Encoder => "encoder",
            Stage::Output => "output",
        };
        f.write_str(name)
    }
}

/// Why a job was stopped before it could finish
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "detail")]
pub enum CancelReason {
    /// External stop request (Ctrl-C, caller-issued cancel)
    Requested,
    /// Per-job timeout expired, value in seconds
    TimedOut(u64),
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::Requested => f.write_str("cancellation requested"),
            CancelReason::TimedOut(secs) => write!(f, "timed out after {}s", secs),
        }
    }
}

/// Per-job failures. These never abort the batch: the coordinator records them
/// in the run summary and moves on.
#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("Failed to launch {stage}: {source}")]
    Launch {
        stage: Stage,
        #[source]
        source: std::io::Error,
    },

    #[error("{stage} failed (exit code: {}, {partial_bytes_relayed} bytes relayed): {detail}", fmt_exit_code(.exit_code))]
    Stage {
        stage: Stage,
        exit_code: Option<i32>,
        partial_bytes_relayed: u64,
        detail: String,
    },

    #[error("Job stopped: {reason} ({partial_bytes_relayed} bytes relayed)")]
    Cancelled {
        reason: CancelReason,
        partial_bytes_relayed: u64,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
}

impl PipelineError {
    /// Stage the failure is attributed to, when there is one
    pub fn stage(&self) -> Option<Stage> {
        match self {
            PipelineError::Launch { stage, .. } | PipelineError::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    pub fn is_cancellation(&self) -> bool {
        matches!(
            self,
            PipelineError::Cancelled {
                reason: CancelReason::Requested,
                ..
            }
        )
    }
}

fn fmt_exit_code(code: &Option<i32>) -> String {
    match code {
        Some(code) => code.to_string(),
        None => "signal".to_string(),
    }
}

/// Crate-level error for batch-wide preconditions and setup
#[derive(thiserror::Error, Debug)]
pub enum DitherError {
    #[error("Missing or incompatible dependencies:\n{}", format_dependency_list(.0))]
    Dependency(Vec<DependencyError>),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
}

fn format_dependency_list(errors: &[DependencyError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dependency_list_lists_every_entry() {
        let err = DitherError::Dependency(vec![
            DependencyError::new("vspipe", "not found"),
            DependencyError::new("plugin:fmtc", "not loaded"),
        ]);
        let message = err.to_string();
        assert!(message.contains("vspipe: not found"));
        assert!(message.contains("plugin:fmtc: not loaded"));
    }

    #[test]
    fn test_configuration_error_converts() {
        let err: DitherError = ConfigurationError::new("no input given").into();
        assert!(matches!(err, DitherError::Configuration(_)));
        assert!(err.to_string().contains("no input given"));
    }

    #[test]
    fn test_stage_error_message() {
        let err = PipelineError::Stage {
            stage: Stage::FrameSource,
            exit_code: Some(3),
            partial_bytes_relayed: 1024,
            detail: "script evaluation failed".to_string(),
        };
        assert_eq!(err.stage(), Some(Stage::FrameSource));
        let message = err.to_string();
        assert!(message.contains("frame-source"));
        assert!(message.contains("exit code: 3"));
        assert!(message.contains("1024 bytes"));
    }

    #[test]
    fn test_timeout_is_not_an_external_cancellation() {
        let timed_out = PipelineError::Cancelled {
            reason: CancelReason::TimedOut(30),
            partial_bytes_relayed: 0,
        };
        let requested = PipelineError::Cancelled {
            reason: CancelReason::Requested,
            partial_bytes_relayed: 0,
        };
        assert!(!timed_out.is_cancellation());
        assert!(requested.is_cancellation());
        assert!(timed_out.to_string().contains("timed out after 30s"));
    }
}
