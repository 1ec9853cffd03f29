//! # JSON Output Module
//!
//! Questo modulo gestisce l'output strutturato in JSON (`--json`) per chi
//! controlla la pipeline da un altro programma.
//!
//! ## Responsabilità:
//! - Emette un evento JSON per riga su stdout
//! - Riutilizza `RunSummary` e `JobRecord` per i messaggi finali
//!
//! ## Tipi di messaggi:
//! - `start`: inizio della run, con configurazione effettiva
//! - `job_start`: inizio elaborazione di un file
//! - `progress`: snapshot di avanzamento della job corrente
//! - `job_complete`: fine elaborazione di un file (riuscita o fallita)
//! - `complete`: fine della run con i conteggi finali
//! - `error`: errore che impedisce di avviare la run

use crate::config::Config;
use crate::progress::ProgressSnapshot;
use crate::summary::{JobRecord, RunSummary};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Tipo di messaggio JSON
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum JsonMessage {
    /// Inizio della run
    #[serde(rename = "start")]
    Start {
        input: PathBuf,
        run_dir: PathBuf,
        total_files: usize,
        config: JsonConfig,
    },

    /// Inizio elaborazione di un file specifico
    #[serde(rename = "job_start")]
    JobStart {
        path: PathBuf,
        output: PathBuf,
        index: usize,
        total: usize,
    },

    /// Avanzamento della job corrente
    #[serde(rename = "progress")]
    Progress {
        index: usize,
        frames: u64,
        total_frames: Option<u64>,
        percentage: Option<f64>,
        elapsed_seconds: f64,
        eta_seconds: Option<f64>,
    },

    /// Fine elaborazione di un file specifico
    #[serde(rename = "job_complete")]
    JobComplete { index: usize, record: JobRecord },

    /// Run completata
    #[serde(rename = "complete")]
    Complete {
        succeeded: usize,
        failed: usize,
        skipped: usize,
        duration_seconds: f64,
        summary_path: PathBuf,
    },

    /// Errore generale
    #[serde(rename = "error")]
    Error {
        message: String,
        details: Option<String>,
    },
}

/// Configurazione per output JSON
#[derive(Debug, Serialize, Deserialize)]
pub struct JsonConfig {
    pub profile: String,
    pub dither_algorithm: String,
    pub debanding: Option<String>,
    pub use_gpu: bool,
    pub test_frames: Option<u32>,
    pub concurrency: usize,
}

impl JsonMessage {
    /// Emette il messaggio JSON su stdout
    pub fn emit(&self) {
        if let Ok(json) = serde_json::to_string(self) {
            println!("{}", json);
        }
    }

    pub fn start(input: PathBuf, run_dir: PathBuf, total_files: usize, config: JsonConfig) -> Self {
        Self::Start {
            input,
            run_dir,
            total_files,
            config,
        }
    }

    pub fn job_start(path: PathBuf, output: PathBuf, index: usize, total: usize) -> Self {
        Self::JobStart {
            path,
            output,
            index,
            total,
        }
    }

    pub fn progress(index: usize, snapshot: &ProgressSnapshot) -> Self {
        Self::Progress {
            index,
            frames: snapshot.frames_processed,
            total_frames: snapshot.total_frames,
            percentage: snapshot.percent(),
            elapsed_seconds: snapshot.elapsed.as_secs_f64(),
            eta_seconds: snapshot.eta.map(|d| d.as_secs_f64()),
        }
    }

    pub fn job_complete(index: usize, record: JobRecord) -> Self {
        Self::JobComplete { index, record }
    }

    pub fn complete(summary: &RunSummary, duration_seconds: f64, summary_path: PathBuf) -> Self {
        Self::Complete {
            succeeded: summary.succeeded,
            failed: summary.failed,
            skipped: summary.skipped,
            duration_seconds,
            summary_path,
        }
    }

    pub fn error(message: String, details: Option<String>) -> Self {
        Self::Error { message, details }
    }
}

impl From<&Config> for JsonConfig {
    fn from(config: &Config) -> Self {
        Self {
            profile: config
                .codec_profile()
                .map(|p| p.name().to_string())
                .unwrap_or_default(),
            dither_algorithm: config.dither_algorithm.clone(),
            debanding: config.enable_debanding.then(|| config.deband_strength.clone()),
            use_gpu: config.use_gpu,
            test_frames: config.frame_limit(),
            concurrency: config.concurrency,
        }
    }
}
