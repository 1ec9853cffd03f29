//! # Logging Setup
//!
//! Inizializza il subscriber `tracing` globale:
//! - livello dalla configurazione (`DEBUG`, `INFO`, `WARNING`, `ERROR`),
//!   sovrascrivibile con `RUST_LOG`
//! - un layer su stderr per la console
//! - un layer senza colori sul file `process.log` della run

use crate::config::parse_log_level;
use anyhow::{Context, Result};
use std::fs::File;
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub const LOG_FILE_NAME: &str = "process.log";

/// Install the global subscriber. Call once, before any job starts.
pub fn init_logging(log_level: &str, log_file: Option<&Path>) -> Result<()> {
    let directive = parse_log_level(log_level)?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));

    let file_layer = match log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = File::create(path)
                .with_context(|| format!("Failed to create log file {}", path.display()))?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_target(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(file_layer)
        .try_init()
        .context("Failed to install the tracing subscriber")?;

    Ok(())
}
