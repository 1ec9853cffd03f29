//! # DitheryDoo Library
//!
//! Questo è il modulo principale della libreria che espone tutte le API pubbliche.
//!
//! ## Responsabilità:
//! - Definisce la struttura modulare della pipeline vspipe -> ffmpeg
//! - Espone i tipi principali tramite re-exports per `main.rs`
//!
//! ## Architettura dei moduli:
//! - `config`: Configurazione, validazione e caricamento da file
//! - `error`: Tassonomia degli errori (dipendenze, configurazione, pipeline)
//! - `dependency`: Verifica di eseguibili, versioni e plugin prima della run
//! - `filter_graph`: Descrizione del grafo di filtri e script VapourSynth
//! - `frame_source` / `encoder`: Invocazione di vspipe e ffmpeg
//! - `pipeline`: Esecuzione e supervisione di una singola job
//! - `progress`: Parsing dello stream di stato dell'encoder
//! - `batch`: Scoperta dei file, concorrenza, cancellazione, barre di avanzamento
//! - `summary`: Riepilogo della run e `summary.json`
//!
//! ## Utilizzo:
//! ```rust
//! use dithery_doo::{BatchCoordinator, Config, DependencyVerifier};
//!
//! let config = Arc::new(Config::default());
//! let toolchain = DependencyVerifier::new(&config)?.ensure().await?;
//! let coordinator = BatchCoordinator::new(config, toolchain, run_dir, timestamp);
//! let summary = coordinator.run(&input, false).await?;
//! ```

pub mod batch;
pub mod config;
pub mod dependency;
pub mod encoder;
pub mod error;
pub mod file_manager;
pub mod filter_graph;
pub mod frame_source;
pub mod job;
pub mod json_output;
pub mod logging;
pub mod pipeline;
pub mod progress;
pub mod summary;
pub mod tool_resolver;
pub mod utils;

#[cfg(all(test, unix))]
mod test_fixtures;

pub use batch::{BatchCoordinator, CancelHandle, PathResolver};
pub use config::{CancelPolicy, CodecProfile, Config};
pub use dependency::DependencyVerifier;
pub use error::{ConfigurationError, DependencyError, DitherError, PipelineError, Stage};
pub use filter_graph::{FilterGraph, FilterGraphBuilder};
pub use job::{Job, JobStatus};
pub use pipeline::{JobOutcome, PipelineRunner};
pub use progress::{ProgressMonitor, ProgressSnapshot};
pub use summary::{RunSummary, SUMMARY_FILE_NAME};
pub use tool_resolver::Toolchain;
