//! # Batch Module
//!
//! Elaborazione di una run completa, separata in sottomoduli:
//! - `coordinator`: scoperta dei file, esecuzione delle job, policy di cancellazione
//! - `progress_tracker`: barre `indicatif` o eventi JSON
//! - `path_resolver`: directory della run e nomi dei file di output

pub mod coordinator;
pub mod path_resolver;
pub mod progress_tracker;

pub use coordinator::{BatchCoordinator, CancelHandle};
pub use path_resolver::PathResolver;
pub use progress_tracker::{JobProgress, ProgressTracker};
