//! # Pipeline Module
//!
//! Esecuzione di una singola job come catena producer/consumer di due
//! sottoprocessi: frame source (vspipe) -> encoder (ffmpeg).
//!
//! ## Componenti:
//! - `runner`: macchina a stati della job e supervisione dei processi
//! - `relay`: copia dei byte dallo stdout del frame source allo stdin dell'encoder
//! - `incomplete`: marcatura degli output parziali

pub mod incomplete;
pub mod relay;
pub mod runner;

pub use runner::{JobOutcome, PipelineRunner, PipelineState, DEFAULT_GRACE_PERIOD};
