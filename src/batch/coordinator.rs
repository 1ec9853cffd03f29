//! # Batch Coordinator
//!
//! Orchestratore del batch: trova i file di input, crea una `Job` per
//! ciascuno e li passa al `PipelineRunner`.
//!
//! ## Garanzie:
//! - Il fallimento di una job non interrompe mai il batch
//! - Al più `concurrency` job in volo (default 1, cioè sequenziale);
//!   ogni job possiede i propri processi, condivisa è solo la `Config`
//! - Il `RunSummary` viene aggiornato solo da questo task, mai dai worker
//! - Dopo una cancellazione esterna la policy decide se fermarsi
//!   (job non avviate marcate `skipped`) o proseguire con la successiva
//!
//! ## Esempio:
//! ```rust
//! let coordinator = BatchCoordinator::new(config, toolchain, run_dir, timestamp);
//! let cancel = coordinator.cancel_handle();
//! tokio::spawn(async move {
//!     let _ = tokio::signal::ctrl_c().await;
//!     cancel.cancel();
//! });
//! let summary = coordinator.run(&input, recursive).await?;
//! ```

use super::path_resolver::PathResolver;
use super::progress_tracker::ProgressTracker;
use crate::config::{CancelPolicy, Config};
use crate::error::PipelineError;
use crate::file_manager::FileManager;
use crate::job::{Job, JobStatus};
use crate::json_output::{JsonConfig, JsonMessage};
use crate::pipeline::{incomplete, JobOutcome, PipelineRunner};
use crate::summary::{JobRecord, RunSummary};
use crate::tool_resolver::Toolchain;
use anyhow::Result;
use futures::FutureExt;
use std::any::Any;
use std::collections::HashSet;
use std::future::Future;
use std::io;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// External stop requests for the batch.
///
/// Cloneable; every clone cancels the jobs currently in flight.
#[derive(Clone, Default)]
pub struct CancelHandle {
    token: Arc<Mutex<CancellationToken>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        if let Ok(token) = self.token.lock() {
            token.cancel();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.lock().map(|t| t.is_cancelled()).unwrap_or(false)
    }

    /// Token for a job about to start. Under `renew` a spent token is
    /// replaced so the new job is not cancelled by an earlier request.
    fn token_for_next_job(&self, renew: bool) -> CancellationToken {
        match self.token.lock() {
            Ok(mut token) => {
                if renew && token.is_cancelled() {
                    *token = CancellationToken::new();
                }
                token.clone()
            }
            Err(_) => CancellationToken::new(),
        }
    }
}

enum Completion {
    Finished(Result<JobOutcome, PipelineError>),
    Skipped,
}

/// Runs every job of a batch and aggregates the results
pub struct BatchCoordinator {
    config: Arc<Config>,
    runner: PipelineRunner,
    run_dir: PathBuf,
    timestamp: String,
    cancel: CancelHandle,
}

impl BatchCoordinator {
    pub fn new(config: Arc<Config>, toolchain: Toolchain, run_dir: PathBuf, timestamp: String) -> Self {
        Self {
            config,
            runner: PipelineRunner::new(toolchain),
            run_dir,
            timestamp,
            cancel: CancelHandle::default(),
        }
    }

    pub fn with_runner(mut self, runner: PipelineRunner) -> Self {
        self.runner = runner;
        self
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Process a single file or every supported file below `input_root`
    pub async fn run(&self, input_root: &Path, recursive: bool) -> Result<RunSummary> {
        let (base_dir, files) = Self::discover(input_root, recursive)?;
        let resolver = PathResolver::new(&base_dir, &self.run_dir, &self.timestamp);

        let profile = self.config.codec_profile()?;
        let mut taken = HashSet::new();
        let mut jobs = Vec::with_capacity(files.len());
        for (index, input) in files.into_iter().enumerate() {
            let output = resolver.unique_output_path(&input, profile, &mut taken)?;
            jobs.push(Job::new(index, input, output, self.config.clone())?);
        }

        if self.config.json_output {
            JsonMessage::start(
                input_root.to_path_buf(),
                self.run_dir.clone(),
                jobs.len(),
                JsonConfig::from(self.config.as_ref()),
            )
            .emit();
        }
        info!("Found {} video files to process in {}", jobs.len(), input_root.display());

        let mut summary = RunSummary::new(&self.run_dir);
        if jobs.is_empty() {
            warn!("No supported video files found in {}", input_root.display());
            summary.finalize();
            return Ok(summary);
        }

        let tracker = ProgressTracker::new(jobs.len(), self.config.json_output);
        self.process_jobs(jobs, &tracker, &mut summary).await;

        summary.finalize();
        tracker.finish(&summary.format_summary());
        Ok(summary)
    }

    /// Run jobs with at most `concurrency` in flight, recording each result
    /// as soon as its job completes
    async fn process_jobs(&self, jobs: Vec<Job>, tracker: &ProgressTracker, summary: &mut RunSummary) {
        let total = jobs.len();
        let limit = self.config.concurrency.max(1);
        let renew = self.config.cancel_policy == CancelPolicy::Continue;
        let mut pending = jobs.into_iter();
        let mut tasks = JoinSet::new();

        loop {
            while tasks.len() < limit {
                let Some(mut job) = pending.next() else { break };

                if !renew && self.cancel.is_cancelled() {
                    job.mark_skipped();
                    self.record(summary, tracker, &job, Completion::Skipped);
                    continue;
                }

                let token = self.cancel.token_for_next_job(renew);
                let progress = tracker.job_progress(&job);
                let runner = self.runner.clone().with_progress(progress.callback());
                job.mark_running();
                info!("[{}/{}] Starting {}", job.index() + 1, total, job.input().display());
                if self.config.json_output {
                    JsonMessage::job_start(job.input().to_path_buf(), job.output().to_path_buf(), job.index(), total)
                        .emit();
                }

                let worker_job = job.clone();
                tasks.spawn(async move {
                    let finished = run_guarded(job, async move { runner.run(&worker_job, &token).await }).await;
                    progress.finish();
                    finished
                });
            }

            match tasks.join_next().await {
                Some(Ok((job, result))) => self.record(summary, tracker, &job, Completion::Finished(result)),
                Some(Err(e)) => error!("Job task aborted: {}", e),
                None => break,
            }
        }
    }

    fn record(&self, summary: &mut RunSummary, tracker: &ProgressTracker, job: &Job, completion: Completion) {
        let (record, tag) = match &completion {
            Completion::Finished(Ok(outcome)) => (summary.record_success(job, outcome), "[OK]"),
            Completion::Finished(Err(err)) => {
                let partial = incomplete::marker_path(job.output()).exists();
                let tag = if err.is_cancellation() { "[CANCELLED]" } else { "[ERROR]" };
                (summary.record_failure(job, err, partial), tag)
            }
            Completion::Skipped => (summary.record_skipped(job, "batch stopped by cancellation"), "[SKIP]"),
        };

        log_record(record);
        if self.config.json_output {
            JsonMessage::job_complete(job.index(), record.clone()).emit();
        }
        tracker.job_done(&format!("{} {}", tag, job.display_name()));
    }

    /// Input files and the directory their output paths are relative to
    fn discover(input_root: &Path, recursive: bool) -> Result<(PathBuf, Vec<PathBuf>)> {
        if input_root.is_file() {
            if !FileManager::is_supported_format(input_root) {
                warn!("{} does not have a recognised video extension", input_root.display());
            }
            let base = input_root.parent().map(Path::to_path_buf).unwrap_or_default();
            return Ok((base, vec![input_root.to_path_buf()]));
        }
        let files = FileManager::find_video_files(input_root, recursive)?;
        Ok((input_root.to_path_buf(), files))
    }
}

/// Await `work` for `job`, turning a panic into a recorded failure so every
/// started job still ends up in the summary
async fn run_guarded<F>(mut job: Job, work: F) -> (Job, Result<JobOutcome, PipelineError>)
where
    F: Future<Output = Result<JobOutcome, PipelineError>>,
{
    let result = match AssertUnwindSafe(work).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => Err(PipelineError::Io(io::Error::new(
            io::ErrorKind::Other,
            format!("job panicked: {}", panic_message(panic.as_ref())),
        ))),
    };
    match result {
        Ok(_) => job.mark_succeeded(),
        Err(_) => job.mark_failed(),
    }
    (job, result)
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

fn log_record(record: &JobRecord) {
    match &record.reason {
        Some(reason) if record.status == JobStatus::Failed => {
            let stage = record.stage.map(|s| s.to_string()).unwrap_or_else(|| "job".to_string());
            error!("Job failed: {} [{}]: {}", record.input.display(), stage, reason);
            if record.partial_output {
                warn!("Partial output kept and flagged incomplete: {}", record.output.display());
            }
        }
        Some(reason) => info!("Job skipped: {} ({})", record.input.display(), reason),
        None => info!(
            "Job finished: {} -> {} ({:.1}s)",
            record.input.display(),
            record.output.display(),
            record.duration_secs.unwrap_or_default()
        ),
    }
}
