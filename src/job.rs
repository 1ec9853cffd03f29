//! # Job Descriptor Module
//!
//! Una `Job` rappresenta un file di input da elaborare: path di input,
//! path di output già risolto, snapshot della configurazione e stato.
//!
//! ## Ciclo di vita:
//! ```text
//! pending -> running -> succeeded
//!                    -> failed
//! pending -> skipped   (batch fermato da una cancellazione)
//! ```
//!
//! Dopo la creazione cambiano solo stato e timing.

use crate::config::{CodecProfile, Config};
use crate::error::ConfigurationError;
use crate::filter_graph::{FilterGraph, FilterGraphBuilder};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed | JobStatus::Skipped)
    }

    fn can_become(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Running)
                | (JobStatus::Pending, JobStatus::Skipped)
                | (JobStatus::Running, JobStatus::Succeeded)
                | (JobStatus::Running, JobStatus::Failed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::Skipped => "skipped",
        };
        f.write_str(name)
    }
}

/// One input file and everything needed to transcode it
#[derive(Debug, Clone)]
pub struct Job {
    index: usize,
    input: PathBuf,
    output: PathBuf,
    config: Arc<Config>,
    profile: CodecProfile,
    status: JobStatus,
    started_at: Option<DateTime<Local>>,
    started: Option<Instant>,
    duration: Option<Duration>,
}

impl Job {
    pub fn new(index: usize, input: PathBuf, output: PathBuf, config: Arc<Config>) -> Result<Self, ConfigurationError> {
        let profile = config.codec_profile()?;
        Ok(Self {
            index,
            input,
            output,
            config,
            profile,
            status: JobStatus::Pending,
            started_at: None,
            started: None,
            duration: None,
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn input(&self) -> &Path {
        &self.input
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn profile(&self) -> CodecProfile {
        self.profile
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn started_at(&self) -> Option<DateTime<Local>> {
        self.started_at
    }

    /// Wall-clock time between start and finish
    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }

    /// Short name for logs and progress messages
    pub fn display_name(&self) -> String {
        self.input
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.input.display().to_string())
    }

    /// Filter graph for this job's input
    pub fn graph(&self) -> Result<FilterGraph, ConfigurationError> {
        FilterGraphBuilder::build(&self.config, &self.input)
    }

    pub fn mark_running(&mut self) {
        if self.transition(JobStatus::Running) {
            self.started_at = Some(Local::now());
            self.started = Some(Instant::now());
        }
    }

    pub fn mark_succeeded(&mut self) {
        if self.transition(JobStatus::Succeeded) {
            self.stop_clock();
        }
    }

    pub fn mark_failed(&mut self) {
        if self.transition(JobStatus::Failed) {
            self.stop_clock();
        }
    }

    pub fn mark_skipped(&mut self) {
        self.transition(JobStatus::Skipped);
    }

    fn stop_clock(&mut self) {
        self.duration = self.started.map(|s| s.elapsed());
    }

    fn transition(&mut self, next: JobStatus) -> bool {
        if !self.status.can_become(next) {
            warn!(
                "Ignoring invalid status change {} -> {} for {}",
                self.status,
                next,
                self.input.display()
            );
            return false;
        }
        self.status = next;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> Job {
        Job::new(
            0,
            PathBuf::from("/in/clip.mov"),
            PathBuf::from("/out/clip.mov"),
            Arc::new(Config::default()),
        )
        .unwrap()
    }

    #[test]
    fn test_lifecycle_records_timing() {
        let mut job = job();
        assert_eq!(job.status(), JobStatus::Pending);
        assert!(job.duration().is_none());

        job.mark_running();
        assert_eq!(job.status(), JobStatus::Running);
        assert!(job.started_at().is_some());

        job.mark_succeeded();
        assert_eq!(job.status(), JobStatus::Succeeded);
        assert!(job.duration().is_some());
        assert!(job.status().is_terminal());
    }

    #[test]
    fn test_invalid_transitions_are_ignored() {
        let mut job = job();
        job.mark_succeeded();
        assert_eq!(job.status(), JobStatus::Pending);

        job.mark_running();
        job.mark_skipped();
        assert_eq!(job.status(), JobStatus::Running);

        job.mark_failed();
        job.mark_running();
        assert_eq!(job.status(), JobStatus::Failed);
    }

    #[test]
    fn test_graph_and_profile_follow_config() {
        let job = job();
        assert_eq!(job.profile(), CodecProfile::ProRes422Hq10Bit);
        assert_eq!(job.display_name(), "clip.mov");
        assert_eq!(job.graph().unwrap().profile(), job.profile());
    }

    #[test]
    fn test_requires_single_profile() {
        let mut config = Config::default();
        config.formats.ffv1_10bit_422 = true;
        assert!(Job::new(0, PathBuf::from("a.mkv"), PathBuf::from("b.mkv"), Arc::new(config)).is_err());
    }
}
