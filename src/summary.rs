//! # Run Summary Module
//!
//! Aggregato degli esiti di una run: conteggi di job riuscite, fallite e
//! saltate, più un record per job con stage e causa di ogni fallimento.
//!
//! Viene popolato solo dal task coordinatore del batch, quindi non serve
//! alcun lock. A fine run viene loggato e salvato in `summary.json`.
//!
//! ## Esempio:
//! ```rust
//! let mut summary = RunSummary::new(run_dir);
//! summary.record_success(&job, &outcome);
//! summary.finalize();
//! println!("{}", summary.format_summary());
//! ```

use crate::error::{PipelineError, Stage};
use crate::file_manager::FileManager;
use crate::job::{Job, JobStatus};
use crate::pipeline::JobOutcome;
use anyhow::Result;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const SUMMARY_FILE_NAME: &str = "summary.json";

/// Outcome of one job as reported to the user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub input: PathBuf,
    pub output: PathBuf,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub cancelled: bool,
    /// A partial output file was kept and flagged incomplete
    pub partial_output: bool,
    pub bytes_relayed: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frames: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Local>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,
}

impl JobRecord {
    fn base(job: &Job, status: JobStatus) -> Self {
        Self {
            input: job.input().to_path_buf(),
            output: job.output().to_path_buf(),
            status,
            stage: None,
            exit_code: None,
            reason: None,
            cancelled: false,
            partial_output: false,
            bytes_relayed: 0,
            output_size: None,
            frames: None,
            started_at: job.started_at(),
            duration_secs: job.duration().map(|d| d.as_secs_f64()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_dir: PathBuf,
    pub started_at: DateTime<Local>,
    pub finished_at: Option<DateTime<Local>>,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub jobs: Vec<JobRecord>,
}

impl RunSummary {
    pub fn new(run_dir: impl Into<PathBuf>) -> Self {
        Self {
            run_dir: run_dir.into(),
            started_at: Local::now(),
            finished_at: None,
            succeeded: 0,
            failed: 0,
            skipped: 0,
            jobs: Vec::new(),
        }
    }

    pub fn record_success(&mut self, job: &Job, outcome: &JobOutcome) -> &JobRecord {
        let mut record = JobRecord::base(job, JobStatus::Succeeded);
        record.bytes_relayed = outcome.bytes_relayed;
        record.output_size = Some(outcome.output_size);
        record.frames = outcome.frames_encoded;
        self.succeeded += 1;
        self.push(record)
    }

    pub fn record_failure(&mut self, job: &Job, error: &PipelineError, partial_output: bool) -> &JobRecord {
        let mut record = JobRecord::base(job, JobStatus::Failed);
        record.stage = error.stage();
        record.reason = Some(error.to_string());
        record.cancelled = error.is_cancellation();
        record.partial_output = partial_output;
        match error {
            PipelineError::Stage {
                exit_code,
                partial_bytes_relayed,
                ..
            } => {
                record.exit_code = *exit_code;
                record.bytes_relayed = *partial_bytes_relayed;
            }
            PipelineError::Cancelled {
                partial_bytes_relayed, ..
            } => record.bytes_relayed = *partial_bytes_relayed,
            _ => {}
        }
        self.failed += 1;
        self.push(record)
    }

    pub fn record_skipped(&mut self, job: &Job, reason: &str) -> &JobRecord {
        let mut record = JobRecord::base(job, JobStatus::Skipped);
        record.reason = Some(reason.to_string());
        self.skipped += 1;
        self.push(record)
    }

    fn push(&mut self, record: JobRecord) -> &JobRecord {
        self.jobs.push(record);
        &self.jobs[self.jobs.len() - 1]
    }

    pub fn finalize(&mut self) {
        self.finished_at = Some(Local::now());
    }

    pub fn total(&self) -> usize {
        self.jobs.len()
    }

    pub fn failures(&self) -> impl Iterator<Item = &JobRecord> {
        self.jobs.iter().filter(|r| r.status == JobStatus::Failed)
    }

    /// Process exit status: 0 only when nothing failed or was skipped
    pub fn exit_code(&self) -> i32 {
        if self.failed == 0 && self.skipped == 0 {
            0
        } else {
            1
        }
    }

    pub fn format_summary(&self) -> String {
        let written: u64 = self.jobs.iter().filter_map(|r| r.output_size).sum();
        format!(
            "Jobs: {} | Succeeded: {} | Failed: {} | Skipped: {} | Written: {}",
            self.total(),
            self.succeeded,
            self.failed,
            self.skipped,
            FileManager::format_size(written)
        )
    }

    /// One line per failure: input, stage and cause
    pub fn failure_lines(&self) -> Vec<String> {
        self.failures()
            .map(|r| {
                let stage = r.stage.map(|s| s.to_string()).unwrap_or_else(|| "job".to_string());
                format!(
                    "{} [{}]: {}",
                    r.input.display(),
                    stage,
                    r.reason.as_deref().unwrap_or("unknown error")
                )
            })
            .collect()
    }

    pub async fn write_json(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::error::CancelReason;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn job(name: &str) -> Job {
        let mut job = Job::new(
            0,
            PathBuf::from(format!("/in/{}", name)),
            PathBuf::from(format!("/out/{}", name)),
            Arc::new(Config::default()),
        )
        .unwrap();
        job.mark_running();
        job
    }

    #[test]
    fn test_counts_and_exit_code() {
        let mut summary = RunSummary::new("/out");
        let ok = job("a.mov");
        summary.record_success(
            &ok,
            &JobOutcome {
                output: ok.output().to_path_buf(),
                output_size: 2048,
                bytes_relayed: 4096,
                frames_encoded: Some(24),
                expected_frames: Some(24),
                early_stop: false,
            },
        );
        assert_eq!(summary.exit_code(), 0);

        summary.record_failure(
            &job("b.mov"),
            &PipelineError::Stage {
                stage: Stage::FrameSource,
                exit_code: Some(1),
                partial_bytes_relayed: 10,
                detail: "corrupt input".to_string(),
            },
            true,
        );
        summary.record_skipped(&job("c.mov"), "batch stopped");

        assert_eq!((summary.succeeded, summary.failed, summary.skipped), (1, 1, 1));
        assert_eq!(summary.exit_code(), 1);

        let failures = summary.failure_lines();
        assert_eq!(failures.len(), 1);
        assert!(failures[0].starts_with("/in/b.mov [frame-source]"));
        assert!(failures[0].contains("corrupt input"));

        let record = summary.failures().next().unwrap();
        assert_eq!(record.exit_code, Some(1));
        assert_eq!(record.bytes_relayed, 10);
        assert!(record.partial_output);
        assert!(summary.format_summary().contains("Succeeded: 1 | Failed: 1 | Skipped: 1"));
    }

    #[test]
    fn test_cancellation_is_flagged() {
        let mut summary = RunSummary::new("/out");
        summary.record_failure(
            &job("a.mov"),
            &PipelineError::Cancelled {
                reason: CancelReason::Requested,
                partial_bytes_relayed: 99,
            },
            false,
        );
        let record = &summary.jobs[0];
        assert!(record.cancelled);
        assert_eq!(record.stage, None);
        assert_eq!(record.bytes_relayed, 99);

        // A timeout is a failure, not a cancellation
        let record = summary.record_failure(
            &job("b.mov"),
            &PipelineError::Cancelled {
                reason: CancelReason::TimedOut(60),
                partial_bytes_relayed: 0,
            },
            false,
        );
        assert!(!record.cancelled);
        assert!(record.reason.as_deref().unwrap_or_default().contains("60"));
    }

    #[tokio::test]
    async fn test_write_json() {
        let dir = TempDir::new().unwrap();
        let mut summary = RunSummary::new(dir.path());
        summary.record_skipped(&job("a.mov"), "batch stopped");
        summary.finalize();

        let path = dir.path().join(SUMMARY_FILE_NAME);
        summary.write_json(&path).await.unwrap();

        let value: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["skipped"], 1);
        assert_eq!(value["jobs"][0]["status"], "skipped");
        assert!(value["jobs"][0]["started_at"].is_string());
        assert!(value["finished_at"].is_string());
    }
}
