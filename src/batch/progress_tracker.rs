//! # Progress Tracking Module
//!
//! Presentazione dell'avanzamento del batch.
//!
//! ## Responsabilità:
//! - Barra complessiva sui file del batch (`indicatif`)
//! - Una barra per job alimentata dai `ProgressSnapshot` dell'encoder:
//!   spinner finché il totale dei frame non è noto, poi barra vera
//! - In modalità `--json` nessuna barra: eventi `progress` su stdout
//!
//! ## Visual feedback:
//! ```text
//! [00:04:12] [=========>------------------------------] 1/4 (25%) [OK] a.mov
//!   ⠋ b.mov [=====================>------------------] 1043/2000 frame 1043/2000 (52.2%) eta 95s
//! ```

use crate::json_output::JsonMessage;
use crate::job::Job;
use crate::progress::{ProgressCallback, ProgressSnapshot};
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::sync::Arc;
use std::time::Duration;

const OVERALL_TEMPLATE: &str = "[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}";
const FRAMES_TEMPLATE: &str = "  {spinner:.green} {prefix} [{bar:40.green/white}] {pos}/{len} {msg}";
const SPINNER_TEMPLATE: &str = "  {spinner:.green} {prefix} {msg}";

/// Batch-level progress: overall bar plus one bar per running job
pub struct ProgressTracker {
    json_output: bool,
    multi: MultiProgress,
    overall: ProgressBar,
}

impl ProgressTracker {
    pub fn new(total_jobs: usize, json_output: bool) -> Self {
        let target = if json_output {
            ProgressDrawTarget::hidden()
        } else {
            ProgressDrawTarget::stderr()
        };
        Self::with_target(total_jobs, json_output, target)
    }

    fn with_target(total_jobs: usize, json_output: bool, target: ProgressDrawTarget) -> Self {
        let multi = MultiProgress::with_draw_target(target);
        let overall = multi.add(ProgressBar::new(total_jobs as u64));
        overall.set_style(style(OVERALL_TEMPLATE).progress_chars("=>-"));
        Self {
            json_output,
            multi,
            overall,
        }
    }

    /// Progress sink for one job, removed again by `JobProgress::finish`
    pub fn job_progress(&self, job: &Job) -> JobProgress {
        let bar = self.multi.add(ProgressBar::new_spinner());
        bar.set_style(style(SPINNER_TEMPLATE));
        bar.set_prefix(job.display_name());
        bar.set_message("starting");
        if !self.json_output {
            bar.enable_steady_tick(Duration::from_millis(100));
        }
        JobProgress {
            index: job.index(),
            json_output: self.json_output,
            bar,
            multi: self.multi.clone(),
        }
    }

    /// Advance the overall bar once a job has a final status
    pub fn job_done(&self, message: &str) {
        self.overall.inc(1);
        self.overall.set_message(message.to_string());
    }

    pub fn finish(&self, summary: &str) {
        self.overall.finish_with_message(summary.to_string());
    }

    pub fn completed(&self) -> u64 {
        self.overall.position()
    }
}

/// Per-job progress display fed by encoder snapshots
#[derive(Clone)]
pub struct JobProgress {
    index: usize,
    json_output: bool,
    bar: ProgressBar,
    multi: MultiProgress,
}

impl JobProgress {
    pub fn callback(&self) -> ProgressCallback {
        let progress = self.clone();
        Arc::new(move |snapshot: &ProgressSnapshot| progress.update(snapshot))
    }

    pub fn update(&self, snapshot: &ProgressSnapshot) {
        if self.json_output {
            JsonMessage::progress(self.index, snapshot).emit();
        }

        if let Some(total) = snapshot.total_frames {
            if self.bar.length() != Some(total) {
                self.bar.set_style(style(FRAMES_TEMPLATE).progress_chars("=>-"));
                self.bar.set_length(total);
            }
        }
        self.bar.set_position(snapshot.frames_processed);
        self.bar.set_message(snapshot.format_line());
    }

    pub fn position(&self) -> u64 {
        self.bar.position()
    }

    pub fn length(&self) -> Option<u64> {
        self.bar.length()
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
        self.multi.remove(&self.bar);
    }
}

fn style(template: &str) -> ProgressStyle {
    ProgressStyle::with_template(template).unwrap_or_else(|_| ProgressStyle::default_bar())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::path::PathBuf;

    fn job() -> Job {
        Job::new(
            2,
            PathBuf::from("/in/clip.mov"),
            PathBuf::from("/out/clip.mov"),
            Arc::new(Config::default()),
        )
        .unwrap()
    }

    fn snapshot(frames: u64, total: Option<u64>) -> ProgressSnapshot {
        ProgressSnapshot {
            frames_processed: frames,
            total_frames: total,
            elapsed: Duration::from_secs(1),
            media_time: None,
            eta: None,
        }
    }

    #[test]
    fn test_job_bar_follows_snapshots() {
        let tracker = ProgressTracker::with_target(3, false, ProgressDrawTarget::hidden());
        let progress = tracker.job_progress(&job());

        let callback = progress.callback();
        callback(&snapshot(12, None));
        assert_eq!(progress.position(), 12);

        callback(&snapshot(40, Some(200)));
        assert_eq!(progress.length(), Some(200));
        assert_eq!(progress.position(), 40);
        progress.finish();
    }

    #[test]
    fn test_overall_bar_counts_finished_jobs() {
        let tracker = ProgressTracker::with_target(2, false, ProgressDrawTarget::hidden());
        tracker.job_done("[OK] a.mov");
        tracker.job_done("[ERROR] b.mov");
        assert_eq!(tracker.completed(), 2);
        tracker.finish("done");
    }
}
