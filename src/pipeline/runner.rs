//! # Pipeline Runner
//!
//! Esegue una singola job: lancia frame source ed encoder, collega lo stdout
//! del primo allo stdin del secondo e li supervisiona fino alla fine.
//!
//! ## Stati:
//! ```text
//! idle -> launching -> streaming -> draining -> completed
//!                                            -> failed
//! ```
//!
//! ## Garanzie:
//! - Relay dei byte, lettura dello stato dell'encoder e drenaggio dello stderr
//!   del frame source girano come task separati, mai in serie
//! - Lo stdin dell'encoder viene chiuso solo dopo che il frame source è
//!   uscito e il suo output è stato drenato
//! - Cancellazione e timeout terminano prima il frame source, poi l'encoder,
//!   ciascuno entro un periodo di grazia
//! - Ogni processo viene raccolto su ogni percorso di uscita (`kill_on_drop`)
//! - Un output parziale non viene mai cancellato: viene marcato `.incomplete`

use super::incomplete;
use super::relay::{relay, RelayOutcome};
use crate::config::Config;
use crate::encoder::EncoderSettings;
use crate::error::{CancelReason, PipelineError, Stage};
use crate::file_manager::FileManager;
use crate::frame_source;
use crate::job::Job;
use crate::progress::{MonitorReport, ProgressCallback, ProgressMonitor, StatusLines};
use crate::tool_resolver::Toolchain;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncRead;
use tokio::process::{Child, ChildStdin, Command};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Time each subprocess gets to exit once it has been killed
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

const SOURCE_DIAGNOSTIC_TAIL: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Launching,
    Streaming,
    Draining,
    Completed,
    Failed,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Idle => "idle",
            PipelineState::Launching => "launching",
            PipelineState::Streaming => "streaming",
            PipelineState::Draining => "draining",
            PipelineState::Completed => "completed",
            PipelineState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Result of a completed job
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub output: PathBuf,
    pub output_size: u64,
    pub bytes_relayed: u64,
    /// Final frame counter reported by the encoder
    pub frames_encoded: Option<u64>,
    /// Frame count announced by the frame source
    pub expected_frames: Option<u64>,
    /// The frame source stopped early with a tolerated exit code
    pub early_stop: bool,
}

/// Everything observed once both subprocesses have exited
struct Finished {
    source_status: ExitStatus,
    relay: RelayOutcome<ChildStdin>,
    encoder_status: ExitStatus,
    report: MonitorReport,
    source_tail: Vec<String>,
}

enum Verdict {
    Finished(Result<Finished, PipelineError>),
    Stopped(CancelReason),
}

/// Runs jobs against one resolved toolchain
#[derive(Clone)]
pub struct PipelineRunner {
    toolchain: Toolchain,
    progress: Option<ProgressCallback>,
    grace_period: Duration,
}

impl PipelineRunner {
    pub fn new(toolchain: Toolchain) -> Self {
        Self {
            toolchain,
            progress: None,
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Run one job to completion, failure or cancellation
    pub async fn run(&self, job: &Job, cancel: &CancellationToken) -> Result<JobOutcome, PipelineError> {
        let name = job.display_name();
        enter(&name, PipelineState::Idle);

        let deadline = job
            .config()
            .job_timeout_secs
            .map(|secs| (secs, Instant::now() + Duration::from_secs(secs)));

        let graph = job.graph()?;
        let script = frame_source::write_script(&graph)?;
        let frame_count = frame_source::probe_frame_count(&self.toolchain.frame_source, script.path());
        let expected_frames = tokio::select! {
            frames = frame_count => frames,
            _ = cancel.cancelled() => return Err(stopped_before_launch(&name, CancelReason::Requested)),
            secs = job_deadline(deadline) => return Err(stopped_before_launch(&name, CancelReason::TimedOut(secs))),
        };
        let display_total = expected_frames.or_else(|| graph.frame_limit().map(u64::from));
        debug!("{}: expected frames {:?}", name, expected_frames);

        if let Some(parent) = job.output().parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        incomplete::clear_marker(job.output()).await?;

        enter(&name, PipelineState::Launching);
        let mut source = Command::new(&self.toolchain.frame_source)
            .args(frame_source::render_args(script.path()))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| {
                enter(&name, PipelineState::Failed);
                PipelineError::Launch {
                    stage: Stage::FrameSource,
                    source,
                }
            })?;

        let encoder_args = EncoderSettings::for_profile(job.profile()).args(job.input(), job.output());
        debug!("{}: encoder args {:?}", name, encoder_args);
        let mut encoder = match Command::new(&self.toolchain.encoder)
            .args(&encoder_args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                terminate(&mut source, Stage::FrameSource, self.grace_period).await;
                enter(&name, PipelineState::Failed);
                return Err(PipelineError::Launch {
                    stage: Stage::Encoder,
                    source: e,
                });
            }
        };

        let (Some(source_out), Some(source_err), Some(encoder_in), Some(encoder_err)) = (
            source.stdout.take(),
            source.stderr.take(),
            encoder.stdin.take(),
            encoder.stderr.take(),
        ) else {
            terminate(&mut source, Stage::FrameSource, self.grace_period).await;
            terminate(&mut encoder, Stage::Encoder, self.grace_period).await;
            enter(&name, PipelineState::Failed);
            return Err(PipelineError::Io(io::Error::new(
                io::ErrorKind::Other,
                "subprocess pipes were not captured",
            )));
        };

        enter(&name, PipelineState::Streaming);
        let relayed = Arc::new(AtomicU64::new(0));
        let relay_task = tokio::spawn(relay(source_out, encoder_in, relayed.clone()));
        let monitor_task = tokio::spawn(ProgressMonitor::new(display_total).run(encoder_err, self.progress.clone()));
        let source_log_task = tokio::spawn(collect_tail(source_err));
        let helpers = [
            relay_task.abort_handle(),
            monitor_task.abort_handle(),
            source_log_task.abort_handle(),
        ];

        let verdict = {
            let supervise = async {
                let source_status = source.wait().await?;
                debug!("{}: frame source exited with {}", name, source_status);
                let mut stream = relay_task.await.map_err(join_error)?;

                enter(&name, PipelineState::Draining);
                // End-of-stream for the encoder
                drop(stream.writer.take());
                let encoder_status = encoder.wait().await?;
                debug!("{}: encoder exited with {}", name, encoder_status);

                let report = monitor_task.await.map_err(join_error)?;
                let source_tail = source_log_task.await.unwrap_or_default();
                Ok::<_, PipelineError>(Finished {
                    source_status,
                    relay: stream,
                    encoder_status,
                    report,
                    source_tail,
                })
            };

            tokio::select! {
                finished = supervise => Verdict::Finished(finished),
                _ = cancel.cancelled() => Verdict::Stopped(CancelReason::Requested),
                secs = job_deadline(deadline) => Verdict::Stopped(CancelReason::TimedOut(secs)),
            }
        };

        let result = match verdict {
            Verdict::Finished(Ok(finished)) => self.evaluate(job, finished, expected_frames).await,
            Verdict::Finished(Err(e)) => Err(e),
            Verdict::Stopped(reason) => {
                warn!("{}: {}, stopping subprocesses", name, reason);
                Err(PipelineError::Cancelled {
                    reason,
                    partial_bytes_relayed: relayed.load(Ordering::Relaxed),
                })
            }
        };

        match result {
            Ok(outcome) => {
                enter(&name, PipelineState::Completed);
                Ok(outcome)
            }
            Err(err) => {
                // Frame source first so it cannot block on a pipe the encoder no longer reads
                terminate(&mut source, Stage::FrameSource, self.grace_period).await;
                terminate(&mut encoder, Stage::Encoder, self.grace_period).await;
                for handle in &helpers {
                    handle.abort();
                }
                flag_incomplete(job, &err).await;
                enter(&name, PipelineState::Failed);
                Err(err)
            }
        }
    }

    /// Decide whether a job whose processes both exited actually succeeded
    async fn evaluate(
        &self,
        job: &Job,
        finished: Finished,
        expected_frames: Option<u64>,
    ) -> Result<JobOutcome, PipelineError> {
        let Finished {
            source_status,
            relay,
            encoder_status,
            report,
            source_tail,
        } = finished;
        let bytes = relay.bytes;

        if let Some(e) = relay.error {
            return Err(PipelineError::Stage {
                stage: Stage::FrameSource,
                exit_code: source_status.code(),
                partial_bytes_relayed: bytes,
                detail: format!("frame stream relay failed: {}", e),
            });
        }

        let encoder_ok = encoder_status.success();
        let early_stop = !source_status.success()
            && accepts_early_stop(job.config(), &source_status, relay.closed_early, encoder_ok);
        let source_ok = source_status.success() || early_stop;

        let encoder_failure = || PipelineError::Stage {
            stage: Stage::Encoder,
            exit_code: encoder_status.code(),
            partial_bytes_relayed: bytes,
            detail: non_empty(report.diagnostic_tail(), "encoder exited unsuccessfully"),
        };

        // A source killed by a vanished reader points at the encoder
        if !encoder_ok && (relay.closed_early || source_ok) {
            return Err(encoder_failure());
        }
        if !source_ok {
            return Err(PipelineError::Stage {
                stage: Stage::FrameSource,
                exit_code: source_status.code(),
                partial_bytes_relayed: bytes,
                detail: non_empty(source_tail.join(" | "), "frame source exited unsuccessfully"),
            });
        }
        if !encoder_ok {
            return Err(encoder_failure());
        }
        if early_stop {
            info!(
                "{}: frame source stopped early with {} in test mode, accepted",
                job.display_name(),
                source_status
            );
        }

        let output_size = FileManager::file_size(job.output()).await;
        if output_size == 0 {
            return Err(PipelineError::Stage {
                stage: Stage::Output,
                exit_code: None,
                partial_bytes_relayed: bytes,
                detail: format!("output file {} is missing or empty", job.output().display()),
            });
        }

        let frames_encoded = report.final_frame();
        if !early_stop {
            if let (Some(expected), Some(encoded)) = (expected_frames, frames_encoded) {
                if expected != encoded {
                    return Err(PipelineError::Stage {
                        stage: Stage::Output,
                        exit_code: None,
                        partial_bytes_relayed: bytes,
                        detail: format!("encoded {} frames, expected {}", encoded, expected),
                    });
                }
            }
        }

        Ok(JobOutcome {
            output: job.output().to_path_buf(),
            output_size,
            bytes_relayed: bytes,
            frames_encoded,
            expected_frames,
            early_stop,
        })
    }
}

/// Whether a non-zero frame-source exit is a clean early stop
fn accepts_early_stop(config: &Config, status: &ExitStatus, closed_early: bool, encoder_ok: bool) -> bool {
    if !(config.test_mode && closed_early && encoder_ok) {
        return false;
    }
    match status.code() {
        Some(code) => config.early_stop_exit_codes.contains(&code),
        None => killed_by_sigpipe(status),
    }
}

#[cfg(unix)]
fn killed_by_sigpipe(status: &ExitStatus) -> bool {
    use std::os::unix::process::ExitStatusExt;
    status.signal() == Some(13)
}

#[cfg(not(unix))]
fn killed_by_sigpipe(_status: &ExitStatus) -> bool {
    false
}

/// Kill a child unless it already exited, then reap it within `grace`
async fn terminate(child: &mut Child, stage: Stage, grace: Duration) {
    if let Ok(Some(_)) = child.try_wait() {
        return;
    }
    if let Err(e) = child.start_kill() {
        warn!("Failed to signal {}: {}", stage, e);
    }
    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => debug!("{} terminated ({})", stage, status),
        Ok(Err(e)) => warn!("Failed to reap {}: {}", stage, e),
        Err(_) => warn!("{} did not exit within {:?}", stage, grace),
    }
}

/// Resolves with the limit in seconds once the job's deadline passes
async fn job_deadline(deadline: Option<(u64, Instant)>) -> u64 {
    match deadline {
        Some((secs, at)) => {
            tokio::time::sleep_until(at).await;
            secs
        }
        None => std::future::pending().await,
    }
}

/// Stop requested while the frame count was still being queried
fn stopped_before_launch(name: &str, reason: CancelReason) -> PipelineError {
    warn!("{}: {} before launch", name, reason);
    enter(name, PipelineState::Failed);
    PipelineError::Cancelled {
        reason,
        partial_bytes_relayed: 0,
    }
}

async fn flag_incomplete(job: &Job, err: &PipelineError) {
    match incomplete::mark_incomplete(job.output(), &err.to_string()).await {
        Ok(Some(marker)) => warn!("Partial output kept and flagged: {}", marker.display()),
        Ok(None) => {}
        Err(e) => warn!("Could not flag partial output {}: {}", job.output().display(), e),
    }
}

/// Keep the last lines of a diagnostic stream
async fn collect_tail<R: AsyncRead + Unpin>(reader: R) -> Vec<String> {
    let mut lines = StatusLines::new(reader);
    let mut tail = Vec::new();
    while let Ok(Some(line)) = lines.next_line().await {
        if tail.len() == SOURCE_DIAGNOSTIC_TAIL {
            tail.remove(0);
        }
        tail.push(line.trim().to_string());
    }
    tail
}

fn join_error(e: tokio::task::JoinError) -> PipelineError {
    PipelineError::Io(io::Error::new(io::ErrorKind::Other, e))
}

fn non_empty(detail: String, fallback: &str) -> String {
    if detail.is_empty() {
        fallback.to_string()
    } else {
        detail
    }
}

fn enter(job: &str, state: PipelineState) {
    debug!("{}: {}", job, state);
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::{CodecProfile, OutputFormats};
    use crate::test_fixtures::{pid_alive, EncoderMode, FakeTools, SourceMode, FRAME_BYTES};
    use std::os::unix::process::ExitStatusExt;
    use std::time::Instant;
    use tempfile::TempDir;

    struct Fixture {
        dir: TempDir,
        runner: PipelineRunner,
    }

    impl Fixture {
        fn new(tools: FakeTools) -> Self {
            let dir = TempDir::new().unwrap();
            let (frame_source, encoder) = tools.install(dir.path());
            let runner = PipelineRunner::new(Toolchain { frame_source, encoder })
                .with_grace_period(Duration::from_secs(2));
            Self { dir, runner }
        }

        fn job(&self, input: &str, config: Config) -> Job {
            let input = self.dir.path().join(input);
            std::fs::write(&input, b"source").unwrap();
            let output = self.dir.path().join("out").join("result.mov");
            Job::new(0, input, output, Arc::new(config)).unwrap()
        }
    }

    fn pid_file(job: &Job) -> PathBuf {
        let mut path = job.output().as_os_str().to_owned();
        path.push(".pid");
        PathBuf::from(path)
    }

    #[tokio::test]
    async fn test_successful_job() {
        let fx = Fixture::new(FakeTools {
            frames: 5,
            ..Default::default()
        });
        let job = fx.job("clip.mov", Config::default());

        let outcome = fx.runner.run(&job, &CancellationToken::new()).await.unwrap();
        assert_eq!(outcome.bytes_relayed, 5 * FRAME_BYTES);
        assert_eq!(outcome.output_size, 5 * FRAME_BYTES);
        assert_eq!(outcome.expected_frames, Some(5));
        assert_eq!(outcome.frames_encoded, Some(5));
        assert!(!outcome.early_stop);
        assert!(!incomplete::marker_path(job.output()).exists());
    }

    #[tokio::test]
    async fn test_test_mode_limits_frames_and_reports_progress() {
        use std::sync::Mutex;

        let fx = Fixture::new(FakeTools {
            frames: 10,
            ..Default::default()
        });
        let config = Config {
            test_mode: true,
            test_frames: 4,
            formats: OutputFormats::only(CodecProfile::Ffv1_10Bit422),
            ..Default::default()
        };
        let job = fx.job("clip.mkv", config);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let runner = fx.runner.clone().with_progress(Arc::new(move |s: &crate::progress::ProgressSnapshot| {
            sink.lock().unwrap().push(s.frames_processed);
        }));

        let outcome = runner.run(&job, &CancellationToken::new()).await.unwrap();
        assert_eq!(outcome.frames_encoded, Some(4));
        assert_eq!(outcome.output_size, 4 * FRAME_BYTES);
        assert_eq!(seen.lock().unwrap().last(), Some(&4));
    }

    #[tokio::test]
    async fn test_source_failure_reaps_encoder() {
        let fx = Fixture::new(FakeTools {
            source: SourceMode::FailAfterFrames(3),
            ..Default::default()
        });
        let job = fx.job("clip.mov", Config::default());

        let err = fx.runner.run(&job, &CancellationToken::new()).await.unwrap_err();
        match err {
            PipelineError::Stage {
                stage,
                exit_code,
                partial_bytes_relayed,
                ref detail,
            } => {
                assert_eq!(stage, Stage::FrameSource);
                assert_eq!(exit_code, Some(3));
                assert_eq!(partial_bytes_relayed, 3 * FRAME_BYTES);
                assert!(detail.contains("frame request failed"));
            }
            other => panic!("unexpected error: {}", other),
        }
        assert!(!pid_alive(&pid_file(&job)));
        // Partial output kept and flagged
        assert!(job.output().exists());
        assert!(incomplete::marker_path(job.output()).exists());
    }

    #[tokio::test]
    async fn test_corrupt_input_fails_at_frame_source() {
        let fx = Fixture::new(FakeTools::default());
        let job = fx.job("corrupt.mov", Config::default());

        let err = fx.runner.run(&job, &CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.stage(), Some(Stage::FrameSource));
        assert!(err.to_string().contains("corrupt input"));
    }

    #[tokio::test]
    async fn test_encoder_failure() {
        let fx = Fixture::new(FakeTools {
            encoder: EncoderMode::ExitCode(2),
            ..Default::default()
        });
        let job = fx.job("clip.mov", Config::default());

        let err = fx.runner.run(&job, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Stage {
                stage: Stage::Encoder,
                exit_code: Some(2),
                ..
            }
        ));
        assert!(err.to_string().contains("Conversion failed!"));
    }

    #[tokio::test]
    async fn test_missing_output_is_a_failure() {
        let fx = Fixture::new(FakeTools {
            encoder: EncoderMode::NoOutput,
            ..Default::default()
        });
        let job = fx.job("clip.mov", Config::default());

        let err = fx.runner.run(&job, &CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.stage(), Some(Stage::Output));
    }

    #[tokio::test]
    async fn test_cancellation_terminates_both_processes() {
        let fx = Fixture::new(FakeTools {
            source: SourceMode::Hang,
            ..Default::default()
        });
        let job = fx.job("clip.mov", Config::default());

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let err = fx.runner.run(&job, &cancel).await.unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(err.is_cancellation());
        assert!(!pid_alive(&pid_file(&job)));
    }

    #[tokio::test]
    async fn test_timeout_uses_the_same_termination() {
        let fx = Fixture::new(FakeTools {
            source: SourceMode::Hang,
            ..Default::default()
        });
        let config = Config {
            job_timeout_secs: Some(1),
            ..Default::default()
        };
        let job = fx.job("clip.mov", config);

        let err = fx.runner.run(&job, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Cancelled {
                reason: CancelReason::TimedOut(1),
                ..
            }
        ));
        assert!(!err.is_cancellation());
    }

    #[tokio::test]
    async fn test_cancellation_while_counting_frames() {
        let fx = Fixture::new(FakeTools {
            info_hangs: true,
            ..Default::default()
        });
        let job = fx.job("clip.mov", Config::default());

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let err = fx.runner.run(&job, &cancel).await.unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(matches!(
            err,
            PipelineError::Cancelled {
                reason: CancelReason::Requested,
                partial_bytes_relayed: 0
            }
        ));
        assert!(!job.output().exists());
    }

    #[tokio::test]
    async fn test_timeout_covers_frame_counting() {
        let fx = Fixture::new(FakeTools {
            info_hangs: true,
            ..Default::default()
        });
        let config = Config {
            job_timeout_secs: Some(1),
            ..Default::default()
        };
        let job = fx.job("clip.mov", config);

        let started = Instant::now();
        let err = fx.runner.run(&job, &CancellationToken::new()).await.unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(err.to_string().contains("timed out after 1s"));
    }

    #[tokio::test]
    async fn test_launch_failures() {
        let fx = Fixture::new(FakeTools::default());
        let job = fx.job("clip.mov", Config::default());

        let no_encoder = PipelineRunner::new(Toolchain {
            frame_source: fx.runner.toolchain.frame_source.clone(),
            encoder: fx.dir.path().join("missing-ffmpeg"),
        });
        let err = no_encoder.run(&job, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, PipelineError::Launch { stage: Stage::Encoder, .. }));

        let no_source = PipelineRunner::new(Toolchain {
            frame_source: fx.dir.path().join("missing-vspipe"),
            encoder: fx.runner.toolchain.encoder.clone(),
        });
        let err = no_source.run(&job, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, PipelineError::Launch { stage: Stage::FrameSource, .. }));
    }

    #[test]
    fn test_early_stop_whitelist() {
        let exit = |code: i32| ExitStatus::from_raw(code << 8);
        let sigpipe = ExitStatus::from_raw(13);
        let test_mode = Config {
            test_mode: true,
            test_frames: 10,
            ..Default::default()
        };

        assert!(accepts_early_stop(&test_mode, &exit(1), true, true));
        assert!(accepts_early_stop(&test_mode, &exit(141), true, true));
        assert!(accepts_early_stop(&test_mode, &sigpipe, true, true));
        assert!(!accepts_early_stop(&test_mode, &exit(2), true, true));
        // The encoder must have stopped reading and succeeded
        assert!(!accepts_early_stop(&test_mode, &exit(1), false, true));
        assert!(!accepts_early_stop(&test_mode, &exit(1), true, false));
        // Never outside test mode
        assert!(!accepts_early_stop(&Config::default(), &exit(1), true, true));
    }
}
