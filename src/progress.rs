//! # Progress Monitor Module
//!
//! Questo modulo legge lo stream di stato dell'encoder e ne ricava
//! snapshot di avanzamento.
//!
//! ## Responsabilità:
//! - Suddivide lo stream in righe (l'encoder separa gli aggiornamenti con `\r`)
//! - Estrae contatore dei frame e token `time=` dalle righe di stato
//! - Ignora in silenzio le righe malformate, conservandone la coda per la
//!   diagnostica in caso di errore
//! - Stima il tempo rimanente dalla media mobile degli ultimi campioni di fps
//!
//! Gira come task indipendente: non tocca mai lo stream dei frame.
//!
//! ## Formato atteso:
//! ```text
//! frame=  240 fps= 23 q=-0.0 size=  102400kB time=00:00:10.01 bitrate=N/A speed=0.96x
//! ```
//!
//! ## Esempio:
//! ```rust
//! let monitor = ProgressMonitor::new(Some(total_frames));
//! let mut snapshots = Box::pin(monitor.snapshots(stderr));
//! while let Some(snapshot) = snapshots.next().await {
//!     println!("{}", snapshot.format_line());
//! }
//! ```

use futures::Stream;
use regex::Regex;
use std::collections::VecDeque;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

/// Frame-rate samples averaged for the remaining-time estimate
const RATE_WINDOW: usize = 8;
/// Non-progress lines kept for error reports
const DIAGNOSTIC_TAIL: usize = 20;

/// Receives every snapshot of a running job
pub type ProgressCallback = Arc<dyn Fn(&ProgressSnapshot) + Send + Sync>;

/// Point-in-time view of a running job
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSnapshot {
    pub frames_processed: u64,
    pub total_frames: Option<u64>,
    /// Wall-clock time since the monitor started
    pub elapsed: Duration,
    /// Position in the output reported by the encoder
    pub media_time: Option<Duration>,
    pub eta: Option<Duration>,
}

impl ProgressSnapshot {
    pub fn percent(&self) -> Option<f64> {
        match self.total_frames {
            Some(total) if total > 0 => Some((self.frames_processed as f64 / total as f64 * 100.0).min(100.0)),
            _ => None,
        }
    }

    pub fn format_line(&self) -> String {
        let mut line = match self.total_frames {
            Some(total) => format!("frame {}/{}", self.frames_processed, total),
            None => format!("frame {}", self.frames_processed),
        };
        if let Some(percent) = self.percent() {
            line.push_str(&format!(" ({:.1}%)", percent));
        }
        if let Some(eta) = self.eta {
            line.push_str(&format!(" eta {}s", eta.as_secs()));
        }
        line
    }
}

/// One recognised encoder status line
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatusLine {
    pub frame: u64,
    pub time: Option<Duration>,
}

/// Parse an encoder status line, `None` for anything else
pub fn parse_status_line(line: &str) -> Option<StatusLine> {
    static FRAME_RE: OnceLock<Option<Regex>> = OnceLock::new();
    static TIME_RE: OnceLock<Option<Regex>> = OnceLock::new();

    let frame_re = FRAME_RE
        .get_or_init(|| Regex::new(r"\bframe=\s*(\d+)").ok())
        .as_ref()?;
    let frame = frame_re.captures(line)?.get(1)?.as_str().parse().ok()?;

    let time = TIME_RE
        .get_or_init(|| Regex::new(r"\btime=\s*(-?\d+):(\d{2}):(\d{2}(?:\.\d+)?)").ok())
        .as_ref()
        .and_then(|re| re.captures(line))
        .and_then(|caps| parse_clock(&caps[1], &caps[2], &caps[3]));

    Some(StatusLine { frame, time })
}

fn parse_clock(hours: &str, minutes: &str, seconds: &str) -> Option<Duration> {
    let hours: u64 = hours.parse().ok()?;
    let minutes: u64 = minutes.parse().ok()?;
    let seconds: f64 = seconds.parse().ok()?;
    Some(Duration::from_secs(hours * 3600 + minutes * 60) + Duration::from_secs_f64(seconds))
}

/// Moving average over the most recent frame-rate samples
#[derive(Debug, Default)]
pub struct RateEstimator {
    last: Option<(Duration, u64)>,
    samples: VecDeque<f64>,
}

impl RateEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the frame counter observed at `elapsed`
    pub fn record(&mut self, elapsed: Duration, frames: u64) {
        if let Some((prev_elapsed, prev_frames)) = self.last {
            let dt = elapsed.saturating_sub(prev_elapsed).as_secs_f64();
            // Bursts of lines read in one go carry no timing information
            if dt < 0.001 {
                return;
            }
            let rate = frames.saturating_sub(prev_frames) as f64 / dt;
            if self.samples.len() == RATE_WINDOW {
                self.samples.pop_front();
            }
            self.samples.push_back(rate);
        }
        self.last = Some((elapsed, frames));
    }

    /// Average frames per second, `None` until a sample exists
    pub fn rate(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        Some(self.samples.iter().sum::<f64>() / self.samples.len() as f64)
    }

    pub fn eta(&self, frames: u64, total: Option<u64>) -> Option<Duration> {
        let remaining = total?.saturating_sub(frames);
        let rate = self.rate()?;
        if rate <= 0.0 {
            return None;
        }
        Some(Duration::from_secs_f64(remaining as f64 / rate))
    }
}

/// Splits a byte stream on `\r` or `\n`, skipping blank lines
pub struct StatusLines<R> {
    reader: BufReader<R>,
    pending: Vec<u8>,
}

impl<R: AsyncRead + Unpin> StatusLines<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            pending: Vec::new(),
        }
    }

    pub async fn next_line(&mut self) -> std::io::Result<Option<String>> {
        loop {
            let buf = self.reader.fill_buf().await?;
            if buf.is_empty() {
                if self.pending.is_empty() {
                    return Ok(None);
                }
                let line = String::from_utf8_lossy(&std::mem::take(&mut self.pending)).into_owned();
                return Ok(Some(line));
            }

            match buf.iter().position(|&b| b == b'\r' || b == b'\n') {
                Some(pos) => {
                    self.pending.extend_from_slice(&buf[..pos]);
                    self.reader.consume(pos + 1);
                    let line = String::from_utf8_lossy(&std::mem::take(&mut self.pending)).into_owned();
                    if !line.trim().is_empty() {
                        return Ok(Some(line));
                    }
                }
                None => {
                    let len = buf.len();
                    self.pending.extend_from_slice(buf);
                    self.reader.consume(len);
                }
            }
        }
    }
}

/// What the monitor saw once the status stream closed
#[derive(Debug, Default, Clone)]
pub struct MonitorReport {
    pub last: Option<ProgressSnapshot>,
    pub snapshots: usize,
    /// Trailing lines that were not progress updates
    pub diagnostics: Vec<String>,
}

impl MonitorReport {
    pub fn final_frame(&self) -> Option<u64> {
        self.last.as_ref().map(|s| s.frames_processed)
    }

    pub fn diagnostic_tail(&self) -> String {
        self.diagnostics.join(" | ")
    }
}

/// Turns encoder status lines into progress snapshots
pub struct ProgressMonitor {
    total_frames: Option<u64>,
    started: Instant,
    estimator: RateEstimator,
    frames: u64,
    report: MonitorReport,
}

impl ProgressMonitor {
    pub fn new(total_frames: Option<u64>) -> Self {
        Self {
            total_frames,
            started: Instant::now(),
            estimator: RateEstimator::new(),
            frames: 0,
            report: MonitorReport::default(),
        }
    }

    /// Feed one line, producing a snapshot when it was a progress update
    pub fn observe(&mut self, line: &str) -> Option<ProgressSnapshot> {
        let Some(status) = parse_status_line(line) else {
            if self.report.diagnostics.len() == DIAGNOSTIC_TAIL {
                self.report.diagnostics.remove(0);
            }
            self.report.diagnostics.push(line.trim().to_string());
            return None;
        };

        // Counters never go backwards, even if the encoder restates an older value
        self.frames = self.frames.max(status.frame);
        let elapsed = self.started.elapsed();
        self.estimator.record(elapsed, self.frames);

        let snapshot = ProgressSnapshot {
            frames_processed: self.frames,
            total_frames: self.total_frames,
            elapsed,
            media_time: status.time,
            eta: self.estimator.eta(self.frames, self.total_frames),
        };
        self.report.snapshots += 1;
        self.report.last = Some(snapshot.clone());
        Some(snapshot)
    }

    /// Lazy sequence of snapshots, ending when the stream closes
    pub fn snapshots<R>(self, reader: R) -> impl Stream<Item = ProgressSnapshot>
    where
        R: AsyncRead + Unpin,
    {
        futures::stream::unfold((self, StatusLines::new(reader)), |(mut monitor, mut lines)| async move {
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if let Some(snapshot) = monitor.observe(&line) {
                            return Some((snapshot, (monitor, lines)));
                        }
                    }
                    Ok(None) | Err(_) => return None,
                }
            }
        })
    }

    /// Drain the stream to its end, handing each snapshot to `callback`
    pub async fn run<R>(mut self, reader: R, callback: Option<ProgressCallback>) -> MonitorReport
    where
        R: AsyncRead + Unpin,
    {
        let mut lines = StatusLines::new(reader);
        while let Ok(Some(line)) = lines.next_line().await {
            if let Some(snapshot) = self.observe(&line) {
                if let Some(ref callback) = callback {
                    callback(&snapshot);
                }
            }
        }
        self.report
    }
}
