//! Frame-source (vspipe) invocation and the frame-count probe.

use crate::args;
use crate::filter_graph::FilterGraph;
use regex::Regex;
use std::io::Write as _;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::process::Command;
use tracing::debug;

const INFO_TIMEOUT: Duration = Duration::from_secs(60);

/// Write the serialized graph to a `.vpy` file living as long as the handle
pub fn write_script(graph: &FilterGraph) -> std::io::Result<NamedTempFile> {
    let mut script = tempfile::Builder::new()
        .prefix("dithery-")
        .suffix(".vpy")
        .tempfile()?;
    script.write_all(graph.to_script().as_bytes())?;
    script.flush()?;
    Ok(script)
}

/// Arguments rendering the script as a y4m stream on stdout
pub fn render_args(script: &Path) -> Vec<String> {
    args!["-c", "y4m", &*script.to_string_lossy(), "-"]
}

/// Ask the frame source how many frames the script produces.
/// `None` when the probe fails or its output cannot be read.
pub async fn probe_frame_count(frame_source: &Path, script: &Path) -> Option<u64> {
    let child = Command::new(frame_source)
        .arg("--info")
        .arg(script)
        .arg("-")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output();

    let output = match tokio::time::timeout(INFO_TIMEOUT, child).await {
        Ok(Ok(output)) if output.status.success() => output,
        Ok(Ok(output)) => {
            debug!("Frame count probe exited with {}", output.status);
            return None;
        }
        Ok(Err(e)) => {
            debug!("Frame count probe could not run: {}", e);
            return None;
        }
        Err(_) => {
            debug!("Frame count probe timed out");
            return None;
        }
    };

    parse_frame_count(&String::from_utf8_lossy(&output.stdout))
}

pub fn parse_frame_count(info: &str) -> Option<u64> {
    let re = Regex::new(r"(?m)^Frames:\s*(\d+)").ok()?;
    re.captures(info)?.get(1)?.as_str().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_args() {
        assert_eq!(
            render_args(Path::new("/tmp/job.vpy")),
            vec!["-c", "y4m", "/tmp/job.vpy", "-"]
        );
    }

    #[test]
    fn test_parse_frame_count() {
        let info = "Width: 1920\nHeight: 1080\nFrames: 1440\nFPS: 24000/1001 (23.976 fps)\n";
        assert_eq!(parse_frame_count(info), Some(1440));
        assert_eq!(parse_frame_count("Width: 1920\n"), None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_probe_honours_trim() {
        use crate::config::Config;
        use crate::filter_graph::FilterGraphBuilder;
        use crate::test_fixtures::FakeTools;

        let dir = tempfile::TempDir::new().unwrap();
        let (vspipe, _) = FakeTools {
            frames: 10,
            ..Default::default()
        }
        .install(dir.path());

        let config = Config {
            test_mode: true,
            test_frames: 4,
            ..Default::default()
        };
        let graph = FilterGraphBuilder::build(&config, Path::new("in.mkv")).unwrap();
        let script = write_script(&graph).unwrap();
        assert_eq!(probe_frame_count(&vspipe, script.path()).await, Some(4));

        assert_eq!(probe_frame_count(&dir.path().join("missing"), script.path()).await, None);
    }
}
