//! Fake frame-source and encoder executables for exercising the real
//! subprocess machinery in tests.
//!
//! The fake frame source emits one 9-byte `FRAMEnnnn` record per frame and
//! honours the `clip = clip[:N]` trim line of the generated script. The fake
//! encoder copies stdin into the output file and reports the frame count on
//! stderr in the encoder's stats format.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Bytes per fake frame
pub const FRAME_BYTES: u64 = 9;

#[derive(Debug, Clone)]
pub enum SourceMode {
    Stream,
    /// Emit every frame, then exit with the code
    FailAfterFrames(i32),
    /// Never produce anything
    Hang,
}

#[derive(Debug, Clone)]
pub enum EncoderMode {
    Normal,
    ExitCode(i32),
    /// Consume the stream but never create the output file
    NoOutput,
}

pub struct FakeTools {
    pub frames: u32,
    pub missing_plugins: Vec<&'static str>,
    pub source: SourceMode,
    pub encoder: EncoderMode,
    /// `--info` never answers
    pub info_hangs: bool,
}

impl Default for FakeTools {
    fn default() -> Self {
        Self {
            frames: 3,
            missing_plugins: Vec::new(),
            source: SourceMode::Stream,
            encoder: EncoderMode::Normal,
            info_hangs: false,
        }
    }
}

impl FakeTools {
    /// Write both executables into `dir`, returning (frame source, encoder)
    pub fn install(&self, dir: &Path) -> (PathBuf, PathBuf) {
        let source = dir.join("fake-vspipe");
        let encoder = dir.join("fake-ffmpeg");
        write_executable(&source, &self.source_script());
        write_executable(&encoder, &self.encoder_script());
        (source, encoder)
    }

    fn source_script(&self) -> String {
        let plugin_checks: String = self
            .missing_plugins
            .iter()
            .map(|p| {
                format!(
                    "    if grep -q \"hasattr(core, '{p}')\" \"$2\"; then echo \"Python exception: plugin namespace '{p}' is not loaded\" >&2; exit 1; fi\n",
                    p = p
                )
            })
            .collect();

        let body = match self.source {
            SourceMode::Stream => "emit\nexit 0\n".to_string(),
            SourceMode::FailAfterFrames(code) => format!("emit\necho 'Error: frame request failed' >&2\nexit {}\n", code),
            SourceMode::Hang => "exec sleep 30\n".to_string(),
        };

        format!(
            r#"#!/bin/sh
frames={frames}
count() {{
    limit=$(sed -n 's/^clip = clip\[:\([0-9]*\)\]$/\1/p' "$1")
    if [ -n "$limit" ] && [ "$limit" -lt "$frames" ]; then frames=$limit; fi
}}
emit() {{
    i=0
    while [ $i -lt $frames ]; do printf 'FRAME%04d' $i; i=$((i+1)); done
}}
case "$1" in
  --version)
    echo "VapourSynth Video Processing Library"
    echo "Core R65"
    exit 0
    ;;
  --info)
{plugin_checks}{info_hang}    count "$2"
    echo "Width: 64"
    echo "Frames: $frames"
    exit 0
    ;;
esac
script="$3"
if grep -q corrupt "$script"; then
    echo "Failed to evaluate the script: corrupt input" >&2
    exit 1
fi
count "$script"
{body}"#,
            frames = self.frames,
            plugin_checks = plugin_checks,
            info_hang = if self.info_hangs { "    exec sleep 30\n" } else { "" },
            body = body
        )
    }

    fn encoder_script(&self) -> String {
        let tail = match self.encoder {
            EncoderMode::Normal => "cat > \"$out\"\nreport\nexit 0\n".to_string(),
            EncoderMode::ExitCode(code) => format!("cat > \"$out\"\nreport\necho 'Conversion failed!' >&2\nexit {}\n", code),
            EncoderMode::NoOutput => "cat > /dev/null\nexit 0\n".to_string(),
        };

        format!(
            r#"#!/bin/sh
if [ "$1" = "-version" ]; then
    echo "ffmpeg version 6.1.1 Copyright (c) 2000-2023 the FFmpeg developers"
    exit 0
fi
for out in "$@"; do :; done
echo $$ > "$out.pid"
report() {{
    size=$(wc -c < "$out")
    frames=$((size / {frame_bytes}))
    printf 'frame=    0 fps=0.0 q=0.0 size=       0kB time=00:00:00.00 bitrate=N/A speed=N/A\r' >&2
    printf 'Input #0, yuv4mpegpipe, from pipe:0\n' >&2
    printf 'frame=%5d fps= 25 q=-0.0 Lsize=       1kB time=00:00:01.00 bitrate=N/A speed=1.0x\n' $frames >&2
}}
{tail}"#,
            frame_bytes = FRAME_BYTES,
            tail = tail
        )
    }
}

fn write_executable(path: &Path, content: &str) {
    std::fs::write(path, content).unwrap();
    let mut perms = std::fs::metadata(path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(path, perms).unwrap();
}

/// Whether the process with the pid recorded in `pid_file` is still alive
pub fn pid_alive(pid_file: &Path) -> bool {
    let pid = std::fs::read_to_string(pid_file).unwrap();
    std::process::Command::new("kill")
        .args(["-0", pid.trim()])
        .stderr(std::process::Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}
