//! # Encoder Module
//!
//! Questo modulo costruisce l'invocazione dell'encoder (FFmpeg) per ogni
//! profilo di output supportato.
//!
//! ## Responsabilità:
//! - Tabella dei profili: codec, pixel format, parametri specifici
//! - Costruzione degli argomenti: lo stream di frame arriva da stdin
//!   (`yuv4mpegpipe`), audio e sottotitoli vengono copiati dal file originale
//! - Output di stato su stderr tramite `-stats`, letto dal progress monitor
//!
//! ## Profili:
//! - **prores_422_hq_10bit**: prores_ks profilo 3, yuv422p10le, `.mov`
//! - **prores_444_16bit**: prores_ks profilo 4, yuv444p16le, `.mov`
//! - **ffv1_10bit_422**: ffv1 level 3, yuv422p10le, `.mkv`
//! - **ffv1_12bit_444**: ffv1 level 3, yuv444p12le, `.mkv`
//!
//! ## Esempio:
//! ```rust
//! let args = EncoderSettings::for_profile(CodecProfile::Ffv1_10Bit422)
//!     .args(&input_path, &output_path);
//! ```

use crate::args;
use crate::config::CodecProfile;
use std::path::Path;

/// FFmpeg parameters of one output profile
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderSettings {
    pub codec: &'static str,
    pub pix_fmt: &'static str,
    /// `-profile:v` value (ProRes)
    pub profile: Option<&'static str>,
    /// `-level:v` value (FFV1)
    pub level: Option<&'static str>,
    pub extra_args: &'static [&'static str],
}

impl EncoderSettings {
    pub fn for_profile(profile: CodecProfile) -> Self {
        const PRORES_EXTRA: &[&str] = &["-vendor", "apl0"];
        const FFV1_EXTRA: &[&str] = &["-coder", "1", "-context", "1", "-g", "1"];

        match profile {
            CodecProfile::ProRes422Hq10Bit => Self {
                codec: "prores_ks",
                pix_fmt: "yuv422p10le",
                profile: Some("3"),
                level: None,
                extra_args: PRORES_EXTRA,
            },
            CodecProfile::ProRes444_16Bit => Self {
                codec: "prores_ks",
                pix_fmt: "yuv444p16le",
                profile: Some("4"),
                level: None,
                extra_args: PRORES_EXTRA,
            },
            CodecProfile::Ffv1_10Bit422 => Self {
                codec: "ffv1",
                pix_fmt: "yuv422p10le",
                profile: None,
                level: Some("3"),
                extra_args: FFV1_EXTRA,
            },
            CodecProfile::Ffv1_12Bit444 => Self {
                codec: "ffv1",
                pix_fmt: "yuv444p12le",
                profile: None,
                level: Some("3"),
                extra_args: FFV1_EXTRA,
            },
        }
    }

    /// Full argument list. The output path is always the last argument.
    pub fn args(&self, original_input: &Path, output: &Path) -> Vec<String> {
        let mut cmd = args![
            "-hide_banner",
            "-loglevel", "error",
            "-stats",
            "-y",
            "-f", "yuv4mpegpipe",
            "-i", "pipe:0",
        ];
        cmd.push("-i".to_string());
        cmd.push(original_input.to_string_lossy().to_string());
        cmd.extend(args!["-map", "0:v", "-map", "1:a?", "-map", "1:s?"]);
        cmd.extend(args!["-c:v", self.codec, "-pix_fmt", self.pix_fmt]);

        if let Some(profile) = self.profile {
            cmd.extend(args!["-profile:v", profile]);
        }
        if let Some(level) = self.level {
            cmd.extend(args!["-level:v", level]);
        }
        cmd.extend(self.extra_args.iter().map(|a| a.to_string()));

        cmd.extend(args!["-c:a", "copy", "-c:s", "copy"]);
        cmd.push(output.to_string_lossy().to_string());
        cmd
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn joined(profile: CodecProfile) -> String {
        EncoderSettings::for_profile(profile)
            .args(Path::new("/in/clip.mov"), Path::new("/out/clip.mkv"))
            .join(" ")
    }

    #[test]
    fn test_prores_hq_args() {
        let cmd = joined(CodecProfile::ProRes422Hq10Bit);
        assert!(cmd.contains("-f yuv4mpegpipe -i pipe:0 -i /in/clip.mov"));
        assert!(cmd.contains("-map 0:v -map 1:a? -map 1:s?"));
        assert!(cmd.contains("-c:v prores_ks -pix_fmt yuv422p10le -profile:v 3 -vendor apl0"));
        assert!(!cmd.contains("-level:v"));
    }

    #[test]
    fn test_ffv1_args() {
        let cmd = joined(CodecProfile::Ffv1_12Bit444);
        assert!(cmd.contains("-c:v ffv1 -pix_fmt yuv444p12le -level:v 3 -coder 1 -context 1 -g 1"));
        assert!(!cmd.contains("-profile:v"));
    }

    #[test]
    fn test_output_is_last_and_streams_copied() {
        for profile in CodecProfile::ALL {
            let args = EncoderSettings::for_profile(profile)
                .args(Path::new("in.mxf"), Path::new("out.mov"));
            assert_eq!(args.last().map(String::as_str), Some("out.mov"));
            assert!(args.windows(2).any(|w| w == ["-c:a", "copy"]));
            assert!(args.contains(&"-stats".to_string()));
        }
    }

    #[test]
    fn test_pixel_format_matches_profile_depth() {
        for profile in CodecProfile::ALL {
            let settings = EncoderSettings::for_profile(profile);
            let depth = profile.bit_depth().bits().to_string();
            assert!(settings.pix_fmt.contains(&format!("p{}le", depth)), "{}", settings.pix_fmt);
        }
    }
}
