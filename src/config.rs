//! # Configuration Management Module
//!
//! Questo modulo gestisce tutta la configurazione della pipeline.
//!
//! ## Responsabilità:
//! - Definisce la struct `Config` con tutte le opzioni riconosciute
//! - Fornisce validazione dei parametri prima di avviare qualsiasi processo
//! - Supporta caricamento/salvataggio configurazione da/verso file JSON
//! - Fornisce valori di default sensati per tutti i parametri
//!
//! ## Parametri principali:
//! - `formats`: i quattro profili di output, esattamente uno deve essere attivo
//! - `bit_depth` / `chroma_format`: opzionali, devono coincidere col profilo
//! - `dither_algorithm`: floyd_steinberg, sierra, stucki
//! - `enable_debanding` / `deband_strength`: conservative, balanced, aggressive, maximum
//! - `use_gpu`: debanding tramite plugin GPU invece che CPU
//! - `test_mode` / `test_frames`: limita l'elaborazione ai primi N frame
//! - `batch` / `recursive`: elaborazione di una directory (anche sottocartelle)
//!
//! Una volta validata, la `Config` non viene più modificata: il batch la
//! condivide in sola lettura con ogni job.
//!
//! ## Esempio:
//! ```rust
//! # use dithery_doo::Config;
//! let config = Config {
//!     use_gpu: false,
//!     deband_strength: "balanced".to_string(),
//!     ..Default::default()
//! };
//! config.validate()?;
//! # Ok::<(), anyhow::Error>(())
//! ```

use crate::error::ConfigurationError;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Output bit depth
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BitDepth {
    #[serde(rename = "10")]
    Ten,
    #[serde(rename = "12")]
    Twelve,
    #[serde(rename = "16")]
    Sixteen,
}

impl BitDepth {
    pub fn bits(&self) -> u8 {
        match self {
            BitDepth::Ten => 10,
            BitDepth::Twelve => 12,
            BitDepth::Sixteen => 16,
        }
    }
}

impl FromStr for BitDepth {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "10" => Ok(BitDepth::Ten),
            "12" => Ok(BitDepth::Twelve),
            "16" => Ok(BitDepth::Sixteen),
            other => Err(ConfigurationError::new(format!(
                "unsupported bit depth '{}' (expected 10, 12 or 16)",
                other
            ))),
        }
    }
}

impl fmt::Display for BitDepth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.bits())
    }
}

/// Output chroma subsampling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChromaFormat {
    #[serde(rename = "4:2:2")]
    Yuv422,
    #[serde(rename = "4:4:4")]
    Yuv444,
}

impl FromStr for ChromaFormat {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "4:2:2" | "422" => Ok(ChromaFormat::Yuv422),
            "4:4:4" | "444" => Ok(ChromaFormat::Yuv444),
            other => Err(ConfigurationError::new(format!(
                "unsupported chroma format '{}' (expected 4:2:2 or 4:4:4)",
                other
            ))),
        }
    }
}

impl fmt::Display for ChromaFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChromaFormat::Yuv422 => f.write_str("4:2:2"),
            ChromaFormat::Yuv444 => f.write_str("4:4:4"),
        }
    }
}

/// Error-diffusion algorithm used when reducing bit depth
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DitherAlgorithm {
    FloydSteinberg,
    Sierra,
    Stucki,
}

impl FromStr for DitherAlgorithm {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "floyd_steinberg" => Ok(DitherAlgorithm::FloydSteinberg),
            "sierra" => Ok(DitherAlgorithm::Sierra),
            "stucki" => Ok(DitherAlgorithm::Stucki),
            other => Err(ConfigurationError::new(format!(
                "unknown dithering algorithm '{}' (expected floyd_steinberg, sierra or stucki)",
                other
            ))),
        }
    }
}

impl fmt::Display for DitherAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DitherAlgorithm::FloydSteinberg => "floyd_steinberg",
            DitherAlgorithm::Sierra => "sierra",
            DitherAlgorithm::Stucki => "stucki",
        };
        f.write_str(name)
    }
}

/// Debanding strength presets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DebandStrength {
    Conservative,
    Balanced,
    Aggressive,
    Maximum,
}

impl DebandStrength {
    pub const ALL: [DebandStrength; 4] = [
        DebandStrength::Conservative,
        DebandStrength::Balanced,
        DebandStrength::Aggressive,
        DebandStrength::Maximum,
    ];
}

impl FromStr for DebandStrength {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "conservative" => Ok(DebandStrength::Conservative),
            "balanced" => Ok(DebandStrength::Balanced),
            "aggressive" => Ok(DebandStrength::Aggressive),
            "maximum" => Ok(DebandStrength::Maximum),
            other => Err(ConfigurationError::new(format!(
                "unknown debanding strength '{}' (expected conservative, balanced, aggressive or maximum)",
                other
            ))),
        }
    }
}

impl fmt::Display for DebandStrength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DebandStrength::Conservative => "conservative",
            DebandStrength::Balanced => "balanced",
            DebandStrength::Aggressive => "aggressive",
            DebandStrength::Maximum => "maximum",
        };
        f.write_str(name)
    }
}

/// Output codec profiles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodecProfile {
    #[serde(rename = "prores_422_hq_10bit")]
    ProRes422Hq10Bit,
    #[serde(rename = "prores_444_16bit")]
    ProRes444_16Bit,
    #[serde(rename = "ffv1_10bit_422")]
    Ffv1_10Bit422,
    #[serde(rename = "ffv1_12bit_444")]
    Ffv1_12Bit444,
}

impl CodecProfile {
    pub const ALL: [CodecProfile; 4] = [
        CodecProfile::ProRes422Hq10Bit,
        CodecProfile::ProRes444_16Bit,
        CodecProfile::Ffv1_10Bit422,
        CodecProfile::Ffv1_12Bit444,
    ];

    /// Name used in output file names and logs
    pub fn name(&self) -> &'static str {
        match self {
            CodecProfile::ProRes422Hq10Bit => "prores_422_hq_10bit",
            CodecProfile::ProRes444_16Bit => "prores_444_16bit",
            CodecProfile::Ffv1_10Bit422 => "ffv1_10bit_422",
            CodecProfile::Ffv1_12Bit444 => "ffv1_12bit_444",
        }
    }

    pub fn bit_depth(&self) -> BitDepth {
        match self {
            CodecProfile::ProRes422Hq10Bit | CodecProfile::Ffv1_10Bit422 => BitDepth::Ten,
            CodecProfile::Ffv1_12Bit444 => BitDepth::Twelve,
            CodecProfile::ProRes444_16Bit => BitDepth::Sixteen,
        }
    }

    pub fn chroma_format(&self) -> ChromaFormat {
        match self {
            CodecProfile::ProRes422Hq10Bit | CodecProfile::Ffv1_10Bit422 => ChromaFormat::Yuv422,
            CodecProfile::ProRes444_16Bit | CodecProfile::Ffv1_12Bit444 => ChromaFormat::Yuv444,
        }
    }

    /// Container extension of the encoded file
    pub fn extension(&self) -> &'static str {
        match self {
            CodecProfile::ProRes422Hq10Bit | CodecProfile::ProRes444_16Bit => "mov",
            CodecProfile::Ffv1_10Bit422 | CodecProfile::Ffv1_12Bit444 => "mkv",
        }
    }
}

impl fmt::Display for CodecProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Enable flags for the output formats. Exactly one must be set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputFormats {
    pub prores_422_hq_10bit: bool,
    pub prores_444_16bit: bool,
    pub ffv1_10bit_422: bool,
    pub ffv1_12bit_444: bool,
}

impl OutputFormats {
    pub fn only(profile: CodecProfile) -> Self {
        let mut formats = Self::default();
        match profile {
            CodecProfile::ProRes422Hq10Bit => formats.prores_422_hq_10bit = true,
            CodecProfile::ProRes444_16Bit => formats.prores_444_16bit = true,
            CodecProfile::Ffv1_10Bit422 => formats.ffv1_10bit_422 = true,
            CodecProfile::Ffv1_12Bit444 => formats.ffv1_12bit_444 = true,
        }
        formats
    }

    pub fn enabled(&self) -> Vec<CodecProfile> {
        [
            (CodecProfile::ProRes422Hq10Bit, self.prores_422_hq_10bit),
            (CodecProfile::ProRes444_16Bit, self.prores_444_16bit),
            (CodecProfile::Ffv1_10Bit422, self.ffv1_10bit_422),
            (CodecProfile::Ffv1_12Bit444, self.ffv1_12bit_444),
        ]
        .into_iter()
        .filter(|(_, enabled)| *enabled)
        .map(|(profile, _)| profile)
        .collect()
    }

    /// The single active profile
    pub fn selected(&self) -> Result<CodecProfile, ConfigurationError> {
        match self.enabled().as_slice() {
            [profile] => Ok(*profile),
            [] => Err(ConfigurationError::new(
                "exactly one output format must be enabled, none is",
            )),
            many => Err(ConfigurationError::new(format!(
                "exactly one output format must be enabled, found {}: {}",
                many.len(),
                many.iter().map(|p| p.name()).collect::<Vec<_>>().join(", ")
            ))),
        }
    }
}

/// What the batch does after an external cancellation stopped a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelPolicy {
    /// Mark every job not yet started as skipped
    #[default]
    Stop,
    /// Move on to the next job
    Continue,
}

impl FromStr for CancelPolicy {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "stop" => Ok(CancelPolicy::Stop),
            "continue" => Ok(CancelPolicy::Continue),
            other => Err(ConfigurationError::new(format!(
                "unknown cancellation policy '{}' (expected stop or continue)",
                other
            ))),
        }
    }
}

/// Default exit codes of the frame source accepted as a clean early stop in test mode
pub const DEFAULT_EARLY_STOP_EXIT_CODES: [i32; 2] = [1, 141];

/// Configuration for the transcoding pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Single input file, or the directory scanned in batch mode
    pub input_path: PathBuf,
    /// Base directory where timestamped run folders are created
    pub output_base: PathBuf,
    /// Process every supported file in `input_path`
    pub batch: bool,
    /// Include sub-directories when batch processing
    pub recursive: bool,
    /// Only process the first `test_frames` frames
    pub test_mode: bool,
    pub test_frames: u32,
    /// Output codec profiles, exactly one enabled
    pub formats: OutputFormats,
    /// Explicit output bit depth, must match the selected profile
    pub bit_depth: Option<BitDepth>,
    /// Explicit output chroma format, must match the selected profile
    pub chroma_format: Option<ChromaFormat>,
    /// Route debanding through the GPU plugin
    pub use_gpu: bool,
    /// floyd_steinberg, sierra or stucki
    pub dither_algorithm: String,
    pub enable_debanding: bool,
    /// conservative, balanced, aggressive or maximum
    pub deband_strength: String,
    /// Per-job wall clock limit in seconds
    pub job_timeout_secs: Option<u64>,
    /// Jobs run at the same time (1 = sequential)
    pub concurrency: usize,
    pub cancel_policy: CancelPolicy,
    /// Frame-source exit codes tolerated when the encoder stopped reading early in test mode
    pub early_stop_exit_codes: Vec<i32>,
    /// Frame-source executable (name on PATH or explicit path)
    pub frame_source_path: PathBuf,
    /// Encoder executable (name on PATH or explicit path)
    pub encoder_path: PathBuf,
    /// Output progress and status as JSON for programmatic use
    pub json_output: bool,
    /// DEBUG, INFO, WARNING or ERROR
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            input_path: PathBuf::new(),
            output_base: PathBuf::from("vapourized"),
            batch: false,
            recursive: false,
            test_mode: false,
            test_frames: 200,
            formats: OutputFormats::only(CodecProfile::ProRes422Hq10Bit),
            bit_depth: None,
            chroma_format: None,
            use_gpu: false,
            dither_algorithm: "floyd_steinberg".to_string(),
            enable_debanding: true,
            deband_strength: "balanced".to_string(),
            job_timeout_secs: None,
            concurrency: 1,
            cancel_policy: CancelPolicy::Stop,
            early_stop_exit_codes: DEFAULT_EARLY_STOP_EXIT_CODES.to_vec(),
            frame_source_path: PathBuf::from("vspipe"),
            encoder_path: PathBuf::from("ffmpeg"),
            json_output: false,
            log_level: "INFO".to_string(),
        }
    }
}

impl Config {
    /// Validate configuration parameters
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let profile = self.formats.selected()?;

        if let Some(depth) = self.bit_depth {
            if depth != profile.bit_depth() {
                return Err(ConfigurationError::new(format!(
                    "bit depth {} conflicts with output format {} ({}-bit)",
                    depth,
                    profile,
                    profile.bit_depth()
                )));
            }
        }

        if let Some(chroma) = self.chroma_format {
            if chroma != profile.chroma_format() {
                return Err(ConfigurationError::new(format!(
                    "chroma format {} conflicts with output format {} ({})",
                    chroma,
                    profile,
                    profile.chroma_format()
                )));
            }
        }

        self.dither_algorithm.parse::<DitherAlgorithm>()?;
        if self.enable_debanding {
            self.deband_strength.parse::<DebandStrength>()?;
        }

        if self.concurrency == 0 {
            return Err(ConfigurationError::new("concurrency must be greater than 0"));
        }

        if self.job_timeout_secs == Some(0) {
            return Err(ConfigurationError::new("job timeout must be greater than 0 seconds"));
        }

        parse_log_level(&self.log_level)?;

        Ok(())
    }

    /// The single active output codec profile
    pub fn codec_profile(&self) -> Result<CodecProfile, ConfigurationError> {
        self.formats.selected()
    }

    /// Frame limit in effect, `None` for a full-length run.
    /// A non-positive limit is ignored.
    pub fn frame_limit(&self) -> Option<u32> {
        if self.test_mode && self.test_frames > 0 {
            Some(self.test_frames)
        } else {
            None
        }
    }

    /// Load configuration from file
    pub async fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path).await?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to file
    pub async fn save_to_file(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }
}

/// Map a configured verbosity onto a tracing filter directive
pub fn parse_log_level(level: &str) -> Result<&'static str, ConfigurationError> {
    match level.trim().to_uppercase().as_str() {
        "TRACE" => Ok("trace"),
        "DEBUG" => Ok("debug"),
        "INFO" => Ok("info"),
        "WARNING" | "WARN" => Ok("warn"),
        "ERROR" => Ok("error"),
        other => Err(ConfigurationError::new(format!(
            "unknown log level '{}' (expected DEBUG, INFO, WARNING or ERROR)",
            other
        ))),
    }
}
