//! # Filter Graph Module
//!
//! Traduce una `Config` in una descrizione dichiarativa del filter graph
//! consumata dal frame source (VapourSynth).
//!
//! ## Responsabilità:
//! - Costruisce la sequenza ordinata di stage: decode, trim (test mode),
//!   conversione formato, debanding, dithering
//! - Valida i vincoli di configurazione (forza del debanding, profilo unico)
//! - Sceglie la variante GPU (vs-placebo) o CPU (neo_f3kdb) del debanding
//! - Serializza il graph in forma di script `.vpy`
//!
//! Funzione pura: nessun I/O, nessun sottoprocesso.
//!
//! ## Pipeline dichiarata:
//! ```text
//! LWLibavSource -> [trim N] -> resize a YUV4xxP16 -> [deband] -> [fmtc dither a 10/12 bit]
//! ```

use crate::config::{BitDepth, ChromaFormat, CodecProfile, Config, DebandStrength, DitherAlgorithm};
use crate::error::ConfigurationError;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

/// Bit depth the graph works at between decode and the final dither
pub const WORKING_BIT_DEPTH: u8 = 16;

/// Plugin namespaces used by the generated scripts
pub const SOURCE_PLUGIN: &str = "lsmas";
pub const DITHER_PLUGIN: &str = "fmtc";
pub const GPU_DEBAND_PLUGIN: &str = "placebo";
pub const CPU_DEBAND_PLUGIN: &str = "neo_f3kdb";

/// Which plugin implements the deband stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebandBackend {
    Gpu,
    Cpu,
}

impl DebandBackend {
    pub fn plugin(&self) -> &'static str {
        match self {
            DebandBackend::Gpu => GPU_DEBAND_PLUGIN,
            DebandBackend::Cpu => CPU_DEBAND_PLUGIN,
        }
    }
}

/// One declared processing stage
#[derive(Debug, Clone, PartialEq)]
pub enum FilterStage {
    SourceDecode { path: PathBuf },
    Trim { frames: u32 },
    FormatConversion { chroma: ChromaFormat, bits: u8 },
    Deband { strength: DebandStrength, backend: DebandBackend },
    Dither { algorithm: DitherAlgorithm, bit_depth: BitDepth },
}

/// Ordered, immutable description of the filter graph for one job
#[derive(Debug, Clone, PartialEq)]
pub struct FilterGraph {
    stages: Vec<FilterStage>,
    profile: CodecProfile,
    frame_limit: Option<u32>,
}

impl FilterGraph {
    pub fn stages(&self) -> &[FilterStage] {
        &self.stages
    }

    pub fn profile(&self) -> CodecProfile {
        self.profile
    }

    pub fn output_bit_depth(&self) -> BitDepth {
        self.profile.bit_depth()
    }

    pub fn output_chroma_format(&self) -> ChromaFormat {
        self.profile.chroma_format()
    }

    /// Declared frame range, `None` means the whole input
    pub fn frame_limit(&self) -> Option<u32> {
        self.frame_limit
    }

    /// Plugin namespaces this graph needs loaded
    pub fn required_plugins(&self) -> Vec<&'static str> {
        let mut plugins = Vec::new();
        for stage in &self.stages {
            let plugin = match stage {
                FilterStage::SourceDecode { .. } => SOURCE_PLUGIN,
                FilterStage::Deband { backend, .. } => backend.plugin(),
                FilterStage::Dither { .. } => DITHER_PLUGIN,
                FilterStage::Trim { .. } | FilterStage::FormatConversion { .. } => continue,
            };
            if !plugins.contains(&plugin) {
                plugins.push(plugin);
            }
        }
        plugins
    }

    /// Serialize the graph as a VapourSynth script
    pub fn to_script(&self) -> String {
        let mut script = String::new();
        script.push_str("# Generated by dithery-doo, do not edit\n");
        script.push_str("import vapoursynth as vs\n");
        script.push_str("core = vs.core\n\n");

        for stage in &self.stages {
            // Writing into a String cannot fail
            let _ = match stage {
                FilterStage::SourceDecode { path } => writeln!(
                    script,
                    "clip = core.{}.LWLibavSource(source={})",
                    SOURCE_PLUGIN,
                    python_string(&path.to_string_lossy())
                ),
                FilterStage::Trim { frames } => writeln!(script, "clip = clip[:{}]", frames),
                FilterStage::FormatConversion { chroma, bits } => writeln!(
                    script,
                    "clip = core.resize.Spline36(clip, format=vs.{})",
                    vs_format(*chroma, *bits)
                ),
                FilterStage::Deband { strength, backend } => {
                    writeln!(script, "{}", deband_call(*strength, *backend))
                }
                FilterStage::Dither { algorithm, bit_depth } => writeln!(
                    script,
                    "clip = core.{}.bitdepth(clip, bits={}, dmode={})",
                    DITHER_PLUGIN,
                    bit_depth.bits(),
                    fmtc_dmode(*algorithm)
                ),
            };
        }

        script.push_str("\nclip.set_output()\n");
        script
    }
}

/// Builds filter graphs from a configuration
pub struct FilterGraphBuilder;

impl FilterGraphBuilder {
    /// Build the graph for one input file
    pub fn build(config: &Config, input: &Path) -> Result<FilterGraph, ConfigurationError> {
        let profile = config.codec_profile()?;
        let algorithm: DitherAlgorithm = config.dither_algorithm.parse()?;
        let deband = Self::deband_stage(config)?;

        let mut stages = vec![FilterStage::SourceDecode {
            path: input.to_path_buf(),
        }];

        let frame_limit = config.frame_limit();
        if let Some(frames) = frame_limit {
            stages.push(FilterStage::Trim { frames });
        }

        stages.push(FilterStage::FormatConversion {
            chroma: profile.chroma_format(),
            bits: WORKING_BIT_DEPTH,
        });

        if let Some(deband) = deband {
            stages.push(deband);
        }

        // 16-bit output keeps the working precision, nothing to dither away
        if profile.bit_depth().bits() < WORKING_BIT_DEPTH {
            stages.push(FilterStage::Dither {
                algorithm,
                bit_depth: profile.bit_depth(),
            });
        }

        Ok(FilterGraph {
            stages,
            profile,
            frame_limit,
        })
    }

    /// Plugins the configuration needs, independent of any input file
    pub fn required_plugins(config: &Config) -> Result<Vec<&'static str>, ConfigurationError> {
        Ok(Self::build(config, Path::new(""))?.required_plugins())
    }

    fn deband_stage(config: &Config) -> Result<Option<FilterStage>, ConfigurationError> {
        if !config.enable_debanding {
            return Ok(None);
        }

        let strength: DebandStrength = config.deband_strength.parse()?;
        let backend = if config.use_gpu {
            DebandBackend::Gpu
        } else {
            DebandBackend::Cpu
        };

        Ok(Some(FilterStage::Deband { strength, backend }))
    }
}

/// Script that only loads when the given plugin namespace is available
pub fn plugin_probe_script(namespace: &str) -> String {
    format!(
        "import vapoursynth as vs\n\
         core = vs.core\n\
         if not hasattr(core, {ns}):\n    \
             raise RuntimeError('plugin namespace ' + {ns} + ' is not loaded')\n\
         core.std.BlankClip(length=1).set_output()\n",
        ns = python_string(namespace)
    )
}

fn vs_format(chroma: ChromaFormat, bits: u8) -> String {
    match chroma {
        ChromaFormat::Yuv422 => format!("YUV422P{}", bits),
        ChromaFormat::Yuv444 => format!("YUV444P{}", bits),
    }
}

fn fmtc_dmode(algorithm: DitherAlgorithm) -> u8 {
    match algorithm {
        DitherAlgorithm::Sierra => 3,
        DitherAlgorithm::Stucki => 4,
        DitherAlgorithm::FloydSteinberg => 6,
    }
}

fn deband_call(strength: DebandStrength, backend: DebandBackend) -> String {
    match backend {
        DebandBackend::Gpu => {
            let (iterations, threshold, radius, grain) = match strength {
                DebandStrength::Conservative => (1, 3.0, 12.0, 4.0),
                DebandStrength::Balanced => (2, 4.0, 16.0, 6.0),
                DebandStrength::Aggressive => (3, 6.0, 20.0, 8.0),
                DebandStrength::Maximum => (4, 8.0, 24.0, 10.0),
            };
            format!(
                "clip = core.{}.Deband(clip, planes=7, iterations={}, threshold={:.1}, radius={:.1}, grain={:.1})",
                GPU_DEBAND_PLUGIN, iterations, threshold, radius, grain
            )
        }
        DebandBackend::Cpu => {
            let (range, y, c, grain_y, grain_c) = match strength {
                DebandStrength::Conservative => (12, 32, 24, 16, 8),
                DebandStrength::Balanced => (15, 48, 40, 24, 16),
                DebandStrength::Aggressive => (18, 64, 48, 32, 24),
                DebandStrength::Maximum => (24, 80, 64, 48, 32),
            };
            format!(
                "clip = core.{}.Deband(clip, range={}, y={}, cb={}, cr={}, grainy={}, grainc={}, output_depth={})",
                CPU_DEBAND_PLUGIN, range, y, c, c, grain_y, grain_c, WORKING_BIT_DEPTH
            )
        }
    }
}

/// Single-quoted Python literal
fn python_string(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('\'', "\\'");
    format!("'{}'", escaped)
}
