//! # DitheryDoo - Main Entry Point
//!
//! Questo è il punto di ingresso principale dell'applicazione.
//!
//! ## Responsabilità:
//! - Parsing degli argomenti della command line con `clap`
//! - Unione di file di configurazione e opzioni CLI (la CLI vince)
//! - Validazione della configurazione prima di lanciare qualsiasi processo
//! - Creazione della directory della run e inizializzazione del logging
//! - Verifica delle dipendenze, poi avvio del batch
//!
//! ## Flusso di esecuzione:
//! 1. Parsa gli argomenti CLI e carica l'eventuale `--config`
//! 2. Valida la configurazione (errori fatali, nessun processo avviato)
//! 3. Crea `<output>/<timestamp>/` e il relativo `process.log`
//! 4. Verifica vspipe, ffmpeg e plugin: se manca qualcosa, esce con 1
//! 5. Esegue il batch, salva `summary.json` ed esce con 0 solo se tutto è riuscito
//!
//! ## Esempio di utilizzo:
//! ```bash
//! dithery-doo /footage --batch --recursive --ffv1-10bit-422 --deband-strength aggressive
//! dithery-doo clip.mov --test-mode --test-frames 48 --gpu
//! ```

use anyhow::{Context, Result};
use chrono::Local;
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

use dithery_doo::config::{BitDepth, CancelPolicy, ChromaFormat, OutputFormats};
use dithery_doo::json_output::JsonMessage;
use dithery_doo::logging::{init_logging, LOG_FILE_NAME};
use dithery_doo::{
    BatchCoordinator, CodecProfile, Config, ConfigurationError, DependencyVerifier, DitherError, PathResolver,
    SUMMARY_FILE_NAME,
};

#[derive(Parser)]
#[command(name = "dithery-doo")]
#[command(about = "Dither, deband and encode video to archival intermediates with VapourSynth and FFmpeg")]
struct Args {
    /// Input video file, or a directory with --batch
    input: Option<PathBuf>,

    /// JSON configuration file; command-line options override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Base directory for timestamped run folders
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Process every supported video in the input directory
    #[arg(short, long)]
    batch: bool,

    /// Include sub-directories in batch mode
    #[arg(short, long)]
    recursive: bool,

    /// Only process the first --test-frames frames of each input
    #[arg(long)]
    test_mode: bool,

    /// Frames processed in test mode
    #[arg(long)]
    test_frames: Option<u32>,

    /// Encode to ProRes 422 HQ, 10-bit 4:2:2 (.mov)
    #[arg(long)]
    prores_422_hq_10bit: bool,

    /// Encode to ProRes 4444, 16-bit 4:4:4 (.mov)
    #[arg(long)]
    prores_444_16bit: bool,

    /// Encode to FFV1, 10-bit 4:2:2 (.mkv)
    #[arg(long)]
    ffv1_10bit_422: bool,

    /// Encode to FFV1, 12-bit 4:4:4 (.mkv)
    #[arg(long)]
    ffv1_12bit_444: bool,

    /// Output bit depth (10, 12, 16); must match the output format
    #[arg(long)]
    bit_depth: Option<String>,

    /// Output chroma format (4:2:2, 4:4:4); must match the output format
    #[arg(long)]
    chroma_format: Option<String>,

    /// Deband on the GPU (vs-placebo) instead of the CPU (neo_f3kdb)
    #[arg(long)]
    gpu: bool,

    /// Dithering algorithm: floyd_steinberg, sierra, stucki
    #[arg(long)]
    dither: Option<String>,

    /// Disable debanding
    #[arg(long)]
    no_deband: bool,

    /// Debanding strength: conservative, balanced, aggressive, maximum
    #[arg(long)]
    deband_strength: Option<String>,

    /// Per-job time limit in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Jobs processed at the same time
    #[arg(short = 'j', long)]
    concurrency: Option<usize>,

    /// After Ctrl-C: stop the batch or continue with the next job
    #[arg(long)]
    on_cancel: Option<String>,

    /// Frame-source exit codes accepted as a clean early stop in test mode
    #[arg(long, value_delimiter = ',')]
    early_stop_codes: Option<Vec<i32>>,

    /// vspipe executable
    #[arg(long)]
    vspipe: Option<PathBuf>,

    /// ffmpeg executable
    #[arg(long)]
    ffmpeg: Option<PathBuf>,

    /// Output progress and results as JSON lines
    #[arg(long)]
    json: bool,

    /// Log level: DEBUG, INFO, WARNING, ERROR
    #[arg(short, long)]
    log_level: Option<String>,

    /// Write the effective configuration to this file and exit
    #[arg(long)]
    write_config: Option<PathBuf>,
}

impl Args {
    /// Overlay command-line options on a base configuration
    fn apply(self, mut config: Config) -> Result<(Config, Option<PathBuf>), DitherError> {
        if let Some(input) = self.input {
            config.input_path = input;
        }
        if let Some(output) = self.output {
            config.output_base = output;
        }
        config.batch |= self.batch;
        config.recursive |= self.recursive;
        config.test_mode |= self.test_mode;
        if let Some(frames) = self.test_frames {
            config.test_frames = frames;
        }

        let selected = OutputFormats {
            prores_422_hq_10bit: self.prores_422_hq_10bit,
            prores_444_16bit: self.prores_444_16bit,
            ffv1_10bit_422: self.ffv1_10bit_422,
            ffv1_12bit_444: self.ffv1_12bit_444,
        };
        if !selected.enabled().is_empty() {
            config.formats = selected;
        }

        if let Some(depth) = self.bit_depth {
            config.bit_depth = Some(depth.parse::<BitDepth>()?);
        }
        if let Some(chroma) = self.chroma_format {
            config.chroma_format = Some(chroma.parse::<ChromaFormat>()?);
        }
        config.use_gpu |= self.gpu;
        if let Some(dither) = self.dither {
            config.dither_algorithm = dither;
        }
        if self.no_deband {
            config.enable_debanding = false;
        }
        if let Some(strength) = self.deband_strength {
            config.deband_strength = strength;
        }
        if let Some(timeout) = self.timeout {
            config.job_timeout_secs = Some(timeout);
        }
        if let Some(concurrency) = self.concurrency {
            config.concurrency = concurrency;
        }
        if let Some(policy) = self.on_cancel {
            config.cancel_policy = policy.parse::<CancelPolicy>()?;
        }
        if let Some(codes) = self.early_stop_codes {
            config.early_stop_exit_codes = codes;
        }
        if let Some(vspipe) = self.vspipe {
            config.frame_source_path = vspipe;
        }
        if let Some(ffmpeg) = self.ffmpeg {
            config.encoder_path = ffmpeg;
        }
        config.json_output |= self.json;
        if let Some(level) = self.log_level {
            config.log_level = level;
        }

        Ok((config, self.write_config))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let base = match args.config {
        Some(ref path) => Config::from_file(path)
            .await
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => Config::default(),
    };
    let json_output = args.json || base.json_output;
    let (config, write_config) = fail_json(json_output, args.apply(base).map_err(anyhow::Error::from))?;

    if let Some(path) = write_config {
        config.save_to_file(&path).await?;
        println!("Configuration written to {}", path.display());
        return Ok(());
    }

    fail_json(json_output, check_input(&config).map_err(anyhow::Error::from))?;

    let timestamp = PathResolver::timestamp(&Local::now());
    let run_dir = PathResolver::create_run_dir(&config.output_base, &timestamp).await?;
    init_logging(&config.log_level, Some(&run_dir.join(LOG_FILE_NAME)))?;

    let profile = config.codec_profile()?;
    log_configuration(&config, profile, &run_dir);

    let toolchain = match DependencyVerifier::new(&config)?.ensure().await {
        Ok(toolchain) => toolchain,
        Err(err) => {
            if let DitherError::Dependency(ref missing) = err {
                for requirement in missing {
                    error!("Dependency check failed: {}", requirement);
                }
            }
            return fail_json(json_output, Err(err.into()));
        }
    };

    let started = Instant::now();
    let input = config.input_path.clone();
    let recursive = config.recursive;
    let coordinator = BatchCoordinator::new(Arc::new(config), toolchain, run_dir.clone(), timestamp);

    let cancel = coordinator.cancel_handle();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping the running job");
            cancel.cancel();
        }
    });

    let summary = fail_json(json_output, coordinator.run(&input, recursive).await)?;

    let summary_path = run_dir.join(SUMMARY_FILE_NAME);
    summary.write_json(&summary_path).await?;

    info!("{}", summary.format_summary());
    for line in summary.failure_lines() {
        error!("  {}", line);
    }
    info!("Summary written to {}", summary_path.display());

    if json_output {
        JsonMessage::complete(&summary, started.elapsed().as_secs_f64(), summary_path).emit();
    }

    std::process::exit(summary.exit_code());
}

/// Single files need no flag; directories need `--batch`
fn check_input(config: &Config) -> Result<(), DitherError> {
    config.validate()?;
    let input = &config.input_path;
    if input.as_os_str().is_empty() {
        return Err(ConfigurationError::new("no input given").into());
    }
    if !input.exists() {
        return Err(ConfigurationError::new(format!("input does not exist: {}", input.display())).into());
    }
    if input.is_dir() && !config.batch {
        return Err(ConfigurationError::new(format!(
            "{} is a directory, use --batch to process its videos",
            input.display()
        ))
        .into());
    }
    if config.batch && !input.is_dir() {
        return Err(ConfigurationError::new(format!(
            "--batch expects a directory, got {}",
            input.display()
        ))
        .into());
    }
    Ok(())
}

fn log_configuration(config: &Config, profile: CodecProfile, run_dir: &Path) {
    info!("Run directory: {}", run_dir.display());
    info!("Input: {}", config.input_path.display());
    info!(
        "Output format: {} ({}-bit {})",
        profile,
        profile.bit_depth(),
        profile.chroma_format()
    );
    info!("Dithering: {}", config.dither_algorithm);
    if config.enable_debanding {
        info!(
            "Debanding: {} on the {}",
            config.deband_strength,
            if config.use_gpu { "GPU" } else { "CPU" }
        );
    } else {
        info!("Debanding: disabled");
    }
    if let Some(frames) = config.frame_limit() {
        info!("Test mode: first {} frames", frames);
    }
    if config.batch {
        info!(
            "Batch mode{}, {} job(s) at a time, on cancel: {:?}",
            if config.recursive { " (recursive)" } else { "" },
            config.concurrency,
            config.cancel_policy
        );
    }
    if let Some(secs) = config.job_timeout_secs {
        info!("Per-job timeout: {}s", secs);
    }
}

/// Mirror a fatal error as a JSON `error` event before returning it
fn fail_json<T>(json_output: bool, result: Result<T>) -> Result<T> {
    if let Err(ref err) = result {
        if json_output {
            JsonMessage::error("Run aborted".to_string(), Some(format!("{:#}", err))).emit();
        }
    }
    result
}
