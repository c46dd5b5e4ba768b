use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, Level};

use shared_utils::logging::{init_logging, LogConfig};
use shared_utils::{ensure_tools_available, get_error_suggestion, AppError, FFMPEG, FFPROBE};
use vid_gif::{
    bundle, compress_output, decompress_output, delete_history, ingest_upload, list_history,
    unbundle, ConversionRequest, ConversionResult, GifConverter, QualityTier, RetentionSweeper,
    ServiceConfig,
};

#[derive(Parser)]
#[command(name = "vid-gif")]
#[command(version, about = "Video clip to GIF converter - quality tiers, archival, retention sweeping", long_about = None)]
struct Cli {
    /// Directory for ingested uploads
    #[arg(long, global = true, default_value = "uploads")]
    uploads_dir: PathBuf,

    /// Directory for produced GIFs and archives
    #[arg(long, global = true, default_value = "output")]
    output_dir: PathBuf,

    /// Deadline per ffmpeg/ffprobe invocation, 0 disables it
    #[arg(long, global = true, default_value_t = 300)]
    timeout_secs: u64,

    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest a video into the uploads directory and convert it to a GIF
    Convert {
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        /// Start offset in seconds
        #[arg(short, long)]
        start: Option<f64>,

        /// Clip length in seconds (default: rest of the video)
        #[arg(short, long)]
        duration: Option<f64>,

        /// Output width in pixels (100-3840, default 1080)
        #[arg(short, long)]
        width: Option<u32>,

        /// low | medium | high | ultra (unknown values mean medium)
        #[arg(short, long, default_value = "medium")]
        quality: String,

        #[arg(short, long, default_value = "human")]
        output: OutputFormat,
    },

    /// Print the detected duration of a video
    Probe {
        #[arg(value_name = "INPUT")]
        input: PathBuf,
    },

    /// gzip a file in the output directory
    Compress {
        #[arg(value_name = "FILE")]
        file: String,
    },

    /// gunzip a `.gz` file in the output directory
    Decompress {
        #[arg(value_name = "FILE")]
        file: String,
    },

    /// Zip files into one archive
    Bundle {
        #[arg(value_name = "FILES", required = true)]
        files: Vec<PathBuf>,

        #[arg(short, long)]
        out: PathBuf,
    },

    /// Extract a zip archive
    Unbundle {
        #[arg(value_name = "ZIP")]
        archive: PathBuf,

        #[arg(short = 'd', long)]
        dest: PathBuf,
    },

    /// Remove all uploads and outputs older than one hour
    Cleanup,

    /// Report the size of the uploads and output directories
    DiskUsage,

    /// List produced GIFs, newest first
    History {
        #[arg(short, long, default_value = "human")]
        output: OutputFormat,
    },

    /// Delete a produced GIF by id
    Delete {
        #[arg(value_name = "ID")]
        id: String,
    },

    /// Run the periodic retention sweeper until Ctrl-C
    Sweeper {
        /// Sweep interval in seconds
        #[arg(long, default_value_t = 3600)]
        interval_secs: u64,
    },
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Human,
    Json,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let _ = init_logging("vid_gif", LogConfig::default().with_level(level));

    let timeout = (cli.timeout_secs > 0).then(|| Duration::from_secs(cli.timeout_secs));
    let config = ServiceConfig::new()
        .with_uploads_dir(&cli.uploads_dir)
        .with_output_dir(&cli.output_dir)
        .with_command_timeout(timeout);

    if let Err(e) = run(cli.command, config) {
        match e.downcast_ref::<AppError>() {
            Some(app_error) => {
                error!(error = %app_error, category = %app_error.category(), "Command failed");
                eprintln!("{}", app_error.user_message());
                if let AppError::TranscodeFailure {
                    combined_output, ..
                } = app_error
                {
                    if let Some(hint) = get_error_suggestion(combined_output) {
                        eprintln!("💡 {}", hint);
                    }
                }
            }
            None => eprintln!("❌ Error: {:#}", e),
        }
        std::process::exit(1);
    }
    Ok(())
}

fn run(command: Commands, config: ServiceConfig) -> anyhow::Result<()> {
    match command {
        Commands::Convert {
            input,
            start,
            duration,
            width,
            quality,
            output,
        } => {
            ensure_tools_available(&[FFMPEG, FFPROBE])?;
            config.ensure_dirs()?;

            let stored = stage_upload(&input, &config)?;
            let request = ConversionRequest {
                input: stored,
                start_time: start,
                duration,
                width,
                quality: QualityTier::parse_lenient(&quality),
            };
            let result = GifConverter::with_system_runner(config).convert(&request)?;
            match output {
                OutputFormat::Human => print_result_human(&result),
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
            }
        }

        Commands::Probe { input } => {
            ensure_tools_available(&[FFPROBE])?;
            let estimate = GifConverter::with_system_runner(config).probe(&input);
            println!("{}", serde_json::to_string_pretty(&estimate)?);
            if !estimate.reliable() {
                eprintln!("⚠️  Duration could not be detected, fallback value shown");
            }
        }

        Commands::Compress { file } => {
            let report = compress_output(&config.output_dir, &file, &config.static_prefix)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        Commands::Decompress { file } => {
            let report = decompress_output(&config.output_dir, &file, &config.static_prefix)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        Commands::Bundle { files, out } => {
            let size = bundle(&files, &out)?;
            println!("📦 {} ({} files, {} bytes)", out.display(), files.len(), size);
        }

        Commands::Unbundle { archive, dest } => {
            let extracted = unbundle(&archive, &dest)?;
            for path in &extracted {
                println!("{}", path.display());
            }
            println!("📂 {} files extracted to {}", extracted.len(), dest.display());
        }

        Commands::Cleanup => {
            let report = RetentionSweeper::from_config(&config).force_cleanup();
            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        Commands::DiskUsage => {
            let usage = RetentionSweeper::from_config(&config).disk_usage();
            println!("{}", serde_json::to_string_pretty(&usage)?);
        }

        Commands::History { output } => {
            let items = list_history(&config.output_dir, &config.static_prefix)?;
            match output {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&items)?),
                OutputFormat::Human => {
                    if items.is_empty() {
                        println!("No conversions yet");
                    }
                    for item in &items {
                        println!(
                            "{}  {:>10} bytes  {}  {}",
                            item.created_at.to_rfc3339(),
                            item.file_size,
                            item.id,
                            item.url
                        );
                    }
                }
            }
        }

        Commands::Delete { id } => {
            delete_history(&config.output_dir, &id)?;
            println!("🗑️  Deleted {}", id);
        }

        Commands::Sweeper { interval_secs } => {
            config.ensure_dirs()?;
            let config = config.with_sweep_interval(Duration::from_secs(interval_secs.max(1)));
            let sweeper = Arc::new(RetentionSweeper::from_config(&config));
            let handle = sweeper.start();

            let running = Arc::new(AtomicBool::new(true));
            let flag = Arc::clone(&running);
            ctrlc::set_handler(move || flag.store(false, Ordering::SeqCst))?;

            info!(interval_secs, "Sweeper running, press Ctrl-C to stop");
            while running.load(Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(200));
            }
            handle.stop();
        }
    }
    Ok(())
}

/// Copies the user's file next to the uploads and ingests the copy, so the
/// original is never moved or deleted.
fn stage_upload(input: &Path, config: &ServiceConfig) -> anyhow::Result<PathBuf> {
    let original_name = input
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| anyhow::anyhow!("input has no file name: {}", input.display()))?;
    let incoming = config
        .uploads_dir
        .join(format!(".incoming_{}", vid_gif::naming::unique_filename("part")));
    std::fs::copy(input, &incoming).map_err(|e| {
        let _ = std::fs::remove_file(&incoming);
        if e.kind() == std::io::ErrorKind::NotFound {
            AppError::NotFound {
                path: input.to_path_buf(),
            }
        } else {
            AppError::Io(e)
        }
    })?;
    Ok(ingest_upload(
        &original_name,
        &incoming,
        &config.uploads_dir,
        config.max_upload_size,
    )?)
}

fn print_result_human(result: &ConversionResult) {
    println!("✅ {}", result.output_path.display());
    println!("   URL:       {}", result.gif_url);
    println!("   Size:      {} bytes", result.file_size);
    println!(
        "   Clip:      {:.2}s from {:.2}s (video {:.2}s{})",
        result.duration,
        result.start_time,
        result.video_duration,
        if result.duration_reliable { "" } else { ", estimated" }
    );
    println!("   Quality:   {} @ {}px", result.quality, result.width);
    if let Some(archive) = &result.archive {
        println!(
            "📦 Archive:  {} ({} bytes, {:.1}%)",
            archive.zip_url, archive.zip_size, archive.compression_ratio
        );
    }
}
