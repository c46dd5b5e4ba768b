//! Conversion API - probe, clamp, encode, validate, archive
//!
//! `GifConverter` is the composition of the pipeline stages. It is
//! `Send + Sync`; one instance serves any number of concurrent requests,
//! each blocking on its own child processes.
//!
//! ```ignore
//! let converter = GifConverter::with_system_runner(ServiceConfig::default());
//! let result = converter.convert(
//!     &ConversionRequest::new("uploads/clip.mp4").with_duration(5.0),
//! )?;
//! println!("{}", result.gif_url);
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use shared_utils::AppError;
use tracing::{info, warn};

use crate::archive::{bundle, compression_ratio};
use crate::command_builder::{build, TranscodeJob};
use crate::config::ServiceConfig;
use crate::duration_probe::{DurationProbe, SourceDurationEstimate};
use crate::executor::{CommandRunner, SystemRunner, TranscodeExecutor};
use crate::gif_validator::validate_gif;
use crate::naming::{archive_path_for, file_name_of, static_url, unique_filename};
use crate::quality::QualityTier;

pub const DEFAULT_WIDTH: u32 = 1080;
pub const MIN_WIDTH: u32 = 100;
pub const MAX_WIDTH: u32 = 3840;
/// Shortest clip that survives the two-decimal `-t` argument.
pub const MIN_CLIP_SECS: f64 = 0.01;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionRequest {
    pub input: PathBuf,
    /// Seconds; `None` means 0.
    pub start_time: Option<f64>,
    /// Seconds; `None` or non-positive means the rest of the video.
    pub duration: Option<f64>,
    pub width: Option<u32>,
    #[serde(default)]
    pub quality: QualityTier,
}

impl ConversionRequest {
    pub fn new(input: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            ..Default::default()
        }
    }

    pub fn with_start_time(mut self, secs: f64) -> Self {
        self.start_time = Some(secs);
        self
    }

    pub fn with_duration(mut self, secs: f64) -> Self {
        self.duration = Some(secs);
        self
    }

    pub fn with_width(mut self, width: u32) -> Self {
        self.width = Some(width);
        self
    }

    pub fn with_quality(mut self, quality: QualityTier) -> Self {
        self.quality = quality;
        self
    }
}

/// Request parameters after defaulting and clamping against the source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedParams {
    pub start_time: f64,
    pub duration: f64,
    pub width: u32,
}

/// Applies defaults and range checks.
///
/// Guarantees `0 <= start_time < source_duration` and
/// `0 < duration <= source_duration - start_time`.
pub fn resolve_parameters(
    request: &ConversionRequest,
    source_duration: f64,
) -> Result<ResolvedParams, AppError> {
    let start_time = request.start_time.unwrap_or(0.0);
    if !start_time.is_finite() || start_time < 0.0 || start_time >= source_duration {
        return Err(AppError::invalid_range(format!(
            "start time must be at least 0 and less than the video duration ({:.2}s)",
            source_duration
        )));
    }

    let remaining = source_duration - start_time;
    let duration = match request.duration {
        Some(d) if d.is_finite() && d > 0.0 => d.min(remaining),
        _ => remaining,
    };
    // `-t` is emitted with two decimals; anything shorter would render as 0.00.
    if duration < MIN_CLIP_SECS {
        return Err(AppError::invalid_range(format!(
            "clip must be at least {:.2}s, got {:.3}s after {:.2}s (video duration: {:.2}s)",
            MIN_CLIP_SECS, duration, start_time, source_duration
        )));
    }

    let width = request.width.unwrap_or(DEFAULT_WIDTH);
    if !(MIN_WIDTH..=MAX_WIDTH).contains(&width) {
        return Err(AppError::invalid_range(format!(
            "width must be between {} and {} pixels",
            MIN_WIDTH, MAX_WIDTH
        )));
    }

    Ok(ResolvedParams {
        start_time,
        duration,
        width,
    })
}

/// Sizes at or above `threshold` get a zip alongside the GIF.
pub fn should_archive(size: u64, threshold: u64) -> bool {
    size >= threshold
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveInfo {
    #[serde(skip)]
    pub path: PathBuf,
    pub zip_url: String,
    pub zip_size: u64,
    pub compression_ratio: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionResult {
    #[serde(skip)]
    pub output_path: PathBuf,
    pub filename: String,
    pub gif_url: String,
    pub file_size: u64,
    /// Clip length actually encoded.
    pub duration: f64,
    pub video_duration: f64,
    /// False when `video_duration` is the probe fallback.
    pub duration_reliable: bool,
    pub start_time: f64,
    pub width: u32,
    pub quality: QualityTier,
    #[serde(flatten)]
    pub archive: Option<ArchiveInfo>,
}

pub struct GifConverter {
    config: ServiceConfig,
    probe: DurationProbe,
    executor: TranscodeExecutor,
}

impl GifConverter {
    pub fn new(config: ServiceConfig, runner: Arc<dyn CommandRunner>) -> Self {
        let probe = DurationProbe::new(runner.clone(), config.command_timeout)
            .with_fallback(config.probe_fallback_secs);
        let executor = TranscodeExecutor::new(runner, config.command_timeout);
        Self {
            config,
            probe,
            executor,
        }
    }

    pub fn with_system_runner(config: ServiceConfig) -> Self {
        Self::new(config, Arc::new(SystemRunner))
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn probe(&self, path: &Path) -> SourceDurationEstimate {
        self.probe.probe(path)
    }

    pub fn convert(&self, request: &ConversionRequest) -> Result<ConversionResult, AppError> {
        let input = fs::canonicalize(&request.input).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => AppError::NotFound {
                path: request.input.clone(),
            },
            _ => AppError::Io(e),
        })?;

        let estimate = self.probe.probe(&input);
        let params = resolve_parameters(request, estimate.seconds)?;

        fs::create_dir_all(&self.config.output_dir)?;
        let output = fs::canonicalize(&self.config.output_dir)?.join(unique_filename("gif"));

        let job = TranscodeJob::new(&input, &output, request.quality)
            .with_window(params.start_time, params.duration)
            .with_width(params.width);

        info!(
            input = %input.display(),
            output = %output.display(),
            quality = %request.quality,
            start_time = params.start_time,
            duration = params.duration,
            width = params.width,
            source_duration = estimate.seconds,
            probe_source = ?estimate.source,
            "Starting GIF conversion"
        );

        if let Err(e) = self.executor.execute(&build(&job)) {
            remove_quietly(&output);
            return Err(e);
        }

        let file_size = match validate_gif(&output) {
            Ok(size) => size,
            Err(reason) => {
                remove_quietly(&output);
                return Err(AppError::OutputInvalid {
                    path: output,
                    reason,
                });
            }
        };

        let archive = if should_archive(file_size, self.config.archive_threshold) {
            self.archive_output(&output, file_size)
        } else {
            None
        };

        let filename = file_name_of(&output);
        info!(
            file = %filename,
            file_size,
            archived = archive.is_some(),
            "GIF conversion finished"
        );

        Ok(ConversionResult {
            gif_url: static_url(&self.config.static_prefix, &filename),
            filename,
            output_path: output,
            file_size,
            duration: params.duration,
            video_duration: estimate.seconds,
            duration_reliable: estimate.reliable(),
            start_time: params.start_time,
            width: params.width,
            quality: request.quality,
            archive,
        })
    }

    /// Archive failure is logged and otherwise ignored.
    fn archive_output(&self, output: &Path, file_size: u64) -> Option<ArchiveInfo> {
        let zip_path = archive_path_for(output);
        match bundle(&[output], &zip_path) {
            Ok(zip_size) => {
                let ratio = compression_ratio(file_size, zip_size);
                info!(
                    zip = %zip_path.display(),
                    zip_size,
                    compression_ratio = ratio,
                    "Large GIF archived"
                );
                Some(ArchiveInfo {
                    zip_url: static_url(&self.config.static_prefix, &file_name_of(&zip_path)),
                    path: zip_path,
                    zip_size,
                    compression_ratio: ratio,
                })
            }
            Err(e) => {
                let err = AppError::ArchiveFailure {
                    message: e.to_string(),
                };
                warn!(output = %output.display(), error = %err, category = %err.category(), "Skipping archive");
                None
            }
        }
    }
}

fn remove_quietly(path: &Path) {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => {
            warn!(path = %path.display(), error = %e, "Failed to remove unusable output")
        }
        _ => {}
    }
}
