//! vid-gif - Video clip to GIF conversion pipeline
//!
//! Shells out to ffmpeg/ffprobe:
//! - low/medium tiers: single-pass `fps,scale` filter chain
//! - high/ultra tiers: palettegen + paletteuse two-pass encode
//!
//! Large outputs are additionally bundled into a zip; a retention sweeper
//! reclaims stale uploads and outputs.
//!
//! ```rust,ignore
//! use vid_gif::{ConversionRequest, GifConverter, QualityTier, ServiceConfig};
//!
//! let converter = GifConverter::with_system_runner(ServiceConfig::default());
//! let result = converter.convert(
//!     &ConversionRequest::new("uploads/clip.mp4")
//!         .with_start_time(1.5)
//!         .with_duration(4.0)
//!         .with_quality(QualityTier::High),
//! )?;
//! ```

pub mod archive;
pub mod command_builder;
pub mod config;
pub mod conversion_api;
pub mod duration_probe;
pub mod executor;
pub mod gif_validator;
pub mod history;
pub mod naming;
pub mod quality;
pub mod retention;
pub mod upload;

#[cfg(test)]
pub(crate) mod test_support;

pub use archive::{
    bundle, compress_output, compress_single, compression_ratio, decompress_limited,
    decompress_output, decompress_single, is_compressed_extension, looks_compressed, unbundle,
    CompressionReport, DecompressionReport,
};
pub use command_builder::{build, build_commands, CommandSpec, TranscodeJob, TranscodePlan};
pub use config::ServiceConfig;
pub use conversion_api::{
    resolve_parameters, ArchiveInfo, ConversionRequest, ConversionResult, GifConverter,
    ResolvedParams,
};
pub use duration_probe::{DurationProbe, ProbeSource, SourceDurationEstimate};
pub use executor::{CommandRunner, PaletteJob, PaletteState, SystemRunner, TranscodeExecutor};
pub use gif_validator::{is_valid_gif, validate_gif};
pub use history::{delete_history, list_history, HistoryItem};
pub use quality::QualityTier;
pub use retention::{
    DiskUsage, RetentionPolicy, RetentionSweeper, SweepReport, SweeperHandle, SweeperState,
};
pub use upload::ingest_upload;

pub use shared_utils::{AppError, ErrorCategory};
