//! Service configuration for the composition root.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::naming::DEFAULT_STATIC_PREFIX;

pub const MIB: u64 = 1024 * 1024;
/// Outputs at or above this size are additionally bundled into a zip.
pub const DEFAULT_ARCHIVE_THRESHOLD: u64 = 8 * MIB;
pub const DEFAULT_MAX_UPLOAD_SIZE: u64 = 50 * MIB;
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(300);
pub const HOUR: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub uploads_dir: PathBuf,
    pub output_dir: PathBuf,
    pub archive_threshold: u64,
    /// Duration assumed when every probe strategy fails
    pub probe_fallback_secs: f64,
    /// Deadline for each ffmpeg/ffprobe invocation; `None` disables it
    pub command_timeout: Option<Duration>,
    pub sweep_interval: Duration,
    pub uploads_max_age: Duration,
    pub output_max_age: Duration,
    pub max_upload_size: u64,
    pub static_prefix: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            uploads_dir: PathBuf::from("uploads"),
            output_dir: PathBuf::from("output"),
            archive_threshold: DEFAULT_ARCHIVE_THRESHOLD,
            probe_fallback_secs: 10.0,
            command_timeout: Some(DEFAULT_COMMAND_TIMEOUT),
            sweep_interval: HOUR,
            uploads_max_age: 24 * HOUR,
            output_max_age: 12 * HOUR,
            max_upload_size: DEFAULT_MAX_UPLOAD_SIZE,
            static_prefix: DEFAULT_STATIC_PREFIX.to_string(),
        }
    }
}

impl ServiceConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_uploads_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.uploads_dir = dir.as_ref().to_path_buf();
        self
    }

    pub fn with_output_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.output_dir = dir.as_ref().to_path_buf();
        self
    }

    pub fn with_archive_threshold(mut self, bytes: u64) -> Self {
        self.archive_threshold = bytes;
        self
    }

    pub fn with_command_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn with_max_ages(mut self, uploads: Duration, output: Duration) -> Self {
        self.uploads_max_age = uploads;
        self.output_max_age = output;
        self
    }

    pub fn with_static_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.static_prefix = prefix.into();
        self
    }

    /// Creates the uploads and output directories if missing.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.uploads_dir)?;
        std::fs::create_dir_all(&self.output_dir)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = ServiceConfig::default();
        assert_eq!(config.archive_threshold, 8 * 1024 * 1024);
        assert_eq!(config.probe_fallback_secs, 10.0);
        assert_eq!(config.sweep_interval, Duration::from_secs(3600));
        assert_eq!(config.uploads_max_age, Duration::from_secs(24 * 3600));
        assert_eq!(config.output_max_age, Duration::from_secs(12 * 3600));
        assert_eq!(config.static_prefix, "/static");
        assert!(config.command_timeout.is_some());
    }

    #[test]
    fn test_builder_and_ensure_dirs() {
        let temp = TempDir::new().unwrap();
        let config = ServiceConfig::new()
            .with_uploads_dir(temp.path().join("up"))
            .with_output_dir(temp.path().join("out"))
            .with_archive_threshold(1024)
            .with_command_timeout(None);
        config.ensure_dirs().unwrap();
        assert!(temp.path().join("up").is_dir());
        assert!(temp.path().join("out").is_dir());
        assert_eq!(config.archive_threshold, 1024);
        assert!(config.command_timeout.is_none());
    }
}
