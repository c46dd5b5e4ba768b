//! Generated file names and derived artifact paths.
//!
//! Names are `<unix_ts>_<pid>_<counter>.<ext>`. The timestamp alone collides
//! for two uploads in the same second; the pid and the process-wide counter
//! make every name unique within and across processes on the host.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

static NAME_COUNTER: AtomicU64 = AtomicU64::new(0);

pub const PALETTE_SUFFIX: &str = "_palette.png";
pub const DEFAULT_STATIC_PREFIX: &str = "/static";

pub fn unique_stem() -> String {
    let ts = chrono::Utc::now().timestamp();
    let n = NAME_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{}_{}_{}", ts, std::process::id(), n)
}

/// `ext` is given without the leading dot; empty means no extension.
pub fn unique_filename(ext: &str) -> String {
    let ext = ext.trim_start_matches('.');
    if ext.is_empty() {
        unique_stem()
    } else {
        format!("{}.{}", unique_stem(), ext)
    }
}

pub fn stem_of(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// `<dir>/<stem>_palette.png`, co-located with the output.
pub fn palette_path_for(output: &Path) -> PathBuf {
    output.with_file_name(format!("{}{}", stem_of(output), PALETTE_SUFFIX))
}

/// `<dir>/<stem>.zip`
pub fn archive_path_for(output: &Path) -> PathBuf {
    output.with_extension("zip")
}

/// `<path>.gz`
pub fn gzip_path_for(path: &Path) -> PathBuf {
    let mut s = path.as_os_str().to_os_string();
    s.push(".gz");
    PathBuf::from(s)
}

/// Relative URL for a file served from the output directory.
pub fn static_url(prefix: &str, filename: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        format!("{}/{}", DEFAULT_STATIC_PREFIX, filename)
    } else {
        format!("{}/{}", prefix, filename)
    }
}

pub fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default()
}
