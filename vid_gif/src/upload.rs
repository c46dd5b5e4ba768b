//! Moves a received upload into the uploads directory under a unique name.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use shared_utils::AppError;
use tracing::{info, warn};

use crate::archive::{decompress_limited, looks_compressed, strip_gz_suffix};
use crate::naming::unique_filename;

pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "mov", "wmv", "flv", "webm", "mkv", "m4v"];

/// Lowercased video extension of `original_name` after stripping a trailing
/// `.gz`, or `None` if it is not a supported video.
pub fn video_extension(original_name: &str) -> Option<String> {
    let name = strip_gz_suffix(original_name).unwrap_or(original_name);
    let ext = Path::new(name).extension()?.to_string_lossy().to_ascii_lowercase();
    VIDEO_EXTENSIONS.contains(&ext.as_str()).then_some(ext)
}

/// Validates the upload and stores it as `uploads/<unique>.<ext>`,
/// transparently gunzipping compressed uploads. `max_size` bounds both the
/// received file and its decompressed form. `temp_path` is consumed either
/// way.
pub fn ingest_upload(
    original_name: &str,
    temp_path: &Path,
    uploads_dir: &Path,
    max_size: u64,
) -> Result<PathBuf, AppError> {
    let result = store(original_name, temp_path, uploads_dir, max_size);
    if result.is_err() {
        discard(temp_path);
    }
    result
}

fn store(
    original_name: &str,
    temp_path: &Path,
    uploads_dir: &Path,
    max_size: u64,
) -> Result<PathBuf, AppError> {
    let ext = video_extension(original_name).ok_or_else(|| AppError::UnsupportedInput {
        message: format!(
            "unsupported file type, expected one of: {}",
            VIDEO_EXTENSIONS.join(", ")
        ),
    })?;

    let size = fs::metadata(temp_path)
        .map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => AppError::NotFound {
                path: temp_path.to_path_buf(),
            },
            _ => AppError::Io(e),
        })?
        .len();
    if size > max_size {
        return Err(AppError::UnsupportedInput {
            message: format!(
                "file too large ({} bytes), the limit is {}MB",
                size,
                max_size / (1024 * 1024)
            ),
        });
    }

    fs::create_dir_all(uploads_dir)?;
    let dest = uploads_dir.join(unique_filename(&ext));

    if looks_compressed(temp_path) {
        decompress_limited(temp_path, &dest, max_size)?;
        discard(temp_path);
        info!(original = original_name, dest = %dest.display(), "Compressed upload extracted");
    } else {
        move_file(temp_path, &dest)?;
        info!(original = original_name, dest = %dest.display(), size, "Upload stored");
    }
    Ok(dest)
}

/// rename, falling back to copy + remove across filesystems.
fn move_file(src: &Path, dst: &Path) -> Result<(), AppError> {
    if fs::rename(src, dst).is_ok() {
        return Ok(());
    }
    if let Err(e) = fs::copy(src, dst) {
        let _ = fs::remove_file(dst);
        return Err(AppError::Io(e));
    }
    discard(src);
    Ok(())
}

fn discard(path: &Path) {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => {
            warn!(path = %path.display(), error = %e, "Failed to remove temporary upload")
        }
        _ => {}
    }
}
