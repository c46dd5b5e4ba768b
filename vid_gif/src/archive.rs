//! Archive operations: gzip single files, zip bundles, compressed-input
//! detection.
//!
//! Every writer removes its partially written destination before returning
//! an error.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Component, Path, PathBuf};

use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::Serialize;
use shared_utils::{is_plain_file_name, AppError};
use tracing::{debug, info, warn};
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::naming::{gzip_path_for, static_url};

pub const COMPRESSED_EXTENSIONS: &[&str] = &["gz", "zip", "rar", "7z", "tar", "bz2"];
pub const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// gzip `src` into `dst`. Returns the compressed size.
pub fn compress_single(src: &Path, dst: &Path) -> Result<u64, AppError> {
    let mut input = open_existing(src)?;
    let result = (|| -> Result<u64, AppError> {
        let out = File::create(dst)?;
        let mut encoder = GzEncoder::new(BufWriter::new(out), Compression::default());
        io::copy(&mut input, &mut encoder)?;
        encoder.finish()?.flush()?;
        Ok(fs::metadata(dst)?.len())
    })();
    let size = remove_on_error(dst, result)?;
    debug!(src = %src.display(), dst = %dst.display(), size, "gzip written");
    Ok(size)
}

/// gunzip `src` into `dst`, reading every gzip member. Returns the
/// decompressed size.
pub fn decompress_single(src: &Path, dst: &Path) -> Result<u64, AppError> {
    decompress_to(src, dst, None)
}

/// Like [`decompress_single`], but fails with `UnsupportedInput` once the
/// decompressed data exceeds `max_size` bytes.
pub fn decompress_limited(src: &Path, dst: &Path, max_size: u64) -> Result<u64, AppError> {
    decompress_to(src, dst, Some(max_size))
}

fn decompress_to(src: &Path, dst: &Path, max_size: Option<u64>) -> Result<u64, AppError> {
    if !is_gzip_file(src) {
        if !src.exists() {
            return Err(AppError::NotFound {
                path: src.to_path_buf(),
            });
        }
        return Err(AppError::format_error(src, "not a gzip stream"));
    }
    let input = open_existing(src)?;
    let result = (|| -> Result<u64, AppError> {
        let limit = max_size.map(|m| m.saturating_add(1)).unwrap_or(u64::MAX);
        let mut decoder = MultiGzDecoder::new(BufReader::new(input)).take(limit);
        let mut out = BufWriter::new(File::create(dst)?);
        let written = io::copy(&mut decoder, &mut out).map_err(|e| stream_error(src, e))?;
        if let Some(max) = max_size {
            if written > max {
                return Err(AppError::UnsupportedInput {
                    message: format!(
                        "decompressed file too large, the limit is {}MB",
                        max / (1024 * 1024)
                    ),
                });
            }
        }
        out.flush()?;
        Ok(fs::metadata(dst)?.len())
    })();
    let size = remove_on_error(dst, result)?;
    debug!(src = %src.display(), dst = %dst.display(), size, "gzip extracted");
    Ok(size)
}

/// Zips `srcs` into `dst` (deflate), each entry named by its base name with
/// its unix mode preserved. Returns the archive size.
pub fn bundle<P: AsRef<Path>>(srcs: &[P], dst: &Path) -> Result<u64, AppError> {
    let result = (|| -> Result<u64, AppError> {
        let mut writer = ZipWriter::new(BufWriter::new(File::create(dst)?));
        for src in srcs {
            let src = src.as_ref();
            let meta = fs::metadata(src).map_err(|e| not_found_or_io(src, e))?;
            if !meta.is_file() {
                return Err(AppError::UnsupportedInput {
                    message: format!("{} is not a regular file", src.display()),
                });
            }
            let name = src
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .ok_or_else(|| AppError::format_error(src, "path has no file name"))?;

            #[allow(unused_mut)]
            let mut options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                options = options.unix_permissions(meta.permissions().mode());
            }

            writer
                .start_file(name, options)
                .map_err(|e| zip_error(dst, e))?;
            io::copy(&mut File::open(src)?, &mut writer)?;
        }
        writer.finish().map_err(|e| zip_error(dst, e))?.flush()?;
        Ok(fs::metadata(dst)?.len())
    })();
    let size = remove_on_error(dst, result)?;
    info!(archive = %dst.display(), entries = srcs.len(), size, "Bundle written");
    Ok(size)
}

/// Extracts `src` into `dest_dir`. Every entry is checked before anything
/// is written; one escaping entry rejects the whole archive.
pub fn unbundle(src: &Path, dest_dir: &Path) -> Result<Vec<PathBuf>, AppError> {
    let file = open_existing(src)?;
    let mut archive = ZipArchive::new(BufReader::new(file)).map_err(|e| zip_error(src, e))?;

    let mut entries = Vec::with_capacity(archive.len());
    for index in 0..archive.len() {
        let entry = archive.by_index(index).map_err(|e| zip_error(src, e))?;
        let relative = safe_entry_path(entry.name())?;
        entries.push((index, relative, entry.is_dir(), entry.unix_mode()));
    }

    fs::create_dir_all(dest_dir)?;
    let mut extracted = Vec::new();
    for (index, relative, is_dir, mode) in entries {
        let target = dest_dir.join(&relative);
        if is_dir {
            fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut entry = archive.by_index(index).map_err(|e| zip_error(src, e))?;
        let result = (|| -> Result<(), AppError> {
            let mut out = BufWriter::new(File::create(&target)?);
            io::copy(&mut entry, &mut out).map_err(|e| stream_error(src, e))?;
            out.flush()?;
            Ok(())
        })();
        remove_on_error(&target, result)?;

        #[cfg(unix)]
        if let Some(mode) = mode {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&target, fs::Permissions::from_mode(mode & 0o7777))?;
        }
        #[cfg(not(unix))]
        let _ = mode;

        extracted.push(target);
    }

    info!(archive = %src.display(), dest = %dest_dir.display(), files = extracted.len(), "Bundle extracted");
    Ok(extracted)
}

/// Relative path of a zip entry, or `SecurityError` if it could land
/// outside the destination.
pub fn safe_entry_path(name: &str) -> Result<PathBuf, AppError> {
    if name.contains('\0') {
        return Err(AppError::security(name, "entry name contains NUL"));
    }
    let normalized = name.replace('\\', "/");
    let mut relative = PathBuf::new();
    for component in Path::new(&normalized).components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                return Err(AppError::security(name, "parent directory component"));
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(AppError::security(name, "absolute path"));
            }
        }
    }
    if relative.as_os_str().is_empty() {
        return Err(AppError::security(name, "empty entry name"));
    }
    Ok(relative)
}

/// `compressed / original * 100`; 0 when `original` is 0.
pub fn compression_ratio(original: u64, compressed: u64) -> f64 {
    if original == 0 {
        0.0
    } else {
        compressed as f64 / original as f64 * 100.0
    }
}

/// Extension half of [`looks_compressed`].
pub fn is_compressed_extension(name: &str) -> bool {
    Path::new(name)
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .map(|e| COMPRESSED_EXTENSIONS.contains(&e.as_str()))
        .unwrap_or(false)
}

pub fn is_gzip_file(path: &Path) -> bool {
    let mut magic = [0u8; 2];
    File::open(path)
        .and_then(|mut f| f.read_exact(&mut magic))
        .map(|_| magic == GZIP_MAGIC)
        .unwrap_or(false)
}

/// Compressed by extension or by gzip magic bytes.
pub fn looks_compressed(path: &Path) -> bool {
    let by_name = path
        .file_name()
        .map(|n| is_compressed_extension(&n.to_string_lossy()))
        .unwrap_or(false);
    by_name || is_gzip_file(path)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompressionReport {
    pub compressed_file: String,
    pub compressed_url: String,
    pub original_size: u64,
    pub compressed_size: u64,
    pub compression_ratio: f64,
    pub saved_bytes: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecompressionReport {
    pub decompressed_file: String,
    pub decompressed_url: String,
    pub size: u64,
}

/// gzips `<output_dir>/<filename>` into `<filename>.gz` next to it.
pub fn compress_output(
    output_dir: &Path,
    filename: &str,
    static_prefix: &str,
) -> Result<CompressionReport, AppError> {
    ensure_plain(filename)?;
    if is_compressed_extension(filename) {
        return Err(AppError::format_error(filename, "file is already compressed"));
    }
    let src = output_dir.join(filename);
    let original_size = fs::metadata(&src).map_err(|e| not_found_or_io(&src, e))?.len();
    let dst = gzip_path_for(&src);
    let compressed_size = compress_single(&src, &dst)?;

    let compressed_file = format!("{}.gz", filename);
    let report = CompressionReport {
        compressed_url: static_url(static_prefix, &compressed_file),
        compressed_file,
        original_size,
        compressed_size,
        compression_ratio: compression_ratio(original_size, compressed_size),
        saved_bytes: original_size as i64 - compressed_size as i64,
    };
    info!(
        file = filename,
        original_size,
        compressed_size,
        ratio = report.compression_ratio,
        "Output compressed"
    );
    Ok(report)
}

/// gunzips `<output_dir>/<filename>.gz` into `<filename>`.
pub fn decompress_output(
    output_dir: &Path,
    filename: &str,
    static_prefix: &str,
) -> Result<DecompressionReport, AppError> {
    ensure_plain(filename)?;
    let Some(stripped) = strip_gz_suffix(filename) else {
        return Err(AppError::format_error(filename, "only .gz files can be decompressed"));
    };
    if stripped.is_empty() {
        return Err(AppError::format_error(filename, "no name left after removing .gz"));
    }
    let src = output_dir.join(filename);
    if !src.exists() {
        return Err(AppError::NotFound { path: src });
    }
    let dst = output_dir.join(stripped);
    let size = decompress_single(&src, &dst)?;
    info!(file = filename, size, "Output decompressed");
    Ok(DecompressionReport {
        decompressed_file: stripped.to_string(),
        decompressed_url: static_url(static_prefix, stripped),
        size,
    })
}

/// `name` without a case-insensitive `.gz` suffix, if it has one.
pub fn strip_gz_suffix(name: &str) -> Option<&str> {
    let split = name.len().checked_sub(3)?;
    let (head, tail) = (name.get(..split)?, name.get(split..)?);
    tail.eq_ignore_ascii_case(".gz").then_some(head)
}

fn ensure_plain(filename: &str) -> Result<(), AppError> {
    if is_plain_file_name(filename) {
        Ok(())
    } else {
        Err(AppError::security(filename, "file name must not contain path components"))
    }
}

fn open_existing(path: &Path) -> Result<File, AppError> {
    File::open(path).map_err(|e| not_found_or_io(path, e))
}

fn not_found_or_io(path: &Path, e: io::Error) -> AppError {
    if e.kind() == io::ErrorKind::NotFound {
        AppError::NotFound {
            path: path.to_path_buf(),
        }
    } else {
        AppError::Io(e)
    }
}

/// Corrupt compressed data surfaces as `InvalidData`/`InvalidInput`/EOF from
/// the decoders.
fn stream_error(src: &Path, e: io::Error) -> AppError {
    match e.kind() {
        io::ErrorKind::InvalidData | io::ErrorKind::InvalidInput | io::ErrorKind::UnexpectedEof => {
            AppError::format_error(src, e.to_string())
        }
        _ => AppError::Io(e),
    }
}

fn zip_error(path: &Path, e: ZipError) -> AppError {
    match e {
        ZipError::Io(io) => AppError::Io(io),
        other => AppError::format_error(path, other.to_string()),
    }
}

fn remove_on_error<T>(dst: &Path, result: Result<T, AppError>) -> Result<T, AppError> {
    if result.is_err() {
        match fs::remove_file(dst) {
            Ok(()) => debug!(path = %dst.display(), "Removed partial output"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %dst.display(), error = %e, "Failed to remove partial output"),
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_bytes() -> Vec<u8> {
        (0..64 * 1024).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn test_compression_ratio() {
        assert_eq!(compression_ratio(0, 123), 0.0);
        assert_eq!(compression_ratio(100, 50), 50.0);
        assert_eq!(compression_ratio(200, 200), 100.0);
    }

    #[test]
    fn test_gzip_round_trip() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("clip.gif");
        let gz = temp.path().join("clip.gif.gz");
        let back = temp.path().join("clip_back.gif");
        fs::write(&src, sample_bytes()).unwrap();

        let compressed = compress_single(&src, &gz).unwrap();
        assert!(compressed > 0);
        assert!(is_gzip_file(&gz));
        decompress_single(&gz, &back).unwrap();
        assert_eq!(fs::read(&back).unwrap(), sample_bytes());
    }

    #[test]
    fn test_decompress_reads_every_member() {
        let temp = TempDir::new().unwrap();
        let first = temp.path().join("first.txt");
        let second = temp.path().join("second.txt");
        fs::write(&first, b"first-half-").unwrap();
        fs::write(&second, b"second-half").unwrap();
        compress_single(&first, &temp.path().join("first.gz")).unwrap();
        compress_single(&second, &temp.path().join("second.gz")).unwrap();

        let mut joined = fs::read(temp.path().join("first.gz")).unwrap();
        joined.extend(fs::read(temp.path().join("second.gz")).unwrap());
        let multi = temp.path().join("multi.gz");
        fs::write(&multi, joined).unwrap();

        let out = temp.path().join("multi.txt");
        assert_eq!(decompress_single(&multi, &out).unwrap(), 22);
        assert_eq!(fs::read(&out).unwrap(), b"first-half-second-half");
    }

    #[test]
    fn test_decompress_limited_enforces_cap() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("zeros.bin");
        let gz = temp.path().join("zeros.bin.gz");
        fs::write(&src, vec![0u8; 4 * 1024 * 1024]).unwrap();
        compress_single(&src, &gz).unwrap();

        let capped = temp.path().join("capped.bin");
        let result = decompress_limited(&gz, &capped, 65536);
        assert!(matches!(result, Err(AppError::UnsupportedInput { .. })));
        assert!(!capped.exists());

        let exact = temp.path().join("exact.bin");
        assert_eq!(decompress_limited(&gz, &exact, 4 * 1024 * 1024).unwrap(), 4 * 1024 * 1024);
    }

    #[test]
    fn test_decompress_rejects_non_gzip() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("plain.gz");
        let dst = temp.path().join("plain");
        fs::write(&src, b"not gzip at all").unwrap();
        assert!(matches!(
            decompress_single(&src, &dst),
            Err(AppError::FormatError { .. })
        ));
        assert!(!dst.exists());
    }

    #[test]
    fn test_decompress_corrupt_stream_removes_partial() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("a.bin");
        let gz = temp.path().join("a.bin.gz");
        let dst = temp.path().join("out.bin");
        fs::write(&src, sample_bytes()).unwrap();
        compress_single(&src, &gz).unwrap();
        let mut bytes = fs::read(&gz).unwrap();
        // past the 10-byte gzip header: a reserved deflate block type
        for b in bytes.iter_mut().skip(10).take(32) {
            *b = 0xff;
        }
        fs::write(&gz, &bytes).unwrap();

        assert!(matches!(
            decompress_single(&gz, &dst),
            Err(AppError::FormatError { .. })
        ));
        assert!(!dst.exists());
    }

    #[test]
    fn test_compress_missing_source() {
        let temp = TempDir::new().unwrap();
        let result = compress_single(&temp.path().join("nope"), &temp.path().join("nope.gz"));
        assert!(matches!(result, Err(AppError::NotFound { .. })));
    }

    #[test]
    fn test_zip_round_trip_uses_base_names() {
        let temp = TempDir::new().unwrap();
        let nested = temp.path().join("nested");
        fs::create_dir_all(&nested).unwrap();
        let a = nested.join("a.gif");
        let b = temp.path().join("b.txt");
        fs::write(&a, sample_bytes()).unwrap();
        fs::write(&b, b"hello").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&b, fs::Permissions::from_mode(0o640)).unwrap();
        }

        let zip_path = temp.path().join("bundle.zip");
        bundle(&[&a, &b], &zip_path).unwrap();

        let dest = temp.path().join("extract");
        let extracted = unbundle(&zip_path, &dest).unwrap();
        assert_eq!(extracted.len(), 2);
        assert_eq!(fs::read(dest.join("a.gif")).unwrap(), sample_bytes());
        assert_eq!(fs::read(dest.join("b.txt")).unwrap(), b"hello");
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(dest.join("b.txt")).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o640);
        }
    }

    #[test]
    fn test_bundle_missing_source_removes_partial() {
        let temp = TempDir::new().unwrap();
        let zip_path = temp.path().join("bundle.zip");
        let result = bundle(&[temp.path().join("missing.gif")], &zip_path);
        assert!(matches!(result, Err(AppError::NotFound { .. })));
        assert!(!zip_path.exists());
    }

    fn write_zip_with_entry(path: &Path, entry: &str) {
        let mut writer = ZipWriter::new(File::create(path).unwrap());
        writer.start_file(entry, SimpleFileOptions::default()).unwrap();
        writer.write_all(b"payload").unwrap();
        writer.finish().unwrap();
    }

    #[test]
    fn test_unbundle_rejects_traversal() {
        let temp = TempDir::new().unwrap();
        let zip_path = temp.path().join("evil.zip");
        write_zip_with_entry(&zip_path, "../escape.txt");

        let dest = temp.path().join("dest");
        let result = unbundle(&zip_path, &dest);
        assert!(matches!(result, Err(AppError::SecurityError { .. })));
        assert!(!temp.path().join("escape.txt").exists());
        assert!(!dest.exists());
    }

    #[test]
    fn test_unbundle_rejects_absolute() {
        let temp = TempDir::new().unwrap();
        let zip_path = temp.path().join("abs.zip");
        write_zip_with_entry(&zip_path, "/tmp/abs_escape.txt");
        let result = unbundle(&zip_path, &temp.path().join("dest"));
        assert!(matches!(result, Err(AppError::SecurityError { .. })));
    }

    #[test]
    fn test_unbundle_invalid_zip() {
        let temp = TempDir::new().unwrap();
        let zip_path = temp.path().join("broken.zip");
        fs::write(&zip_path, b"PK not really a zip").unwrap();
        let result = unbundle(&zip_path, &temp.path().join("dest"));
        assert!(matches!(result, Err(AppError::FormatError { .. })));
    }

    #[test]
    fn test_safe_entry_path() {
        assert_eq!(safe_entry_path("a/b.gif").unwrap(), PathBuf::from("a/b.gif"));
        assert_eq!(safe_entry_path("./a.gif").unwrap(), PathBuf::from("a.gif"));
        assert!(safe_entry_path("a/../../b").is_err());
        assert!(safe_entry_path("..\\win.txt").is_err());
        assert!(safe_entry_path("/etc/passwd").is_err());
        assert!(safe_entry_path("").is_err());
    }

    #[test]
    fn test_looks_compressed() {
        let temp = TempDir::new().unwrap();
        let by_ext = temp.path().join("clip.MP4.GZ");
        fs::write(&by_ext, b"whatever").unwrap();
        assert!(looks_compressed(&by_ext));

        let by_magic = temp.path().join("clip.mp4");
        fs::write(&by_magic, [0x1f, 0x8b, 0x08, 0x00]).unwrap();
        assert!(looks_compressed(&by_magic));

        let plain = temp.path().join("plain.mp4");
        fs::write(&plain, b"\x00\x00\x00\x18ftypmp42").unwrap();
        assert!(!looks_compressed(&plain));
    }

    #[test]
    fn test_is_compressed_extension() {
        for name in ["a.gz", "a.zip", "a.RAR", "a.7z", "a.tar", "a.bz2"] {
            assert!(is_compressed_extension(name), "{}", name);
        }
        assert!(!is_compressed_extension("a.gif"));
        assert!(!is_compressed_extension("gz"));
    }

    #[test]
    fn test_compress_and_decompress_output() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("x.gif"), sample_bytes()).unwrap();

        let report = compress_output(temp.path(), "x.gif", "/static").unwrap();
        assert_eq!(report.compressed_file, "x.gif.gz");
        assert_eq!(report.compressed_url, "/static/x.gif.gz");
        assert_eq!(report.original_size, sample_bytes().len() as u64);
        assert_eq!(
            report.saved_bytes,
            report.original_size as i64 - report.compressed_size as i64
        );

        fs::remove_file(temp.path().join("x.gif")).unwrap();
        let back = decompress_output(temp.path(), "x.gif.gz", "/static").unwrap();
        assert_eq!(back.decompressed_file, "x.gif");
        assert_eq!(back.decompressed_url, "/static/x.gif");
        assert_eq!(fs::read(temp.path().join("x.gif")).unwrap(), sample_bytes());
    }

    #[test]
    fn test_output_operations_validate_names() {
        let temp = TempDir::new().unwrap();
        assert!(matches!(
            compress_output(temp.path(), "../x.gif", "/static"),
            Err(AppError::SecurityError { .. })
        ));
        assert!(matches!(
            compress_output(temp.path(), "x.zip", "/static"),
            Err(AppError::FormatError { .. })
        ));
        assert!(matches!(
            compress_output(temp.path(), "missing.gif", "/static"),
            Err(AppError::NotFound { .. })
        ));
        assert!(matches!(
            decompress_output(temp.path(), "x.gif", "/static"),
            Err(AppError::FormatError { .. })
        ));
    }

    #[test]
    fn test_strip_gz_suffix() {
        assert_eq!(strip_gz_suffix("a.gif.gz"), Some("a.gif"));
        assert_eq!(strip_gz_suffix("a.GZ"), Some("a"));
        assert_eq!(strip_gz_suffix("a.gif"), None);
        assert_eq!(strip_gz_suffix("gz"), None);
    }
}
