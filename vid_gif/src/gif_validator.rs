//! Post-encode structural check on produced GIFs.

use std::fs::File;
use std::io::Read;
use std::path::Path;

pub const GIF87A: &[u8; 6] = b"GIF87a";
pub const GIF89A: &[u8; 6] = b"GIF89a";
/// Anything this small is a truncated or header-only file.
pub const MIN_GIF_SIZE: u64 = 100;

pub fn is_valid_gif(path: &Path) -> bool {
    validate_gif(path).is_ok()
}

/// File size on success, reason on failure.
pub fn validate_gif(path: &Path) -> Result<u64, String> {
    let mut file = File::open(path).map_err(|e| format!("cannot open: {}", e))?;
    let size = file
        .metadata()
        .map_err(|e| format!("cannot stat: {}", e))?
        .len();

    let mut header = [0u8; 6];
    file.read_exact(&mut header)
        .map_err(|_| format!("file too short for a GIF header ({} bytes)", size))?;
    if &header != GIF87A && &header != GIF89A {
        return Err("missing GIF87a/GIF89a signature".to_string());
    }
    if size <= MIN_GIF_SIZE {
        return Err(format!("file too small ({} bytes)", size));
    }
    Ok(size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, header: &[u8], total: usize) -> std::path::PathBuf {
        let mut bytes = header.to_vec();
        bytes.resize(total.max(header.len()), 0);
        let path = dir.path().join(name);
        fs::write(&path, bytes).unwrap();
        path
    }

    #[test]
    fn test_both_signatures_accepted() {
        let temp = TempDir::new().unwrap();
        assert!(is_valid_gif(&write(&temp, "a.gif", GIF87A, 101)));
        assert!(is_valid_gif(&write(&temp, "b.gif", GIF89A, 4096)));
        assert_eq!(validate_gif(&write(&temp, "c.gif", GIF89A, 500)), Ok(500));
    }

    #[test]
    fn test_size_boundary() {
        let temp = TempDir::new().unwrap();
        assert!(!is_valid_gif(&write(&temp, "a.gif", GIF89A, 100)));
        assert!(is_valid_gif(&write(&temp, "b.gif", GIF89A, 101)));
    }

    #[test]
    fn test_rejects_wrong_or_missing_header() {
        let temp = TempDir::new().unwrap();
        assert!(!is_valid_gif(&write(&temp, "empty.gif", b"", 0)));
        assert!(!is_valid_gif(&write(&temp, "png.gif", b"\x89PNG\r\n", 4096)));
        assert!(!is_valid_gif(&write(&temp, "short.gif", b"GIF", 3)));
        assert!(!is_valid_gif(&temp.path().join("missing.gif")));
    }
}
