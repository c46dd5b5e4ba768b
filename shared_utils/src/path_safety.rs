use std::borrow::Cow;
use std::path::{Component, Path};

/// Sanitizes a file path for command-line usage with FFmpeg, which does not
/// support '--' as an option delimiter.
///
/// A path starting with '-' gets a './' prefix so it cannot be read as a flag.
pub fn safe_path_arg(path: &Path) -> Cow<'_, str> {
    let s = path.to_string_lossy();
    if s.starts_with('-') {
        Cow::Owned(format!("./{}", s))
    } else {
        s
    }
}

/// True when `name` is a single plain file name: no separators, no `..`,
/// not absolute, not empty.
pub fn is_plain_file_name(name: &str) -> bool {
    if name.is_empty() || name.contains('/') || name.contains('\\') || name.contains('\0') {
        return false;
    }
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}
