//! Listing and deleting previously produced GIFs.

use std::fs;
use std::io;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;
use shared_utils::{is_plain_file_name, AppError};
use tracing::info;

use crate::naming::{file_name_of, stem_of, static_url};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryItem {
    pub id: String,
    pub filename: String,
    pub url: String,
    pub file_size: u64,
    pub created_at: DateTime<Utc>,
}

/// GIFs directly inside `output_dir`, newest first. A missing directory
/// yields an empty list.
pub fn list_history(output_dir: &Path, static_prefix: &str) -> Result<Vec<HistoryItem>, AppError> {
    let entries = match fs::read_dir(output_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut items = Vec::new();
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        let is_gif = path
            .extension()
            .map(|e| e.eq_ignore_ascii_case("gif"))
            .unwrap_or(false);
        if !is_gif {
            continue;
        }
        let Ok(meta) = entry.metadata() else {
            continue;
        };
        if !meta.is_file() {
            continue;
        }
        let created_at: DateTime<Utc> = meta
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        let filename = file_name_of(&path);
        items.push(HistoryItem {
            id: stem_of(&path),
            url: static_url(static_prefix, &filename),
            filename,
            file_size: meta.len(),
            created_at,
        });
    }

    items.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
    Ok(items)
}

/// Removes `<output_dir>/<id>.gif`.
pub fn delete_history(output_dir: &Path, id: &str) -> Result<(), AppError> {
    let filename = format!("{}.gif", id);
    if id.is_empty() || !is_plain_file_name(&filename) {
        return Err(AppError::security(id, "invalid history id"));
    }
    let path = output_dir.join(&filename);
    match fs::remove_file(&path) {
        Ok(()) => {
            info!(id, "History item deleted");
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Err(AppError::NotFound { path }),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::{set_file_mtime, FileTime};
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    fn write_at(dir: &Path, name: &str, age_secs: u64) {
        let path = dir.join(name);
        fs::write(&path, b"GIF89a....").unwrap();
        let mtime = SystemTime::now() - Duration::from_secs(age_secs);
        set_file_mtime(&path, FileTime::from_system_time(mtime)).unwrap();
    }

    #[test]
    fn test_list_history_newest_first() {
        let temp = TempDir::new().unwrap();
        write_at(temp.path(), "old.gif", 300);
        write_at(temp.path(), "new.gif", 10);
        write_at(temp.path(), "new_palette.png", 5);
        write_at(temp.path(), "new.zip", 5);

        let items = list_history(temp.path(), "/static").unwrap();
        let ids: Vec<&str> = items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["new", "old"]);
        assert_eq!(items[0].url, "/static/new.gif");
        assert_eq!(items[0].filename, "new.gif");
        assert_eq!(items[0].file_size, 10);
    }

    #[test]
    fn test_list_history_missing_dir() {
        let temp = TempDir::new().unwrap();
        assert!(list_history(&temp.path().join("nope"), "/static").unwrap().is_empty());
    }

    #[test]
    fn test_history_serializes_camel_case() {
        let temp = TempDir::new().unwrap();
        write_at(temp.path(), "a.gif", 1);
        let items = list_history(temp.path(), "/static").unwrap();
        let json = serde_json::to_string(&items).unwrap();
        assert!(json.contains("\"fileSize\""));
        assert!(json.contains("\"createdAt\""));
    }

    #[test]
    fn test_delete_history() {
        let temp = TempDir::new().unwrap();
        write_at(temp.path(), "abc.gif", 1);
        delete_history(temp.path(), "abc").unwrap();
        assert!(!temp.path().join("abc.gif").exists());
        assert!(matches!(
            delete_history(temp.path(), "abc"),
            Err(AppError::NotFound { .. })
        ));
        assert!(matches!(
            delete_history(temp.path(), "../abc"),
            Err(AppError::SecurityError { .. })
        ));
        assert!(matches!(
            delete_history(temp.path(), ""),
            Err(AppError::SecurityError { .. })
        ));
    }
}
