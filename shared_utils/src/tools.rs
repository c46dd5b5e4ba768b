//! External tools detection
//!
//! The pipeline shells out to `ffmpeg` and `ffprobe`. Both must be on PATH;
//! this is checked once at startup, before any conversion work is accepted.

use std::path::PathBuf;

use tracing::{error, info};

use crate::app_error::AppError;

pub const FFMPEG: &str = "ffmpeg";
pub const FFPROBE: &str = "ffprobe";

/// Tools the transcoding pipeline cannot work without.
pub const REQUIRED_TOOLS: &[&str] = &[FFMPEG, FFPROBE];

pub fn locate_tool(name: &str) -> Option<PathBuf> {
    which::which(name).ok()
}

pub fn is_tool_available(name: &str) -> bool {
    locate_tool(name).is_some()
}

/// Fails with `ToolNotFound` on the first missing tool.
pub fn ensure_tools_available(tools: &[&str]) -> Result<(), AppError> {
    for tool in tools {
        match locate_tool(tool) {
            Some(path) => info!(tool = *tool, path = %path.display(), "External tool located"),
            None => {
                error!(tool = *tool, "External tool missing from PATH");
                return Err(AppError::ToolNotFound {
                    tool_name: (*tool).to_string(),
                    operation: Some("startup precheck".to_string()),
                });
            }
        }
    }
    Ok(())
}
