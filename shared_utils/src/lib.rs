//! Shared Utilities for the vid-gif tools
//!
//! - Unified error type (`AppError`) and error categories
//! - Tracing-based logging setup
//! - Deadline-bounded FFmpeg/FFprobe process wrapper
//! - External tools detection
//! - Safe path handling for command-line arguments

pub mod app_error;
pub mod ffmpeg_process;
pub mod logging;
pub mod path_safety;
pub mod tools;

pub use app_error::{AppError, ErrorCategory};
pub use ffmpeg_process::{format_ffmpeg_error, get_error_suggestion, FfmpegProcess, ProcessOutput};
pub use path_safety::{is_plain_file_name, safe_path_arg};
pub use tools::{ensure_tools_available, is_tool_available, FFMPEG, FFPROBE, REQUIRED_TOOLS};
