//! FFmpeg process management - deadline-bounded, deadlock-free child processes
//!
//! ## Background
//!
//! Piping stdout and stderr but reading only one of them deadlocks as soon as
//! the other pipe's buffer (typically 64KB) fills up: the tool blocks on the
//! write, and we block waiting for it to exit. Both streams are therefore
//! drained on dedicated threads.
//!
//! Every child is started in its own process group (unix) so that a deadline
//! expiry can kill the tool together with anything it forked.
//!
//! ```ignore
//! use shared_utils::ffmpeg_process::FfmpegProcess;
//! use std::process::Command;
//! use std::time::Duration;
//!
//! let mut cmd = Command::new("ffmpeg");
//! cmd.args(["-i", "input.mp4", "output.gif"]);
//! let output = FfmpegProcess::spawn(&mut cmd)?.wait_with_deadline(Some(Duration::from_secs(300)))?;
//! ```

use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::app_error::AppError;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Captured result of a finished child process.
#[derive(Debug, Clone, Default)]
pub struct ProcessOutput {
    pub exit_code: Option<i32>,
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
}

impl ProcessOutput {
    /// stdout followed by stderr, for diagnostics.
    pub fn combined(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (true, _) => self.stderr.clone(),
            (false, true) => self.stdout.clone(),
            (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr),
        }
    }
}

/// Child process wrapper that drains both pipes and enforces a deadline.
pub struct FfmpegProcess {
    program: String,
    child: Child,
    started: Instant,
    stdout_thread: Option<JoinHandle<String>>,
    stderr_thread: Option<JoinHandle<String>>,
}

impl FfmpegProcess {
    /// Spawns `cmd` with piped stdout/stderr, each drained on its own thread.
    pub fn spawn(cmd: &mut Command) -> Result<Self, AppError> {
        let program = cmd.get_program().to_string_lossy().to_string();
        info!(command = ?cmd, "Executing external command");

        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let mut child = cmd.spawn().map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                AppError::ToolNotFound {
                    tool_name: program.clone(),
                    operation: None,
                }
            } else {
                AppError::SpawnFailed {
                    program: program.clone(),
                    source,
                }
            }
        })?;

        let stdout_thread = child.stdout.take().map(drain);
        let stderr_thread = child.stderr.take().map(drain);

        Ok(Self {
            program,
            child,
            started: Instant::now(),
            stdout_thread,
            stderr_thread,
        })
    }

    pub fn id(&self) -> u32 {
        self.child.id()
    }

    /// Waits for the process to exit. With a deadline, the process group is
    /// killed once it expires and `AppError::Timeout` is returned.
    pub fn wait_with_deadline(mut self, deadline: Option<Duration>) -> Result<ProcessOutput, AppError> {
        let status = loop {
            if let Some(status) = self.child.try_wait()? {
                break status;
            }
            let elapsed = self.started.elapsed();
            if let Some(limit) = deadline {
                if elapsed >= limit {
                    self.terminate();
                    let stderr = join(self.stderr_thread.take());
                    let _ = join(self.stdout_thread.take());
                    error!(
                        program = %self.program,
                        elapsed_secs = elapsed.as_secs_f64(),
                        stderr_output = %stderr,
                        "External command exceeded its deadline and was killed"
                    );
                    return Err(AppError::Timeout {
                        program: self.program.clone(),
                        elapsed,
                    });
                }
            }
            thread::sleep(POLL_INTERVAL);
        };

        let output = ProcessOutput {
            exit_code: status.code(),
            success: status.success(),
            stdout: join(self.stdout_thread.take()),
            stderr: join(self.stderr_thread.take()),
            elapsed: self.started.elapsed(),
        };

        if output.success {
            info!(
                program = %self.program,
                exit_code = output.exit_code,
                elapsed_secs = output.elapsed.as_secs_f64(),
                "External command completed successfully"
            );
            debug!(stderr_output = %output.stderr, "External command stderr");
        } else {
            error!(
                program = %self.program,
                exit_code = output.exit_code,
                stderr_output = %output.stderr,
                "External command failed"
            );
        }

        Ok(output)
    }

    /// Kills the whole process group, then reaps the child.
    fn terminate(&mut self) {
        #[cfg(unix)]
        {
            let pgid = self.child.id() as libc::pid_t;
            // SAFETY: killpg only sends a signal; the group id is our own child's.
            let rc = unsafe { libc::killpg(pgid, libc::SIGKILL) };
            if rc != 0 {
                warn!(pgid, "killpg failed, falling back to killing the child only");
                let _ = self.child.kill();
            }
        }
        #[cfg(not(unix))]
        {
            let _ = self.child.kill();
        }
        let _ = self.child.wait();
    }
}

fn drain<R: Read + Send + 'static>(mut reader: R) -> JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = reader.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).to_string()
    })
}

fn join(handle: Option<JoinHandle<String>>) -> String {
    handle
        .map(|h| h.join().unwrap_or_default())
        .unwrap_or_default()
}

// ═══════════════════════════════════════════════════════════════
// Error formatting
// ═══════════════════════════════════════════════════════════════

/// Extracts the most meaningful line from FFmpeg output.
///
/// 1. The last line mentioning `Error`/`error`
/// 2. Otherwise the last non-empty line that is not a progress line
/// 3. Otherwise "Unknown FFmpeg error"
pub fn format_ffmpeg_error(output: &str) -> String {
    if let Some(error_line) = output
        .lines()
        .rev()
        .find(|line| line.contains("Error") || line.contains("error"))
    {
        return error_line.trim().to_string();
    }

    output
        .lines()
        .rev()
        .find(|line| {
            let trimmed = line.trim();
            !trimmed.is_empty()
                && !trimmed.starts_with("frame=")
                && !trimmed.starts_with("fps=")
                && !trimmed.starts_with("size=")
        })
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| "Unknown FFmpeg error".to_string())
}

/// Actionable hint for common FFmpeg failure patterns.
pub fn get_error_suggestion(output: &str) -> Option<&'static str> {
    const PATTERNS: &[(&str, &str)] = &[
        ("No such file or directory", "check that the input file still exists"),
        ("Invalid data found", "the input may be corrupt or not a video"),
        ("moov atom not found", "the MP4 upload is incomplete"),
        ("Permission denied", "check read/write permissions on uploads and output"),
        ("Output file is empty", "the time window may be outside the video"),
        ("Cannot allocate memory", "reduce the width or the clip duration"),
    ];
    PATTERNS
        .iter()
        .find(|(pattern, _)| output.contains(pattern))
        .map(|(_, suggestion)| *suggestion)
}
