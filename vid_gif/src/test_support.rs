//! Scripted `CommandRunner` for unit tests.

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use shared_utils::{AppError, ProcessOutput};

use crate::command_builder::CommandSpec;
use crate::executor::CommandRunner;

type Handler = Box<dyn Fn(&CommandSpec, usize) -> Result<ProcessOutput, AppError> + Send + Sync>;

/// Records every invocation. The handler gets the spec and the 1-based index
/// of the call among ffmpeg calls (0 for anything else).
pub struct ScriptedRunner {
    calls: Mutex<Vec<CommandSpec>>,
    handler: Handler,
}

impl ScriptedRunner {
    /// ffprobe reports 10s; ffmpeg writes a small valid GIF (or a PNG for
    /// palette outputs) to its last argument.
    pub fn new() -> Self {
        Self::with_handler(|spec, _| default_response(spec, 256))
    }

    pub fn with_handler<F>(handler: F) -> Self
    where
        F: Fn(&CommandSpec, usize) -> Result<ProcessOutput, AppError> + Send + Sync + 'static,
    {
        Self {
            calls: Mutex::new(Vec::new()),
            handler: Box::new(handler),
        }
    }

    /// Like `new`, but the GIF written is exactly `size` bytes.
    pub fn with_gif_size(size: usize) -> Self {
        Self::with_handler(move |spec, _| default_response(spec, size))
    }

    pub fn failing_ffmpeg(exit_code: i32, stderr: &'static str) -> Self {
        Self::with_handler(move |spec, n| {
            if n > 0 {
                Ok(failed(exit_code, stderr))
            } else {
                default_response(spec, 256)
            }
        })
    }

    /// The `nth` ffmpeg call exits with `exit_code`; everything else succeeds.
    pub fn fail_nth_ffmpeg(nth: usize, exit_code: i32, stderr: &'static str) -> Self {
        Self::with_handler(move |spec, n| {
            if n == nth {
                Ok(failed(exit_code, stderr))
            } else {
                default_response(spec, 256)
            }
        })
    }

    /// ffmpeg "succeeds" but writes something that is not a GIF.
    pub fn writing_garbage() -> Self {
        Self::with_handler(|spec, n| {
            if n > 0 {
                if let Some(out) = spec.output_arg() {
                    std::fs::write(out, vec![b'x'; 512])?;
                }
                Ok(ok(""))
            } else {
                default_response(spec, 256)
            }
        })
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn ffmpeg_calls(&self) -> Vec<CommandSpec> {
        self.calls()
            .into_iter()
            .filter(|c| c.program == "ffmpeg")
            .collect()
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, spec: &CommandSpec, _deadline: Option<Duration>) -> Result<ProcessOutput, AppError> {
        let ffmpeg_index = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(spec.clone());
            if spec.program == "ffmpeg" {
                calls.iter().filter(|c| c.program == "ffmpeg").count()
            } else {
                0
            }
        };
        (self.handler)(spec, ffmpeg_index)
    }
}

pub fn ok(stdout: &str) -> ProcessOutput {
    ProcessOutput {
        exit_code: Some(0),
        success: true,
        stdout: stdout.to_string(),
        ..Default::default()
    }
}

pub fn failed(exit_code: i32, stderr: &str) -> ProcessOutput {
    ProcessOutput {
        exit_code: Some(exit_code),
        success: false,
        stderr: stderr.to_string(),
        ..Default::default()
    }
}

pub fn fake_gif_bytes(size: usize) -> Vec<u8> {
    let mut bytes = b"GIF89a".to_vec();
    bytes.resize(size.max(6), 0);
    bytes
}

fn default_response(spec: &CommandSpec, gif_size: usize) -> Result<ProcessOutput, AppError> {
    match spec.program.as_str() {
        "ffprobe" => Ok(ok("10.000000\n")),
        "ffmpeg" => {
            if let Some(out) = spec.output_arg() {
                let path = Path::new(out);
                if out.ends_with(".png") {
                    std::fs::write(path, b"\x89PNG\r\n\x1a\nfake palette")?;
                } else {
                    std::fs::write(path, fake_gif_bytes(gif_size))?;
                }
            }
            Ok(ok(""))
        }
        _ => Ok(ok("")),
    }
}
