//! ffmpeg argument construction for both encode strategies.
//!
//! Parameter selection is deterministic: the same job always yields the same
//! argument lists.

use std::path::{Path, PathBuf};
use std::process::Command;

use shared_utils::{safe_path_arg, FFMPEG};

use crate::naming::palette_path_for;
use crate::quality::{EncodeStrategy, QualityTier};

/// One external invocation: program plus argument list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Human-readable command line for logs and error reports.
    pub fn command_line(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }

    pub fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd
    }

    /// Last argument, which is the output path for every ffmpeg invocation
    /// built here.
    pub fn output_arg(&self) -> Option<&str> {
        self.args.last().map(String::as_str)
    }
}

/// A fully resolved conversion.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscodeJob {
    pub input: PathBuf,
    pub output: PathBuf,
    /// Seconds into the source; `0` means from the beginning.
    pub start_time: f64,
    /// Clip length in seconds; `0` means to the end.
    pub duration: f64,
    /// Output width; tier default when `None`.
    pub width: Option<u32>,
    pub tier: QualityTier,
}

impl TranscodeJob {
    pub fn new(input: impl Into<PathBuf>, output: impl Into<PathBuf>, tier: QualityTier) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            start_time: 0.0,
            duration: 0.0,
            width: None,
            tier,
        }
    }

    pub fn with_window(mut self, start_time: f64, duration: f64) -> Self {
        self.start_time = start_time;
        self.duration = duration;
        self
    }

    pub fn with_width(mut self, width: u32) -> Self {
        self.width = Some(width);
        self
    }

    pub fn effective_width(&self) -> u32 {
        self.width.unwrap_or_else(|| self.tier.default_width())
    }

    pub fn palette_path(&self) -> PathBuf {
        palette_path_for(&self.output)
    }
}

/// Invocations needed for one job, in execution order.
#[derive(Debug, Clone, PartialEq)]
pub enum TranscodePlan {
    Simple(CommandSpec),
    Palette {
        generate: CommandSpec,
        apply: CommandSpec,
        palette: PathBuf,
    },
}

impl TranscodePlan {
    pub fn commands(&self) -> Vec<&CommandSpec> {
        match self {
            TranscodePlan::Simple(spec) => vec![spec],
            TranscodePlan::Palette { generate, apply, .. } => vec![generate, apply],
        }
    }

    pub fn palette_path(&self) -> Option<&Path> {
        match self {
            TranscodePlan::Simple(_) => None,
            TranscodePlan::Palette { palette, .. } => Some(palette),
        }
    }
}

/// Picks the strategy from the job's tier.
pub fn build(job: &TranscodeJob) -> TranscodePlan {
    match job.tier.strategy() {
        EncodeStrategy::Simple => TranscodePlan::Simple(build_simple(job)),
        EncodeStrategy::Palette => build_palette(job),
    }
}

pub fn build_commands(job: &TranscodeJob) -> Vec<CommandSpec> {
    build(job).commands().into_iter().cloned().collect()
}

/// `ffmpeg -y [-ss S] [-t D] -i IN -vf fps=F,scale=W:-2[:flags=lanczos] OUT`
pub fn build_simple(job: &TranscodeJob) -> CommandSpec {
    let params = job.tier.simple_params();
    let mut filter = format!("fps={},scale={}:-2", params.fps, job.effective_width());
    if params.lanczos {
        filter.push_str(":flags=lanczos");
    }

    source_prefix(job)
        .arg("-vf")
        .arg(filter)
        .arg(safe_path_arg(&job.output))
}

/// Two passes: palettegen into `<stem>_palette.png`, then paletteuse.
///
/// Valid for every tier; [`build`] only selects it for high and ultra.
pub fn build_palette(job: &TranscodeJob) -> TranscodePlan {
    let params = job.tier.palette_params();
    let width = job.effective_width();
    let palette = job.palette_path();

    let mut gen_filter = format!(
        "scale={}:-2:flags=lanczos,fps={},palettegen=max_colors={}",
        width, params.fps, params.max_colors
    );
    if params.reserve_transparent_off {
        gen_filter.push_str(":reserve_transparent=0");
    }
    if params.diff_stats {
        gen_filter.push_str(":stats_mode=diff");
    }

    let generate = source_prefix(job)
        .arg("-vf")
        .arg(gen_filter)
        .arg(safe_path_arg(&palette));

    let apply_filter = format!(
        "[0:v]scale={}:-2:flags=lanczos,fps={}[v];[v][1:v]paletteuse=dither={}",
        width, params.fps, params.dither
    );

    let apply = source_prefix(job)
        .arg("-i")
        .arg(safe_path_arg(&palette))
        .arg("-filter_complex")
        .arg(apply_filter)
        .args(["-loop", "0"])
        .arg(safe_path_arg(&job.output));

    TranscodePlan::Palette {
        generate,
        apply,
        palette,
    }
}

/// `ffmpeg -y [-ss S] [-t D] -i IN`, trim flags applying to the source only.
fn source_prefix(job: &TranscodeJob) -> CommandSpec {
    let mut spec = CommandSpec::new(FFMPEG).arg("-y");
    if job.start_time > 0.0 {
        spec = spec.arg("-ss").arg(format!("{:.2}", job.start_time));
    }
    if job.duration > 0.0 {
        spec = spec.arg("-t").arg(format!("{:.2}", job.duration));
    }
    spec.arg("-i").arg(safe_path_arg(&job.input))
}
