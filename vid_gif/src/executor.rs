//! Runs transcode plans against a [`CommandRunner`].
//!
//! The palette strategy is a small state machine:
//!
//! ```text
//! PaletteGenerating ──ok──▶ PaletteGenerated ──▶ Finalizing ──ok──▶ Done
//!        │                                           │
//!        └──────────────err──────────▶ Failed ◀──err─┘
//! ```
//!
//! The palette file is owned by a drop guard held by the job; reaching a
//! terminal state (or dropping the job early) removes it.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use shared_utils::logging::log_external_tool;
use shared_utils::{AppError, FfmpegProcess, ProcessOutput};
use tracing::{debug, info, warn};

use crate::command_builder::{CommandSpec, TranscodePlan};

/// Process-spawning seam. `SystemRunner` is the real implementation; tests
/// substitute a scripted one.
pub trait CommandRunner: Send + Sync {
    /// Runs `spec` to completion. A non-zero exit is *not* an error here;
    /// only spawn failures and deadline expiry are.
    fn run(&self, spec: &CommandSpec, deadline: Option<Duration>) -> Result<ProcessOutput, AppError>;
}

/// Spawns real child processes through [`FfmpegProcess`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, spec: &CommandSpec, deadline: Option<Duration>) -> Result<ProcessOutput, AppError> {
        let mut cmd = spec.to_command();
        let output = FfmpegProcess::spawn(&mut cmd)?.wait_with_deadline(deadline)?;
        log_external_tool(
            &spec.program,
            &spec.args,
            &output.combined(),
            output.exit_code,
            output.elapsed,
        );
        Ok(output)
    }
}

#[derive(Clone)]
pub struct TranscodeExecutor {
    runner: Arc<dyn CommandRunner>,
    deadline: Option<Duration>,
}

impl std::fmt::Debug for TranscodeExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranscodeExecutor")
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

impl TranscodeExecutor {
    pub fn new(runner: Arc<dyn CommandRunner>, deadline: Option<Duration>) -> Self {
        Self { runner, deadline }
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline
    }

    /// Runs one invocation; non-zero exit becomes `TranscodeFailure`.
    pub fn run(&self, spec: &CommandSpec) -> Result<ProcessOutput, AppError> {
        debug!(command = %spec.command_line(), "Running transcode step");
        let output = self.runner.run(spec, self.deadline)?;
        if output.success {
            Ok(output)
        } else {
            Err(AppError::transcode_failure(output.exit_code, output.combined())
                .with_command(spec.command_line()))
        }
    }

    pub fn execute(&self, plan: &TranscodePlan) -> Result<(), AppError> {
        match plan {
            TranscodePlan::Simple(spec) => self.run(spec).map(|_| ()),
            TranscodePlan::Palette {
                generate,
                apply,
                palette,
            } => PaletteJob::new(palette.clone()).run(self, generate, apply),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaletteState {
    PaletteGenerating,
    PaletteGenerated,
    Finalizing,
    Done,
    Failed,
}

impl PaletteState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PaletteState::Done | PaletteState::Failed)
    }
}

/// Removes the palette file when dropped. Already-missing is fine.
#[derive(Debug)]
pub struct PaletteArtifact {
    path: PathBuf,
}

impl PaletteArtifact {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PaletteArtifact {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Removed palette artifact"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to remove palette artifact"),
        }
    }
}

/// Two-pass palette encode.
#[derive(Debug)]
pub struct PaletteJob {
    state: PaletteState,
    artifact: Option<PaletteArtifact>,
}

impl PaletteJob {
    pub fn new(palette: PathBuf) -> Self {
        Self {
            state: PaletteState::PaletteGenerating,
            artifact: Some(PaletteArtifact::new(palette)),
        }
    }

    pub fn state(&self) -> PaletteState {
        self.state
    }

    /// Pass 2 runs only after pass 1 succeeded. The palette is removed
    /// whatever the outcome.
    pub fn run(
        &mut self,
        executor: &TranscodeExecutor,
        generate: &CommandSpec,
        apply: &CommandSpec,
    ) -> Result<(), AppError> {
        if let Err(e) = executor.run(generate) {
            self.finish(PaletteState::Failed);
            return Err(e);
        }
        self.state = PaletteState::PaletteGenerated;
        debug!(
            palette = ?self.artifact.as_ref().map(|a| a.path().display().to_string()),
            "Palette generated"
        );

        self.state = PaletteState::Finalizing;
        match executor.run(apply) {
            Ok(_) => {
                self.finish(PaletteState::Done);
                info!("Palette encode finished");
                Ok(())
            }
            Err(e) => {
                self.finish(PaletteState::Failed);
                Err(e)
            }
        }
    }

    fn finish(&mut self, terminal: PaletteState) {
        debug_assert!(terminal.is_terminal());
        self.state = terminal;
        self.artifact.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command_builder::{build, TranscodeJob};
    use crate::quality::QualityTier;
    use crate::test_support::ScriptedRunner;
    use tempfile::TempDir;

    fn palette_plan(dir: &Path) -> TranscodePlan {
        build(&TranscodeJob::new(
            dir.join("in.mp4"),
            dir.join("out.gif"),
            QualityTier::Ultra,
        ))
    }

    #[test]
    fn test_non_zero_exit_is_transcode_failure() {
        let runner = Arc::new(ScriptedRunner::failing_ffmpeg(1, "[gif] Error: bad input"));
        let executor = TranscodeExecutor::new(runner, None);
        let err = executor
            .run(&CommandSpec::new("ffmpeg").args(["-i", "x.mp4", "x.gif"]))
            .unwrap_err();
        match err {
            AppError::TranscodeFailure {
                exit_code,
                summary,
                command,
                ..
            } => {
                assert_eq!(exit_code, Some(1));
                assert!(summary.contains("bad input"));
                assert_eq!(command.as_deref(), Some("ffmpeg -i x.mp4 x.gif"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_palette_success_removes_palette() {
        let temp = TempDir::new().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        let executor = TranscodeExecutor::new(runner.clone(), None);
        let plan = palette_plan(temp.path());

        executor.execute(&plan).unwrap();

        assert_eq!(runner.calls().len(), 2);
        assert!(!plan.palette_path().unwrap().exists());
        assert!(temp.path().join("out.gif").exists());
    }

    #[test]
    fn test_palette_second_pass_failure_removes_palette() {
        let temp = TempDir::new().unwrap();
        let runner = Arc::new(ScriptedRunner::fail_nth_ffmpeg(2, 1, "Error: paletteuse"));
        let executor = TranscodeExecutor::new(runner.clone(), None);
        let TranscodePlan::Palette { generate, apply, palette } = palette_plan(temp.path()) else {
            panic!("expected palette plan");
        };

        let mut job = PaletteJob::new(palette.clone());
        let result = job.run(&executor, &generate, &apply);

        assert!(matches!(result, Err(AppError::TranscodeFailure { .. })));
        assert_eq!(job.state(), PaletteState::Failed);
        assert_eq!(runner.calls().len(), 2);
        assert!(!palette.exists());
    }

    #[test]
    fn test_palette_first_pass_failure_skips_second() {
        let temp = TempDir::new().unwrap();
        let runner = Arc::new(ScriptedRunner::fail_nth_ffmpeg(1, 1, "Error: palettegen"));
        let executor = TranscodeExecutor::new(runner.clone(), None);
        let TranscodePlan::Palette { generate, apply, palette } = palette_plan(temp.path()) else {
            panic!("expected palette plan");
        };

        let mut job = PaletteJob::new(palette.clone());
        assert!(job.run(&executor, &generate, &apply).is_err());
        assert_eq!(job.state(), PaletteState::Failed);
        assert_eq!(runner.calls().len(), 1);
        assert!(!palette.exists());
    }

    #[test]
    fn test_palette_job_done_state() {
        let temp = TempDir::new().unwrap();
        let executor = TranscodeExecutor::new(Arc::new(ScriptedRunner::new()), None);
        let TranscodePlan::Palette { generate, apply, palette } = palette_plan(temp.path()) else {
            panic!("expected palette plan");
        };
        let mut job = PaletteJob::new(palette);
        assert_eq!(job.state(), PaletteState::PaletteGenerating);
        job.run(&executor, &generate, &apply).unwrap();
        assert_eq!(job.state(), PaletteState::Done);
    }

    #[test]
    fn test_artifact_drop_tolerates_missing_file() {
        let temp = TempDir::new().unwrap();
        let artifact = PaletteArtifact::new(temp.path().join("never_written.png"));
        drop(artifact);
    }

    #[test]
    fn test_dropped_job_removes_palette() {
        let temp = TempDir::new().unwrap();
        let palette = temp.path().join("p.png");
        std::fs::write(&palette, b"png").unwrap();
        drop(PaletteJob::new(palette.clone()));
        assert!(!palette.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_system_runner_timeout() {
        let executor = TranscodeExecutor::new(Arc::new(SystemRunner), Some(Duration::from_millis(200)));
        let err = executor
            .run(&CommandSpec::new("sh").args(["-c", "sleep 30"]))
            .unwrap_err();
        assert!(matches!(err, AppError::Timeout { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_system_runner_exit_code() {
        let executor = TranscodeExecutor::new(Arc::new(SystemRunner), Some(Duration::from_secs(10)));
        let err = executor
            .run(&CommandSpec::new("sh").args(["-c", "echo 'Error: nope' 1>&2; exit 2"]))
            .unwrap_err();
        assert!(matches!(err, AppError::TranscodeFailure { exit_code: Some(2), .. }));
    }
}
