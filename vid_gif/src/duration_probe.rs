//! Source duration detection with a three-step ffprobe fallback chain.
//!
//! 1. container `format=duration`
//! 2. first positive `stream=duration`
//! 3. `duration` field scraped from the JSON format dump
//!
//! If nothing yields a positive finite number the configured fallback is
//! returned and flagged unreliable. Probing never fails.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use shared_utils::{safe_path_arg, FFPROBE};
use tracing::{debug, info, warn};

use crate::command_builder::CommandSpec;
use crate::executor::CommandRunner;

pub const DEFAULT_FALLBACK_SECS: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ProbeSource {
    Format,
    Stream,
    MetadataDump,
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceDurationEstimate {
    pub seconds: f64,
    pub source: ProbeSource,
}

impl SourceDurationEstimate {
    /// False when the value is the fallback rather than a measurement.
    pub fn reliable(&self) -> bool {
        self.source != ProbeSource::Fallback
    }
}

#[derive(Clone)]
pub struct DurationProbe {
    runner: Arc<dyn CommandRunner>,
    deadline: Option<Duration>,
    fallback_secs: f64,
}

impl DurationProbe {
    pub fn new(runner: Arc<dyn CommandRunner>, deadline: Option<Duration>) -> Self {
        Self {
            runner,
            deadline,
            fallback_secs: DEFAULT_FALLBACK_SECS,
        }
    }

    pub fn with_fallback(mut self, secs: f64) -> Self {
        self.fallback_secs = secs;
        self
    }

    pub fn probe(&self, path: &Path) -> SourceDurationEstimate {
        let strategies: [(ProbeSource, fn(&str) -> Option<f64>); 3] = [
            (ProbeSource::Format, parse_positive),
            (ProbeSource::Stream, parse_stream_durations),
            (ProbeSource::MetadataDump, extract_duration_field),
        ];

        for (source, parse) in strategies {
            let spec = probe_command(source, path);
            let Some(stdout) = self.capture(&spec) else {
                continue;
            };
            if let Some(seconds) = parse(&stdout) {
                info!(
                    file = %path.display(),
                    seconds,
                    source = ?source,
                    "Probed source duration"
                );
                return SourceDurationEstimate { seconds, source };
            }
            debug!(source = ?source, output = %stdout.trim(), "Probe strategy yielded no duration");
        }

        warn!(
            file = %path.display(),
            fallback_secs = self.fallback_secs,
            "Could not determine source duration, using fallback"
        );
        SourceDurationEstimate {
            seconds: self.fallback_secs,
            source: ProbeSource::Fallback,
        }
    }

    /// stdout of a successful run; `None` on spawn failure, timeout or
    /// non-zero exit.
    fn capture(&self, spec: &CommandSpec) -> Option<String> {
        match self.runner.run(spec, self.deadline) {
            Ok(output) if output.success => Some(output.stdout),
            Ok(output) => {
                debug!(
                    command = %spec.command_line(),
                    exit_code = ?output.exit_code,
                    "Probe command failed"
                );
                None
            }
            Err(e) => {
                debug!(command = %spec.command_line(), error = %e, "Probe command did not run");
                None
            }
        }
    }
}

fn probe_command(source: ProbeSource, path: &Path) -> CommandSpec {
    let spec = CommandSpec::new(FFPROBE).args(["-v", "quiet"]);
    let spec = match source {
        ProbeSource::Format => spec.args(["-show_entries", "format=duration", "-of", "csv=p=0"]),
        ProbeSource::Stream => spec.args(["-show_entries", "stream=duration", "-of", "csv=p=0"]),
        ProbeSource::MetadataDump | ProbeSource::Fallback => {
            spec.args(["-print_format", "json", "-show_format"])
        }
    };
    spec.arg(safe_path_arg(path))
}

/// Strictly positive finite float, surrounding whitespace ignored.
pub fn parse_positive(s: &str) -> Option<f64> {
    s.trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && *v > 0.0)
}

/// First line that parses to a positive duration; blanks and `N/A` skipped.
pub fn parse_stream_durations(s: &str) -> Option<f64> {
    s.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && *l != "N/A")
        .find_map(parse_positive)
}

/// Textual scan for the first `"duration"` key in ffprobe's JSON dump.
pub fn extract_duration_field(json: &str) -> Option<f64> {
    const KEY: &str = "\"duration\"";
    let after_key = &json[json.find(KEY)? + KEY.len()..];
    let after_colon = &after_key[after_key.find(':')? + 1..];
    let end = after_colon
        .find([',', '\n', '}'])
        .unwrap_or(after_colon.len());
    let raw = after_colon[..end].trim().trim_matches('"').trim();
    parse_positive(raw)
}
