//! Retention Sweeper - time-based cleanup of uploads and outputs
//!
//! ## Policies
//! - periodic: uploads older than 24h, outputs older than 12h
//! - forced: every upload, outputs older than 1h
//! - max age zero deletes unconditionally
//!
//! ## Lifecycle
//! The sweeper is an ordinary value owned by whoever starts it. `start()`
//! spawns one background thread that sweeps every `interval`; the returned
//! [`SweeperHandle`] stops it on `stop()` or drop.
//!
//! ```ignore
//! let sweeper = Arc::new(RetentionSweeper::from_config(&config));
//! let handle = sweeper.start();
//! // ...
//! handle.stop();
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

use serde::Serialize;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::{ServiceConfig, HOUR};

/// Files under `dir` older than `max_age` are removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub dir: PathBuf,
    pub max_age: Duration,
}

impl RetentionPolicy {
    pub fn new(dir: impl Into<PathBuf>, max_age: Duration) -> Self {
        Self {
            dir: dir.into(),
            max_age,
        }
    }

    pub fn is_expired(&self, age: Duration) -> bool {
        self.max_age.is_zero() || age > self.max_age
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub scanned: u64,
    pub removed: u64,
    pub failed: u64,
    pub bytes_freed: u64,
}

impl SweepReport {
    fn merge(&mut self, other: &SweepReport) {
        self.scanned += other.scanned;
        self.removed += other.removed;
        self.failed += other.failed;
        self.bytes_freed += other.bytes_freed;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryUsage {
    pub path: String,
    pub bytes: u64,
    pub files: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiskUsage {
    pub directories: Vec<DirectoryUsage>,
    pub total_bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweeperState {
    Idle,
    Sweeping,
}

#[derive(Debug)]
pub struct RetentionSweeper {
    policies: Vec<RetentionPolicy>,
    forced: Vec<RetentionPolicy>,
    interval: Duration,
    /// Sweeps in progress; periodic and forced sweeps may overlap.
    active: AtomicUsize,
}

impl RetentionSweeper {
    /// `forced` defaults to the same directories with a zero max age.
    pub fn new(policies: Vec<RetentionPolicy>, interval: Duration) -> Self {
        let forced = policies
            .iter()
            .map(|p| RetentionPolicy::new(&p.dir, Duration::ZERO))
            .collect();
        Self {
            policies,
            forced,
            interval,
            active: AtomicUsize::new(0),
        }
    }

    pub fn with_forced_policies(mut self, forced: Vec<RetentionPolicy>) -> Self {
        self.forced = forced;
        self
    }

    pub fn from_config(config: &ServiceConfig) -> Self {
        Self::new(
            vec![
                RetentionPolicy::new(&config.uploads_dir, config.uploads_max_age),
                RetentionPolicy::new(&config.output_dir, config.output_max_age),
            ],
            config.sweep_interval,
        )
        .with_forced_policies(vec![
            RetentionPolicy::new(&config.uploads_dir, Duration::ZERO),
            RetentionPolicy::new(&config.output_dir, HOUR),
        ])
    }

    pub fn policies(&self) -> &[RetentionPolicy] {
        &self.policies
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn state(&self) -> SweeperState {
        if self.active.load(Ordering::SeqCst) > 0 {
            SweeperState::Sweeping
        } else {
            SweeperState::Idle
        }
    }

    /// One pass over the periodic policies.
    pub fn sweep(&self) -> SweepReport {
        self.sweep_policies(&self.policies)
    }

    /// One pass over the forced policies.
    pub fn force_cleanup(&self) -> SweepReport {
        info!("Forced cleanup requested");
        self.sweep_policies(&self.forced)
    }

    pub fn sweep_policies(&self, policies: &[RetentionPolicy]) -> SweepReport {
        self.active.fetch_add(1, Ordering::SeqCst);
        let _active = ActiveGuard(&self.active);

        let now = SystemTime::now();
        let mut total = SweepReport::default();
        for policy in policies {
            let report = sweep_dir(policy, now);
            info!(
                dir = %policy.dir.display(),
                max_age_secs = policy.max_age.as_secs(),
                scanned = report.scanned,
                removed = report.removed,
                failed = report.failed,
                bytes_freed = report.bytes_freed,
                "Retention sweep finished"
            );
            total.merge(&report);
        }
        total
    }

    /// Fresh recursive size of every policy directory.
    pub fn disk_usage(&self) -> DiskUsage {
        let directories: Vec<DirectoryUsage> = self
            .policies
            .iter()
            .map(|p| {
                let (bytes, files) = dir_size(&p.dir);
                DirectoryUsage {
                    path: p.dir.display().to_string(),
                    bytes,
                    files,
                }
            })
            .collect();
        let total_bytes = directories.iter().map(|d| d.bytes).sum();
        DiskUsage {
            directories,
            total_bytes,
        }
    }

    /// Spawns the periodic sweep thread. The first sweep runs one interval
    /// after start.
    pub fn start(self: &Arc<Self>) -> SweeperHandle {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let sweeper = Arc::clone(self);
        let interval = self.interval;

        let thread = thread::spawn(move || {
            info!(interval_secs = interval.as_secs(), "Retention sweeper started");
            loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        sweeper.sweep();
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            info!("Retention sweeper stopped");
        });

        SweeperHandle {
            stop_tx: Some(stop_tx),
            thread: Some(thread),
        }
    }
}

struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Stops the background sweep on `stop()` or drop. A sweep already running
/// completes first.
pub struct SweeperHandle {
    stop_tx: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl SweeperHandle {
    pub fn stop(mut self) {
        self.shutdown();
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().map(|t| !t.is_finished()).unwrap_or(false)
    }

    fn shutdown(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Retention sweeper thread panicked");
            }
        }
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn sweep_dir(policy: &RetentionPolicy, now: SystemTime) -> SweepReport {
    let mut report = SweepReport::default();
    if !policy.dir.exists() {
        debug!(dir = %policy.dir.display(), "Retention directory missing, nothing to sweep");
        return report;
    }

    for entry in WalkDir::new(&policy.dir).follow_links(false) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!(dir = %policy.dir.display(), error = %e, "Failed to read entry during sweep");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        report.scanned += 1;

        let meta = match entry.metadata() {
            Ok(m) => m,
            Err(e) => {
                debug!(path = %entry.path().display(), error = %e, "File vanished before stat");
                continue;
            }
        };
        let age = meta
            .modified()
            .ok()
            .and_then(|m| now.duration_since(m).ok())
            .unwrap_or(Duration::ZERO);
        if !policy.is_expired(age) {
            continue;
        }

        match remove_file(entry.path()) {
            Ok(()) => {
                debug!(path = %entry.path().display(), age_secs = age.as_secs(), "Removed expired file");
                report.removed += 1;
                report.bytes_freed += meta.len();
            }
            Err(e) => {
                warn!(path = %entry.path().display(), error = %e, "Failed to remove expired file");
                report.failed += 1;
            }
        }
    }
    report
}

/// `NotFound` counts as removed.
fn remove_file(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// (bytes, files); a missing directory is empty.
fn dir_size(dir: &Path) -> (u64, u64) {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .fold((0, 0), |(bytes, files), m| (bytes + m.len(), files + 1))
}
