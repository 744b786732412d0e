//! External decoder dispatch.
//!
//! Each finalized sensor sink becomes one decode task. Tasks are
//! independent: they run on a bounded worker pool and one task's failure
//! never aborts another's in-flight decode. The decoder is an opaque
//! external program invoked as `decoder <input> <output>`.

mod runner;

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use crossbeam::channel::bounded;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::demux::FinalizedSink;

/// Default per-invocation time budget.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
/// Default upper bound on concurrent decoder processes.
pub const DEFAULT_MAX_JOBS: usize = 4;

/// Decoder configuration, passed in explicitly so tests can substitute a
/// fake decoder. There is no process-wide decoder path.
#[derive(Debug, Clone)]
pub struct DecoderConfig {
    pub executable: PathBuf,
    pub timeout: Duration,
    pub max_jobs: usize,
}

impl DecoderConfig {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            timeout: DEFAULT_TIMEOUT,
            max_jobs: DEFAULT_MAX_JOBS,
        }
    }
}

/// One finalized sink bound to its target artifact path.
#[derive(Debug, Clone)]
pub struct DecodeTask {
    pub handle: u16,
    pub input: PathBuf,
    pub artifact: PathBuf,
}

impl DecodeTask {
    /// Bind a finalized sink to the artifact path
    /// `<stem>_sensor_<handle>.csv` in `out_dir`.
    pub fn for_sink(sink: &FinalizedSink, out_dir: &Path, stem: &str) -> Self {
        Self {
            handle: sink.handle,
            input: sink.path.clone(),
            artifact: out_dir.join(format!("{stem}_sensor_{}.csv", sink.handle)),
        }
    }
}

/// Why a sensor failed, as recorded in the job report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum FailureReason {
    /// The configured decoder executable was absent or not executable.
    DecoderMissing,
    /// The decoder exited with a non-zero status.
    NonZeroExit {
        #[serde(skip_serializing_if = "Option::is_none")]
        status: Option<i32>,
        #[serde(default, skip_serializing_if = "String::is_empty")]
        stderr: String,
    },
    /// The decoder exceeded its time budget and was killed.
    Timeout { secs: u64 },
    /// The decoder exited cleanly but left no usable artifact.
    #[serde(rename = "empty-or-missing-output")]
    EmptyOutput,
    /// The sensor's sink could not be created or written during demuxing.
    SinkIo { error: String },
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::DecoderMissing => {
                write!(f, "decoder executable missing or not executable")
            }
            FailureReason::NonZeroExit { status, stderr } => {
                match status {
                    Some(code) => write!(f, "decoder exited with status {code}")?,
                    None => write!(f, "decoder terminated by signal")?,
                }
                if !stderr.is_empty() {
                    write!(f, ": {stderr}")?;
                }
                Ok(())
            }
            FailureReason::Timeout { secs } => write!(f, "decoder timed out after {secs}s"),
            FailureReason::EmptyOutput => {
                write!(f, "decoder produced an empty or missing output artifact")
            }
            FailureReason::SinkIo { error } => write!(f, "sink I/O error: {error}"),
        }
    }
}

/// Result of one decode attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeOutcome {
    Success { artifact: PathBuf, bytes: u64 },
    Failure { reason: FailureReason },
}

#[derive(Debug, Clone)]
pub struct DecodeResult {
    pub handle: u16,
    pub outcome: DecodeOutcome,
}

/// Configuration-level blockers detected before any invocation.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("decoder not found: {}", path.display())]
    DecoderMissing { path: PathBuf },
    #[error("decoder is not executable: {}", path.display())]
    DecoderNotExecutable { path: PathBuf },
}

/// Run every task through the external decoder, at most
/// `config.max_jobs` at a time, and collect all outcomes in ascending
/// handle order.
///
/// A missing or non-executable decoder fails the whole dispatch up
/// front; no invocation is attempted.
pub fn dispatch_all(
    config: &DecoderConfig,
    tasks: Vec<DecodeTask>,
) -> Result<Vec<DecodeResult>, DispatchError> {
    preflight(&config.executable)?;
    if tasks.is_empty() {
        return Ok(Vec::new());
    }

    let workers = config.max_jobs.clamp(1, tasks.len());
    let (task_tx, task_rx) = bounded::<DecodeTask>(tasks.len());
    let (out_tx, out_rx) = bounded::<DecodeResult>(tasks.len());

    let mut results = Vec::with_capacity(tasks.len());
    thread::scope(|scope| {
        for _ in 0..workers {
            let task_rx = task_rx.clone();
            let out_tx = out_tx.clone();
            scope.spawn(move || {
                for task in task_rx.iter() {
                    let outcome = runner::run_decoder(config, &task);
                    match &outcome {
                        DecodeOutcome::Success { bytes, .. } => {
                            info!(handle = task.handle, bytes, "sensor decoded");
                        }
                        DecodeOutcome::Failure { reason } => {
                            warn!(handle = task.handle, %reason, "sensor decode failed");
                        }
                    }
                    let result = DecodeResult {
                        handle: task.handle,
                        outcome,
                    };
                    if out_tx.send(result).is_err() {
                        break;
                    }
                }
            });
        }
        drop(out_tx);

        for task in tasks {
            if task_tx.send(task).is_err() {
                break;
            }
        }
        drop(task_tx);

        for result in out_rx.iter() {
            results.push(result);
        }
    });

    results.sort_by_key(|result| result.handle);
    Ok(results)
}

fn preflight(executable: &Path) -> Result<(), DispatchError> {
    let missing = || DispatchError::DecoderMissing {
        path: executable.to_path_buf(),
    };
    let meta = fs::metadata(executable).map_err(|_| missing())?;
    if !meta.is_file() {
        return Err(missing());
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if meta.permissions().mode() & 0o111 == 0 {
            return Err(DispatchError::DecoderNotExecutable {
                path: executable.to_path_buf(),
            });
        }
    }
    Ok(())
}
