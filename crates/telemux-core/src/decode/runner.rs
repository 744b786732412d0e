use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use super::{DecodeOutcome, DecodeTask, DecoderConfig, FailureReason};

/// How often a worker checks a running decoder against its deadline.
const POLL_INTERVAL: Duration = Duration::from_millis(25);

pub(crate) fn run_decoder(config: &DecoderConfig, task: &DecodeTask) -> DecodeOutcome {
    let mut command = Command::new(&config.executable);
    command
        .arg(&task.input)
        .arg(&task.artifact)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        // Own process group, so a timeout can take down the decoder's
        // children along with it.
        command.process_group(0);
    }

    let mut child = match command.spawn() {
        Ok(child) => child,
        // Preflight already ran; losing the executable between preflight
        // and spawn is still a missing decoder to the caller.
        Err(_) => {
            return DecodeOutcome::Failure {
                reason: FailureReason::DecoderMissing,
            };
        }
    };

    let status = match wait_with_deadline(&mut child, config.timeout) {
        WaitOutcome::Exited(status) => status,
        WaitOutcome::TimedOut => {
            kill_and_reap(&mut child);
            return DecodeOutcome::Failure {
                reason: FailureReason::Timeout {
                    secs: config.timeout.as_secs(),
                },
            };
        }
        WaitOutcome::WaitFailed(err) => {
            kill_and_reap(&mut child);
            return DecodeOutcome::Failure {
                reason: FailureReason::NonZeroExit {
                    status: None,
                    stderr: err.to_string(),
                },
            };
        }
    };

    if !status.success() {
        let stderr = drain_stderr(&mut child);
        return DecodeOutcome::Failure {
            reason: FailureReason::NonZeroExit {
                status: status.code(),
                stderr,
            },
        };
    }

    match std::fs::metadata(&task.artifact) {
        Ok(meta) if meta.len() > 0 => DecodeOutcome::Success {
            artifact: task.artifact.clone(),
            bytes: meta.len(),
        },
        _ => DecodeOutcome::Failure {
            reason: FailureReason::EmptyOutput,
        },
    }
}

enum WaitOutcome {
    Exited(ExitStatus),
    TimedOut,
    WaitFailed(std::io::Error),
}

fn wait_with_deadline(child: &mut Child, timeout: Duration) -> WaitOutcome {
    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return WaitOutcome::Exited(status),
            Ok(None) => {
                if Instant::now() >= deadline {
                    return WaitOutcome::TimedOut;
                }
                std::thread::sleep(POLL_INTERVAL);
            }
            Err(err) => return WaitOutcome::WaitFailed(err),
        }
    }
}

#[cfg(unix)]
fn kill_and_reap(child: &mut Child) {
    // The child leads its own process group; negative pid signals the
    // whole group.
    unsafe {
        libc::kill(-(child.id() as i32), libc::SIGKILL);
    }
    let _ = child.wait();
}

#[cfg(not(unix))]
fn kill_and_reap(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

fn drain_stderr(child: &mut Child) -> String {
    let mut text = String::new();
    if let Some(mut stderr) = child.stderr.take() {
        let _ = stderr.read_to_string(&mut text);
    }
    text.trim_end().to_string()
}
