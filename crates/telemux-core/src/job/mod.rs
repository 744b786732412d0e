use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use tracing::info;

use crate::decode::{
    self, DecodeOutcome, DecodeTask, DecoderConfig, DispatchError, FailureReason,
};
use crate::demux::{self, DemuxError, FinalizedSink};
use crate::{
    CaptureStats, DEFAULT_GENERATED_AT, FailureRecord, JobReport, JobStatus, SensorRecord,
    make_stub_report,
};

/// Job-level rule for whether per-sensor failure aborts the whole job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Succeed with whatever sensors decoded; report the rest.
    #[default]
    Lenient,
    /// Any per-sensor failure fails the whole job.
    Strict,
}

#[derive(Debug, Clone)]
pub struct JobConfig {
    pub decoder: DecoderConfig,
    pub policy: FailurePolicy,
    /// Where sinks and artifacts are written; defaults to the capture's
    /// directory.
    pub out_dir: Option<PathBuf>,
}

impl JobConfig {
    pub fn new(decoder: DecoderConfig) -> Self {
        Self {
            decoder,
            policy: FailurePolicy::default(),
            out_dir: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum JobError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("demux error: {0}")]
    Demux(#[from] DemuxError),
    #[error("decoder missing or not executable: {}", path.display())]
    DecoderMissing { path: PathBuf },
    #[error("no sensors detected in capture")]
    NoSensorsDetected,
    #[error("all {count} sensors failed to decode")]
    AllSensorsFailed {
        count: usize,
        failures: Vec<FailureRecord>,
    },
    #[error("sensors {handles:?} failed under strict policy")]
    SensorsFailed {
        handles: Vec<u16>,
        failures: Vec<FailureRecord>,
    },
}

/// Run the full pipeline over one capture file: demux into per-sensor
/// sinks, decode each sink, aggregate the outcomes into a report.
///
/// Under the default lenient policy the job succeeds if at least one
/// sensor decoded; failed sensors are reported in `failures`. Under
/// [`FailurePolicy::Strict`] any per-sensor failure fails the job.
pub fn run_job(capture: &Path, config: &JobConfig) -> Result<JobReport, JobError> {
    let input_bytes = fs::metadata(capture)?.len();
    let out_dir = match &config.out_dir {
        Some(dir) => {
            fs::create_dir_all(dir)?;
            dir.clone()
        }
        None => capture
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(".")),
    };
    let stem = demux::capture_stem(capture);

    info!(capture = %capture.display(), "demuxing capture");
    let demuxed = demux::demux_capture_file(capture, &out_dir)?;

    if demuxed.sinks.is_empty() && demuxed.failures.is_empty() {
        return Err(JobError::NoSensorsDetected);
    }

    let mut failures: Vec<FailureRecord> = demuxed
        .failures
        .iter()
        .map(|failure| FailureRecord {
            handle: failure.handle,
            reason: FailureReason::SinkIo {
                error: failure.error.clone(),
            },
        })
        .collect();

    let tasks: Vec<DecodeTask> = demuxed
        .sinks
        .iter()
        .map(|sink| DecodeTask::for_sink(sink, &out_dir, &stem))
        .collect();
    let results = decode::dispatch_all(&config.decoder, tasks).map_err(|err| match err {
        DispatchError::DecoderMissing { path }
        | DispatchError::DecoderNotExecutable { path } => JobError::DecoderMissing { path },
    })?;

    let sink_by_handle: BTreeMap<u16, &FinalizedSink> = demuxed
        .sinks
        .iter()
        .map(|sink| (sink.handle, sink))
        .collect();

    let mut sensors = Vec::new();
    for result in results {
        let Some(sink) = sink_by_handle.get(&result.handle) else {
            continue;
        };
        match result.outcome {
            DecodeOutcome::Success { artifact, bytes } => sensors.push(SensorRecord {
                handle: sink.handle,
                packets: sink.packets,
                sink_bytes: sink.bytes,
                sink_path: sink.path.display().to_string(),
                artifact_path: artifact.display().to_string(),
                artifact_bytes: bytes,
            }),
            DecodeOutcome::Failure { reason } => failures.push(FailureRecord {
                handle: sink.handle,
                reason,
            }),
        }
    }
    failures.sort_by_key(|failure| failure.handle);

    if sensors.is_empty() {
        return Err(JobError::AllSensorsFailed {
            count: failures.len(),
            failures,
        });
    }
    if config.policy == FailurePolicy::Strict && !failures.is_empty() {
        let handles: Vec<u16> = failures.iter().map(|failure| failure.handle).collect();
        return Err(JobError::SensorsFailed { handles, failures });
    }

    let mut report = make_stub_report(&capture.display().to_string(), input_bytes);
    report.generated_at = OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .ok()
        .unwrap_or_else(|| DEFAULT_GENERATED_AT.to_string());
    report.capture = CaptureStats {
        packets_total: demuxed.packets_total,
        payload_bytes_total: demuxed.bytes_total,
        sensors_detected: demuxed.sinks.len() + demuxed.failures.len(),
        truncated_at: demuxed.truncation.map(|truncation| truncation.offset),
    };
    report.status = if failures.is_empty() && demuxed.truncation.is_none() {
        JobStatus::Complete
    } else {
        JobStatus::Partial
    };
    info!(
        decoded = sensors.len(),
        failed = failures.len(),
        "job complete"
    );
    report.sensors = sensors;
    report.failures = failures;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::{JobConfig, JobError, run_job};
    use crate::decode::DecoderConfig;
    use tempfile::TempDir;

    #[test]
    fn empty_capture_is_no_sensors_detected() {
        let temp = TempDir::new().expect("tempdir");
        let capture = temp.path().join("empty.bin");
        std::fs::write(&capture, b"").unwrap();

        let config = JobConfig::new(DecoderConfig::new("/nonexistent/decoder"));
        let err = run_job(&capture, &config).unwrap_err();
        assert!(matches!(err, JobError::NoSensorsDetected));
    }

    #[test]
    fn short_trailing_bytes_alone_are_no_sensors_detected() {
        let temp = TempDir::new().expect("tempdir");
        let capture = temp.path().join("stub.bin");
        std::fs::write(&capture, [0x01, 0x00, 0x02]).unwrap();

        let config = JobConfig::new(DecoderConfig::new("/nonexistent/decoder"));
        let err = run_job(&capture, &config).unwrap_err();
        assert!(matches!(err, JobError::NoSensorsDetected));
    }

    #[test]
    fn missing_capture_is_io_error() {
        let config = JobConfig::new(DecoderConfig::new("/nonexistent/decoder"));
        let err = run_job(std::path::Path::new("/nonexistent/capture.bin"), &config).unwrap_err();
        assert!(matches!(err, JobError::Io(_)));
    }
}
