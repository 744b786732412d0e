//! Telemux core library for multi-sensor capture processing.
//!
//! This crate implements the offline pipeline used by the CLI: a capture
//! source feeds the demultiplexer, which splits the interleaved byte
//! stream into one sink per sensor handle; the decode dispatcher drives
//! an external decoder over each sink under a time budget; the job layer
//! aggregates per-sensor outcomes into a deterministic report. Framing is
//! byte-oriented; all file I/O is isolated in `source` and `demux`.
//!
//! Invariants:
//! - Report outputs are deterministic: sensors and failures are ordered
//!   by ascending connection handle, and sink files are named from the
//!   handle value so re-runs are reproducible.
//! - Bytes within a sensor sink keep source arrival order.
//! - A truncated capture keeps the data received before the cut.
//! - Per-sensor failures are recorded in the report, never dropped.
//!
//! # Examples
//! ```no_run
//! use std::path::Path;
//!
//! use telemux_core::{DecoderConfig, JobConfig, run_job};
//!
//! let config = JobConfig::new(DecoderConfig::new("./fifo_decoder"));
//! let report = run_job(Path::new("ride.bin"), &config)?;
//! println!("decoded sensors: {}", report.sensors.len());
//! # Ok::<(), telemux_core::JobError>(())
//! ```

use serde::{Deserialize, Serialize};

mod decode;
mod demux;
mod job;
mod source;

pub use decode::{
    DEFAULT_MAX_JOBS, DEFAULT_TIMEOUT, DecodeOutcome, DecodeResult, DecodeTask, DecoderConfig,
    DispatchError, FailureReason, dispatch_all,
};
pub use demux::{
    DemuxError, DemuxOutput, FinalizedSink, SinkFailure, Truncation, capture_stem,
    demux_capture_file, demux_source,
};
pub use job::{FailurePolicy, JobConfig, JobError, run_job};
pub use source::{CaptureFileSource, Packet, PacketHeader, PacketSource, SourceError};

/// Current report schema version.
pub const REPORT_VERSION: u32 = 1;
/// Default timestamp used when no generation time is available.
pub const DEFAULT_GENERATED_AT: &str = "1970-01-01T00:00:00Z";

/// Aggregated job report with deterministic ordering.
///
/// # Examples
/// ```
/// use telemux_core::make_stub_report;
///
/// let report = make_stub_report("ride.bin", 123);
/// assert_eq!(report.report_version, telemux_core::REPORT_VERSION);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobReport {
    /// Report schema version (not the binary version).
    pub report_version: u32,
    /// Tool identification metadata.
    pub tool: ToolInfo,
    /// RFC3339 timestamp representing the report generation time.
    pub generated_at: String,

    /// Input capture metadata.
    pub input: InputInfo,

    /// Capture-level counters from the demux pass.
    pub capture: CaptureStats,
    /// Whether every detected sensor made it into `sensors`.
    pub status: JobStatus,
    /// Successfully decoded sensors in ascending handle order.
    pub sensors: Vec<SensorRecord>,
    /// Sensors that failed, with the reason, in ascending handle order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<FailureRecord>,
}

/// Job-level completeness marker.
///
/// `Partial` means the report is usable but some sensor data was lost:
/// a sensor failed to decode, its sink failed, or the capture was
/// truncated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Complete,
    Partial,
}

/// Tool metadata embedded in reports.
///
/// # Examples
/// ```
/// use telemux_core::ToolInfo;
///
/// let tool = ToolInfo {
///     name: "telemux".to_string(),
///     version: "0.1.0".to_string(),
/// };
/// assert_eq!(tool.name, "telemux");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInfo {
    /// Tool name (e.g., "telemux").
    pub name: String,
    /// Tool version (semver).
    pub version: String,
}

/// Input capture metadata embedded in reports.
///
/// # Examples
/// ```
/// use telemux_core::InputInfo;
///
/// let input = InputInfo {
///     path: "ride.bin".to_string(),
///     bytes: 1024,
/// };
/// assert_eq!(input.bytes, 1024);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputInfo {
    /// Input path as provided to the pipeline.
    pub path: String,
    /// Input size in bytes.
    pub bytes: u64,
}

/// Capture-level counters from the demux pass.
///
/// # Examples
/// ```
/// use telemux_core::CaptureStats;
///
/// let stats = CaptureStats {
///     packets_total: 10,
///     payload_bytes_total: 120,
///     sensors_detected: 2,
///     truncated_at: None,
/// };
/// assert_eq!(stats.sensors_detected, 2);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureStats {
    /// Packets observed on the source stream.
    pub packets_total: u64,
    /// Payload bytes observed on the source stream (headers excluded).
    pub payload_bytes_total: u64,
    /// Distinct connection handles observed, including failed sensors.
    pub sensors_detected: usize,
    /// Byte offset where the capture was cut short, when truncated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub truncated_at: Option<u64>,
}

/// One successfully decoded sensor.
///
/// # Examples
/// ```
/// use telemux_core::SensorRecord;
///
/// let record = SensorRecord {
///     handle: 1,
///     packets: 3,
///     sink_bytes: 12,
///     sink_path: "ride_sensor_1.bin".to_string(),
///     artifact_path: "ride_sensor_1.csv".to_string(),
///     artifact_bytes: 64,
/// };
/// assert_eq!(record.handle, 1);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorRecord {
    /// Connection handle identifying the physical sensor.
    pub handle: u16,
    /// Packets routed to this sensor's sink.
    pub packets: u64,
    /// Payload bytes written to this sensor's sink.
    pub sink_bytes: u64,
    /// Intermediate raw byte-stream file for this sensor.
    pub sink_path: String,
    /// Decoded artifact produced by the external decoder.
    pub artifact_path: String,
    /// Decoded artifact size in bytes.
    pub artifact_bytes: u64,
}

/// One failed sensor and why it failed.
///
/// # Examples
/// ```
/// use telemux_core::{FailureReason, FailureRecord};
///
/// let failure = FailureRecord {
///     handle: 2,
///     reason: FailureReason::Timeout { secs: 60 },
/// };
/// assert_eq!(failure.handle, 2);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureRecord {
    /// Connection handle identifying the physical sensor.
    pub handle: u16,
    /// Failure reason, tagged with the taxonomy kind.
    pub reason: FailureReason,
}

/// Build a stub report with base fields filled and empty aggregates.
///
/// # Examples
/// ```
/// use telemux_core::make_stub_report;
///
/// let report = make_stub_report("ride.bin", 123);
/// assert_eq!(report.report_version, telemux_core::REPORT_VERSION);
/// assert!(report.sensors.is_empty());
/// ```
pub fn make_stub_report(input_path: &str, input_bytes: u64) -> JobReport {
    JobReport {
        report_version: REPORT_VERSION,
        tool: ToolInfo {
            name: "telemux".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        },
        generated_at: DEFAULT_GENERATED_AT.to_string(),
        input: InputInfo {
            path: input_path.to_string(),
            bytes: input_bytes,
        },
        capture: CaptureStats {
            packets_total: 0,
            payload_bytes_total: 0,
            sensors_detected: 0,
            truncated_at: None,
        },
        status: JobStatus::Complete,
        sensors: vec![],
        failures: vec![],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_omits_optional_fields_when_absent() {
        let mut report = make_stub_report("ride.bin", 1);
        report.sensors.push(SensorRecord {
            handle: 1,
            packets: 3,
            sink_bytes: 12,
            sink_path: "ride_sensor_1.bin".to_string(),
            artifact_path: "ride_sensor_1.csv".to_string(),
            artifact_bytes: 64,
        });

        let value = serde_json::to_value(&report).expect("report json");
        assert!(value.get("failures").is_none());
        let capture = value.get("capture").expect("capture");
        assert!(capture.get("truncated_at").is_none());
        assert_eq!(value["status"], "complete");
    }

    #[test]
    fn report_includes_failures_when_present() {
        let mut report = make_stub_report("ride.bin", 1);
        report.status = JobStatus::Partial;
        report.failures.push(FailureRecord {
            handle: 2,
            reason: FailureReason::EmptyOutput,
        });

        let value = serde_json::to_value(&report).expect("report json");
        assert_eq!(value["status"], "partial");
        let failures = value["failures"].as_array().expect("failures array");
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0]["handle"], 2);
        assert_eq!(failures[0]["reason"]["kind"], "empty-or-missing-output");
    }

    #[test]
    fn report_round_trips_through_json() {
        let mut report = make_stub_report("ride.bin", 9);
        report.capture.truncated_at = Some(42);
        report.failures.push(FailureRecord {
            handle: 7,
            reason: FailureReason::NonZeroExit {
                status: Some(3),
                stderr: "bad frame".to_string(),
            },
        });

        let json = serde_json::to_string(&report).expect("serialize");
        let parsed: JobReport = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed.capture.truncated_at, Some(42));
        assert_eq!(parsed.failures.len(), 1);
        assert!(matches!(
            parsed.failures[0].reason,
            FailureReason::NonZeroExit { status: Some(3), .. }
        ));
    }
}
