use std::fs;
use std::path::{Path, PathBuf};

use telemux_core::{DecoderConfig, JobConfig, JobError, demux_capture_file, run_job};
use tempfile::TempDir;

fn packet_bytes(handle: u16, timestamp_ms: u32, payload: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(8 + payload.len());
    bytes.extend_from_slice(&handle.to_le_bytes());
    bytes.extend_from_slice(&timestamp_ms.to_le_bytes());
    bytes.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    bytes.extend_from_slice(payload);
    bytes
}

/// Two interleaved sensors: handle 1 with three 4-byte packets, handle 2
/// with three 2-byte packets, interleaved 1,2,1,2,1,2.
fn interleaved_capture(dir: &Path) -> PathBuf {
    let path = dir.join("ride.bin");
    let mut data = Vec::new();
    data.extend(packet_bytes(1, 0, &[1, 2, 3, 4]));
    data.extend(packet_bytes(2, 5, &[9, 9]));
    data.extend(packet_bytes(1, 10, &[5, 6, 7, 8]));
    data.extend(packet_bytes(2, 15, &[8, 8]));
    data.extend(packet_bytes(1, 20, &[0, 1, 2, 3]));
    data.extend(packet_bytes(2, 25, &[7, 7]));
    fs::write(&path, data).expect("write capture");
    path
}

#[cfg(unix)]
fn write_script(dir: &Path, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;
    let path = dir.join("decoder.sh");
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write script");
    let mut perms = fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).unwrap();
    path
}

#[test]
fn demux_splits_interleaved_handles() {
    let temp = TempDir::new().expect("tempdir");
    let capture = interleaved_capture(temp.path());

    let out = demux_capture_file(&capture, temp.path()).unwrap();
    assert_eq!(out.packets_total, 6);
    assert_eq!(out.bytes_total, 18);
    assert!(out.truncation.is_none());

    assert_eq!(out.sinks.len(), 2);
    assert_eq!(out.sinks[0].handle, 1);
    assert_eq!(out.sinks[0].bytes, 12);
    assert_eq!(out.sinks[1].handle, 2);
    assert_eq!(out.sinks[1].bytes, 6);

    // Payloads appear in original sub-order, headers stripped.
    assert_eq!(
        fs::read(temp.path().join("ride_sensor_1.bin")).unwrap(),
        vec![1, 2, 3, 4, 5, 6, 7, 8, 0, 1, 2, 3]
    );
    assert_eq!(
        fs::read(temp.path().join("ride_sensor_2.bin")).unwrap(),
        vec![9, 9, 8, 8, 7, 7]
    );
}

#[test]
fn demux_rerun_produces_byte_identical_sinks() {
    let temp = TempDir::new().expect("tempdir");
    let capture = interleaved_capture(temp.path());

    demux_capture_file(&capture, temp.path()).unwrap();
    let first_1 = fs::read(temp.path().join("ride_sensor_1.bin")).unwrap();
    let first_2 = fs::read(temp.path().join("ride_sensor_2.bin")).unwrap();

    demux_capture_file(&capture, temp.path()).unwrap();
    assert_eq!(
        fs::read(temp.path().join("ride_sensor_1.bin")).unwrap(),
        first_1
    );
    assert_eq!(
        fs::read(temp.path().join("ride_sensor_2.bin")).unwrap(),
        first_2
    );
}

#[test]
fn demux_truncated_capture_keeps_partial_data() {
    let temp = TempDir::new().expect("tempdir");
    let path = temp.path().join("ride.bin");
    let mut data = Vec::new();
    data.extend(packet_bytes(1, 0, &[1, 2, 3, 4]));
    data.extend(packet_bytes(2, 5, &[9, 9]));
    // Header promising 8 payload bytes, only 5 present.
    let mut tail = packet_bytes(1, 10, &[0u8; 8]);
    tail.truncate(8 + 5);
    data.extend(tail);
    fs::write(&path, data).expect("write capture");

    let out = demux_capture_file(&path, temp.path()).unwrap();
    assert_eq!(out.truncation.unwrap().offset, 22 + 8 + 5);
    assert_eq!(out.sinks.len(), 2);
    assert_eq!(
        fs::read(temp.path().join("ride_sensor_1.bin")).unwrap(),
        vec![1, 2, 3, 4]
    );
    assert_eq!(
        fs::read(temp.path().join("ride_sensor_2.bin")).unwrap(),
        vec![9, 9]
    );
}

#[test]
fn job_fails_up_front_when_decoder_is_missing() {
    let temp = TempDir::new().expect("tempdir");
    let capture = interleaved_capture(temp.path());

    let config = JobConfig::new(DecoderConfig::new(temp.path().join("no-such-decoder")));
    let err = run_job(&capture, &config).unwrap_err();
    assert!(matches!(err, JobError::DecoderMissing { .. }));

    // No decode was attempted for any sensor.
    assert!(!temp.path().join("ride_sensor_1.csv").exists());
    assert!(!temp.path().join("ride_sensor_2.csv").exists());
}

#[cfg(unix)]
mod with_fake_decoders {
    use super::*;
    use std::time::Duration;
    use telemux_core::{FailurePolicy, FailureReason, JobStatus};

    #[test]
    fn lenient_job_decodes_all_sensors() {
        let temp = TempDir::new().expect("tempdir");
        let capture = interleaved_capture(temp.path());
        let decoder = write_script(temp.path(), "cp \"$1\" \"$2\"");

        let config = JobConfig::new(DecoderConfig::new(decoder));
        let report = run_job(&capture, &config).unwrap();

        assert_eq!(report.status, JobStatus::Complete);
        assert_eq!(report.capture.packets_total, 6);
        assert_eq!(report.capture.payload_bytes_total, 18);
        assert_eq!(report.capture.sensors_detected, 2);
        assert!(report.failures.is_empty());

        let handles: Vec<u16> = report.sensors.iter().map(|s| s.handle).collect();
        assert_eq!(handles, vec![1, 2]);
        for sensor in &report.sensors {
            assert_eq!(sensor.artifact_bytes, sensor.sink_bytes);
            assert!(Path::new(&sensor.artifact_path).exists());
        }
    }

    #[test]
    fn lenient_job_keeps_going_when_one_sensor_times_out() {
        let temp = TempDir::new().expect("tempdir");
        let capture = interleaved_capture(temp.path());
        let decoder = write_script(
            temp.path(),
            "case \"$1\" in *_sensor_2.bin) sleep 30 ;; esac\ncp \"$1\" \"$2\"",
        );

        let mut config = JobConfig::new(DecoderConfig::new(decoder));
        config.decoder.timeout = Duration::from_millis(300);
        let report = run_job(&capture, &config).unwrap();

        assert_eq!(report.status, JobStatus::Partial);
        let handles: Vec<u16> = report.sensors.iter().map(|s| s.handle).collect();
        assert_eq!(handles, vec![1]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].handle, 2);
        assert!(matches!(
            report.failures[0].reason,
            FailureReason::Timeout { .. }
        ));
    }

    #[test]
    fn lenient_job_reports_non_zero_exit_with_stderr() {
        let temp = TempDir::new().expect("tempdir");
        let capture = interleaved_capture(temp.path());
        let decoder = write_script(
            temp.path(),
            "case \"$1\" in *_sensor_1.bin) echo 'bad frame' >&2; exit 3 ;; esac\ncp \"$1\" \"$2\"",
        );

        let config = JobConfig::new(DecoderConfig::new(decoder));
        let report = run_job(&capture, &config).unwrap();

        assert_eq!(report.status, JobStatus::Partial);
        let handles: Vec<u16> = report.sensors.iter().map(|s| s.handle).collect();
        assert_eq!(handles, vec![2]);
        match &report.failures[0].reason {
            FailureReason::NonZeroExit { status, stderr } => {
                assert_eq!(*status, Some(3));
                assert_eq!(stderr, "bad frame");
            }
            other => panic!("expected non-zero exit, got {other:?}"),
        }
    }

    #[test]
    fn strict_policy_fails_the_job_on_any_sensor_failure() {
        let temp = TempDir::new().expect("tempdir");
        let capture = interleaved_capture(temp.path());
        let decoder = write_script(
            temp.path(),
            "case \"$1\" in *_sensor_2.bin) exit 1 ;; esac\ncp \"$1\" \"$2\"",
        );

        let mut config = JobConfig::new(DecoderConfig::new(decoder));
        config.policy = FailurePolicy::Strict;
        let err = run_job(&capture, &config).unwrap_err();
        match err {
            JobError::SensorsFailed { handles, .. } => assert_eq!(handles, vec![2]),
            other => panic!("expected strict failure, got {other:?}"),
        }
    }

    #[test]
    fn all_sensors_failing_fails_the_job() {
        let temp = TempDir::new().expect("tempdir");
        let capture = interleaved_capture(temp.path());
        let decoder = write_script(temp.path(), "exit 1");

        let config = JobConfig::new(DecoderConfig::new(decoder));
        let err = run_job(&capture, &config).unwrap_err();
        match err {
            JobError::AllSensorsFailed { count, failures } => {
                assert_eq!(count, 2);
                assert_eq!(failures.len(), 2);
            }
            other => panic!("expected all-failed, got {other:?}"),
        }
    }

    #[test]
    fn truncated_capture_still_decodes_and_reports_partial() {
        let temp = TempDir::new().expect("tempdir");
        let path = temp.path().join("ride.bin");
        let mut data = Vec::new();
        data.extend(packet_bytes(1, 0, &[1, 2, 3, 4]));
        let mut tail = packet_bytes(2, 5, &[0u8; 6]);
        tail.truncate(8 + 2);
        data.extend(tail);
        fs::write(&path, data).expect("write capture");
        let decoder = write_script(temp.path(), "cp \"$1\" \"$2\"");

        let config = JobConfig::new(DecoderConfig::new(decoder));
        let report = run_job(&path, &config).unwrap();

        assert_eq!(report.status, JobStatus::Partial);
        assert_eq!(report.capture.truncated_at, Some(12 + 8 + 2));
        // Handle 2's only packet was cut short, so no sink was created
        // for it; handle 1 still decoded.
        assert_eq!(report.capture.sensors_detected, 1);
        let handles: Vec<u16> = report.sensors.iter().map(|s| s.handle).collect();
        assert_eq!(handles, vec![1]);
        assert!(!temp.path().join("ride_sensor_2.bin").exists());
    }

    #[test]
    fn dedicated_out_dir_receives_sinks_and_artifacts() {
        let temp = TempDir::new().expect("tempdir");
        let capture = interleaved_capture(temp.path());
        let decoder = write_script(temp.path(), "cp \"$1\" \"$2\"");
        let out_dir = temp.path().join("out");

        let mut config = JobConfig::new(DecoderConfig::new(decoder));
        config.out_dir = Some(out_dir.clone());
        let report = run_job(&capture, &config).unwrap();

        assert_eq!(report.sensors.len(), 2);
        assert!(out_dir.join("ride_sensor_1.bin").exists());
        assert!(out_dir.join("ride_sensor_1.csv").exists());
        assert!(out_dir.join("ride_sensor_2.bin").exists());
        assert!(out_dir.join("ride_sensor_2.csv").exists());
    }
}
