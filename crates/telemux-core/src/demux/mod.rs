//! Stream demultiplexer.
//!
//! Consumes a packet source one packet at a time and routes each payload
//! (header stripped) to the sink owning its connection handle. Bytes
//! within a sink keep the relative order they were read from the source;
//! nothing is reordered or merged across handles.

mod sinks;

pub use sinks::FinalizedSink;

use std::collections::{BTreeMap, BTreeSet, btree_map::Entry};
use std::path::Path;

use thiserror::Error;
use tracing::{info, warn};

use crate::source::{CaptureFileSource, PacketSource, SourceError};

use sinks::SensorSink;

#[derive(Debug, Error)]
pub enum DemuxError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("source error: {0}")]
    Source(#[from] SourceError),
}

/// Point at which the source stream was cut short.
#[derive(Debug, Clone, Copy)]
pub struct Truncation {
    pub offset: u64,
}

/// A sensor that dropped out during demuxing because its sink failed.
#[derive(Debug, Clone)]
pub struct SinkFailure {
    pub handle: u16,
    pub error: String,
}

/// Outcome of one demux pass.
///
/// `sinks` is in ascending handle order. `packets_total` and
/// `bytes_total` count everything observed on the source, including
/// payloads routed to a sensor whose sink had already failed.
#[derive(Debug)]
pub struct DemuxOutput {
    pub sinks: Vec<FinalizedSink>,
    pub packets_total: u64,
    pub bytes_total: u64,
    pub truncation: Option<Truncation>,
    pub failures: Vec<SinkFailure>,
}

/// Stem used for sink and artifact file names derived from a capture path.
pub fn capture_stem(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "capture".to_string())
}

pub fn demux_capture_file(path: &Path, out_dir: &Path) -> Result<DemuxOutput, DemuxError> {
    let stem = capture_stem(path);
    let source = CaptureFileSource::open(path)?;
    demux_source(source, out_dir, &stem)
}

pub fn demux_source<S: PacketSource>(
    mut source: S,
    out_dir: &Path,
    stem: &str,
) -> Result<DemuxOutput, DemuxError> {
    let mut open_sinks: BTreeMap<u16, SensorSink> = BTreeMap::new();
    let mut dead: BTreeSet<u16> = BTreeSet::new();
    let mut failures: Vec<SinkFailure> = Vec::new();
    let mut packets_total = 0u64;
    let mut bytes_total = 0u64;
    let mut truncation = None;

    loop {
        match source.next_packet() {
            Ok(Some(packet)) => {
                packets_total += 1;
                bytes_total += packet.payload.len() as u64;

                let handle = packet.header.conn_handle;
                if dead.contains(&handle) {
                    continue;
                }
                let sink = match open_sinks.entry(handle) {
                    Entry::Occupied(entry) => entry.into_mut(),
                    Entry::Vacant(entry) => match SensorSink::create(out_dir, stem, handle) {
                        Ok(sink) => {
                            info!(handle, path = %sink.path().display(), "sensor detected");
                            entry.insert(sink)
                        }
                        Err(err) => {
                            warn!(handle, error = %err, "failed to create sensor sink");
                            dead.insert(handle);
                            failures.push(SinkFailure {
                                handle,
                                error: err.to_string(),
                            });
                            continue;
                        }
                    },
                };
                if let Err(err) = sink.append(&packet.payload) {
                    warn!(handle, error = %err, "failed to write sensor sink");
                    dead.insert(handle);
                    failures.push(SinkFailure {
                        handle,
                        error: err.to_string(),
                    });
                    open_sinks.remove(&handle);
                }
            }
            Ok(None) => break,
            Err(SourceError::Truncated { offset, .. }) => {
                // Data received before the cut stays usable; this is a
                // partial-success condition, not a fatal error.
                warn!(offset, "capture truncated, keeping partial sensor data");
                truncation = Some(Truncation { offset });
                break;
            }
            Err(err) => {
                // Flush whatever the sinks already hold before surfacing
                // the read error, so the partial files stay usable.
                for (_, sink) in std::mem::take(&mut open_sinks) {
                    let _ = sink.finalize();
                }
                return Err(DemuxError::Source(err));
            }
        }
    }

    let mut finalized = Vec::with_capacity(open_sinks.len());
    for (handle, sink) in open_sinks {
        match sink.finalize() {
            Ok(sink) => {
                info!(handle, packets = sink.packets, bytes = sink.bytes, "sensor finalized");
                finalized.push(sink);
            }
            Err(err) => {
                warn!(handle, error = %err, "failed to finalize sensor sink");
                failures.push(SinkFailure {
                    handle,
                    error: err.to_string(),
                });
            }
        }
    }

    info!(
        packets = packets_total,
        bytes = bytes_total,
        sensors = finalized.len(),
        "demux complete"
    );
    Ok(DemuxOutput {
        sinks: finalized,
        packets_total,
        bytes_total,
        truncation,
        failures,
    })
}
