use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Deterministic sink path for a handle, so re-runs are reproducible.
pub(crate) fn sink_path(out_dir: &Path, stem: &str, handle: u16) -> PathBuf {
    out_dir.join(format!("{stem}_sensor_{handle}.bin"))
}

/// Append-only byte sink accumulating one sensor's payload bytes.
///
/// Exactly one sink exists per handle while demuxing; it is owned by the
/// demultiplexer until finalized.
pub(crate) struct SensorSink {
    handle: u16,
    path: PathBuf,
    writer: BufWriter<File>,
    packets: u64,
    bytes: u64,
}

impl SensorSink {
    pub(crate) fn create(out_dir: &Path, stem: &str, handle: u16) -> io::Result<Self> {
        let path = sink_path(out_dir, stem, handle);
        let file = File::create(&path)?;
        Ok(Self {
            handle,
            path,
            writer: BufWriter::new(file),
            packets: 0,
            bytes: 0,
        })
    }

    pub(crate) fn append(&mut self, payload: &[u8]) -> io::Result<()> {
        self.writer.write_all(payload)?;
        self.packets += 1;
        self.bytes += payload.len() as u64;
        Ok(())
    }

    pub(crate) fn finalize(mut self) -> io::Result<FinalizedSink> {
        self.writer.flush()?;
        Ok(FinalizedSink {
            handle: self.handle,
            path: self.path,
            packets: self.packets,
            bytes: self.bytes,
        })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }
}

/// A closed per-sensor byte sink; no further writes are possible.
#[derive(Debug, Clone)]
pub struct FinalizedSink {
    pub handle: u16,
    pub path: PathBuf,
    pub packets: u64,
    pub bytes: u64,
}
