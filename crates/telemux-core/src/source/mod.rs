mod capture;

pub use capture::CaptureFileSource;

use thiserror::Error;

/// Fixed 8-byte little-endian record preceding every payload.
///
/// `timestamp_ms` is logger-relative and informational only; it is never
/// used for ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub conn_handle: u16,
    pub timestamp_ms: u32,
    pub payload_size: u16,
}

/// One framed packet: a validated header plus its owned payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub header: PacketHeader,
    pub payload: Vec<u8>,
}

pub trait PacketSource {
    fn next_packet(&mut self) -> Result<Option<Packet>, SourceError>;
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error(
        "truncated capture at byte offset {offset}: payload needs {needed} bytes, {available} available"
    )]
    Truncated {
        offset: u64,
        needed: usize,
        available: usize,
    },
}

impl From<capture::error::CaptureSourceError> for SourceError {
    fn from(value: capture::error::CaptureSourceError) -> Self {
        match value {
            capture::error::CaptureSourceError::Io(err) => SourceError::Io(err),
            capture::error::CaptureSourceError::Truncated {
                offset,
                needed,
                available,
            } => SourceError::Truncated {
                offset,
                needed,
                available,
            },
        }
    }
}
