use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use crate::source::{Packet, PacketSource, SourceError};

use super::error::CaptureSourceError;
use super::layout;
use super::reader::parse_header;

pub struct CaptureFileSource {
    reader: BufReader<File>,
    offset: u64,
    done: bool,
}

impl CaptureFileSource {
    pub fn open(path: &Path) -> Result<Self, SourceError> {
        let file = File::open(path).map_err(SourceError::from)?;
        Ok(Self {
            reader: BufReader::with_capacity(layout::READ_BUFFER_SIZE, file),
            offset: 0,
            done: false,
        })
    }
}

impl PacketSource for CaptureFileSource {
    fn next_packet(&mut self) -> Result<Option<Packet>, SourceError> {
        next_packet(self).map_err(SourceError::from)
    }
}

fn next_packet(source: &mut CaptureFileSource) -> Result<Option<Packet>, CaptureSourceError> {
    if source.done {
        return Ok(None);
    }

    let mut header_bytes = [0u8; layout::HEADER_SIZE];
    let read = read_up_to(&mut source.reader, &mut header_bytes)?;
    if read < layout::HEADER_SIZE {
        // Fewer than 8 trailing bytes mark the end of the stream.
        source.done = true;
        return Ok(None);
    }
    source.offset += layout::HEADER_SIZE as u64;
    let header = parse_header(&header_bytes);

    let mut payload = vec![0u8; header.payload_size as usize];
    let got = read_up_to(&mut source.reader, &mut payload)?;
    if got < payload.len() {
        source.done = true;
        return Err(CaptureSourceError::Truncated {
            offset: source.offset + got as u64,
            needed: payload.len(),
            available: got,
        });
    }
    source.offset += payload.len() as u64;

    Ok(Some(Packet { header, payload }))
}

fn read_up_to<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(filled)
}
