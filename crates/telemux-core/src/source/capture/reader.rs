use super::layout;
use crate::source::PacketHeader;

/// Decode the fixed 8-byte packet header.
///
/// The caller hands in exactly [`layout::HEADER_SIZE`] bytes, so decoding
/// cannot fail. This helper is part of an internal module, so the example
/// is marked as text example.
/// ```text
/// use telemux_core::source::capture::reader::parse_header;
///
/// let bytes = [0x01, 0x00, 0x10, 0x27, 0x00, 0x00, 0x04, 0x00];
/// let header = parse_header(&bytes);
/// assert_eq!(header.conn_handle, 1);
/// assert_eq!(header.timestamp_ms, 10_000);
/// assert_eq!(header.payload_size, 4);
/// ```
pub fn parse_header(bytes: &[u8; layout::HEADER_SIZE]) -> PacketHeader {
    PacketHeader {
        conn_handle: read_u16_le(bytes, layout::CONN_HANDLE_RANGE),
        timestamp_ms: read_u32_le(bytes, layout::TIMESTAMP_MS_RANGE),
        payload_size: read_u16_le(bytes, layout::PAYLOAD_SIZE_RANGE),
    }
}

fn read_u16_le(bytes: &[u8], range: std::ops::Range<usize>) -> u16 {
    u16::from_le_bytes([bytes[range.start], bytes[range.start + 1]])
}

fn read_u32_le(bytes: &[u8], range: std::ops::Range<usize>) -> u32 {
    u32::from_le_bytes([
        bytes[range.start],
        bytes[range.start + 1],
        bytes[range.start + 2],
        bytes[range.start + 3],
    ])
}

#[cfg(test)]
mod tests {
    use super::parse_header;

    #[test]
    fn parse_header_decodes_little_endian_fields() {
        let bytes = [0x02, 0x00, 0xd2, 0x02, 0x96, 0x49, 0xe8, 0x03];
        let header = parse_header(&bytes);
        assert_eq!(header.conn_handle, 2);
        assert_eq!(header.timestamp_ms, 1_234_567_890);
        assert_eq!(header.payload_size, 1000);
    }

    #[test]
    fn parse_header_max_values() {
        let bytes = [0xff; 8];
        let header = parse_header(&bytes);
        assert_eq!(header.conn_handle, u16::MAX);
        assert_eq!(header.timestamp_ms, u32::MAX);
        assert_eq!(header.payload_size, u16::MAX);
    }

    #[test]
    fn parse_header_zeroes() {
        let bytes = [0u8; 8];
        let header = parse_header(&bytes);
        assert_eq!(header.conn_handle, 0);
        assert_eq!(header.timestamp_ms, 0);
        assert_eq!(header.payload_size, 0);
    }
}
