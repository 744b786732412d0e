pub const HEADER_SIZE: usize = 8;

pub const CONN_HANDLE_RANGE: std::ops::Range<usize> = 0..2;
pub const TIMESTAMP_MS_RANGE: std::ops::Range<usize> = 2..6;
pub const PAYLOAD_SIZE_RANGE: std::ops::Range<usize> = 6..8;

pub const READ_BUFFER_SIZE: usize = 64 * 1024;
