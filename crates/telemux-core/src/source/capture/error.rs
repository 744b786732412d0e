use thiserror::Error;

#[derive(Debug, Error)]
pub enum CaptureSourceError {
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
