//! Error types for the geostream client engine

use thiserror::Error;

/// Main error type for the engine
#[derive(Debug, Error)]
pub enum Error {
    #[error("bad stream magic {0:?}, expected \"BGS\"")]
    BadMagic([u8; 3]),

    #[error("unsupported protocol version {found} (expected {expected})")]
    UnsupportedVersion { expected: u8, found: u8 },

    #[error("read of {requested} bytes at offset {position} past end of {len}-byte buffer")]
    OutOfRange {
        position: usize,
        requested: usize,
        len: usize,
    },

    #[error("record tag {tag} not allowed while decoder is {state}")]
    UnexpectedRecord { state: &'static str, tag: u8 },

    #[error("unknown record type {0}")]
    UnknownRecordType(u8),

    #[error("invalid UTF-8 in length-prefixed text")]
    InvalidText,

    #[error("corrupt stream: {0}")]
    Corrupt(String),

    #[error("backend request failed: {0}")]
    Backend(String),

    #[error("chunk stream closed before end record")]
    StreamClosed,

    #[error("GPU resource error: {0}")]
    GpuResource(String),

    #[error("task failed: {0}")]
    TaskFailed(String),

    #[error("load cancelled")]
    Cancelled,

    #[error("tile index: {0}")]
    TileIndex(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Whether decoding can continue past this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::UnknownRecordType(_))
    }
}
