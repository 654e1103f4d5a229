//! Error types for OTA update operations

use thiserror::Error;

/// Errors that can occur while resolving, downloading or flashing an update
#[derive(Error, Debug)]
pub enum OtaError {
    /// No index listed a firmware file newer than (or matching) the reference
    #[error("No update candidate found")]
    NoCandidate,

    /// Index listing could not be fetched
    #[error("Index unavailable: {0}")]
    IndexUnavailable(String),

    /// Transport failure while opening or reading a stream
    #[error("Transport error: {0}")]
    Transport(String),

    /// Server answered with a status other than 200
    #[error("Unexpected HTTP status: {0}")]
    HttpStatus(u16),

    /// Stream ended inside a block length field
    #[error("Truncated block header: got {got} of 4 bytes")]
    TruncatedHeader {
        /// Bytes of the length field that were received
        got: usize,
    },

    /// Stream ended inside a block payload
    #[error("Incomplete block read: expected {expected} bytes, got {got}")]
    TruncatedBlock {
        /// Declared payload length
        expected: usize,
        /// Bytes actually received
        got: usize,
    },

    /// Declared block length exceeds the configured maximum
    #[error("Block too large: {declared} bytes (max {max})")]
    BlockTooLarge {
        /// Declared payload length
        declared: usize,
        /// Configured maximum
        max: usize,
    },

    /// Block decoder rejected a payload
    #[error("Decompression failed: {0}")]
    Decompression(#[from] CodecError),

    /// Stream ended cleanly without a single block
    #[error("No firmware data was written")]
    EmptyImage,

    /// Flash partition primitive failed
    #[error("Flash error: {0}")]
    Flash(String),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Another attempt already owns the update slot
    #[error("Update already in progress")]
    UpdateInProgress,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl OtaError {
    /// Whether the failure is an expected outcome rather than a fault.
    ///
    /// Recoverable errors leave nothing to clean up and are reported quietly.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, OtaError::NoCandidate | OtaError::IndexUnavailable(_))
    }
}

impl From<serde_json::Error> for OtaError {
    fn from(e: serde_json::Error) -> Self {
        OtaError::Serialization(e.to_string())
    }
}

/// Errors raised by a block codec
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Compressed payload is malformed or references bytes outside the window
    #[error("corrupt block: {0}")]
    Corrupt(String),

    /// Decompressed block does not fit the output buffer
    #[error("output overflow: block expands beyond {capacity} bytes")]
    OutputOverflow {
        /// Output capacity in bytes
        capacity: usize,
    },

    /// Encoder configuration cannot produce blocks within the frame limit
    #[error("encoder chunk of {chunk} bytes may exceed block limit of {max} bytes")]
    ChunkTooLarge {
        /// Raw chunk size
        chunk: usize,
        /// Maximum compressed block size
        max: usize,
    },
}
