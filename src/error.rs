//! # Error Types
//!
//! Custom error types for the telemetry pipeline using `thiserror`.
//!
//! Each layer owns a closed error enum; [`DaqError`] wraps them for callers
//! that drive the whole pipeline.

use thiserror::Error;

/// Log packet decoding errors.
///
/// Fatal to the packet being decoded. The offline export aborts on any of
/// these; the live monitor logs and drops the packet.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The packet header could not be read.
    #[error("Malformed packet: needed {needed} bytes at offset {offset}, {available} available")]
    MalformedPacket {
        offset: usize,
        needed: usize,
        available: usize,
    },

    /// The packet format version is not supported.
    #[error("Unsupported log packet version: {0}")]
    UnsupportedVersion(u8),

    /// A channel id that matches no known channel family.
    #[error("Unknown channel id: {0}")]
    UnknownChannelId(String),

    /// The payload ended in the middle of a channel record.
    #[error("Truncated packet: channel [{channel}] needed {needed} bytes at offset {offset}, {available} available")]
    TruncatedPacket {
        channel: String,
        offset: usize,
        needed: usize,
        available: usize,
    },

    /// A channel record violates the protocol.
    #[error("Malformed record in channel [{channel}]: {reason}")]
    RecordMalformed { channel: String, reason: String },
}

/// Session and test-boundary integrity errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// A `test_begin` marker arrived while another test was still open.
    #[error("Test [{new}] started at {at_ms} ms while test [{open}] is still open")]
    DanglingTestStart { open: String, new: String, at_ms: i64 },

    /// A `test_end` marker arrived with no open test.
    #[error("Test end marker [{name}] at {at_ms} ms has no pending start marker")]
    UnmatchedTestEnd { name: String, at_ms: i64 },

    /// A `test_end` marker names a different test than the open one.
    #[error("Test end name [{found}] doesn't match start name [{expected}]")]
    TestNameMismatch { expected: String, found: String },

    /// The stream ended while a test was open.
    #[error("No end marker for test [{name}] started at {start_ms} ms")]
    MissingTestEnd { name: String, start_ms: i64 },

    /// A `test_begin` marker with no test name.
    #[error("Test begin marker at {at_ms} ms has no test name")]
    EmptyTestName { at_ms: i64 },

    /// Channel values arrived out of time order across packets.
    #[error("Channel [{channel}] went back in time: {next} ms after {last} ms")]
    OutOfOrder { channel: String, last: u64, next: u64 },
}

/// Display buffer misuse.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DisplayError {
    #[error("Empty display block")]
    EmptyBlock,

    #[error("Display block length mismatch: {times} times vs {values} values")]
    LengthMismatch { times: usize, values: usize },

    #[error("Display block starts at {next} before buffer end {last}")]
    TimeRegression { last: f64, next: f64 },
}

/// Main error type for the telemetry pipeline
#[derive(Debug, Error)]
pub enum DaqError {
    /// Log packet protocol errors
    #[error("Protocol error: {0}")]
    Decode(#[from] DecodeError),

    /// Session / test marker integrity errors
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Display buffer errors
    #[error("Display error: {0}")]
    Display(#[from] DisplayError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV output errors
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Serial port errors
    #[error("Serial error: {0}")]
    Serial(String),

    /// Output directory or file errors
    #[error("Output error: {0}")]
    Output(String),

    /// Failure while handling a log packet, with its position in the stream.
    #[error("Log packet {index}: {source}")]
    Packet { index: u64, source: Box<DaqError> },
}

impl DaqError {
    /// Shorthand for a configuration validation failure.
    pub(crate) fn config(msg: impl std::fmt::Display) -> Self {
        use serde::de::Error;
        DaqError::Config(toml::de::Error::custom(msg))
    }
}

/// Result type alias for the telemetry pipeline
pub type Result<T> = std::result::Result<T, DaqError>;
