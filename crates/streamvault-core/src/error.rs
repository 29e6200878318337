//! Error Types for StreamVault Core
//!
//! ## Error Categories
//!
//! ### Data Integrity Errors
//! - `InvalidFrameHeader`: a structured record frame doesn't start with the
//!   expected sync marker ("SpRSHdV0") — this is a hard failure, a corrupt
//!   frame is never silently skipped
//! - `RecordTooShort`: a payload is smaller than the fixed record header
//!
//! ### Protocol Errors
//! - `UnknownMessageType`: a wire header carried a type code this version
//!   doesn't know
//! - `Truncated`: a buffer ended before a fixed-size structure was complete
//! - `LengthMismatch`: the wire header's length field disagrees with the
//!   actual message size
//!
//! All functions in this crate return `Result<T>` aliased to
//! `Result<T, Error>` so `?` propagation works throughout.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid record frame header")]
    InvalidFrameHeader,

    #[error("record too short: {0} bytes")]
    RecordTooShort(usize),

    #[error("unknown record type: {0}")]
    UnknownRecordType(u16),

    #[error("unknown message type: {0}")]
    UnknownMessageType(u16),

    #[error("buffer truncated: need {need} bytes, have {have}")]
    Truncated { need: usize, have: usize },

    #[error("message length mismatch: header says {header}, message has {actual}")]
    LengthMismatch { header: usize, actual: usize },

    #[error("transport send failed: {0}")]
    Transport(String),
}

pub type Result<T> = std::result::Result<T, Error>;
