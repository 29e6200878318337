//! Client Error Types
//!
//! ## Error Categories
//!
//! - `BeforeDayStart`: a seek asked for a timestamp earlier than the open
//!   archive's day — a hard error, unlike seeking past the end (which clamps
//!   to the last record)
//! - `Store`: a store answered with a wire error code
//! - `NoArchiveForDay`: the store's directory has no file for the requested
//!   source and day
//! - `ShortRecord`: a record payload ended before its declared header
//!
//! All client operations return `Result<T>` aliased to `Result<T, Error>`.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("timestamp precedes the archive day start")]
    BeforeDayStart,

    #[error("seek index is empty")]
    EmptyIndex,

    #[error("store error code {0:#06x}")]
    Store(u16),

    #[error("no archive for source {stream} on the requested day")]
    NoArchiveForDay { stream: String },

    #[error("record too short: {0} bytes")]
    ShortRecord(usize),

    #[error("sensor payload is not valid JSON: {0}")]
    SensorJson(#[from] serde_json::Error),

    #[error("format error: {0}")]
    Core(#[from] streamvault_core::Error),
}
