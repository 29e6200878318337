//! Store Error Types
//!
//! ## Error Categories
//!
//! ### Agent Errors
//! [`AgentError`] covers every failure an archive file agent can report while
//! serving a read or write. Each variant maps 1:1 onto a wire response code
//! via [`AgentError::response_code`], so the server can forward a failure to
//! the remote client without translation tables.
//!
//! ### Store Errors
//! [`Error`] wraps agent failures plus the write-side concerns (filesystem,
//! configuration) that never cross the wire.
//!
//! All store operations return `Result<T>` aliased to `Result<T, Error>` for
//! clean `?` propagation.

use streamvault_core::wire::code;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("format error: {0}")]
    Core(#[from] streamvault_core::Error),

    #[error("agent error: {0}")]
    Agent(#[from] AgentError),

    #[error("invalid stream name: {0}")]
    InvalidStreamName(String),
}

/// A failure while serving a file request. Every variant has a wire response
/// code; the server sends that code back in the response `param` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AgentError {
    #[error("file not found")]
    FileNotFound,

    #[error("index file not found")]
    IndexFileNotFound,

    #[error("invalid file format")]
    InvalidFileFormat,

    #[error("invalid record index")]
    InvalidRecordIndex,

    #[error("index file read failed")]
    IndexRead,

    #[error("index file seek failed")]
    IndexSeek,

    #[error("index file write failed")]
    IndexWrite,

    #[error("record seek failed")]
    RecordSeek,

    #[error("record read failed")]
    RecordRead,

    #[error("invalid record header")]
    InvalidRecordHeader,

    #[error("write failed")]
    Write,

    #[error("write too short")]
    WriteTooShort,

    #[error("read failed")]
    Read,

    #[error("transfer too long")]
    TransferTooLong,

    #[error("bad block size")]
    BadBlockSize,
}

impl AgentError {
    /// The wire response code carried in the response `param` field.
    pub fn response_code(self) -> u16 {
        match self {
            AgentError::FileNotFound => code::FILE_NOT_FOUND,
            AgentError::IndexFileNotFound => code::INDEX_FILE_NOT_FOUND,
            AgentError::InvalidFileFormat => code::INVALID_FILE_FORMAT,
            AgentError::InvalidRecordIndex => code::INVALID_RECORD_INDEX,
            AgentError::IndexRead => code::INDEX_READ,
            AgentError::IndexSeek => code::INDEX_SEEK,
            AgentError::IndexWrite => code::INDEX_WRITE,
            AgentError::RecordSeek => code::RECORD_SEEK,
            AgentError::RecordRead => code::RECORD_READ,
            AgentError::InvalidRecordHeader => code::INVALID_RECORD_HEADER,
            AgentError::Write => code::WRITE,
            AgentError::WriteTooShort => code::WRITE_TOO_SHORT,
            AgentError::Read => code::READ,
            AgentError::TransferTooLong => code::TRANSFER_TOO_LONG,
            AgentError::BadBlockSize => code::BAD_BLOCK_SIZE,
        }
    }
}
