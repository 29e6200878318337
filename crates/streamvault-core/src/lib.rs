//! Core types shared by the StreamVault store and client.
//!
//! StreamVault archives continuous media/sensor streams into rotating file
//! pairs and serves them to remote viewers over a small handle-based
//! request/response protocol (the "vault file service", VFS). This crate holds
//! everything both sides must agree on:
//!
//! - the on-disk archive format (framed records + fixed-size index entries)
//! - the record header carried at the front of every structured payload
//! - the wire protocol header, message types and response codes
//! - the transport seam ([`wire::MessageSink`]) the host plugs its reliable
//!   point-to-point transport into

pub mod error;
pub mod frame;
pub mod index;
pub mod record;
pub mod wire;

pub use error::{Error, Result};
pub use frame::{FrameHeader, FRAME_HEADER_SIZE, SYNC_MARKER};
pub use index::{IndexEntry, INDEX_ENTRY_SIZE};
pub use record::{RecordHeader, RecordType, RECORD_HEADER_SIZE};

/// File extension for structured archive data files.
pub const DATA_EXT: &str = "srf";

/// File extension for the index file paired with a structured data file.
pub const INDEX_EXT: &str = "srx";

/// File extension for raw (unframed, block-addressed) archive files.
pub const RAW_EXT: &str = "dat";
