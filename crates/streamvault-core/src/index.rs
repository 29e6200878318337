//! Index File Entries
//!
//! Every structured data file (`.srf`) has a paired index file (`.srx`) of
//! fixed 16-byte entries, one per record, in append order:
//!
//! ```text
//! ┌───────────────┬───────────────┐
//! │ file position │ timestamp     │
//! │ i64 LE        │ i64 LE (ms)   │
//! └───────────────┴───────────────┘
//! ```
//!
//! Record index `i` in the index file locates record `i` in the data file:
//! `position` is the byte offset of the record's frame sync marker, and
//! `timestamp` is the record header's capture timestamp. Because records are
//! appended in capture order, entries are monotonic in both fields, which is
//! what lets the client build a second→record seek directory from a fully
//! streamed index file.

use bytes::{Buf, BufMut};

use crate::{Error, Result};

/// Encoded size of one index entry.
pub const INDEX_ENTRY_SIZE: usize = 16;

/// One entry in a structured archive's index file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    /// Byte offset of the record's frame in the data file.
    pub position: i64,

    /// Record timestamp, milliseconds since the Unix epoch.
    pub timestamp: i64,
}

impl IndexEntry {
    pub fn new(position: i64, timestamp: i64) -> Self {
        Self {
            position,
            timestamp,
        }
    }

    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_i64_le(self.position);
        buf.put_i64_le(self.timestamp);
    }

    pub fn decode(buf: &mut impl Buf) -> Result<Self> {
        if buf.remaining() < INDEX_ENTRY_SIZE {
            return Err(Error::Truncated {
                need: INDEX_ENTRY_SIZE,
                have: buf.remaining(),
            });
        }

        Ok(Self {
            position: buf.get_i64_le(),
            timestamp: buf.get_i64_le(),
        })
    }

    /// Decode as many whole entries as `data` contains, ignoring a ragged
    /// tail (a crashed writer can leave a partial final entry).
    pub fn decode_all(data: &[u8]) -> Vec<IndexEntry> {
        data.chunks_exact(INDEX_ENTRY_SIZE)
            .map(|mut chunk| IndexEntry {
                position: chunk.get_i64_le(),
                timestamp: chunk.get_i64_le(),
            })
            .collect()
    }
}
