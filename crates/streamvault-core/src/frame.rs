//! Record Framing for Structured Archive Files
//!
//! A structured data file (`.srf`) is a sequence of framed records:
//!
//! ```text
//! ┌──────────────┬────────────┬──────────────┬──────────────────┐
//! │ sync marker  │ size       │ reserved     │ payload          │
//! │ "SpRSHdV0"   │ u32 LE     │ u32 LE       │ size bytes       │
//! │ (8 bytes)    │ (4 bytes)  │ (4 bytes)    │                  │
//! └──────────────┴────────────┴──────────────┴──────────────────┘
//! ```
//!
//! The paired index file records the byte position of each frame's sync
//! marker, so a reader seeks straight to a frame and validates the marker
//! before trusting the size field. A marker mismatch means the file position
//! was wrong or the file is corrupt — it is reported as
//! [`Error::InvalidFrameHeader`](crate::Error::InvalidFrameHeader), never
//! skipped over.
//!
//! All multi-byte fields in the archive format are little-endian.

use bytes::{Buf, BufMut};

use crate::{Error, Result};

/// The sync sequence at the start of every structured record frame.
pub const SYNC_MARKER: [u8; 8] = *b"SpRSHdV0";

/// Encoded size of a frame header: sync(8) + size(4) + reserved(4).
pub const FRAME_HEADER_SIZE: usize = 16;

/// Header preceding every record in a structured data file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Length in bytes of the payload that follows.
    pub size: u32,
}

impl FrameHeader {
    pub fn new(size: u32) -> Self {
        Self { size }
    }

    /// Append the encoded header to `buf`.
    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_slice(&SYNC_MARKER);
        buf.put_u32_le(self.size);
        buf.put_u32_le(0); // reserved
    }

    /// Decode a header, validating the sync marker.
    pub fn decode(buf: &mut impl Buf) -> Result<Self> {
        if buf.remaining() < FRAME_HEADER_SIZE {
            return Err(Error::Truncated {
                need: FRAME_HEADER_SIZE,
                have: buf.remaining(),
            });
        }

        let mut sync = [0u8; 8];
        buf.copy_to_slice(&mut sync);

        if sync != SYNC_MARKER {
            return Err(Error::InvalidFrameHeader);
        }

        let size = buf.get_u32_le();
        let _reserved = buf.get_u32_le();

        Ok(Self { size })
    }
}
