//! Record Header
//!
//! Every structured payload starts with a fixed 24-byte record header. The
//! archive layer treats the rest of the payload as opaque; the header is what
//! lets the write side extract a timestamp for indexing and the read side
//! pick a decoder.
//!
//! ```text
//! type:u16 | sub_type:u16 | header_length:u16 | param:u16 | param1:u16 |
//! param2:u16 | record_index:u32 | timestamp:i64
//! ```
//!
//! `header_length` is the total length of the type-specific header (this
//! fixed part plus any extension the record type defines), so a consumer can
//! skip to the media bytes without knowing the type. `record_index` increases
//! monotonically within a stream. `timestamp` is milliseconds since the Unix
//! epoch. All fields little-endian.

use bytes::{Buf, BufMut};

use crate::{Error, Result};

/// Encoded size of the fixed record header.
pub const RECORD_HEADER_SIZE: usize = 24;

/// Major record type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum RecordType {
    Video = 0,
    Audio = 1,
    Sensor = 4,
    AvMux = 12,
    Image = 13,
    Json = 32,
}

impl TryFrom<u16> for RecordType {
    type Error = Error;

    fn try_from(value: u16) -> Result<Self> {
        match value {
            0 => Ok(RecordType::Video),
            1 => Ok(RecordType::Audio),
            4 => Ok(RecordType::Sensor),
            12 => Ok(RecordType::AvMux),
            13 => Ok(RecordType::Image),
            32 => Ok(RecordType::Json),
            _ => Err(Error::UnknownRecordType(value)),
        }
    }
}

/// Video sub-type: motion JPEG frames.
pub const SUBTYPE_VIDEO_MJPEG: u16 = 0;

/// AvMux sub-type: motion JPEG video multiplexed with PCM audio.
pub const SUBTYPE_AVMUX_MJPPCM: u16 = 0;

/// The fixed header at the front of every structured record payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub record_type: u16,
    pub sub_type: u16,
    /// Total length of the type-specific header, this struct included.
    pub header_length: u16,
    pub param: u16,
    pub param1: u16,
    pub param2: u16,
    /// Monotonically increasing index within the stream.
    pub record_index: u32,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

impl RecordHeader {
    pub fn new(record_type: RecordType, record_index: u32, timestamp: i64) -> Self {
        Self {
            record_type: record_type as u16,
            sub_type: 0,
            header_length: RECORD_HEADER_SIZE as u16,
            param: 0,
            param1: 0,
            param2: 0,
            record_index,
            timestamp,
        }
    }

    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u16_le(self.record_type);
        buf.put_u16_le(self.sub_type);
        buf.put_u16_le(self.header_length);
        buf.put_u16_le(self.param);
        buf.put_u16_le(self.param1);
        buf.put_u16_le(self.param2);
        buf.put_u32_le(self.record_index);
        buf.put_i64_le(self.timestamp);
    }

    pub fn decode(buf: &mut impl Buf) -> Result<Self> {
        if buf.remaining() < RECORD_HEADER_SIZE {
            return Err(Error::RecordTooShort(buf.remaining()));
        }

        Ok(Self {
            record_type: buf.get_u16_le(),
            sub_type: buf.get_u16_le(),
            header_length: buf.get_u16_le(),
            param: buf.get_u16_le(),
            param1: buf.get_u16_le(),
            param2: buf.get_u16_le(),
            record_index: buf.get_u32_le(),
            timestamp: buf.get_i64_le(),
        })
    }
}
