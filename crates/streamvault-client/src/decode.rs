//! Record Payload Decoders
//!
//! A read response's payload is the record exactly as the producer framed
//! it: the fixed record header, an optional type-specific extension, then
//! the media bytes. The archive layer never looks inside; this module is
//! where the client finally does.
//!
//! The extension layouts mirror the producer side (little-endian, packed):
//!
//! - Video: `width:u16 | height:u16 | size:u32`, then a JPEG frame.
//! - AvMux: mux/video/audio section sizes plus the AV parameters, then the
//!   sections in that order.
//! - Sensor/Json: no extension, the media bytes are a JSON document.
//!
//! `header_length` in the record header is what locates the media bytes, so
//! unknown record types still decode far enough to be skipped cleanly.

use bytes::{Buf, Bytes};

use crate::error::{Error, Result};
use streamvault_core::{RecordHeader, RecordType, RECORD_HEADER_SIZE};

/// Audio/video stream parameters carried in every AvMux record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AvParams {
    pub video_subtype: u8,
    pub audio_subtype: u8,
    pub video_width: u16,
    pub video_height: u16,
    pub video_framerate: u16,
    pub audio_sample_rate: u32,
    pub audio_channels: u16,
    pub audio_sample_size: u16,
}

/// A record payload unpacked by its type.
#[derive(Debug)]
pub enum DecodedRecord {
    Video {
        header: RecordHeader,
        width: u16,
        height: u16,
        jpeg: Bytes,
    },
    AvMux {
        header: RecordHeader,
        params: AvParams,
        mux: Bytes,
        video: Bytes,
        audio: Bytes,
    },
    Sensor {
        header: RecordHeader,
        data: serde_json::Value,
    },
    /// A type this client has no decoder for; media bytes passed through.
    Opaque {
        header: RecordHeader,
        media: Bytes,
    },
}

impl DecodedRecord {
    pub fn header(&self) -> &RecordHeader {
        match self {
            DecodedRecord::Video { header, .. } => header,
            DecodedRecord::AvMux { header, .. } => header,
            DecodedRecord::Sensor { header, .. } => header,
            DecodedRecord::Opaque { header, .. } => header,
        }
    }

    pub fn timestamp(&self) -> i64 {
        self.header().timestamp
    }
}

/// Unpack one record payload as returned by a structured read.
pub fn decode_record(payload: Bytes) -> Result<DecodedRecord> {
    if payload.len() < RECORD_HEADER_SIZE {
        return Err(Error::ShortRecord(payload.len()));
    }
    let header = RecordHeader::decode(&mut payload.clone())?;

    let media_at = (header.header_length as usize).max(RECORD_HEADER_SIZE);
    if media_at > payload.len() {
        return Err(Error::ShortRecord(payload.len()));
    }
    let media = payload.slice(media_at..);

    match RecordType::try_from(header.record_type) {
        Ok(RecordType::Video) | Ok(RecordType::Image) => decode_video(header, &payload, media),
        Ok(RecordType::AvMux) => decode_avmux(header, &payload, media),
        Ok(RecordType::Sensor) | Ok(RecordType::Json) => Ok(DecodedRecord::Sensor {
            header,
            data: serde_json::from_slice(&media)?,
        }),
        _ => Ok(DecodedRecord::Opaque { header, media }),
    }
}

fn decode_video(header: RecordHeader, payload: &Bytes, media: Bytes) -> Result<DecodedRecord> {
    // width:u16 | height:u16 | size:u32
    let mut ext = payload.slice(RECORD_HEADER_SIZE..);
    if ext.len() < 8 {
        return Err(Error::ShortRecord(payload.len()));
    }
    let width = ext.get_u16_le();
    let height = ext.get_u16_le();

    Ok(DecodedRecord::Video {
        header,
        width,
        height,
        jpeg: media,
    })
}

fn decode_avmux(header: RecordHeader, payload: &Bytes, media: Bytes) -> Result<DecodedRecord> {
    let mut ext = payload.slice(RECORD_HEADER_SIZE..);
    if ext.len() < 36 {
        return Err(Error::ShortRecord(payload.len()));
    }

    let _spare0 = ext.get_u16_le();
    let video_subtype = ext.get_u8();
    let audio_subtype = ext.get_u8();
    let mux_size = ext.get_u32_le() as usize;
    let video_size = ext.get_u32_le() as usize;
    let audio_size = ext.get_u32_le() as usize;
    let video_width = ext.get_u16_le();
    let video_height = ext.get_u16_le();
    let video_framerate = ext.get_u16_le();
    let _video_spare = ext.get_u16_le();
    let audio_sample_rate = ext.get_u32_le();
    let audio_channels = ext.get_u16_le();
    let audio_sample_size = ext.get_u16_le();

    if mux_size + video_size + audio_size > media.len() {
        return Err(Error::ShortRecord(payload.len()));
    }

    // sections follow in mux, video, audio order
    let mux = media.slice(..mux_size);
    let video = media.slice(mux_size..mux_size + video_size);
    let audio = media.slice(mux_size + video_size..mux_size + video_size + audio_size);

    Ok(DecodedRecord::AvMux {
        header,
        params: AvParams {
            video_subtype,
            audio_subtype,
            video_width,
            video_height,
            video_framerate,
            audio_sample_rate,
            audio_channels,
            audio_sample_size,
        },
        mux,
        video,
        audio,
    })
}
