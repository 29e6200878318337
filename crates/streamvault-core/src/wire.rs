//! Wire Protocol for the Vault File Service
//!
//! The store and its clients exchange fixed-header messages over an existing
//! reliable point-to-point transport. The transport is an external
//! collaborator: it delivers opaque length-prefixed byte buffers to a known
//! peer, addressed to a logical port, with framing and retry already solved.
//! This module defines everything that goes *inside* those buffers, plus the
//! [`MessageSink`] seam the host plugs its transport into.
//!
//! ## Header layout (16 bytes, little-endian)
//!
//! ```text
//! msg_type:u16 | param:u16 | store_handle:u16 | client_handle:u16 |
//! index:u32 | length:u32
//! ```
//!
//! `length` bytes of type-specific payload follow the header.
//!
//! ## Handles vs response codes
//!
//! File handles and response codes can share the `param` field. The top bit
//! disambiguates: error codes have bit 15 set, so any value below
//! [`code::ERROR_BASE`] is a success (and may carry a handle in the remaining
//! 15 bits). Use [`code::is_error`].

use async_trait::async_trait;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::time::Duration;

use crate::{Error, Result};

/// Maximum total message size the service will build or accept.
pub const MAX_MESSAGE: usize = 0x80000;

/// Encoded size of the wire header.
pub const WIRE_HEADER_SIZE: usize = 16;

/// Open-request `param` value selecting the structured format. Any non-zero
/// value selects the raw format and is the requested block size in bytes.
pub const OPEN_STRUCTURED: u16 = 0;

/// Maximum files a single client may have open at one time.
pub const MAX_CLIENT_FILES: usize = 32;

/// Interval between keepalives a client must send for each open handle.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(5);

/// A handle with no keepalive for this long is considered abandoned.
pub const KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(15);

/// How long a client waits for any single response before abandoning it.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Message type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum MessageType {
    /// Request the list of archived file paths at a store.
    DirReq = 0,
    /// Response: payload is the newline-joined relative paths.
    DirRes = 1,
    /// Open a file. `param` = block size (raw) or 0 (structured),
    /// `client_handle` = caller's handle, payload = relative path.
    OpenReq = 2,
    /// Response: `param` = response code, `store_handle` assigned,
    /// `index` = record/block count.
    OpenRes = 3,
    CloseReq = 4,
    CloseRes = 5,
    /// Same code both directions; no payload.
    Keepalive = 6,
    /// `param` = block count (raw), `index` = record/block index.
    ReadIndexReq = 16,
    /// `param` = response code, `index` echoes the request, payload = data.
    ReadIndexRes = 17,
    /// `index` = 0 truncates the file pair first, non-zero appends.
    WriteIndexReq = 18,
    WriteIndexRes = 19,
    // Reserved codes carried for wire compatibility; not served.
    ReadTimeIntervalReq = 20,
    ReadTimeIntervalRes = 21,
    ReadTimeCountReq = 22,
    ReadTimeCountRes = 23,
    Datagram = 24,
}

impl TryFrom<u16> for MessageType {
    type Error = Error;

    fn try_from(value: u16) -> Result<Self> {
        match value {
            0 => Ok(MessageType::DirReq),
            1 => Ok(MessageType::DirRes),
            2 => Ok(MessageType::OpenReq),
            3 => Ok(MessageType::OpenRes),
            4 => Ok(MessageType::CloseReq),
            5 => Ok(MessageType::CloseRes),
            6 => Ok(MessageType::Keepalive),
            16 => Ok(MessageType::ReadIndexReq),
            17 => Ok(MessageType::ReadIndexRes),
            18 => Ok(MessageType::WriteIndexReq),
            19 => Ok(MessageType::WriteIndexRes),
            20 => Ok(MessageType::ReadTimeIntervalReq),
            21 => Ok(MessageType::ReadTimeIntervalRes),
            22 => Ok(MessageType::ReadTimeCountReq),
            23 => Ok(MessageType::ReadTimeCountRes),
            24 => Ok(MessageType::Datagram),
            _ => Err(Error::UnknownMessageType(value)),
        }
    }
}

/// Response codes carried in the `param` field of responses.
pub mod code {
    /// Success; the remaining bits may carry a handle.
    pub const SUCCESS: u16 = 0;

    /// Error codes start here (top bit set).
    pub const ERROR_BASE: u16 = 0x8000;

    pub const SERVICE_UNAVAILABLE: u16 = ERROR_BASE;
    pub const REQUEST_ACTIVE: u16 = ERROR_BASE + 1;
    pub const REQUEST_TIMEOUT: u16 = ERROR_BASE + 2;
    pub const UNRECOGNIZED_COMMAND: u16 = ERROR_BASE + 3;
    pub const MAX_CLIENT_FILES: u16 = ERROR_BASE + 4;
    pub const MAX_STORE_FILES: u16 = ERROR_BASE + 5;
    pub const FILE_NOT_FOUND: u16 = ERROR_BASE + 6;
    pub const INDEX_FILE_NOT_FOUND: u16 = ERROR_BASE + 7;
    pub const INVALID_FILE_FORMAT: u16 = ERROR_BASE + 8;
    pub const INVALID_HANDLE: u16 = ERROR_BASE + 9;
    pub const INVALID_RECORD_INDEX: u16 = ERROR_BASE + 10;
    pub const INDEX_READ: u16 = ERROR_BASE + 11;
    pub const RECORD_SEEK: u16 = ERROR_BASE + 12;
    pub const RECORD_READ: u16 = ERROR_BASE + 13;
    pub const INVALID_RECORD_HEADER: u16 = ERROR_BASE + 14;
    pub const INDEX_WRITE: u16 = ERROR_BASE + 15;
    pub const WRITE: u16 = ERROR_BASE + 16;
    pub const TRANSFER_TOO_LONG: u16 = ERROR_BASE + 17;
    pub const READ: u16 = ERROR_BASE + 18;
    pub const BAD_BLOCK_SIZE: u16 = ERROR_BASE + 19;
    pub const INVALID_REQUEST_TYPE: u16 = ERROR_BASE + 20;
    pub const WRITE_TOO_SHORT: u16 = ERROR_BASE + 21;
    pub const INDEX_SEEK: u16 = ERROR_BASE + 22;

    /// True if `value` is an error response code rather than a handle.
    pub fn is_error(value: u16) -> bool {
        value & ERROR_BASE != 0
    }
}

/// The fixed header at the start of every service message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireHeader {
    pub msg_type: MessageType,
    pub param: u16,
    pub store_handle: u16,
    pub client_handle: u16,
    pub index: u32,
    /// Length of the payload following the header.
    pub length: u32,
}

impl WireHeader {
    pub fn new(msg_type: MessageType) -> Self {
        Self {
            msg_type,
            param: 0,
            store_handle: 0,
            client_handle: 0,
            index: 0,
            length: 0,
        }
    }

    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u16_le(self.msg_type as u16);
        buf.put_u16_le(self.param);
        buf.put_u16_le(self.store_handle);
        buf.put_u16_le(self.client_handle);
        buf.put_u32_le(self.index);
        buf.put_u32_le(self.length);
    }

    pub fn decode(buf: &mut impl Buf) -> Result<Self> {
        if buf.remaining() < WIRE_HEADER_SIZE {
            return Err(Error::Truncated {
                need: WIRE_HEADER_SIZE,
                have: buf.remaining(),
            });
        }

        Ok(Self {
            msg_type: MessageType::try_from(buf.get_u16_le())?,
            param: buf.get_u16_le(),
            store_handle: buf.get_u16_le(),
            client_handle: buf.get_u16_le(),
            index: buf.get_u32_le(),
            length: buf.get_u32_le(),
        })
    }
}

/// Build a complete message: header (with `length` set) followed by payload.
pub fn encode_message(mut header: WireHeader, payload: &[u8]) -> Bytes {
    header.length = payload.len() as u32;

    let mut buf = BytesMut::with_capacity(WIRE_HEADER_SIZE + payload.len());
    header.encode(&mut buf);
    buf.put_slice(payload);
    buf.freeze()
}

/// Split a received buffer into header and payload, enforcing that the
/// header's `length` matches what actually arrived.
pub fn decode_message(mut message: Bytes) -> Result<(WireHeader, Bytes)> {
    let header = WireHeader::decode(&mut message)?;

    if message.len() != header.length as usize {
        return Err(Error::LengthMismatch {
            header: header.length as usize,
            actual: message.len(),
        });
    }

    Ok((header, message))
}

/// Opaque identity of a transport peer, assigned by the host transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerId(pub u64);

/// A message delivered by the transport, tagged with its origin so responses
/// can be routed back and ownership can be verified.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub from: PeerId,
    pub from_port: u16,
    pub payload: Bytes,
}

/// Outbound half of the transport seam. The host's reliable transport
/// implements this; the store and client only ever call `send`.
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn send(&self, to: PeerId, to_port: u16, payload: Bytes) -> Result<()>;
}
