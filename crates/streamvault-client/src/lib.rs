//! StreamVault Client — Read-Side Archive Access
//!
//! Everything a viewer needs to scrub through an archived stream:
//!
//! - [`seek::SeekIndex`] turns "the record nearest timestamp T" into a
//!   record index in near-constant time, built once from a fully-streamed
//!   index file.
//! - [`decode`] unpacks the record payloads a read returns (MJPEG video,
//!   multiplexed audio/video, JSON sensor blobs).
//! - [`session::ArchiveSession`] is the per-viewer state machine: it opens
//!   the day's index file, streams it block by block to build the seek
//!   index, opens the paired data file, and then issues one read at a time
//!   as the viewer's requested timestamp moves.
//!
//! The session talks to a store over the same [`MessageSink`] seam the store
//! serves on; the host's transport routes envelopes both ways.
//!
//! [`MessageSink`]: streamvault_core::wire::MessageSink

pub mod decode;
pub mod error;
pub mod seek;
pub mod session;

pub use decode::DecodedRecord;
pub use error::{Error, Result};
pub use seek::SeekIndex;
pub use session::{ArchiveSession, SessionEvent, SessionState, StoreRef};
