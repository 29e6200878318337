//! StreamVault Store — Write-Side Archive Engine and Vault File Server
//!
//! This crate is the store side of streamvault. It has two halves that share
//! the on-disk format defined in `streamvault-core`:
//!
//! - **Write side**: a per-stream [`retention::StreamStore`] that owns file
//!   naming, rotation and deletion, fed by an [`ingest::IngestQueue`] that a
//!   producer pushes timestamped records into and a background
//!   [`ingest::IngestWorker`] drains once per second.
//! - **Server side**: a [`server::StoreServer`] that answers the vault file
//!   service wire protocol — directory listing, open/close, indexed reads and
//!   writes, keepalives — against a [`session::SessionTable`] of open-file
//!   slots, each bound to an [`agent::ArchiveAgent`].
//!
//! The server is a single task that owns all of its state and consumes
//! inbound messages from a channel; there is no shared-lock table. Each open
//! client session gets its own agent bound to the specific file it asked for,
//! so a write-side rotation never swaps a file out from under a reader.

pub mod agent;
pub mod catalog;
pub mod config;
pub mod error;
pub mod ingest;
pub mod raw;
pub mod retention;
pub mod server;
pub mod session;
pub mod structured;

pub use agent::ArchiveAgent;
pub use config::{ArchiveFormat, StreamConfig};
pub use error::{AgentError, Error, Result};
pub use ingest::{IngestQueue, IngestWorker};
pub use retention::StreamStore;
pub use server::StoreServer;
pub use session::{SessionTable, SlotEvent, DEFAULT_MAX_STORE_FILES};
