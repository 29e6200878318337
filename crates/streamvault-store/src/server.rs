//! Store Server — Wire Protocol Front End
//!
//! One task owns everything: the session table, the directory catalog and the
//! outbound sink. Inbound [`Envelope`]s arrive on a channel from the host's
//! transport; the run loop interleaves them with a once-per-second keepalive
//! sweep. Because a single task owns all the state, requests against a handle
//! are naturally serialized and no lock is shared with anyone.
//!
//! Malformed or unauthorized traffic (short messages, length mismatches,
//! handle/identity mismatches, unexpected message types) is dropped after a
//! warning, without a response — a spoofed request does not get a courtesy
//! reply. Everything else gets a response carrying a code in `param`.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::agent::ArchiveAgent;
use crate::catalog::Catalog;
use crate::session::{Owner, SessionTable, SlotEvent, DEFAULT_MAX_STORE_FILES};
use streamvault_core::wire::{
    self, code, decode_message, encode_message, Envelope, MessageSink, MessageType, WireHeader,
};

/// Cadence of the keepalive eviction sweep.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Shortest open name the server will look up, extension included.
const MIN_OPEN_NAME: usize = 3;

pub struct StoreServer {
    root: PathBuf,
    catalog: Catalog,
    table: SessionTable,
    sink: Arc<dyn MessageSink>,
}

impl StoreServer {
    pub fn new(root: impl Into<PathBuf>, sink: Arc<dyn MessageSink>) -> Self {
        Self::with_capacity(root, sink, DEFAULT_MAX_STORE_FILES)
    }

    pub fn with_capacity(
        root: impl Into<PathBuf>,
        sink: Arc<dyn MessageSink>,
        capacity: usize,
    ) -> Self {
        let root = root.into();
        Self {
            catalog: Catalog::new(&root),
            table: SessionTable::new(capacity),
            sink,
            root,
        }
    }

    /// Publish slot transitions on `events`.
    pub fn with_events(mut self, events: mpsc::UnboundedSender<SlotEvent>) -> Self {
        self.table = self.table.with_events(events);
        self
    }

    /// Serve until the inbound channel closes.
    pub async fn run(mut self, mut inbound: mpsc::Receiver<Envelope>) {
        let mut sweep = tokio::time::interval(SWEEP_INTERVAL);
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                envelope = inbound.recv() => {
                    match envelope {
                        Some(envelope) => self.handle_message(envelope).await,
                        None => break,
                    }
                }
                _ = sweep.tick() => {
                    self.table.sweep(Instant::now());
                }
            }
        }
    }

    /// Run the keepalive sweep now. The run loop does this on its own tick;
    /// exposed for hosts that drive the server manually.
    pub fn sweep(&mut self, now: Instant) -> Vec<u16> {
        self.table.sweep(now)
    }

    /// Dispatch one inbound message.
    pub async fn handle_message(&mut self, envelope: Envelope) {
        if envelope.payload.len() > wire::MAX_MESSAGE {
            warn!(
                peer = ?envelope.from,
                len = envelope.payload.len(),
                "dropping oversized message"
            );
            return;
        }

        let (header, payload) = match decode_message(envelope.payload.clone()) {
            Ok(parts) => parts,
            Err(e) => {
                warn!(peer = ?envelope.from, error = %e, "dropping malformed message");
                return;
            }
        };

        match header.msg_type {
            MessageType::DirReq => self.handle_dir(&envelope, header).await,
            MessageType::OpenReq => self.handle_open(&envelope, header, &payload).await,
            MessageType::CloseReq => self.handle_close(&envelope, header).await,
            MessageType::Keepalive => self.handle_keepalive(&envelope, header).await,
            MessageType::ReadIndexReq => self.handle_read(&envelope, header).await,
            MessageType::WriteIndexReq => self.handle_write(&envelope, header, &payload).await,
            other => {
                warn!(peer = ?envelope.from, msg_type = ?other, "dropping unserved message type");
            }
        }
    }

    async fn handle_dir(&mut self, envelope: &Envelope, request: WireHeader) {
        let mut response = request;
        response.msg_type = MessageType::DirRes;

        match self.catalog.payload().await {
            Ok(listing) => {
                response.param = code::SUCCESS;
                self.respond(envelope, response, listing.as_bytes()).await;
            }
            Err(e) => {
                warn!(error = %e, "directory listing failed");
                response.param = code::SERVICE_UNAVAILABLE;
                self.respond(envelope, response, &[]).await;
            }
        }
    }

    async fn handle_open(&mut self, envelope: &Envelope, request: WireHeader, payload: &[u8]) {
        let mut response = request;
        response.msg_type = MessageType::OpenRes;
        response.index = 0;

        let owner = Owner {
            peer: envelope.from,
            port: envelope.from_port,
            client_handle: request.client_handle,
        };

        let name = String::from_utf8_lossy(payload)
            .trim_end_matches('\0')
            .trim()
            .to_string();

        let outcome = self.open_slot(owner, &name, request.param).await;
        match outcome {
            Ok((handle, count)) => {
                response.param = code::SUCCESS;
                response.store_handle = handle;
                response.index = count;
            }
            Err(error_code) => {
                response.param = error_code;
            }
        }

        self.respond(envelope, response, &[]).await;
    }

    async fn open_slot(&mut self, owner: Owner, name: &str, open_param: u16) -> Result<(u16, u32), u16> {
        if name.len() < MIN_OPEN_NAME {
            return Err(code::FILE_NOT_FOUND);
        }
        let Some(path) = self.resolve(name) else {
            return Err(code::FILE_NOT_FOUND);
        };

        if self.table.client_file_count(owner.peer, owner.port) >= wire::MAX_CLIENT_FILES {
            return Err(code::MAX_CLIENT_FILES);
        }

        let agent = ArchiveAgent::open(&path, open_param).map_err(|e| e.response_code())?;
        let count = agent.record_count().await;

        match self.table.open(owner, agent, name.to_string(), Instant::now()) {
            Some(handle) => Ok((handle, count)),
            None => Err(code::MAX_STORE_FILES),
        }
    }

    /// Root-relative lookup; anything that escapes the root is refused.
    fn resolve(&self, name: &str) -> Option<PathBuf> {
        let relative = Path::new(name);
        let clean = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if !clean {
            return None;
        }
        Some(self.root.join(relative))
    }

    async fn handle_close(&mut self, envelope: &Envelope, request: WireHeader) {
        let owner = Owner {
            peer: envelope.from,
            port: envelope.from_port,
            client_handle: request.client_handle,
        };

        let Some(slot) = self.table.close(request.store_handle, &owner) else {
            warn!(
                peer = ?envelope.from,
                handle = request.store_handle,
                "dropping close for unowned handle"
            );
            return;
        };
        debug!(
            handle = request.store_handle,
            rx = slot.rx_bytes,
            tx = slot.tx_bytes,
            "session byte counts at close"
        );

        let mut response = request;
        response.msg_type = MessageType::CloseRes;
        response.param = code::SUCCESS;
        self.respond(envelope, response, &[]).await;
    }

    async fn handle_keepalive(&mut self, envelope: &Envelope, request: WireHeader) {
        let owner = Owner {
            peer: envelope.from,
            port: envelope.from_port,
            client_handle: request.client_handle,
        };

        let Some(slot) = self.table.lookup(request.store_handle, &owner) else {
            warn!(
                peer = ?envelope.from,
                handle = request.store_handle,
                "dropping keepalive for unowned handle"
            );
            return;
        };
        slot.last_keepalive = Instant::now();

        // keepalives echo straight back, same type both directions
        self.respond(envelope, request, &[]).await;
    }

    async fn handle_read(&mut self, envelope: &Envelope, request: WireHeader) {
        let owner = Owner {
            peer: envelope.from,
            port: envelope.from_port,
            client_handle: request.client_handle,
        };

        let Some(slot) = self.table.lookup(request.store_handle, &owner) else {
            warn!(
                peer = ?envelope.from,
                handle = request.store_handle,
                "dropping read for unowned handle"
            );
            return;
        };

        let mut response = request;
        response.msg_type = MessageType::ReadIndexRes;

        match slot.agent.read(request.index, request.param).await {
            Ok(data) => {
                slot.tx_bytes += data.len() as u64;
                response.param = code::SUCCESS;
                self.respond(envelope, response, &data).await;
            }
            Err(e) => {
                debug!(handle = request.store_handle, index = request.index, error = %e, "read failed");
                response.param = e.response_code();
                self.respond(envelope, response, &[]).await;
            }
        }
    }

    async fn handle_write(&mut self, envelope: &Envelope, request: WireHeader, payload: &[u8]) {
        let owner = Owner {
            peer: envelope.from,
            port: envelope.from_port,
            client_handle: request.client_handle,
        };

        let Some(slot) = self.table.lookup(request.store_handle, &owner) else {
            warn!(
                peer = ?envelope.from,
                handle = request.store_handle,
                "dropping write for unowned handle"
            );
            return;
        };
        slot.rx_bytes += payload.len() as u64;

        let mut response = request;
        response.msg_type = MessageType::WriteIndexRes;

        match slot.agent.write(request.index, payload).await {
            Ok(_count) => {
                response.param = code::SUCCESS;
            }
            Err(e) => {
                debug!(handle = request.store_handle, index = request.index, error = %e, "write failed");
                response.param = e.response_code();
            }
        }

        self.respond(envelope, response, &[]).await;
    }

    async fn respond(&self, envelope: &Envelope, header: WireHeader, payload: &[u8]) {
        let message = encode_message(header, payload);
        if let Err(e) = self.sink.send(envelope.from, envelope.from_port, message).await {
            warn!(peer = ?envelope.from, error = %e, "response send failed");
        }
    }
}
