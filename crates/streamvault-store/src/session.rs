//! Session Table — Server-Side Open-Handle Registry
//!
//! A fixed-capacity arena of open-file slots. The store handle a client gets
//! back from an open is the slot's index; the slot records the owning
//! `(peer, port, client handle)` triple for its whole lifetime, and every
//! subsequent request must match all three — a stale or spoofed handle fails
//! the lookup instead of touching someone else's file.
//!
//! Liveness is keepalive-driven: the sweep force-closes any slot that has
//! gone [`KEEPALIVE_TIMEOUT`] without one. That is the only path that
//! reclaims a session whose client crashed without sending a close.
//!
//! Slot transitions (open, close, evict) are published on an optional event
//! channel so a host can surface per-file status.

use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::agent::ArchiveAgent;
use streamvault_core::wire::{PeerId, KEEPALIVE_TIMEOUT};

/// Default slot capacity for a store.
pub const DEFAULT_MAX_STORE_FILES: usize = 1024;

/// The identity a slot is bound to at open time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Owner {
    pub peer: PeerId,
    pub port: u16,
    pub client_handle: u16,
}

/// One open archive file and its bookkeeping.
pub struct Slot {
    pub owner: Owner,
    pub agent: ArchiveAgent,
    /// Root-relative path as the client opened it.
    pub path: String,
    pub last_keepalive: Instant,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

/// Status transitions published to observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotEvent {
    Opened { handle: u16, path: String },
    Closed { handle: u16, path: String },
    Evicted { handle: u16, path: String },
}

pub struct SessionTable {
    slots: Vec<Option<Slot>>,
    events: Option<mpsc::UnboundedSender<SlotEvent>>,
}

impl SessionTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            events: None,
        }
    }

    /// Publish slot transitions on `events`.
    pub fn with_events(mut self, events: mpsc::UnboundedSender<SlotEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Open files currently owned by one client endpoint.
    pub fn client_file_count(&self, peer: PeerId, port: u16) -> usize {
        self.slots
            .iter()
            .flatten()
            .filter(|slot| slot.owner.peer == peer && slot.owner.port == port)
            .count()
    }

    /// Bind `agent` to a free slot. Returns the store handle, or `None` when
    /// the table is full.
    pub fn open(&mut self, owner: Owner, agent: ArchiveAgent, path: String, now: Instant) -> Option<u16> {
        let handle = self.slots.iter().position(|slot| slot.is_none())? as u16;

        self.slots[handle as usize] = Some(Slot {
            owner,
            agent,
            path: path.clone(),
            last_keepalive: now,
            rx_bytes: 0,
            tx_bytes: 0,
        });

        info!(handle, path = %path, peer = ?owner.peer, "opened archive session");
        self.emit(SlotEvent::Opened { handle, path });
        Some(handle)
    }

    /// The sanity check every post-open request goes through: handle in
    /// range, slot in use, owner triple matching. `None` means the request
    /// must be dropped without a response.
    pub fn lookup(&mut self, handle: u16, owner: &Owner) -> Option<&mut Slot> {
        let slot = self.slots.get_mut(handle as usize)?.as_mut()?;
        if slot.owner != *owner {
            return None;
        }
        Some(slot)
    }

    /// Close a slot after the sanity check. Returns the slot so the caller
    /// can inspect its counters.
    pub fn close(&mut self, handle: u16, owner: &Owner) -> Option<Slot> {
        self.lookup(handle, owner)?;
        let slot = self.slots[handle as usize].take()?;

        info!(handle, path = %slot.path, "closed archive session");
        self.emit(SlotEvent::Closed {
            handle,
            path: slot.path.clone(),
        });
        Some(slot)
    }

    /// Force-close every slot whose keepalive has expired. Returns the
    /// evicted handles.
    pub fn sweep(&mut self, now: Instant) -> Vec<u16> {
        let mut evicted = Vec::new();

        for handle in 0..self.slots.len() {
            let expired = match &self.slots[handle] {
                Some(slot) => now.duration_since(slot.last_keepalive) >= KEEPALIVE_TIMEOUT,
                None => false,
            };
            if !expired {
                continue;
            }

            if let Some(slot) = self.slots[handle].take() {
                warn!(handle, path = %slot.path, "keepalive expired, evicting session");
                self.emit(SlotEvent::Evicted {
                    handle: handle as u16,
                    path: slot.path,
                });
                evicted.push(handle as u16);
            }
        }

        evicted
    }

    pub fn in_use(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    fn emit(&self, event: SlotEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }
}
