//! Archive Session — Per-Viewer Client State Machine
//!
//! One session serves one viewer scrubbing one archived stream. Driving a
//! session takes three inputs from the host: wire envelopes routed to it
//! ([`handle_message`](ArchiveSession::handle_message)), a periodic tick
//! ([`tick`](ArchiveSession::tick)), and the viewer's requested timestamp
//! ([`seek_to`](ArchiveSession::seek_to)). Decoded records and status come
//! back on an event channel.
//!
//! ## Opening sequence
//!
//! ```text
//! Idle --seek_to--> IxOpening --open ok--> IxOpen
//! IxOpen --(stream whole index, build seek index)--> IxClosing
//! IxClosing --close ok--> SfOpening --open ok--> SfOpen
//! SfOpen --seek_to, same source & day--> SfOpen  (one read at a time)
//! any state --source/day change, failure, or store loss--> Idle
//! ```
//!
//! The index file is opened as a raw file with a block size holding
//! [`INDEX_BLOCK_ENTRIES`] entries and streamed block by block; the last
//! block announces itself by coming back short. The data file is then opened
//! structured and stays open for reads.
//!
//! ## Invariants
//!
//! At most one read is in flight, ever: a `seek_to` while a read is
//! outstanding is a no-op, and the caller simply seeks again once the
//! response lands — cooperative backpressure, not an error. A response whose
//! echoed index doesn't match the outstanding request is logged and dropped.
//! Failures park the session back in `Idle` with a status string; the next
//! seek (or the retry timer) starts a fresh open with the last known
//! source and timestamp.
//!
//! A read that gets no response within [`REQUEST_TIMEOUT`] is abandoned so
//! the outstanding flag cannot wedge the session permanently.

use bytes::Bytes;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::decode::{decode_record, DecodedRecord};
use crate::error::{Error, Result};
use crate::seek::SeekIndex;
use streamvault_core::wire::{
    code, decode_message, encode_message, Envelope, MessageSink, MessageType, PeerId, WireHeader,
    KEEPALIVE_INTERVAL, KEEPALIVE_TIMEOUT, OPEN_STRUCTURED, REQUEST_TIMEOUT,
};
use streamvault_core::{IndexEntry, DATA_EXT, INDEX_ENTRY_SIZE, INDEX_EXT};

/// Index entries fetched per read while streaming an index file.
pub const INDEX_BLOCK_ENTRIES: usize = 3000;

/// Raw block size used to open an index file.
pub const INDEX_BLOCK_SIZE: u16 = (INDEX_ENTRY_SIZE * INDEX_BLOCK_ENTRIES) as u16;

/// How often the session refreshes the store's directory listing.
pub const DIRECTORY_REFRESH: Duration = Duration::from_secs(4);

/// How long a failed session waits before retrying its open on its own.
pub const RETRY_DELAY: Duration = Duration::from_secs(2);

const STAMP_FORMAT: &str = "%Y%m%d_%H%M";

/// Address of a store on the host's transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreRef {
    pub peer: PeerId,
    pub port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    IxOpening,
    IxOpen,
    IxClosing,
    SfOpening,
    SfOpen,
    SfClosing,
}

/// What a session reports back to its viewer.
#[derive(Debug)]
pub enum SessionEvent {
    /// A decoded record for the most recent seek.
    Record(DecodedRecord),
    /// Human-readable state changes and failures.
    Status(String),
    /// Fresh directory listing from the store.
    Directory(Vec<String>),
}

/// The archive pair a session has chosen to open.
#[derive(Debug, Clone)]
struct OpenTarget {
    source: String,
    day: NaiveDate,
    day_start_ms: i64,
    data_path: String,
    index_path: String,
}

pub struct ArchiveSession {
    store: StoreRef,
    sink: Arc<dyn MessageSink>,
    events: mpsc::UnboundedSender<SessionEvent>,
    /// Our side of the handle pair, echoed on every response.
    client_handle: u16,

    state: SessionState,
    directory: Vec<String>,
    target: Option<OpenTarget>,
    requested_source: Option<String>,
    requested_ts: Option<i64>,

    store_handle: u16,
    index_entries: Vec<IndexEntry>,
    next_block: u32,
    total_blocks: u32,
    seek: Option<SeekIndex>,

    outstanding: Option<(u32, Instant)>,
    last_delivered: Option<u32>,
    last_keepalive_sent: Instant,
    last_rx: Instant,
    last_dir_request: Option<Instant>,
    last_attempt: Option<Instant>,
}

impl ArchiveSession {
    pub fn new(
        store: StoreRef,
        sink: Arc<dyn MessageSink>,
        client_handle: u16,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        let now = Instant::now();
        Self {
            store,
            sink,
            events,
            client_handle,
            state: SessionState::Idle,
            directory: Vec::new(),
            target: None,
            requested_source: None,
            requested_ts: None,
            store_handle: 0,
            index_entries: Vec::new(),
            next_block: 0,
            total_blocks: 0,
            seek: None,
            outstanding: None,
            last_delivered: None,
            last_keepalive_sent: now,
            last_rx: now,
            last_dir_request: None,
            last_attempt: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn directory(&self) -> &[String] {
        &self.directory
    }

    /// Ask the store for its current archive listing.
    pub async fn request_directory(&mut self) {
        self.last_dir_request = Some(Instant::now());
        self.send(WireHeader::new(MessageType::DirReq), &[]).await;
    }

    /// The viewer wants the record nearest `timestamp_ms`. Drives the whole
    /// open sequence when nothing is open yet, re-opens when the source or
    /// day changed, and otherwise issues at most one read.
    pub async fn seek_to(&mut self, source: &str, timestamp_ms: i64) {
        self.requested_source = Some(source.to_string());
        self.requested_ts = Some(timestamp_ms);

        let Some(day) = day_of(timestamp_ms) else {
            self.status(format!("unusable timestamp {timestamp_ms}"));
            return;
        };

        if let Some(target) = &self.target {
            if target.source != source || target.day != day {
                info!(source, %day, "source or day changed, reopening");
                self.close_current("switching archive").await;
            }
        }

        match self.state {
            SessionState::Idle => self.begin_open(Instant::now()).await,
            SessionState::SfOpen => self.issue_read().await,
            // opening sequence already in flight; it picks up the new
            // timestamp when it reaches SfOpen
            _ => {}
        }
    }

    /// Close whatever is open and go back to Idle without auto-retry.
    pub async fn close(&mut self) {
        self.requested_source = None;
        self.requested_ts = None;

        if self.has_open_handle() {
            let mut header = WireHeader::new(MessageType::CloseReq);
            header.store_handle = self.store_handle;
            self.send(header, &[]).await;
            self.state = SessionState::SfClosing;
        } else {
            self.reset();
        }
    }

    /// Process one envelope the host routed to this session.
    pub async fn handle_message(&mut self, envelope: Envelope) {
        if envelope.from != self.store.peer || envelope.from_port != self.store.port {
            warn!(from = ?envelope.from, "dropping message from unexpected peer");
            return;
        }
        self.last_rx = Instant::now();

        let (header, payload) = match decode_message(envelope.payload) {
            Ok(parts) => parts,
            Err(e) => {
                warn!(error = %e, "dropping malformed message");
                return;
            }
        };

        if header.client_handle != self.client_handle {
            warn!(
                client_handle = header.client_handle,
                "dropping message for another session"
            );
            return;
        }

        match (header.msg_type, self.state) {
            (MessageType::DirRes, _) => self.on_directory(&payload),
            (MessageType::Keepalive, _) => {} // liveness only
            (MessageType::OpenRes, SessionState::IxOpening) => self.on_index_open(header).await,
            (MessageType::ReadIndexRes, SessionState::IxOpen) => {
                self.on_index_block(header, payload).await
            }
            (MessageType::CloseRes, SessionState::IxClosing) => self.on_index_closed().await,
            (MessageType::OpenRes, SessionState::SfOpening) => self.on_data_open(header).await,
            (MessageType::ReadIndexRes, SessionState::SfOpen) => {
                self.on_record(header, payload).await
            }
            (MessageType::CloseRes, SessionState::SfClosing) => {
                self.reset();
                self.status("closed".to_string());
            }
            (msg_type, state) => {
                debug!(?msg_type, ?state, "dropping message unexpected in this state");
            }
        }
    }

    /// Periodic housekeeping: keepalives, loss detection, request timeout,
    /// directory refresh and the auto-retry of a failed open.
    pub async fn tick(&mut self, now: Instant) {
        if self.state != SessionState::Idle
            && now.saturating_duration_since(self.last_rx) >= KEEPALIVE_TIMEOUT
        {
            warn!("store stopped responding, reopening");
            // restart the loss clock; the reopen below is single-shot
            self.last_rx = now;
            self.reset();
            self.status("store lost, reopening".to_string());
            self.begin_open(now).await;
            return;
        }

        if self.has_open_handle()
            && now.saturating_duration_since(self.last_keepalive_sent) >= KEEPALIVE_INTERVAL
        {
            self.last_keepalive_sent = now;
            let mut header = WireHeader::new(MessageType::Keepalive);
            header.store_handle = self.store_handle;
            self.send(header, &[]).await;
        }

        if let Some((index, sent)) = self.outstanding {
            if now.saturating_duration_since(sent) >= REQUEST_TIMEOUT {
                warn!(index, "read timed out, abandoning");
                self.outstanding = None;
                self.status(format!("read of record {index} timed out"));
            }
        }

        if self
            .last_dir_request
            .map_or(true, |at| now.saturating_duration_since(at) >= DIRECTORY_REFRESH)
        {
            self.request_directory().await;
        }

        let retry_due = self
            .last_attempt
            .map_or(true, |at| now.saturating_duration_since(at) >= RETRY_DELAY);
        if self.state == SessionState::Idle && self.requested_ts.is_some() && retry_due {
            self.begin_open(now).await;
        }
    }

    fn on_directory(&mut self, payload: &[u8]) {
        let listing = String::from_utf8_lossy(payload);
        self.directory = listing
            .lines()
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();
        let _ = self
            .events
            .send(SessionEvent::Directory(self.directory.clone()));
    }

    async fn begin_open(&mut self, now: Instant) {
        let (Some(source), Some(ts)) = (self.requested_source.clone(), self.requested_ts) else {
            return;
        };
        self.last_attempt = Some(now);

        match self.find_archive(&source, ts) {
            Ok(target) => {
                debug!(index = %target.index_path, "opening index file");
                self.index_entries.clear();
                self.seek = None;
                self.outstanding = None;
                self.last_delivered = None;

                let mut header = WireHeader::new(MessageType::OpenReq);
                header.param = INDEX_BLOCK_SIZE;
                let path = target.index_path.clone();
                self.target = Some(target);
                self.state = SessionState::IxOpening;
                self.send(header, path.as_bytes()).await;
            }
            Err(e) => {
                self.status(format!("archive lookup failed: {e}"));
            }
        }
    }

    /// Pick the archive file covering `ts` for `source` from the directory
    /// listing: same source, same day, latest stamp not after `ts` (or the
    /// day's earliest file when `ts` precedes them all).
    fn find_archive(&self, source: &str, ts: i64) -> Result<OpenTarget> {
        let sanitized = source.replace([':', '/'], "_");
        let day = day_of(ts).ok_or(Error::NoArchiveForDay {
            stream: source.to_string(),
        })?;

        let mut candidates: Vec<(NaiveDateTime, &String)> = Vec::new();
        for path in &self.directory {
            let Some(stamp) = stamp_for(path, &sanitized) else {
                continue;
            };
            if stamp.date() == day {
                candidates.push((stamp, path));
            }
        }
        candidates.sort_by_key(|(stamp, _)| *stamp);

        let chosen = candidates
            .iter()
            .rev()
            .find(|(stamp, _)| Utc.from_utc_datetime(stamp).timestamp_millis() <= ts)
            .or_else(|| candidates.first())
            .ok_or(Error::NoArchiveForDay {
                stream: source.to_string(),
            })?;

        let data_path = chosen.1.clone();
        let index_path = format!(
            "{}{}",
            &data_path[..data_path.len() - DATA_EXT.len()],
            INDEX_EXT
        );
        let day_start = Utc.from_utc_datetime(&day.and_time(NaiveTime::MIN));

        Ok(OpenTarget {
            source: source.to_string(),
            day,
            day_start_ms: day_start.timestamp_millis(),
            data_path,
            index_path,
        })
    }

    async fn on_index_open(&mut self, header: WireHeader) {
        if code::is_error(header.param) {
            self.fail(format!("index open failed: {:#06x}", header.param));
            return;
        }

        self.store_handle = header.store_handle;
        self.total_blocks = header.index;
        self.next_block = 0;

        if self.total_blocks == 0 {
            self.abandon_handle("index file is empty").await;
            return;
        }

        self.state = SessionState::IxOpen;
        self.request_index_block().await;
    }

    async fn request_index_block(&mut self) {
        let mut header = WireHeader::new(MessageType::ReadIndexReq);
        header.store_handle = self.store_handle;
        header.param = 1; // one block per request
        header.index = self.next_block;
        self.send(header, &[]).await;
    }

    async fn on_index_block(&mut self, header: WireHeader, payload: Bytes) {
        if code::is_error(header.param) {
            self.abandon_handle(&format!("index read failed: {:#06x}", header.param))
                .await;
            return;
        }
        if header.index != self.next_block {
            warn!(
                got = header.index,
                expected = self.next_block,
                "dropping index block with mismatched echo"
            );
            return;
        }

        self.index_entries.extend(IndexEntry::decode_all(&payload));

        let short_block = payload.len() < INDEX_BLOCK_SIZE as usize;
        if short_block || self.next_block + 1 >= self.total_blocks {
            debug!(entries = self.index_entries.len(), "index fully streamed");
            self.state = SessionState::IxClosing;
            let mut close = WireHeader::new(MessageType::CloseReq);
            close.store_handle = self.store_handle;
            self.send(close, &[]).await;
        } else {
            self.next_block += 1;
            self.request_index_block().await;
        }
    }

    async fn on_index_closed(&mut self) {
        let Some(target) = self.target.clone() else {
            self.fail("no target after index close".to_string());
            return;
        };

        self.seek = Some(SeekIndex::build(target.day_start_ms, &self.index_entries));
        self.index_entries = Vec::new();

        debug!(data = %target.data_path, "opening data file");
        let mut header = WireHeader::new(MessageType::OpenReq);
        header.param = OPEN_STRUCTURED;
        self.state = SessionState::SfOpening;
        self.send(header, target.data_path.as_bytes()).await;
    }

    async fn on_data_open(&mut self, header: WireHeader) {
        if code::is_error(header.param) {
            self.fail(format!("archive open failed: {:#06x}", header.param));
            return;
        }

        self.store_handle = header.store_handle;
        self.state = SessionState::SfOpen;
        if let Some(target) = &self.target {
            self.status(format!("open: {}", target.data_path));
        }
        self.issue_read().await;
    }

    /// Issue the read for the current requested timestamp, if no read is in
    /// flight and we haven't already delivered that record.
    async fn issue_read(&mut self) {
        if self.outstanding.is_some() {
            return; // cooperative backpressure
        }
        let (Some(seek), Some(ts)) = (&self.seek, self.requested_ts) else {
            return;
        };

        let index = match seek.lookup(ts) {
            Ok(index) => index,
            Err(e) => {
                self.status(format!("seek failed: {e}"));
                return;
            }
        };
        if self.last_delivered == Some(index) {
            return;
        }

        let mut header = WireHeader::new(MessageType::ReadIndexReq);
        header.store_handle = self.store_handle;
        header.index = index;
        self.outstanding = Some((index, Instant::now()));
        self.send(header, &[]).await;
    }

    async fn on_record(&mut self, header: WireHeader, payload: Bytes) {
        let Some((expected, _)) = self.outstanding else {
            warn!(index = header.index, "dropping read response with none outstanding");
            return;
        };
        if header.index != expected {
            warn!(
                got = header.index,
                expected, "dropping read response with mismatched echo"
            );
            return;
        }
        self.outstanding = None;

        if code::is_error(header.param) {
            self.status(format!("read failed: {:#06x}", header.param));
            return;
        }

        match decode_record(payload) {
            Ok(record) => {
                self.last_delivered = Some(expected);
                let _ = self.events.send(SessionEvent::Record(record));
            }
            Err(e) => {
                warn!(index = expected, error = %e, "dropping undecodable record");
            }
        }

        // the viewer may have moved on while this read was in flight
        self.issue_read().await;
    }

    /// Free the currently-open handle and park in Idle for the auto-retry.
    async fn abandon_handle(&mut self, reason: &str) {
        let mut close = WireHeader::new(MessageType::CloseReq);
        close.store_handle = self.store_handle;
        self.send(close, &[]).await;
        self.fail(reason.to_string());
    }

    async fn close_current(&mut self, reason: &str) {
        if self.has_open_handle() {
            let mut close = WireHeader::new(MessageType::CloseReq);
            close.store_handle = self.store_handle;
            self.send(close, &[]).await;
        }
        self.reset();
        self.status(reason.to_string());
    }

    fn fail(&mut self, reason: String) {
        warn!(%reason, "session failed, back to idle");
        self.reset();
        self.status(reason);
    }

    fn reset(&mut self) {
        self.state = SessionState::Idle;
        self.store_handle = 0;
        self.target = None;
        self.index_entries.clear();
        self.seek = None;
        self.outstanding = None;
        self.last_delivered = None;
        self.next_block = 0;
        self.total_blocks = 0;
    }

    fn has_open_handle(&self) -> bool {
        matches!(self.state, SessionState::IxOpen | SessionState::SfOpen)
    }

    fn status(&self, message: String) {
        let _ = self.events.send(SessionEvent::Status(message));
    }

    async fn send(&self, mut header: WireHeader, payload: &[u8]) {
        header.client_handle = self.client_handle;
        let message = encode_message(header, payload);
        if let Err(e) = self.sink.send(self.store.peer, self.store.port, message).await {
            warn!(error = %e, "send to store failed");
        }
    }
}

/// UTC calendar day of a millisecond timestamp.
fn day_of(timestamp_ms: i64) -> Option<NaiveDate> {
    Utc.timestamp_millis_opt(timestamp_ms)
        .single()
        .map(|dt| dt.date_naive())
}

/// Extract the `yyyyMMdd_hhmm` stamp from a directory entry if it belongs to
/// `sanitized` (either as its sub-folder or as its filename prefix).
fn stamp_for(path: &str, sanitized: &str) -> Option<NaiveDateTime> {
    let (folder, file) = match path.rsplit_once('/') {
        Some((folder, file)) => (Some(folder), file),
        None => (None, path),
    };

    let stem = file.strip_suffix(&format!(".{DATA_EXT}"))?;

    let stamp = if folder == Some(sanitized) {
        stem
    } else if folder.is_none() {
        stem.strip_prefix(&format!("{sanitized}_"))?
    } else {
        return None;
    };

    NaiveDateTime::parse_from_str(stamp, STAMP_FORMAT).ok()
}
