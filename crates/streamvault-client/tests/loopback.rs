//! End-to-end loopback: a real archive on disk, a real store server, and an
//! archive session wired together through in-memory channels standing in for
//! the host transport. The session must walk the full open sequence (index
//! open, block streaming, data open) and deliver decoded records for scrub
//! timestamps.

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use chrono::{DateTime, TimeZone, Utc};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::mpsc;

use streamvault_client::{ArchiveSession, DecodedRecord, SessionEvent, SessionState, StoreRef};
use streamvault_core::wire::{Envelope, MessageSink, PeerId};
use streamvault_core::{RecordHeader, RecordType, Result as CoreResult, RECORD_HEADER_SIZE};
use streamvault_store::ingest::{drain_tick, IngestQueue};
use streamvault_store::{StoreServer, StreamConfig, StreamStore};

const STORE_PEER: PeerId = PeerId(1);
const STORE_PORT: u16 = 40;
const CLIENT_PEER: PeerId = PeerId(2);
const CLIENT_PORT: u16 = 33;
const CLIENT_HANDLE: u16 = 7;

/// Stamps outbound messages with a fixed origin and queues them for the
/// other side, the way the host transport would.
struct LoopbackSink {
    from: PeerId,
    from_port: u16,
    tx: mpsc::UnboundedSender<Envelope>,
}

#[async_trait]
impl MessageSink for LoopbackSink {
    async fn send(&self, _to: PeerId, _to_port: u16, payload: Bytes) -> CoreResult<()> {
        let _ = self.tx.send(Envelope {
            from: self.from,
            from_port: self.from_port,
            payload,
        });
        Ok(())
    }
}

struct Loopback {
    server: StoreServer,
    session: ArchiveSession,
    to_server: mpsc::UnboundedReceiver<Envelope>,
    to_client: mpsc::UnboundedReceiver<Envelope>,
    events: mpsc::UnboundedReceiver<SessionEvent>,
}

impl Loopback {
    fn new(root: &std::path::Path) -> Self {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        let (server_out, to_client) = mpsc::unbounded_channel();
        let (client_out, to_server) = mpsc::unbounded_channel();
        let (event_tx, events) = mpsc::unbounded_channel();

        let server = StoreServer::new(
            root,
            Arc::new(LoopbackSink {
                from: STORE_PEER,
                from_port: STORE_PORT,
                tx: server_out,
            }),
        );

        let session = ArchiveSession::new(
            StoreRef {
                peer: STORE_PEER,
                port: STORE_PORT,
            },
            Arc::new(LoopbackSink {
                from: CLIENT_PEER,
                from_port: CLIENT_PORT,
                tx: client_out,
            }),
            CLIENT_HANDLE,
            event_tx,
        );

        Self {
            server,
            session,
            to_server,
            to_client,
            events,
        }
    }

    /// Shuttle messages both ways until everything settles.
    async fn pump(&mut self) {
        for _ in 0..100 {
            let mut moved = false;
            while let Ok(envelope) = self.to_server.try_recv() {
                self.server.handle_message(envelope).await;
                moved = true;
            }
            while let Ok(envelope) = self.to_client.try_recv() {
                self.session.handle_message(envelope).await;
                moved = true;
            }
            if !moved {
                return;
            }
        }
        panic!("loopback did not settle");
    }

    fn drain_events(&mut self) -> Vec<SessionEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 8, 25, 10, 0, 0).unwrap()
}

fn video_record(index: u32, timestamp_ms: i64, jpeg: &[u8]) -> Bytes {
    let mut header = RecordHeader::new(RecordType::Video, index, timestamp_ms);
    header.header_length = RECORD_HEADER_SIZE as u16 + 8;

    let mut buf = BytesMut::new();
    header.encode(&mut buf);
    buf.put_u16_le(640);
    buf.put_u16_le(480);
    buf.put_u32_le(jpeg.len() as u32);
    buf.put_slice(jpeg);
    buf.freeze()
}

/// Write a day's archive for stream `cam`: three video records at
/// t0+1s, t0+5s and t0+9s.
async fn build_archive(root: &std::path::Path) {
    let mut store = StreamStore::new(StreamConfig::new("cam", root)).unwrap();
    let queue = IngestQueue::new();

    let base = t0().timestamp_millis();
    queue.push(video_record(0, base + 1_000, b"frame-one"));
    queue.push(video_record(1, base + 5_000, b"frame-two"));
    queue.push(video_record(2, base + 9_000, b"frame-three"));

    drain_tick(&mut store, &queue, t0()).await.unwrap();
}

fn record_timestamps(events: &[SessionEvent]) -> Vec<i64> {
    events
        .iter()
        .filter_map(|event| match event {
            SessionEvent::Record(record) => Some(record.timestamp()),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_scrub_through_a_day_archive() {
    let tmp = TempDir::new().unwrap();
    build_archive(tmp.path()).await;
    let mut loopback = Loopback::new(tmp.path());
    let base = t0().timestamp_millis();

    loopback.session.request_directory().await;
    loopback.pump().await;

    let events = loopback.drain_events();
    assert!(events.iter().any(|event| matches!(
        event,
        SessionEvent::Directory(listing) if listing.contains(&"cam/20260825_1000.srf".to_string())
    )));

    // scrub to 10:00:06.2 — nearest record not later is the one at +5s
    loopback.session.seek_to("cam", base + 6_200).await;
    loopback.pump().await;

    assert_eq!(loopback.session.state(), SessionState::SfOpen);
    let events = loopback.drain_events();
    assert_eq!(record_timestamps(&events), [base + 5_000]);

    let frame = events.iter().find_map(|event| match event {
        SessionEvent::Record(DecodedRecord::Video { width, jpeg, .. }) => Some((*width, jpeg.clone())),
        _ => None,
    });
    let (width, jpeg) = frame.expect("expected a decoded video record");
    assert_eq!(width, 640);
    assert_eq!(&jpeg[..], b"frame-two");

    // past the end clamps to the last record
    loopback.session.seek_to("cam", base + 100_000).await;
    loopback.pump().await;
    assert_eq!(record_timestamps(&loopback.drain_events()), [base + 9_000]);

    // before the first record resolves to record zero
    loopback.session.seek_to("cam", base).await;
    loopback.pump().await;
    assert_eq!(record_timestamps(&loopback.drain_events()), [base + 1_000]);

    // the data file stays open across seeks within the same day
    assert_eq!(loopback.session.state(), SessionState::SfOpen);
}

#[tokio::test]
async fn test_repeated_seek_to_same_record_reads_once() {
    let tmp = TempDir::new().unwrap();
    build_archive(tmp.path()).await;
    let mut loopback = Loopback::new(tmp.path());
    let base = t0().timestamp_millis();

    loopback.session.request_directory().await;
    loopback.pump().await;

    loopback.session.seek_to("cam", base + 5_100).await;
    loopback.pump().await;
    assert_eq!(record_timestamps(&loopback.drain_events()), [base + 5_000]);

    // same record again: nothing new crosses the wire
    loopback.session.seek_to("cam", base + 5_200).await;
    loopback.pump().await;
    assert!(record_timestamps(&loopback.drain_events()).is_empty());
}

#[tokio::test]
async fn test_seek_with_no_archive_reports_and_idles() {
    let tmp = TempDir::new().unwrap();
    build_archive(tmp.path()).await;
    let mut loopback = Loopback::new(tmp.path());

    loopback.session.request_directory().await;
    loopback.pump().await;
    loopback.drain_events();

    // a day with no archive on disk
    let elsewhere = Utc
        .with_ymd_and_hms(2026, 9, 1, 12, 0, 0)
        .unwrap()
        .timestamp_millis();
    loopback.session.seek_to("cam", elsewhere).await;
    loopback.pump().await;

    assert_eq!(loopback.session.state(), SessionState::Idle);
    let events = loopback.drain_events();
    assert!(events
        .iter()
        .any(|event| matches!(event, SessionEvent::Status(_))));
    assert!(record_timestamps(&events).is_empty());
}

#[tokio::test]
async fn test_close_frees_the_server_slot() {
    let tmp = TempDir::new().unwrap();
    build_archive(tmp.path()).await;
    let mut loopback = Loopback::new(tmp.path());
    let base = t0().timestamp_millis();

    loopback.session.request_directory().await;
    loopback.pump().await;
    loopback.session.seek_to("cam", base + 1_000).await;
    loopback.pump().await;
    assert_eq!(loopback.session.state(), SessionState::SfOpen);

    loopback.session.close().await;
    loopback.pump().await;
    assert_eq!(loopback.session.state(), SessionState::Idle);
}
