//! Wire-level tests driving a StoreServer directly with envelopes.

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::sync::mpsc;

use streamvault_core::wire::{
    code, decode_message, encode_message, Envelope, MessageSink, MessageType, PeerId, WireHeader,
    OPEN_STRUCTURED,
};
use streamvault_core::{RecordHeader, RecordType, Result, RECORD_HEADER_SIZE};
use streamvault_store::StoreServer;

/// Captures everything the server sends, tagged with the destination.
struct CaptureSink {
    tx: mpsc::UnboundedSender<(PeerId, u16, Bytes)>,
}

#[async_trait]
impl MessageSink for CaptureSink {
    async fn send(&self, to: PeerId, to_port: u16, payload: Bytes) -> Result<()> {
        let _ = self.tx.send((to, to_port, payload));
        Ok(())
    }
}

struct Harness {
    server: StoreServer,
    rx: mpsc::UnboundedReceiver<(PeerId, u16, Bytes)>,
}

impl Harness {
    fn new(root: &TempDir) -> Self {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        let (tx, rx) = mpsc::unbounded_channel();
        let server = StoreServer::new(root.path(), Arc::new(CaptureSink { tx }));
        Self { server, rx }
    }

    async fn send(&mut self, peer: u64, header: WireHeader, payload: &[u8]) {
        let envelope = Envelope {
            from: PeerId(peer),
            from_port: 40,
            payload: encode_message(header, payload),
        };
        self.server.handle_message(envelope).await;
    }

    fn recv(&mut self) -> (WireHeader, Bytes) {
        let (_, _, message) = self.rx.try_recv().expect("expected a response");
        decode_message(message).expect("response must decode")
    }

    fn silent(&mut self) -> bool {
        self.rx.try_recv().is_err()
    }
}

fn record(index: u32, timestamp: i64, media: &[u8]) -> Bytes {
    let mut buf = BytesMut::new();
    RecordHeader::new(RecordType::Video, index, timestamp).encode(&mut buf);
    buf.put_slice(media);
    buf.freeze()
}

fn open_req(client_handle: u16, param: u16) -> WireHeader {
    let mut header = WireHeader::new(MessageType::OpenReq);
    header.client_handle = client_handle;
    header.param = param;
    header
}

async fn open(harness: &mut Harness, peer: u64, name: &str, param: u16) -> (u16, u32) {
    harness.send(peer, open_req(1, param), name.as_bytes()).await;
    let (res, _) = harness.recv();
    assert_eq!(res.msg_type, MessageType::OpenRes);
    assert_eq!(res.param, code::SUCCESS);
    (res.store_handle, res.index)
}

#[tokio::test]
async fn test_open_write_read_close_round_trip() {
    let tmp = TempDir::new().unwrap();
    let mut harness = Harness::new(&tmp);

    let (handle, count) = open(&mut harness, 1, "cam_day.srf", OPEN_STRUCTURED).await;
    assert_eq!(count, 0);

    // write two records, index 0 starts fresh
    for i in 0..2u32 {
        let mut req = WireHeader::new(MessageType::WriteIndexReq);
        req.store_handle = handle;
        req.client_handle = 1;
        req.index = i;
        harness.send(1, req, &record(i, 1000 * (i + 1) as i64, b"media")).await;

        let (res, _) = harness.recv();
        assert_eq!(res.msg_type, MessageType::WriteIndexRes);
        assert_eq!(res.param, code::SUCCESS);
        assert_eq!(res.index, i);
    }

    // read record 1 back
    let mut req = WireHeader::new(MessageType::ReadIndexReq);
    req.store_handle = handle;
    req.client_handle = 1;
    req.index = 1;
    harness.send(1, req, &[]).await;

    let (res, payload) = harness.recv();
    assert_eq!(res.msg_type, MessageType::ReadIndexRes);
    assert_eq!(res.param, code::SUCCESS);
    assert_eq!(res.index, 1);
    let header = RecordHeader::decode(&mut payload.clone()).unwrap();
    assert_eq!(header.timestamp, 2000);
    assert_eq!(&payload[RECORD_HEADER_SIZE..], b"media");

    // close
    let mut req = WireHeader::new(MessageType::CloseReq);
    req.store_handle = handle;
    req.client_handle = 1;
    harness.send(1, req, &[]).await;
    let (res, _) = harness.recv();
    assert_eq!(res.msg_type, MessageType::CloseRes);
    assert_eq!(res.param, code::SUCCESS);
}

#[tokio::test]
async fn test_open_reports_existing_record_count() {
    let tmp = TempDir::new().unwrap();
    let mut harness = Harness::new(&tmp);

    let (handle, _) = open(&mut harness, 1, "cam.srf", OPEN_STRUCTURED).await;
    let mut req = WireHeader::new(MessageType::WriteIndexReq);
    req.store_handle = handle;
    req.client_handle = 1;
    harness.send(1, req, &record(0, 1000, b"x")).await;
    harness.recv();

    let (_, count) = open(&mut harness, 2, "cam.srf", OPEN_STRUCTURED).await;
    assert_eq!(count, 1);
}

#[tokio::test]
async fn test_short_name_is_file_not_found() {
    let tmp = TempDir::new().unwrap();
    let mut harness = Harness::new(&tmp);

    harness.send(1, open_req(1, OPEN_STRUCTURED), b"ab").await;
    let (res, _) = harness.recv();
    assert_eq!(res.param, code::FILE_NOT_FOUND);
}

#[tokio::test]
async fn test_path_escape_is_file_not_found() {
    let tmp = TempDir::new().unwrap();
    let mut harness = Harness::new(&tmp);

    harness
        .send(1, open_req(1, OPEN_STRUCTURED), b"../outside.srf")
        .await;
    let (res, _) = harness.recv();
    assert_eq!(res.param, code::FILE_NOT_FOUND);
}

#[tokio::test]
async fn test_handle_isolation_drops_foreign_requests() {
    let tmp = TempDir::new().unwrap();
    let mut harness = Harness::new(&tmp);
    let (handle, _) = open(&mut harness, 1, "cam.srf", OPEN_STRUCTURED).await;

    // same store handle, different peer: dropped without a response
    let mut req = WireHeader::new(MessageType::ReadIndexReq);
    req.store_handle = handle;
    req.client_handle = 1;
    harness.send(2, req, &[]).await;
    assert!(harness.silent());

    // same peer, wrong client handle: also dropped
    let mut req = WireHeader::new(MessageType::ReadIndexReq);
    req.store_handle = handle;
    req.client_handle = 9;
    harness.send(1, req, &[]).await;
    assert!(harness.silent());
}

#[tokio::test]
async fn test_keepalive_echoes_and_eviction_invalidates() {
    let tmp = TempDir::new().unwrap();
    let mut harness = Harness::new(&tmp);
    let (handle, _) = open(&mut harness, 1, "cam.srf", OPEN_STRUCTURED).await;

    let mut req = WireHeader::new(MessageType::Keepalive);
    req.store_handle = handle;
    req.client_handle = 1;
    harness.send(1, req, &[]).await;
    let (res, _) = harness.recv();
    assert_eq!(res.msg_type, MessageType::Keepalive);
    assert_eq!(res.store_handle, handle);

    // an expired slot is reclaimed and its handle goes stale
    let evicted = harness
        .server
        .sweep(Instant::now() + Duration::from_secs(60));
    assert_eq!(evicted, vec![handle]);

    harness.send(1, req, &[]).await;
    assert!(harness.silent());
}

#[tokio::test]
async fn test_directory_listing() {
    let tmp = TempDir::new().unwrap();
    std::fs::write(tmp.path().join("a.srf"), b"").unwrap();
    std::fs::write(tmp.path().join("b.dat"), b"").unwrap();
    let mut harness = Harness::new(&tmp);

    harness.send(1, WireHeader::new(MessageType::DirReq), &[]).await;
    let (res, payload) = harness.recv();
    assert_eq!(res.msg_type, MessageType::DirRes);
    assert_eq!(res.param, code::SUCCESS);
    assert_eq!(&payload[..], b"a.srf\nb.dat");
}

#[tokio::test]
async fn test_read_error_codes_cross_the_wire() {
    let tmp = TempDir::new().unwrap();
    let mut harness = Harness::new(&tmp);
    let (handle, _) = open(&mut harness, 1, "cam.srf", OPEN_STRUCTURED).await;

    // nothing written yet: no index file behind this archive
    let mut req = WireHeader::new(MessageType::ReadIndexReq);
    req.store_handle = handle;
    req.client_handle = 1;
    harness.send(1, req, &[]).await;

    let (res, payload) = harness.recv();
    assert_eq!(res.param, code::INDEX_FILE_NOT_FOUND);
    assert!(code::is_error(res.param));
    assert!(payload.is_empty());
}

#[tokio::test]
async fn test_bad_block_size_rejected_at_open() {
    let tmp = TempDir::new().unwrap();
    let mut harness = Harness::new(&tmp);

    // structured open of a raw extension is a format error
    harness.send(1, open_req(1, OPEN_STRUCTURED), b"cam.dat").await;
    let (res, _) = harness.recv();
    assert_eq!(res.param, code::INVALID_FILE_FORMAT);
}

#[tokio::test]
async fn test_client_file_cap() {
    let tmp = TempDir::new().unwrap();
    let mut harness = Harness::new(&tmp);

    for i in 0..32u16 {
        harness
            .send(1, open_req(i, OPEN_STRUCTURED), format!("f{i}.srf").as_bytes())
            .await;
        let (res, _) = harness.recv();
        assert_eq!(res.param, code::SUCCESS);
    }

    harness.send(1, open_req(99, OPEN_STRUCTURED), b"one-more.srf").await;
    let (res, _) = harness.recv();
    assert_eq!(res.param, code::MAX_CLIENT_FILES);

    // a different client endpoint is unaffected by the cap
    harness.send(2, open_req(0, OPEN_STRUCTURED), b"other.srf").await;
    let (res, _) = harness.recv();
    assert_eq!(res.param, code::SUCCESS);
}

#[tokio::test]
async fn test_malformed_messages_are_dropped() {
    let tmp = TempDir::new().unwrap();
    let mut harness = Harness::new(&tmp);

    // truncated header
    harness
        .server
        .handle_message(Envelope {
            from: PeerId(1),
            from_port: 40,
            payload: Bytes::from_static(&[0u8; 7]),
        })
        .await;
    assert!(harness.silent());

    // header length field disagrees with the actual payload
    let mut header = WireHeader::new(MessageType::OpenReq);
    header.length = 500;
    let mut buf = BytesMut::new();
    header.encode(&mut buf);
    buf.put_slice(b"cam.srf");
    harness
        .server
        .handle_message(Envelope {
            from: PeerId(1),
            from_port: 40,
            payload: buf.freeze(),
        })
        .await;
    assert!(harness.silent());
}
