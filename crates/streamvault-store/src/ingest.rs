//! Ingest Queue — Buffered Write Path for One Stream
//!
//! The producer pushes complete records into an [`IngestQueue`] from whatever
//! context it runs in; a background [`IngestWorker`] drains the queue once
//! per [`DRAIN_INTERVAL`] tick and appends everything to the stream's active
//! archive pair.
//!
//! Rotation is checked at the tick boundary, before the drain, never in the
//! middle of one — a record can never span two files. Because the rotation
//! check runs even when the queue is empty, the first tick after startup
//! creates the stream's first file.
//!
//! Every queued record must start with a [`RecordHeader`]: the structured
//! path takes the index timestamp from it, the raw path strips it and stores
//! payload bytes only. Records too short to carry one are dropped with a
//! warning.

use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

use crate::config::ArchiveFormat;
use crate::error::Result;
use crate::retention::StreamStore;
use streamvault_core::{FrameHeader, IndexEntry, RecordHeader, RECORD_HEADER_SIZE};

/// How often the worker drains its queue and re-checks rotation.
pub const DRAIN_INTERVAL: Duration = Duration::from_secs(1);

/// Thread-safe FIFO of complete records waiting to be archived.
#[derive(Default)]
pub struct IngestQueue {
    records: Mutex<VecDeque<Bytes>>,
}

impl IngestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue one complete record (header plus payload).
    pub fn push(&self, record: Bytes) {
        self.lock().push_back(record);
    }

    /// Take everything queued so far, oldest first.
    pub fn drain(&self) -> Vec<Bytes> {
        self.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<Bytes>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// One drain tick: rotate if due, then append everything queued.
pub async fn drain_tick(store: &mut StreamStore, queue: &IngestQueue, now: DateTime<Utc>) -> Result<()> {
    if store.needs_rotation(now) {
        store.rotate(now)?;
    }

    let records = queue.drain();
    if records.is_empty() {
        return Ok(());
    }

    append_records(store, &records).await
}

/// Append a batch of records to the store's active pair. The caller has
/// already settled rotation for this tick.
pub async fn append_records(store: &mut StreamStore, records: &[Bytes]) -> Result<()> {
    match store.config().format {
        ArchiveFormat::Structured => append_structured(store, records).await,
        ArchiveFormat::Raw => append_raw(store, records).await,
    }
}

async fn append_structured(store: &mut StreamStore, records: &[Bytes]) -> Result<()> {
    let Some(active) = store.active() else {
        return Ok(());
    };
    let data_path = active.data_path.clone();
    let index_path = active
        .index_path
        .clone()
        .unwrap_or_else(|| data_path.with_extension(streamvault_core::INDEX_EXT));
    let base_position = active.data_len;

    let mut data_buf = BytesMut::new();
    let mut index_buf = BytesMut::new();
    let mut appended = 0u64;

    for record in records {
        if record.len() < RECORD_HEADER_SIZE {
            warn!(len = record.len(), "dropping runt ingest record");
            continue;
        }
        let header = RecordHeader::decode(&mut record.clone())?;

        // index entry points at the frame's sync marker
        let position = (base_position + data_buf.len() as u64) as i64;
        FrameHeader::new(record.len() as u32).encode(&mut data_buf);
        data_buf.extend_from_slice(record);
        IndexEntry::new(position, header.timestamp).encode(&mut index_buf);
        appended += 1;
    }

    if appended == 0 {
        return Ok(());
    }

    let mut data = open_append(&data_path).await?;
    data.write_all(&data_buf).await?;
    data.flush().await?;

    let mut index = open_append(&index_path).await?;
    index.write_all(&index_buf).await?;
    index.flush().await?;

    store.note_appended(appended, data_buf.len() as u64);
    debug!(records = appended, bytes = data_buf.len(), "drained structured batch");
    Ok(())
}

async fn append_raw(store: &mut StreamStore, records: &[Bytes]) -> Result<()> {
    let Some(active) = store.active() else {
        return Ok(());
    };
    let data_path = active.data_path.clone();

    let mut data_buf = BytesMut::new();
    let mut appended = 0u64;

    for record in records {
        if record.len() < RECORD_HEADER_SIZE {
            warn!(len = record.len(), "dropping runt ingest record");
            continue;
        }
        let header = RecordHeader::decode(&mut record.clone())?;

        // raw archives carry payload bytes only
        let skip = (header.header_length as usize).clamp(RECORD_HEADER_SIZE, record.len());
        data_buf.extend_from_slice(&record[skip..]);
        appended += 1;
    }

    if appended == 0 {
        return Ok(());
    }

    let mut data = open_append(&data_path).await?;
    data.write_all(&data_buf).await?;
    data.flush().await?;

    store.note_appended(appended, data_buf.len() as u64);
    debug!(records = appended, bytes = data_buf.len(), "drained raw batch");
    Ok(())
}

async fn open_append(path: &std::path::Path) -> std::io::Result<tokio::fs::File> {
    tokio::fs::OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)
        .await
}

/// Background task that drains one stream's queue on a fixed tick.
pub struct IngestWorker {
    shutdown: Option<oneshot::Sender<()>>,
    task: tokio::task::JoinHandle<StreamStore>,
}

impl IngestWorker {
    /// Start draining `queue` into `store`. The worker owns the store until
    /// [`shutdown`](Self::shutdown) hands it back.
    pub fn spawn(mut store: StreamStore, queue: Arc<IngestQueue>) -> Self {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        let task = tokio::spawn(async move {
            let mut tick = tokio::time::interval(DRAIN_INTERVAL);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        if let Err(e) = drain_tick(&mut store, &queue, Utc::now()).await {
                            error!(error = %e, "ingest drain failed");
                        }
                    }
                    _ = &mut shutdown_rx => {
                        // final drain so queued records are not lost
                        if let Err(e) = drain_tick(&mut store, &queue, Utc::now()).await {
                            error!(error = %e, "final ingest drain failed");
                        }
                        break;
                    }
                }
            }

            store
        });

        Self {
            shutdown: Some(shutdown_tx),
            task,
        }
    }

    /// Stop the worker after a final drain and return the store.
    pub async fn shutdown(mut self) -> Result<StreamStore> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        self.task
            .await
            .map_err(|e| crate::Error::Io(std::io::Error::other(e.to_string())))
    }
}
