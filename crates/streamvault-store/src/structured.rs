//! Structured Archive File Agent
//!
//! Serves indexed reads and appends against one structured archive pair. The
//! agent holds only the two paths; files are opened per request, so an agent
//! can outlive rotations and deletions without pinning anything — the next
//! request simply reports what it finds on disk.
//!
//! A read resolves `record index → index entry → file position → framed
//! record`: seek the index file to entry `i`, read the stored position, seek
//! the data file there, validate the sync marker, and return the payload. A
//! sync-marker mismatch is a hard failure, never skipped over.

use bytes::{Bytes, BytesMut};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::warn;

use crate::error::AgentError;
use streamvault_core::{
    wire, FrameHeader, IndexEntry, RecordHeader, FRAME_HEADER_SIZE, INDEX_ENTRY_SIZE,
    RECORD_HEADER_SIZE,
};

pub struct StructuredAgent {
    data_path: PathBuf,
    index_path: PathBuf,
}

impl StructuredAgent {
    /// Bind to a data file path; the paired index path is derived from it.
    pub fn open(data_path: &Path) -> Result<Self, AgentError> {
        if data_path.extension().and_then(|e| e.to_str()) != Some(streamvault_core::DATA_EXT) {
            return Err(AgentError::InvalidFileFormat);
        }

        Ok(Self {
            index_path: data_path.with_extension(streamvault_core::INDEX_EXT),
            data_path: data_path.to_path_buf(),
        })
    }

    pub fn data_path(&self) -> &Path {
        &self.data_path
    }

    /// Records archived so far: index file length over the entry size. A
    /// missing index file means an empty archive, not an error.
    pub async fn record_count(&self) -> u32 {
        match tokio::fs::metadata(&self.index_path).await {
            Ok(meta) => (meta.len() / INDEX_ENTRY_SIZE as u64) as u32,
            Err(_) => 0,
        }
    }

    /// Read back record `index` as it was written: record header plus media
    /// bytes, without the frame header.
    pub async fn read_record(&self, index: u32) -> Result<Bytes, AgentError> {
        let mut xf = tokio::fs::File::open(&self.index_path)
            .await
            .map_err(|_| AgentError::IndexFileNotFound)?;

        let count = xf
            .metadata()
            .await
            .map_err(|_| AgentError::IndexRead)?
            .len()
            / INDEX_ENTRY_SIZE as u64;
        if index as u64 >= count {
            return Err(AgentError::InvalidRecordIndex);
        }

        xf.seek(SeekFrom::Start(index as u64 * INDEX_ENTRY_SIZE as u64))
            .await
            .map_err(|_| AgentError::IndexSeek)?;

        let mut entry_buf = [0u8; INDEX_ENTRY_SIZE];
        xf.read_exact(&mut entry_buf)
            .await
            .map_err(|_| AgentError::IndexRead)?;
        let entry =
            IndexEntry::decode(&mut &entry_buf[..]).map_err(|_| AgentError::IndexRead)?;

        let mut rf = tokio::fs::File::open(&self.data_path)
            .await
            .map_err(|_| AgentError::FileNotFound)?;
        rf.seek(SeekFrom::Start(entry.position as u64))
            .await
            .map_err(|_| AgentError::RecordSeek)?;

        let mut frame_buf = [0u8; FRAME_HEADER_SIZE];
        rf.read_exact(&mut frame_buf)
            .await
            .map_err(|_| AgentError::InvalidRecordHeader)?;
        let frame = FrameHeader::decode(&mut &frame_buf[..]).map_err(|e| {
            warn!(
                file = %self.data_path.display(),
                position = entry.position,
                error = %e,
                "sync marker check failed"
            );
            AgentError::InvalidRecordHeader
        })?;

        if frame.size as usize + wire::WIRE_HEADER_SIZE > wire::MAX_MESSAGE {
            return Err(AgentError::TransferTooLong);
        }

        let mut payload = vec![0u8; frame.size as usize];
        rf.read_exact(&mut payload)
            .await
            .map_err(|_| AgentError::RecordRead)?;

        Ok(Bytes::from(payload))
    }

    /// Append one record. `start_index == 0` deletes any pre-existing pair
    /// first (fresh archive); non-zero appends. Returns the new record count.
    pub async fn write_record(&self, start_index: u32, payload: &[u8]) -> Result<u32, AgentError> {
        if payload.len() < RECORD_HEADER_SIZE {
            return Err(AgentError::WriteTooShort);
        }
        let header =
            RecordHeader::decode(&mut &payload[..]).map_err(|_| AgentError::InvalidRecordHeader)?;

        if start_index == 0 {
            let _ = tokio::fs::remove_file(&self.index_path).await;
            let _ = tokio::fs::remove_file(&self.data_path).await;
        }

        let mut rf = open_append(&self.data_path)
            .await
            .map_err(|_| AgentError::FileNotFound)?;
        let mut xf = open_append(&self.index_path)
            .await
            .map_err(|_| AgentError::IndexFileNotFound)?;

        // position captured before the frame goes out
        let position = rf
            .metadata()
            .await
            .map_err(|_| AgentError::Write)?
            .len() as i64;

        let mut index_buf = BytesMut::with_capacity(INDEX_ENTRY_SIZE);
        IndexEntry::new(position, header.timestamp).encode(&mut index_buf);
        xf.write_all(&index_buf)
            .await
            .map_err(|_| AgentError::IndexWrite)?;
        xf.flush().await.map_err(|_| AgentError::IndexWrite)?;

        let mut frame_buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + payload.len());
        FrameHeader::new(payload.len() as u32).encode(&mut frame_buf);
        frame_buf.extend_from_slice(payload);
        rf.write_all(&frame_buf).await.map_err(|_| AgentError::Write)?;
        rf.flush().await.map_err(|_| AgentError::Write)?;

        Ok(self.record_count().await)
    }
}

async fn open_append(path: &Path) -> std::io::Result<tokio::fs::File> {
    tokio::fs::OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BufMut;
    use streamvault_core::RecordType;
    use tempfile::TempDir;

    fn record(index: u32, timestamp: i64, media: &[u8]) -> Bytes {
        let mut buf = BytesMut::new();
        RecordHeader::new(RecordType::Video, index, timestamp).encode(&mut buf);
        buf.put_slice(media);
        buf.freeze()
    }

    #[test]
    fn test_open_requires_structured_extension() {
        assert!(StructuredAgent::open(Path::new("/x/stream.dat")).is_err());
        assert!(StructuredAgent::open(Path::new("/x/stream.srf")).is_ok());
    }

    #[tokio::test]
    async fn test_write_then_read_round_trip() {
        let tmp = TempDir::new().unwrap();
        let agent = StructuredAgent::open(&tmp.path().join("a.srf")).unwrap();

        for i in 0..3u32 {
            let rec = record(i, 1000 * (i as i64 + 1), format!("media-{i}").as_bytes());
            let count = agent.write_record(i, &rec).await.unwrap();
            assert_eq!(count, i + 1);
        }

        for i in 0..3u32 {
            let payload = agent.read_record(i).await.unwrap();
            let header = RecordHeader::decode(&mut payload.clone()).unwrap();
            assert_eq!(header.record_index, i);
            assert_eq!(header.timestamp, 1000 * (i as i64 + 1));
            assert_eq!(
                &payload[RECORD_HEADER_SIZE..],
                format!("media-{i}").as_bytes()
            );
        }
    }

    #[tokio::test]
    async fn test_write_at_zero_truncates_pair() {
        let tmp = TempDir::new().unwrap();
        let agent = StructuredAgent::open(&tmp.path().join("a.srf")).unwrap();

        agent.write_record(0, &record(0, 1000, b"old")).await.unwrap();
        agent.write_record(1, &record(1, 2000, b"old2")).await.unwrap();
        assert_eq!(agent.record_count().await, 2);

        let count = agent.write_record(0, &record(0, 5000, b"fresh")).await.unwrap();
        assert_eq!(count, 1);
        assert_eq!(&agent.read_record(0).await.unwrap()[RECORD_HEADER_SIZE..], b"fresh");
    }

    #[tokio::test]
    async fn test_read_past_end_is_invalid_index() {
        let tmp = TempDir::new().unwrap();
        let agent = StructuredAgent::open(&tmp.path().join("a.srf")).unwrap();
        agent.write_record(0, &record(0, 1000, b"only")).await.unwrap();

        assert_eq!(
            agent.read_record(1).await.unwrap_err(),
            AgentError::InvalidRecordIndex
        );
    }

    #[tokio::test]
    async fn test_missing_index_file() {
        let tmp = TempDir::new().unwrap();
        let agent = StructuredAgent::open(&tmp.path().join("a.srf")).unwrap();

        assert_eq!(agent.record_count().await, 0);
        assert_eq!(
            agent.read_record(0).await.unwrap_err(),
            AgentError::IndexFileNotFound
        );
    }

    #[tokio::test]
    async fn test_corrupt_sync_marker_is_hard_failure() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("a.srf");
        let agent = StructuredAgent::open(&path).unwrap();
        agent.write_record(0, &record(0, 1000, b"data")).await.unwrap();

        let mut bytes = std::fs::read(&path).unwrap();
        bytes[0] = b'!';
        std::fs::write(&path, bytes).unwrap();

        assert_eq!(
            agent.read_record(0).await.unwrap_err(),
            AgentError::InvalidRecordHeader
        );
    }

    #[tokio::test]
    async fn test_short_write_rejected() {
        let tmp = TempDir::new().unwrap();
        let agent = StructuredAgent::open(&tmp.path().join("a.srf")).unwrap();

        assert_eq!(
            agent.write_record(0, b"runt").await.unwrap_err(),
            AgentError::WriteTooShort
        );
    }
}
