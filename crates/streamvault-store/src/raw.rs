//! Raw Archive File Agent
//!
//! Serves block reads and appends against one unframed archive file. There is
//! no per-record structure: the client picks a block size at open time and
//! addresses the file as `block index × block size`. A read that runs off the
//! end of the file is clamped, not failed — a shorter-than-requested return
//! is how a reader discovers the end of the archive.

use bytes::Bytes;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use crate::error::AgentError;
use streamvault_core::wire;

#[derive(Debug)]
pub struct RawAgent {
    path: PathBuf,
    block_size: u32,
}

impl RawAgent {
    /// Bind to a file with the client's chosen block size. The block size is
    /// a divisor, so zero is rejected up front.
    pub fn open(path: &Path, block_size: u16) -> Result<Self, AgentError> {
        if block_size == 0 {
            return Err(AgentError::BadBlockSize);
        }

        Ok(Self {
            path: path.to_path_buf(),
            block_size: block_size as u32,
        })
    }

    pub fn data_path(&self) -> &Path {
        &self.path
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    /// Blocks in the file, final partial block included. The length is read
    /// fresh each call since the write side may still be appending.
    pub async fn block_count(&self) -> u32 {
        match tokio::fs::metadata(&self.path).await {
            Ok(meta) => meta.len().div_ceil(self.block_size as u64) as u32,
            Err(_) => 0,
        }
    }

    /// Read `count` blocks starting at block `index`, clamped at end-of-file.
    pub async fn read_blocks(&self, index: u32, count: u16) -> Result<Bytes, AgentError> {
        let requested = count as usize * self.block_size as usize;
        if requested + wire::WIRE_HEADER_SIZE > wire::MAX_MESSAGE {
            return Err(AgentError::TransferTooLong);
        }

        let mut file = tokio::fs::File::open(&self.path)
            .await
            .map_err(|_| AgentError::FileNotFound)?;
        let len = file
            .metadata()
            .await
            .map_err(|_| AgentError::Read)?
            .len();

        let offset = index as u64 * self.block_size as u64;
        if offset >= len {
            return Err(AgentError::InvalidRecordIndex);
        }

        file.seek(SeekFrom::Start(offset))
            .await
            .map_err(|_| AgentError::RecordSeek)?;

        let want = requested.min((len - offset) as usize);
        let mut data = vec![0u8; want];
        file.read_exact(&mut data)
            .await
            .map_err(|_| AgentError::Read)?;

        Ok(Bytes::from(data))
    }

    /// Append bytes. `start_index == 0` deletes any pre-existing file first.
    /// Returns the new block count.
    pub async fn write_blocks(&self, start_index: u32, payload: &[u8]) -> Result<u32, AgentError> {
        if start_index == 0 {
            let _ = tokio::fs::remove_file(&self.path).await;
        }

        let mut file = tokio::fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.path)
            .await
            .map_err(|_| AgentError::FileNotFound)?;

        file.write_all(payload).await.map_err(|_| AgentError::Write)?;
        file.flush().await.map_err(|_| AgentError::Write)?;

        Ok(self.block_count().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_zero_block_size_rejected() {
        assert_eq!(
            RawAgent::open(Path::new("/x/a.dat"), 0).unwrap_err(),
            AgentError::BadBlockSize
        );
    }

    #[tokio::test]
    async fn test_block_addressing() {
        let tmp = TempDir::new().unwrap();
        let agent = RawAgent::open(&tmp.path().join("a.dat"), 4).unwrap();

        agent.write_blocks(0, b"aaaabbbbcc").await.unwrap();
        assert_eq!(agent.block_count().await, 3); // partial final block counts

        assert_eq!(&agent.read_blocks(0, 1).await.unwrap()[..], b"aaaa");
        assert_eq!(&agent.read_blocks(1, 1).await.unwrap()[..], b"bbbb");
    }

    #[tokio::test]
    async fn test_short_final_read_is_not_an_error() {
        let tmp = TempDir::new().unwrap();
        let agent = RawAgent::open(&tmp.path().join("a.dat"), 4).unwrap();
        agent.write_blocks(0, b"aaaabbbbcc").await.unwrap();

        // asks for two full blocks, gets the clamped tail
        assert_eq!(&agent.read_blocks(2, 2).await.unwrap()[..], b"cc");
    }

    #[tokio::test]
    async fn test_read_past_end_is_invalid_index() {
        let tmp = TempDir::new().unwrap();
        let agent = RawAgent::open(&tmp.path().join("a.dat"), 4).unwrap();
        agent.write_blocks(0, b"aaaa").await.unwrap();

        assert_eq!(
            agent.read_blocks(1, 1).await.unwrap_err(),
            AgentError::InvalidRecordIndex
        );
    }

    #[tokio::test]
    async fn test_write_at_zero_truncates() {
        let tmp = TempDir::new().unwrap();
        let agent = RawAgent::open(&tmp.path().join("a.dat"), 4).unwrap();

        agent.write_blocks(0, b"oldoldold").await.unwrap();
        let count = agent.write_blocks(0, b"new").await.unwrap();
        assert_eq!(count, 1);
        assert_eq!(&agent.read_blocks(0, 1).await.unwrap()[..], b"new");
    }
}
