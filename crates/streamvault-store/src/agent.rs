//! Archive File Agent — Format Dispatch
//!
//! One open file on the server side is served by exactly one agent. The two
//! formats are a tagged variant rather than a trait object: the format is an
//! exhaustive, compiler-checked choice made once at open time from the open
//! request's `param` field (0 selects structured, anything else is the raw
//! block size).

use bytes::Bytes;
use std::path::Path;

use crate::error::AgentError;
use crate::raw::RawAgent;
use crate::structured::StructuredAgent;
use streamvault_core::wire::OPEN_STRUCTURED;

pub enum ArchiveAgent {
    Structured(StructuredAgent),
    Raw(RawAgent),
}

impl ArchiveAgent {
    /// Build the agent the open request asked for.
    pub fn open(path: &Path, open_param: u16) -> Result<Self, AgentError> {
        if open_param == OPEN_STRUCTURED {
            Ok(ArchiveAgent::Structured(StructuredAgent::open(path)?))
        } else {
            Ok(ArchiveAgent::Raw(RawAgent::open(path, open_param)?))
        }
    }

    pub fn data_path(&self) -> &Path {
        match self {
            ArchiveAgent::Structured(agent) => agent.data_path(),
            ArchiveAgent::Raw(agent) => agent.data_path(),
        }
    }

    /// Record count for structured files, block count for raw files.
    pub async fn record_count(&self) -> u32 {
        match self {
            ArchiveAgent::Structured(agent) => agent.record_count().await,
            ArchiveAgent::Raw(agent) => agent.block_count().await,
        }
    }

    /// Serve a read request: `count` is the raw block count and is ignored
    /// for structured files, which always return exactly one record.
    pub async fn read(&self, index: u32, count: u16) -> Result<Bytes, AgentError> {
        match self {
            ArchiveAgent::Structured(agent) => agent.read_record(index).await,
            ArchiveAgent::Raw(agent) => agent.read_blocks(index, count.max(1)).await,
        }
    }

    /// Serve a write request. Returns the new record/block count.
    pub async fn write(&self, index: u32, payload: &[u8]) -> Result<u32, AgentError> {
        match self {
            ArchiveAgent::Structured(agent) => agent.write_record(index, payload).await,
            ArchiveAgent::Raw(agent) => agent.write_blocks(index, payload).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_param_selects_variant() {
        let tmp = TempDir::new().unwrap();

        let agent = ArchiveAgent::open(&tmp.path().join("a.srf"), OPEN_STRUCTURED).unwrap();
        assert!(matches!(agent, ArchiveAgent::Structured(_)));

        let agent = ArchiveAgent::open(&tmp.path().join("a.dat"), 512).unwrap();
        assert!(matches!(agent, ArchiveAgent::Raw(_)));
    }
}
