//! Directory Catalog
//!
//! Answers DIR requests: which archive files exist under the store root right
//! now. The walk is recursive, returns root-relative paths with `/`
//! separators regardless of platform, and only lists files a client can
//! usefully open (structured data files and raw files; index files are
//! implied by their data file and never listed).

use std::path::PathBuf;
use tracing::warn;

use crate::error::Result;
use streamvault_core::{DATA_EXT, RAW_EXT};

pub struct Catalog {
    root: PathBuf,
}

impl Catalog {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// All openable archive files under the root, sorted, root-relative.
    pub async fn list(&self) -> Result<Vec<String>> {
        let mut paths = Vec::new();
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "catalog walk skipped directory");
                    continue;
                }
            };

            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                    continue;
                }

                let ext = path.extension().and_then(|e| e.to_str());
                if ext != Some(DATA_EXT) && ext != Some(RAW_EXT) {
                    continue;
                }

                if let Ok(rel) = path.strip_prefix(&self.root) {
                    let rel: Vec<_> = rel
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy().into_owned())
                        .collect();
                    paths.push(rel.join("/"));
                }
            }
        }

        paths.sort();
        Ok(paths)
    }

    /// The DIR response payload: listed paths joined by newlines.
    pub async fn payload(&self) -> Result<String> {
        Ok(self.list().await?.join("\n"))
    }
}
