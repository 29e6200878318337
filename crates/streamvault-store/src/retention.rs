//! Retention Policy — Rotation and Deletion for One Stream
//!
//! A [`StreamStore`] owns everything about one named stream's on-disk life:
//! where files land, what they are called, when the active file rolls over,
//! and which old files the retention sweep removes.
//!
//! ## Naming
//!
//! `<root>/<subfolder-or-prefix><yyyyMMdd_hhmm>.<ext>` — either the stream
//! gets its own sub-folder under the root, or its sanitized name becomes a
//! filename prefix. `:` and `/` in stream names are replaced with `_`.
//!
//! ## Rotation
//!
//! - No active file yet ⇒ rotation is always due, so the first write always
//!   creates a file.
//! - Day-unit time rotation compares calendar dates and counts down a days-
//!   remaining counter once per new date; the replacement file is stamped at
//!   midnight so its name matches the day it covers.
//! - Minute/hour-unit time rotation compares elapsed seconds.
//! - Size rotation compares the active data file's byte length against the
//!   configured threshold (clamped to [`MAX_ROTATION_SIZE_MB`]).
//!
//! ## Deletion
//!
//! The sweep runs after every rotation. Files are matched by prefix and
//! extension, ordered and aged by filesystem modification time — the name
//! stamp is a label, not retention state, so stray files with unparseable
//! names still age out. Count-based deletion keeps the newest K (never fewer
//! than [`MIN_DELETION_COUNT`]); age-based deletion removes files older than
//! the configured age; `Any` unions both. Deleting a structured data file
//! always deletes its paired index file.
//!
//! [`MAX_ROTATION_SIZE_MB`]: crate::config::MAX_ROTATION_SIZE_MB
//! [`MIN_DELETION_COUNT`]: crate::config::MIN_DELETION_COUNT

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info, warn};

use crate::config::{ArchiveFormat, DeletionPolicy, RotationPolicy, RotationUnit, StreamConfig};
use crate::error::{Error, Result};
use streamvault_core::{DATA_EXT, INDEX_EXT, RAW_EXT};

const STAMP_FORMAT: &str = "%Y%m%d_%H%M";

/// Receive-side counters for one stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamStats {
    pub rx_records: u64,
    pub rx_bytes: u64,
    pub rx_records_since_rotation: u64,
    pub rx_bytes_since_rotation: u64,
}

/// The currently-open archive pair.
#[derive(Debug, Clone)]
pub struct ActiveFile {
    pub data_path: PathBuf,
    /// Present for structured streams only.
    pub index_path: Option<PathBuf>,
    pub opened: DateTime<Utc>,
    /// Tracked in memory so the size check never stats the file.
    pub data_len: u64,
}

/// Rotation, deletion and naming state for one archived stream.
pub struct StreamStore {
    config: StreamConfig,
    dir: PathBuf,
    prefix: String,
    active: Option<ActiveFile>,
    days_to_rotation: u32,
    last_seen_date: Option<NaiveDate>,
    stats: StreamStats,
}

impl StreamStore {
    /// Create the store for one stream, creating its directory if needed.
    pub fn new(config: StreamConfig) -> Result<Self> {
        let sanitized = sanitize_name(&config.stream_name);
        if sanitized.is_empty() {
            return Err(Error::InvalidStreamName(config.stream_name.clone()));
        }

        let (dir, prefix) = if config.create_subfolder {
            (config.root.join(&sanitized), String::new())
        } else {
            (config.root.clone(), format!("{sanitized}_"))
        };

        std::fs::create_dir_all(&dir)?;

        Ok(Self {
            days_to_rotation: config.rotation_time,
            config,
            dir,
            prefix,
            active: None,
            last_seen_date: None,
            stats: StreamStats::default(),
        })
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn stats(&self) -> StreamStats {
        self.stats
    }

    pub fn directory(&self) -> &Path {
        &self.dir
    }

    pub fn active(&self) -> Option<&ActiveFile> {
        self.active.as_ref()
    }

    fn extension(&self) -> &'static str {
        match self.config.format {
            ArchiveFormat::Structured => DATA_EXT,
            ArchiveFormat::Raw => RAW_EXT,
        }
    }

    /// Whether the active file must roll over before the next drain. Day-unit
    /// bookkeeping (the days-remaining countdown) advances here, so call this
    /// once per tick.
    pub fn needs_rotation(&mut self, now: DateTime<Utc>) -> bool {
        let Some(active) = &self.active else {
            return true;
        };

        let time_due = match self.config.rotation_unit {
            RotationUnit::Days => {
                let today = now.date_naive();
                if self.last_seen_date != Some(today) {
                    self.last_seen_date = Some(today);
                    self.days_to_rotation = self.days_to_rotation.saturating_sub(1);
                }
                self.days_to_rotation == 0
            }
            RotationUnit::Minutes | RotationUnit::Hours => {
                let elapsed = (now - active.opened).num_seconds();
                elapsed >= 0 && elapsed as u64 >= self.config.rotation_secs()
            }
        };

        let size_due = active.data_len >= self.config.rotation_size_bytes();

        match self.config.rotation_policy {
            RotationPolicy::Time => time_due,
            RotationPolicy::Size => size_due,
            RotationPolicy::Any => time_due || size_due,
        }
    }

    /// Roll over to a freshly-stamped archive pair, then run the deletion
    /// sweep. The files themselves are created lazily by the first append.
    pub fn rotate(&mut self, now: DateTime<Utc>) -> Result<()> {
        let stamp = self.rotation_stamp(now);
        let base = format!("{}{}", self.prefix, stamp.format(STAMP_FORMAT));

        let data_path = self.dir.join(format!("{base}.{}", self.extension()));
        let index_path = match self.config.format {
            ArchiveFormat::Structured => Some(self.dir.join(format!("{base}.{INDEX_EXT}"))),
            ArchiveFormat::Raw => None,
        };

        // resuming into an existing file keeps its length for the size check
        let data_len = std::fs::metadata(&data_path).map(|m| m.len()).unwrap_or(0);

        info!(
            stream = %self.config.stream_name,
            file = %data_path.display(),
            "rotating archive"
        );

        self.active = Some(ActiveFile {
            data_path,
            index_path,
            opened: now,
            data_len,
        });
        self.days_to_rotation = self.config.rotation_time;
        self.last_seen_date = Some(now.date_naive());
        self.stats.rx_records_since_rotation = 0;
        self.stats.rx_bytes_since_rotation = 0;

        let deleted = self.sweep_deletions(now)?;
        if !deleted.is_empty() {
            info!(
                stream = %self.config.stream_name,
                count = deleted.len(),
                "retention sweep removed old archives"
            );
        }

        Ok(())
    }

    /// Day rotation stamps the new file at midnight so the filename date
    /// matches the day it covers; everything else stamps the rotation moment.
    fn rotation_stamp(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let day_stamped = self.active.is_some()
            && self.config.rotation_unit == RotationUnit::Days
            && self.config.rotation_policy != RotationPolicy::Size;

        if day_stamped {
            Utc.from_utc_datetime(&now.date_naive().and_time(NaiveTime::MIN))
        } else {
            now
        }
    }

    /// Account for `records` appended records totalling `bytes` on-disk bytes.
    pub fn note_appended(&mut self, records: u64, bytes: u64) {
        self.stats.rx_records += records;
        self.stats.rx_bytes += bytes;
        self.stats.rx_records_since_rotation += records;
        self.stats.rx_bytes_since_rotation += bytes;

        if let Some(active) = &mut self.active {
            active.data_len += bytes;
        }
    }

    /// Delete archives that fall outside the retention policy. Returns the
    /// data files removed. The active pair is never deleted.
    pub fn sweep_deletions(&self, now: DateTime<Utc>) -> Result<Vec<PathBuf>> {
        let mut archives = self.list_archives()?;
        archives.sort_by_key(|(modified, _)| *modified);

        let keep = self.config.effective_deletion_count() as usize;
        let age = chrono::Duration::seconds(self.config.deletion_age_secs() as i64);

        let count_doomed = if archives.len() > keep {
            archives.len() - keep
        } else {
            0
        };

        let mut deleted = Vec::new();
        for (i, (modified, path)) in archives.iter().enumerate() {
            let by_count = i < count_doomed;
            let by_age = DateTime::<Utc>::from(*modified) + age < now;

            let doomed = match self.config.deletion_policy {
                DeletionPolicy::Count => by_count,
                DeletionPolicy::Time => by_age,
                DeletionPolicy::Any => by_count || by_age,
            };

            if !doomed {
                continue;
            }

            if let Some(active) = &self.active {
                if *path == active.data_path {
                    continue;
                }
            }

            if let Err(e) = std::fs::remove_file(path) {
                warn!(file = %path.display(), error = %e, "archive delete failed");
                continue;
            }

            // a structured pair always goes together
            if self.config.format == ArchiveFormat::Structured {
                let index = path.with_extension(INDEX_EXT);
                if let Err(e) = std::fs::remove_file(&index) {
                    warn!(file = %index.display(), error = %e, "index delete failed");
                }
            }

            debug!(file = %path.display(), "deleted expired archive");
            deleted.push(path.clone());
        }

        Ok(deleted)
    }

    /// Data files in this stream's directory that carry our prefix, with
    /// their modification times, unordered. The filename stamp is not
    /// required to parse; a stray file still ages out.
    fn list_archives(&self) -> Result<Vec<(SystemTime, PathBuf)>> {
        let mut archives = Vec::new();

        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();

            if path.extension().and_then(|e| e.to_str()) != Some(self.extension()) {
                continue;
            }

            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if !stem.starts_with(&self.prefix) {
                continue;
            }

            let modified = entry.metadata()?.modified()?;
            archives.push((modified, path));
        }

        Ok(archives)
    }
}

/// Stream names become path components: `:` and `/` turn into `_`.
pub fn sanitize_name(name: &str) -> String {
    name.replace([':', '/'], "_")
}
