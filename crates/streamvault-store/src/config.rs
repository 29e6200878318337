//! Per-Stream Archive Configuration
//!
//! One [`StreamConfig`] describes everything the write side needs to know
//! about a named stream: where its files land, which format they use, and the
//! rotation and deletion policies that bound them. The struct is serde-
//! derived so a host can load it straight from TOML/JSON settings.
//!
//! Rotation and deletion are independent: the active file can roll over on
//! size while retention prunes by age, or any other combination.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Largest configurable size-rotation threshold, in megabytes.
pub const MAX_ROTATION_SIZE_MB: u64 = 2000;

/// Fewest archive pairs count-based deletion will ever keep.
pub const MIN_DELETION_COUNT: u32 = 2;

/// On-disk layout of a stream's archive files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveFormat {
    /// Framed records plus a paired index file (`.srf` / `.srx`).
    Structured,
    /// Unframed byte stream addressed by fixed-size block (`.dat`).
    Raw,
}

/// When the active file must roll over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RotationPolicy {
    Time,
    Size,
    /// Whichever of time or size fires first.
    Any,
}

/// Unit for the time-rotation threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RotationUnit {
    Minutes,
    Hours,
    /// Whole days compare calendar dates, not elapsed seconds.
    Days,
}

/// Which old files the retention sweep removes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeletionPolicy {
    Time,
    Count,
    /// Union of the time and count delete sets.
    Any,
}

/// Unit for the age-deletion threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeletionUnit {
    Hours,
    Days,
}

/// Configuration for one archived stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Whether this stream is archived at all.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Source stream name, e.g. `cam1/avmux:lr`. Path-hostile characters are
    /// replaced when the name is turned into a folder or filename prefix.
    pub stream_name: String,

    /// Store root path under which this stream's files land.
    pub root: PathBuf,

    /// True: files go in `<root>/<stream>/`; false: files go directly in
    /// `<root>/` with the stream name as a filename prefix.
    #[serde(default = "default_create_subfolder")]
    pub create_subfolder: bool,

    #[serde(default = "default_format")]
    pub format: ArchiveFormat,

    #[serde(default = "default_rotation_policy")]
    pub rotation_policy: RotationPolicy,

    #[serde(default = "default_rotation_unit")]
    pub rotation_unit: RotationUnit,

    /// Time-rotation threshold, in `rotation_unit`s.
    #[serde(default = "default_rotation_time")]
    pub rotation_time: u32,

    /// Size-rotation threshold in megabytes, clamped to
    /// [`MAX_ROTATION_SIZE_MB`] when applied.
    #[serde(default = "default_rotation_size_mb")]
    pub rotation_size_mb: u64,

    #[serde(default = "default_deletion_policy")]
    pub deletion_policy: DeletionPolicy,

    #[serde(default = "default_deletion_unit")]
    pub deletion_unit: DeletionUnit,

    /// Age-deletion threshold, in `deletion_unit`s.
    #[serde(default = "default_deletion_time")]
    pub deletion_time: u32,

    /// Count-deletion threshold: keep this many newest pairs, never fewer
    /// than [`MIN_DELETION_COUNT`].
    #[serde(default = "default_deletion_count")]
    pub deletion_count: u32,
}

fn default_enabled() -> bool {
    true
}

fn default_create_subfolder() -> bool {
    true
}

fn default_format() -> ArchiveFormat {
    ArchiveFormat::Structured
}

fn default_rotation_policy() -> RotationPolicy {
    RotationPolicy::Time
}

fn default_rotation_unit() -> RotationUnit {
    RotationUnit::Days
}

fn default_rotation_time() -> u32 {
    1
}

fn default_rotation_size_mb() -> u64 {
    256
}

fn default_deletion_policy() -> DeletionPolicy {
    DeletionPolicy::Count
}

fn default_deletion_unit() -> DeletionUnit {
    DeletionUnit::Days
}

fn default_deletion_time() -> u32 {
    2
}

fn default_deletion_count() -> u32 {
    5
}

impl StreamConfig {
    /// A default configuration for `stream_name` rooted at `root`: enabled,
    /// structured, daily rotation, keep the newest 5 pairs.
    pub fn new(stream_name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            enabled: default_enabled(),
            stream_name: stream_name.into(),
            root: root.into(),
            create_subfolder: default_create_subfolder(),
            format: default_format(),
            rotation_policy: default_rotation_policy(),
            rotation_unit: default_rotation_unit(),
            rotation_time: default_rotation_time(),
            rotation_size_mb: default_rotation_size_mb(),
            deletion_policy: default_deletion_policy(),
            deletion_unit: default_deletion_unit(),
            deletion_time: default_deletion_time(),
            deletion_count: default_deletion_count(),
        }
    }

    /// Size-rotation threshold in bytes, clamped to the configurable maximum.
    pub fn rotation_size_bytes(&self) -> u64 {
        self.rotation_size_mb.min(MAX_ROTATION_SIZE_MB) * 1024 * 1024
    }

    /// Time-rotation threshold in seconds. Only meaningful for the minute and
    /// hour units; day rotation compares calendar dates instead.
    pub fn rotation_secs(&self) -> u64 {
        let unit = match self.rotation_unit {
            RotationUnit::Minutes => 60,
            RotationUnit::Hours => 3600,
            RotationUnit::Days => 86400,
        };
        self.rotation_time as u64 * unit
    }

    /// Age-deletion threshold in seconds.
    pub fn deletion_age_secs(&self) -> u64 {
        let unit = match self.deletion_unit {
            DeletionUnit::Hours => 3600,
            DeletionUnit::Days => 86400,
        };
        self.deletion_time as u64 * unit
    }

    /// Count-deletion threshold with the minimum applied.
    pub fn effective_deletion_count(&self) -> u32 {
        self.deletion_count.max(MIN_DELETION_COUNT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = StreamConfig::new("cam1/avmux:lr", "/var/vault");
        assert!(config.enabled);
        assert_eq!(config.format, ArchiveFormat::Structured);
        assert_eq!(config.rotation_policy, RotationPolicy::Time);
        assert_eq!(config.rotation_unit, RotationUnit::Days);
        assert_eq!(config.rotation_time, 1);
        assert_eq!(config.deletion_count, 5);
    }

    #[test]
    fn test_rotation_size_clamp() {
        let mut config = StreamConfig::new("s", "/tmp");
        config.rotation_size_mb = 1_000_000;
        assert_eq!(config.rotation_size_bytes(), 2000 * 1024 * 1024);

        config.rotation_size_mb = 64;
        assert_eq!(config.rotation_size_bytes(), 64 * 1024 * 1024);
    }

    #[test]
    fn test_deletion_count_minimum() {
        let mut config = StreamConfig::new("s", "/tmp");
        config.deletion_count = 0;
        assert_eq!(config.effective_deletion_count(), 2);
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let config: StreamConfig = serde_json::from_str(
            r#"{
                "stream_name": "sensor",
                "root": "/data/vault",
                "format": "raw",
                "deletion_policy": "any"
            }"#,
        )
        .unwrap();

        assert_eq!(config.format, ArchiveFormat::Raw);
        assert_eq!(config.deletion_policy, DeletionPolicy::Any);
        assert!(config.create_subfolder);
        assert_eq!(config.rotation_size_mb, 256);
    }
}
