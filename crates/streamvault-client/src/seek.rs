//! Seek Index — Second-Granularity Timestamp Lookup
//!
//! Built once per open, straight after the archive's index file has been
//! fully streamed into memory. The directory maps every wall-clock second of
//! the archive's day to a starting record index; a lookup is then one array
//! access plus a short forward scan bounded by the stream's sample rate, not
//! by the file size.
//!
//! Seconds with no record of their own map to the nearest earlier record
//! (index 0 before the first record). A lookup earlier than the day start is
//! a hard error; a lookup past the last record clamps to the last index.

use crate::error::{Error, Result};
use streamvault_core::IndexEntry;

/// Upper bound on the per-second directory: a day of seconds plus an hour of
/// slack. A corrupt entry with a far-future timestamp must not size the
/// directory.
const MAX_DAY_SECONDS: usize = 86_400 + 3_600;

pub struct SeekIndex {
    day_start: i64,
    /// Wall-clock second of the day → starting record index.
    seconds: Vec<u32>,
    /// Record timestamps in index order, for the final forward scan.
    timestamps: Vec<i64>,
}

impl SeekIndex {
    /// Build the per-second directory. `day_start` is the archive day's
    /// midnight in milliseconds since the epoch; `entries` are the streamed
    /// index file in record order, which the format guarantees is also
    /// timestamp order.
    pub fn build(day_start: i64, entries: &[IndexEntry]) -> Self {
        let mut seconds = Vec::new();
        let mut timestamps = Vec::with_capacity(entries.len());

        for (i, entry) in entries.iter().enumerate() {
            let second = ((entry.timestamp - day_start) / 1000).max(0) as usize;

            // entries stamped past the day bound stay out of the directory
            if second < MAX_DAY_SECONDS {
                // seconds in the gap inherit the previous record's index
                let gap_index = if i == 0 { 0 } else { i as u32 - 1 };
                while seconds.len() < second {
                    seconds.push(gap_index);
                }
                if seconds.len() == second {
                    seconds.push(i as u32);
                }
            }

            timestamps.push(entry.timestamp);
        }

        Self {
            day_start,
            seconds,
            timestamps,
        }
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// Index of the record nearest `timestamp` without being later than it,
    /// clamped to the last record past the end of the archive.
    pub fn lookup(&self, timestamp: i64) -> Result<u32> {
        if self.timestamps.is_empty() {
            return Err(Error::EmptyIndex);
        }
        if timestamp < self.day_start {
            return Err(Error::BeforeDayStart);
        }

        let second = ((timestamp - self.day_start) / 1000) as usize;
        if second >= self.seconds.len() {
            return Ok(self.timestamps.len() as u32 - 1);
        }

        let mut index = self.seconds[second] as usize;
        while index + 1 < self.timestamps.len() && self.timestamps[index + 1] <= timestamp {
            index += 1;
        }

        Ok(index as u32)
    }
}
