//! Hourly lap histogram
//!
//! Buckets lap timestamps into one-hour closed-open windows `[start, end)`
//! covering the hours before a reference end time. Bucket boundaries are
//! aligned to the local wall-clock hour; hours without laps are emitted
//! with a zero count so the window is always complete.

use chrono::{DateTime, Duration, FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};
use types::lap::LapRecord;

const SECS_PER_HOUR: i64 = 3600;

/// Histogram window settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistogramConfig {
    /// Number of one-hour buckets
    pub window_hours: u32,
    /// Offset of the local timezone used for labels and alignment
    pub utc_offset_secs: i32,
    /// Fixed end of the window; the engine clock is used when unset
    pub event_end: Option<DateTime<Utc>>,
}

impl Default for HistogramConfig {
    fn default() -> Self {
        Self {
            window_hours: 24,
            utc_offset_secs: 2 * SECS_PER_HOUR as i32,
            event_end: None,
        }
    }
}

impl HistogramConfig {
    /// Local timezone; an out-of-range offset falls back to UTC
    pub fn offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_secs).unwrap_or_else(|| Utc.fix())
    }
}

/// Laps counted in one hour
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HourBucket {
    /// Local wall-clock start of the bucket, `HH:MM`
    pub label: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub laps: u64,
}

/// Round up to the next local hour boundary; exact boundaries are kept.
pub fn align_to_hour(at: DateTime<Utc>, offset: FixedOffset) -> DateTime<Utc> {
    let local_secs = at.timestamp() + i64::from(offset.local_minus_utc());
    let past_hour = Duration::seconds(local_secs.rem_euclid(SECS_PER_HOUR))
        + Duration::nanoseconds(i64::from(at.timestamp_subsec_nanos()));

    if past_hour == Duration::zero() {
        at
    } else {
        at - past_hour + Duration::hours(1)
    }
}

/// Build the histogram for the window ending at `reference`.
///
/// Buckets are returned in chronological order; the last one ends at the
/// (hour-aligned) reference time.
pub fn build_histogram(laps: &[LapRecord], reference: DateTime<Utc>, config: &HistogramConfig) -> Vec<HourBucket> {
    let offset = config.offset();
    let end = align_to_hour(reference, offset);
    let hours = i64::from(config.window_hours);
    let window_start = end - Duration::hours(hours);

    let mut buckets: Vec<HourBucket> = (0..hours)
        .map(|i| {
            let start = window_start + Duration::hours(i);
            HourBucket {
                label: start.with_timezone(&offset).format("%H:%M").to_string(),
                start,
                end: start + Duration::hours(1),
                laps: 0,
            }
        })
        .collect();

    for lap in laps {
        if lap.timestamp < window_start || lap.timestamp >= end {
            continue;
        }
        let index = (lap.timestamp - window_start).num_seconds() / SECS_PER_HOUR;
        if let Some(bucket) = buckets.get_mut(index as usize) {
            bucket.laps += 1;
        }
    }

    buckets
}

/// Number of laps with a timestamp in `[start, start + 1h)`.
pub fn laps_in_hour(laps: &[LapRecord], start: DateTime<Utc>) -> u64 {
    let end = start + Duration::hours(1);
    laps.iter()
        .filter(|lap| lap.timestamp >= start && lap.timestamp < end)
        .count() as u64
}
