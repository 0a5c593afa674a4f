//! Conversion between the store's raw timestamps and calendar time.
//!
//! The store records timestamps as nanoseconds since 2001-01-01 UTC. A raw
//! value of zero (or an absent column) means "no timestamp".

use chrono::{DateTime, Utc};

/// Seconds between the Unix epoch (1970-01-01) and the store's epoch
/// (2001-01-01).
pub const STORE_EPOCH_OFFSET_SECS: i64 = 978_307_200;

const NANOS_PER_SEC: i64 = 1_000_000_000;

/// Convert raw nanosecond ticks to UTC calendar time.
///
/// `None` or `0` yields `None`. The conversion is exact: seconds and
/// sub-second nanoseconds are split out separately, so no precision is lost
/// to floating point. Out-of-range inputs also yield `None` rather than
/// panicking.
pub fn from_store_ticks(raw: Option<i64>) -> Option<DateTime<Utc>> {
    let ticks = raw?;
    if ticks == 0 {
        return None;
    }
    let secs = STORE_EPOCH_OFFSET_SECS.checked_add(ticks.div_euclid(NANOS_PER_SEC))?;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let nanos = ticks.rem_euclid(NANOS_PER_SEC) as u32;
    DateTime::from_timestamp(secs, nanos)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
