// Graphing-period grid: maps unix-second timestamps onto interval-aligned buckets.
// current_bucket rounds to nearest (historical bucket compatibility); hour_floor is a plain truncation.

use chrono::{Local, TimeZone, Timelike};
use serde::{Deserialize, Serialize};
use std::fmt;

const SECONDS_IN_HOUR: i64 = 60 * 60;

/// Start of one graphing period in unix seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Bucket(i64);

impl Bucket {
    pub const fn new(start_secs: i64) -> Self {
        Self(start_secs)
    }

    pub const fn start(self) -> i64 {
        self.0
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Current unix time in seconds. Read once per logical operation and pass it down.
pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Fixed grid of graphing periods, `interval_minutes` wide. Built once from config.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeGrid {
    interval_secs: i64,
}

impl TimeGrid {
    pub fn new(interval_minutes: u32) -> anyhow::Result<Self> {
        anyhow::ensure!(
            interval_minutes > 0,
            "graph.interval must be > 0, got {}",
            interval_minutes
        );
        Ok(Self {
            interval_secs: i64::from(interval_minutes) * 60,
        })
    }

    pub fn interval_secs(&self) -> i64 {
        self.interval_secs
    }

    /// `round((now - d/2) / d) * d` with `d = interval_secs`, halves rounded away from zero.
    /// Integer form of the same expression: `round((2*now - d) / 2d)`.
    pub fn current_bucket(&self, now: i64) -> Bucket {
        let d = self.interval_secs;
        Bucket(div_round_half_away(2 * now - d, 2 * d) * d)
    }

    /// When the next aggregation is due. Always a full interval after `current_bucket(now)`.
    ///
    /// Strictly later than `now` for any `now > 0`. At a non-positive `now` that sits on the
    /// grid (e.g. `0`) the halves round down to the previous bucket and the deadline equals `now`.
    pub fn next_bucket_deadline(&self, now: i64) -> Bucket {
        Bucket(self.current_bucket(now).0 + self.interval_secs)
    }

    /// Exclusive end of `bucket`.
    pub fn bucket_end(&self, bucket: Bucket) -> i64 {
        bucket.0 + self.interval_secs
    }

    /// The bucket that closed most recently at `now`.
    pub fn previous_bucket(&self, now: i64) -> Bucket {
        Bucket(self.current_bucket(now).0 - self.interval_secs)
    }

    pub fn is_aligned(&self, bucket: Bucket) -> bool {
        bucket.0.rem_euclid(self.interval_secs) == 0
    }

    /// True once `now` is at or past the end of `bucket` plus `grace_secs`.
    pub fn is_closed(&self, bucket: Bucket, now: i64, grace_secs: i64) -> bool {
        now >= self.bucket_end(bucket) + grace_secs
    }
}

/// Start of the current clock hour in the server's local zone.
pub fn hour_floor(now: i64) -> i64 {
    hour_floor_in(now, &Local)
}

/// Start of the clock hour containing `now` in `tz`. Pure truncation, no rounding.
pub fn hour_floor_in<Tz: TimeZone>(now: i64, tz: &Tz) -> i64 {
    tz.timestamp_opt(now, 0)
        .single()
        .and_then(|dt| dt.with_minute(0))
        .and_then(|dt| dt.with_second(0))
        .map(|dt| dt.timestamp())
        .unwrap_or_else(|| now - now.rem_euclid(SECONDS_IN_HOUR))
}

/// `round(num / den)` for `den > 0`, with exact halves rounded away from zero.
fn div_round_half_away(num: i64, den: i64) -> i64 {
    let q = num / den;
    let r = num % den;
    if 2 * r.abs() >= den { q + num.signum() } else { q }
}
