//! Forward/backfill window planning
//!
//! Given the watermarks of the last successful run, decide which time
//! windows a script should fetch next:
//!
//! - the **forward** window continues exactly where the last success
//!   stopped and runs up to `now`;
//! - the **backfill** window walks the low-water mark backward in bounded
//!   chunks until the script's retention boundary (`now - target_window`)
//!   has been covered.
//!
//! Everything here is a pure function of its inputs. `now` is passed in by
//! the caller and captured once per plan so both windows agree on it.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Default look-back for a script's very first run
pub const DEFAULT_INITIAL_WINDOW_DAYS: i64 = 7;

/// Default size of one backfill step
pub const DEFAULT_BACKFILL_CHUNK_DAYS: i64 = 7;

/// Half-open time range `[start, end)` in absolute instants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DateRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }
}

/// High- and low-water marks left by previous successful runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Watermarks {
    /// Newest instant fetched so far
    pub last_fetched_at: Option<DateTime<Utc>>,

    /// Oldest instant fetched so far (absent on records written before
    /// backfill existed)
    pub earliest_fetched_at: Option<DateTime<Utc>>,
}

/// Windows to fetch in the next attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowPlan {
    pub forward: Option<DateRange>,
    pub backfill: Option<DateRange>,
    pub backfill_complete: bool,

    /// Low-water mark the plan started from: the stored one, or the
    /// estimate used for rows written before backfill existed
    pub earliest: Option<DateTime<Utc>>,
}

impl WindowPlan {
    /// True when neither window has anything to fetch
    pub fn is_empty(&self) -> bool {
        self.forward.is_none() && self.backfill.is_none()
    }

    /// Low-water mark to store once every window in the plan succeeded.
    ///
    /// Never later than the mark the plan started from, so a finished
    /// backfill stays finished.
    pub fn next_earliest(&self) -> Option<DateTime<Utc>> {
        let reached = self
            .backfill
            .map(|r| r.start)
            .or(self.forward.map(|r| r.start));
        match (reached, self.earliest) {
            (Some(reached), Some(earliest)) => Some(reached.min(earliest)),
            (reached, earliest) => reached.or(earliest),
        }
    }
}

/// Tunables for window planning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowConfig {
    /// Look-back for the very first run; deeper history comes from backfill
    pub initial_window: Duration,

    /// Maximum span of one backfill step
    pub backfill_chunk: Duration,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            initial_window: Duration::days(DEFAULT_INITIAL_WINDOW_DAYS),
            backfill_chunk: Duration::days(DEFAULT_BACKFILL_CHUNK_DAYS),
        }
    }
}

/// Plan the next forward and backfill windows for a script
pub fn plan_windows(
    watermarks: Option<Watermarks>,
    target_window: Duration,
    now: DateTime<Utc>,
    config: &WindowConfig,
) -> WindowPlan {
    let Some(last) = watermarks.and_then(|w| w.last_fetched_at) else {
        return WindowPlan {
            forward: Some(DateRange::new(now - config.initial_window, now)),
            backfill: None,
            backfill_complete: false,
            earliest: None,
        };
    };

    // A high-water mark at or past `now` (clock skew between workers)
    // leaves nothing new to fetch.
    let forward = (last < now).then(|| DateRange::new(last, now));

    let earliest = watermarks
        .and_then(|w| w.earliest_fetched_at)
        .unwrap_or(last - config.initial_window);
    let boundary = now - target_window;

    if earliest > boundary {
        let start = std::cmp::max(boundary, earliest - config.backfill_chunk);
        WindowPlan {
            forward,
            backfill: Some(DateRange::new(start, earliest)),
            backfill_complete: false,
            earliest: Some(earliest),
        }
    } else {
        WindowPlan {
            forward,
            backfill: None,
            backfill_complete: true,
            earliest: Some(earliest),
        }
    }
}
