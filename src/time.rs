//! Rolling time windows.
//!
//! Every counter in tallyrank (momentum windows, rate-limit windows, vote
//! ceilings) is a count of timestamps falling inside a half-open window
//! `[from, to)` that ends at some reference instant, usually "now".

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// A half-open time window `[from, to)`.
///
/// # Examples
///
/// ```
/// use tallyrank::TimeWindow;
/// use chrono::{Duration, Utc};
///
/// let now = Utc::now();
/// let last_hour = TimeWindow::trailing(now, Duration::hours(1));
/// assert!(last_hour.contains(now - Duration::minutes(5)));
/// assert!(last_hour.contains(now));
/// assert!(!last_hour.contains(now - Duration::hours(2)));
///
/// let exact = TimeWindow::new(now - Duration::hours(1), now);
/// assert!(!exact.contains(now));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeWindow {
    /// Start of the window (inclusive).
    pub from: DateTime<Utc>,

    /// End of the window (exclusive).
    pub to: DateTime<Utc>,
}

impl TimeWindow {
    /// Creates a window from two timestamps. A reversed pair is swapped.
    #[must_use]
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        if from <= to {
            Self { from, to }
        } else {
            Self { from: to, to: from }
        }
    }

    /// The window of length `span` that ends at `now`.
    ///
    /// The end is nudged one microsecond past `now` so an event stamped
    /// exactly at `now` is counted.
    #[must_use]
    pub fn trailing(now: DateTime<Utc>, span: Duration) -> Self {
        let to = now + Duration::microseconds(1);
        Self {
            from: now - span,
            to,
        }
    }

    /// The window between `older` and `newer` ago, relative to `now`.
    ///
    /// `between_ago(now, 48h, 24h)` is "hours 24 to 48 ago".
    #[must_use]
    pub fn between_ago(now: DateTime<Utc>, older: Duration, newer: Duration) -> Self {
        Self::new(now - older, now - newer)
    }

    /// Check if a timestamp falls within this window `[from, to)`.
    #[must_use]
    pub fn contains(&self, time: DateTime<Utc>) -> bool {
        time >= self.from && time < self.to
    }

    /// Length of the window.
    #[must_use]
    pub fn duration(&self) -> Duration {
        self.to - self.from
    }
}

impl std::fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{} → {})", self.from, self.to)
    }
}
