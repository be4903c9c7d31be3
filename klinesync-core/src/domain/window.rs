//! Half-open download windows.

use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("window start {from} is after its end {to}")]
pub struct WindowError {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

/// `[from, to)` time range fetched in one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    from: DateTime<Utc>,
    to: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Self, WindowError> {
        if from > to {
            return Err(WindowError { from, to });
        }
        Ok(Self { from, to })
    }

    pub fn from(&self) -> DateTime<Utc> {
        self.from
    }

    pub fn to(&self) -> DateTime<Utc> {
        self.to
    }

    pub fn is_empty(&self) -> bool {
        self.from == self.to
    }

    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        self.from <= t && t < self.to
    }
}

/// Drop the time of day, keeping the UTC date.
pub fn truncate_to_day(t: DateTime<Utc>) -> DateTime<Utc> {
    t.date_naive().and_time(NaiveTime::MIN).and_utc()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, d, h, 0, 0).unwrap()
    }

    #[test]
    fn rejects_inverted_window() {
        assert!(TimeWindow::new(ts(2, 0), ts(1, 0)).is_err());
        assert!(TimeWindow::new(ts(1, 0), ts(1, 0)).unwrap().is_empty());
    }

    #[test]
    fn half_open_membership() {
        let w = TimeWindow::new(ts(1, 0), ts(2, 0)).unwrap();
        assert!(w.contains(ts(1, 0)));
        assert!(w.contains(ts(1, 23)));
        assert!(!w.contains(ts(2, 0)));
    }

    #[test]
    fn truncation_keeps_date() {
        assert_eq!(truncate_to_day(ts(5, 17)), ts(5, 0));
        assert_eq!(truncate_to_day(ts(5, 0)), ts(5, 0));
    }
}
