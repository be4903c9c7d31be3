//! Time-bucket aggregation of fine bars into coarser bars.
//!
//! Buckets are aligned to multiples of the bucket length since the Unix epoch,
//! so hourly buckets start on the hour and daily buckets at 00:00 UTC.

use crate::domain::Bar;
use chrono::{DateTime, Duration, Utc};

/// Aggregate ascending bars of one symbol into `bucket`-sized bars.
///
/// Buckets with no input bars produce no output bar. The output is a pure
/// function of the input and is ascending by `open_time`.
pub fn aggregate(bars: &[Bar], bucket: Duration) -> Vec<Bar> {
    let bucket_ms = bucket.num_milliseconds();
    if bucket_ms <= 0 {
        return bars.to_vec();
    }

    let mut out: Vec<Bar> = Vec::new();
    let mut current: Option<(i64, Bar)> = None;

    for bar in bars {
        let start = bucket_start(bar.open_time_ms(), bucket_ms);
        match current.as_mut() {
            Some((key, acc)) if *key == start => {
                acc.high = acc.high.max(bar.high);
                acc.low = acc.low.min(bar.low);
                acc.close = bar.close;
                acc.volume += bar.volume;
            }
            _ => {
                if let Some((_, done)) = current.take() {
                    out.push(done);
                }
                let Some(open_time) = DateTime::<Utc>::from_timestamp_millis(start) else {
                    continue;
                };
                current = Some((
                    start,
                    Bar {
                        symbol: bar.symbol.clone(),
                        open_time,
                        open: bar.open,
                        high: bar.high,
                        low: bar.low,
                        close: bar.close,
                        volume: bar.volume,
                    },
                ));
            }
        }
    }

    if let Some((_, done)) = current {
        out.push(done);
    }
    out
}

/// Start of the bucket containing `ts_ms` (floor division, correct before 1970).
fn bucket_start(ts_ms: i64, bucket_ms: i64) -> i64 {
    ts_ms.div_euclid(bucket_ms) * bucket_ms
}
