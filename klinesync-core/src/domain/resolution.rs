//! Bar resolutions and the "all resolutions" request.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Time-bucket granularity of a bar series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    Minute,
    Hour,
    Daily,
}

impl Resolution {
    /// Length of one bucket.
    pub fn duration(&self) -> Duration {
        match self {
            Resolution::Minute => Duration::minutes(1),
            Resolution::Hour => Duration::hours(1),
            Resolution::Daily => Duration::days(1),
        }
    }

    /// Kline interval code understood by the exchange API.
    pub fn interval_code(&self) -> &'static str {
        match self {
            Resolution::Minute => "1m",
            Resolution::Hour => "1h",
            Resolution::Daily => "1d",
        }
    }

    /// Lower-case name used in dataset paths.
    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::Minute => "minute",
            Resolution::Hour => "hour",
            Resolution::Daily => "daily",
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the operator asked for: one resolution, or minute data plus every
/// coarser resolution derived from it.
///
/// `All` never reaches a fetcher or a writer; use [`fetch_resolution`] and
/// [`derived`] to expand it.
///
/// [`fetch_resolution`]: ResolutionRequest::fetch_resolution
/// [`derived`]: ResolutionRequest::derived
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResolutionRequest {
    Single(Resolution),
    All,
}

impl ResolutionRequest {
    /// Resolution to fetch from the venue.
    pub fn fetch_resolution(&self) -> Resolution {
        match self {
            ResolutionRequest::Single(res) => *res,
            ResolutionRequest::All => Resolution::Minute,
        }
    }

    /// Resolutions aggregated locally from the fetched bars, coarsest last.
    pub fn derived(&self) -> &'static [Resolution] {
        match self {
            ResolutionRequest::Single(_) => &[],
            ResolutionRequest::All => &[Resolution::Hour, Resolution::Daily],
        }
    }

    pub fn is_all(&self) -> bool {
        matches!(self, ResolutionRequest::All)
    }
}

impl fmt::Display for ResolutionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolutionRequest::Single(res) => res.fmt(f),
            ResolutionRequest::All => f.write_str("all"),
        }
    }
}

impl FromStr for ResolutionRequest {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "minute" => Ok(ResolutionRequest::Single(Resolution::Minute)),
            "hour" => Ok(ResolutionRequest::Single(Resolution::Hour)),
            "daily" | "day" => Ok(ResolutionRequest::Single(Resolution::Daily)),
            "all" => Ok(ResolutionRequest::All),
            other => Err(format!(
                "unknown resolution '{other}' (expected Minute/Hour/Daily/All)"
            )),
        }
    }
}
