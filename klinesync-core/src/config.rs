//! Job configuration: TOML file values overridden by command-line values.

use crate::domain::{ResolutionRequest, Venue, WindowError};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Timestamp format used on the command line and in config files.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d-%H:%M:%S";

/// Default time between scheduled cycles.
pub const DEFAULT_INTERVAL_HOURS: u64 = 12;

/// Longest accepted time between cycles (one year).
pub const MAX_INTERVAL_HOURS: u64 = 24 * 365;

/// Fatal configuration problems, reported before any cycle runs.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("'--tickers=' parameter is missing")]
    MissingTickers,

    #[error("'--resolution=' parameter is missing")]
    MissingResolution,

    #[error("'--from-date=' parameter is missing")]
    MissingFromDate,

    #[error("invalid resolution: {0}")]
    InvalidResolution(String),

    #[error("invalid venue: {0}")]
    InvalidVenue(String),

    #[error("invalid timestamp '{value}' (expected yyyyMMdd-HH:mm:ss)")]
    InvalidTimestamp { value: String },

    #[error(transparent)]
    InvalidWindow(#[from] WindowError),

    #[error("interval must be between 1 and 8760 hours")]
    InvalidInterval,

    #[error("read config file {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("parse config file {path}: {reason}")]
    Parse { path: String, reason: String },
}

/// Raw configuration values, every field optional so file and flags can be layered.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JobConfig {
    pub venue: Option<String>,
    pub tickers: Vec<String>,
    pub resolution: Option<String>,
    pub from_date: Option<String>,
    pub to_date: Option<String>,
    pub destination_dir: Option<PathBuf>,
    pub interval_hours: Option<u64>,
    pub parallel: Option<bool>,
    pub wait_for_completion: Option<bool>,
    pub once: Option<bool>,
}

impl JobConfig {
    /// Load from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    /// Layer `overrides` on top of `self`; set values in `overrides` win.
    pub fn merge(self, overrides: JobConfig) -> JobConfig {
        JobConfig {
            venue: overrides.venue.or(self.venue),
            tickers: if overrides.tickers.is_empty() {
                self.tickers
            } else {
                overrides.tickers
            },
            resolution: overrides.resolution.or(self.resolution),
            from_date: overrides.from_date.or(self.from_date),
            to_date: overrides.to_date.or(self.to_date),
            destination_dir: overrides.destination_dir.or(self.destination_dir),
            interval_hours: overrides.interval_hours.or(self.interval_hours),
            parallel: overrides.parallel.or(self.parallel),
            wait_for_completion: overrides.wait_for_completion.or(self.wait_for_completion),
            once: overrides.once.or(self.once),
        }
    }

    /// Check every value and fill in defaults.
    pub fn validate(&self) -> Result<ValidatedJob, ConfigError> {
        let tickers = split_tickers(&self.tickers);
        if tickers.is_empty() {
            return Err(ConfigError::MissingTickers);
        }

        let resolution = match self.resolution.as_deref().map(str::trim) {
            None | Some("") => return Err(ConfigError::MissingResolution),
            Some(raw) => raw
                .parse::<ResolutionRequest>()
                .map_err(ConfigError::InvalidResolution)?,
        };

        let venue = match self.venue.as_deref() {
            None => Venue::Binance,
            Some(raw) => raw.parse::<Venue>().map_err(ConfigError::InvalidVenue)?,
        };

        let from_date = self
            .from_date
            .as_deref()
            .ok_or(ConfigError::MissingFromDate)
            .and_then(parse_timestamp)?;
        let to_date = self.to_date.as_deref().map(parse_timestamp).transpose()?;
        if let Some(to) = to_date {
            if from_date > to {
                return Err(WindowError { from: from_date, to }.into());
            }
        }

        let interval_hours = self.interval_hours.unwrap_or(DEFAULT_INTERVAL_HOURS);
        if !(1..=MAX_INTERVAL_HOURS).contains(&interval_hours) {
            return Err(ConfigError::InvalidInterval);
        }
        let interval_secs = interval_hours
            .checked_mul(3600)
            .ok_or(ConfigError::InvalidInterval)?;

        Ok(ValidatedJob {
            venue,
            tickers,
            resolution,
            from_date,
            to_date,
            destination_dir: self
                .destination_dir
                .clone()
                .unwrap_or_else(|| PathBuf::from("data")),
            interval: Duration::from_secs(interval_secs),
            parallel: self.parallel.unwrap_or(false),
            wait_for_completion: self.wait_for_completion.unwrap_or(true),
            once: self.once.unwrap_or(false),
        })
    }
}

/// Fully checked job settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedJob {
    pub venue: Venue,
    pub tickers: Vec<String>,
    pub resolution: ResolutionRequest,
    pub from_date: DateTime<Utc>,
    pub to_date: Option<DateTime<Utc>>,
    pub destination_dir: PathBuf,
    pub interval: Duration,
    pub parallel: bool,
    pub wait_for_completion: bool,
    pub once: bool,
}

/// Flatten ticker entries, splitting comma-separated lists (`BTCUSDT,ETHUSDT`).
pub fn split_tickers(raw: &[String]) -> Vec<String> {
    raw.iter()
        .flat_map(|entry| entry.split(','))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(String::from)
        .collect()
}

/// Parse `yyyyMMdd-HH:mm:ss` (or a bare `yyyyMMdd`) as UTC.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, ConfigError> {
    let raw = raw.trim();
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT) {
        return Ok(dt.and_utc());
    }
    NaiveDate::parse_from_str(raw, "%Y%m%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .ok_or_else(|| ConfigError::InvalidTimestamp {
            value: raw.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Resolution;
    use chrono::TimeZone;

    fn base() -> JobConfig {
        JobConfig {
            tickers: vec!["BTCUSDT".into()],
            resolution: Some("all".into()),
            from_date: Some("20240101-00:00:00".into()),
            ..Default::default()
        }
    }

    #[test]
    fn parses_source_timestamp_format() {
        assert_eq!(
            parse_timestamp("20240315-13:45:00").unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 15, 13, 45, 0).unwrap()
        );
        assert_eq!(
            parse_timestamp("20240315").unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 15, 0, 0, 0).unwrap()
        );
        assert!(matches!(
            parse_timestamp("2024-03-15"),
            Err(ConfigError::InvalidTimestamp { .. })
        ));
    }

    #[test]
    fn defaults_are_filled() {
        let job = base().validate().unwrap();
        assert_eq!(job.venue, Venue::Binance);
        assert_eq!(job.resolution, ResolutionRequest::All);
        assert_eq!(job.interval, Duration::from_secs(12 * 3600));
        assert_eq!(job.destination_dir, PathBuf::from("data"));
        assert!(job.wait_for_completion);
        assert!(!job.parallel);
        assert!(!job.once);
        assert_eq!(job.to_date, None);
    }

    #[test]
    fn missing_tickers_or_resolution_is_fatal() {
        let mut cfg = base();
        cfg.tickers = vec![" , ".into()];
        assert!(matches!(cfg.validate(), Err(ConfigError::MissingTickers)));

        let mut cfg = base();
        cfg.resolution = Some("  ".into());
        assert!(matches!(cfg.validate(), Err(ConfigError::MissingResolution)));

        let mut cfg = base();
        cfg.resolution = Some("tick".into());
        assert!(matches!(cfg.validate(), Err(ConfigError::InvalidResolution(_))));
    }

    #[test]
    fn inverted_window_is_rejected() {
        let mut cfg = base();
        cfg.to_date = Some("20231231-00:00:00".into());
        assert!(matches!(cfg.validate(), Err(ConfigError::InvalidWindow(_))));
    }

    #[test]
    fn comma_separated_tickers_are_split() {
        let mut cfg = base();
        cfg.tickers = vec!["BTCUSDT, ETHUSDT".into(), "BNBUSDT".into()];
        let job = cfg.validate().unwrap();
        assert_eq!(job.tickers, vec!["BTCUSDT", "ETHUSDT", "BNBUSDT"]);
    }

    #[test]
    fn toml_file_then_overrides() {
        let toml = r#"
            venue = "binance-us"
            tickers = ["BTCUSD", "ETHUSD"]
            resolution = "Hour"
            from_date = "20240101-00:00:00"
            destination_dir = "/srv/data"
            interval_hours = 6
        "#;
        let file: JobConfig = toml::from_str(toml).unwrap();
        let cli = JobConfig {
            resolution: Some("daily".into()),
            parallel: Some(true),
            ..Default::default()
        };
        let job = file.merge(cli).validate().unwrap();

        assert_eq!(job.venue, Venue::BinanceUs);
        assert_eq!(job.tickers, vec!["BTCUSD", "ETHUSD"]);
        assert_eq!(job.resolution, ResolutionRequest::Single(Resolution::Daily));
        assert_eq!(job.destination_dir, PathBuf::from("/srv/data"));
        assert_eq!(job.interval, Duration::from_secs(6 * 3600));
        assert!(job.parallel);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = toml::from_str::<JobConfig>("tickerz = [\"BTCUSDT\"]");
        assert!(err.is_err());
    }

    #[test]
    fn zero_interval_is_rejected() {
        let mut cfg = base();
        cfg.interval_hours = Some(0);
        assert!(matches!(cfg.validate(), Err(ConfigError::InvalidInterval)));
    }

    #[test]
    fn oversized_interval_is_rejected_without_overflow() {
        for hours in [u64::MAX / 1000, u64::MAX, MAX_INTERVAL_HOURS + 1] {
            let mut cfg = base();
            cfg.interval_hours = Some(hours);
            assert!(
                matches!(cfg.validate(), Err(ConfigError::InvalidInterval)),
                "{hours} hours accepted"
            );
        }

        let mut cfg = base();
        cfg.interval_hours = Some(MAX_INTERVAL_HOURS);
        let job = cfg.validate().unwrap();
        assert_eq!(job.interval, Duration::from_secs(MAX_INTERVAL_HOURS * 3600));
    }
}
