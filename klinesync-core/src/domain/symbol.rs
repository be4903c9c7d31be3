//! Venues and the tradable-instrument identity resolved from a ticker.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Supported exchange venues.
///
/// Chosen once from configuration; everything downstream dispatches through
/// the venue's `DataFetcher` implementation instead of re-inspecting names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Venue {
    Binance,
    BinanceUs,
}

impl Venue {
    /// Market name used for dataset partitioning and symbol-properties rows.
    pub fn market(&self) -> &'static str {
        match self {
            Venue::Binance => "binance",
            Venue::BinanceUs => "binanceus",
        }
    }

    /// REST API root for the venue.
    pub fn base_url(&self) -> &'static str {
        match self {
            Venue::Binance => "https://api.binance.com",
            Venue::BinanceUs => "https://api.binance.us",
        }
    }
}

impl fmt::Display for Venue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.market())
    }
}

impl FromStr for Venue {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace(['-', '_', '.'], "").as_str() {
            "binance" => Ok(Venue::Binance),
            "binanceus" => Ok(Venue::BinanceUs),
            other => Err(format!("unknown venue '{other}' (expected binance or binance-us)")),
        }
    }
}

/// A ticker resolved to a tradable instrument on a venue.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Symbol {
    pub ticker: String,
    pub venue: Venue,
}

impl Symbol {
    pub fn new(ticker: impl Into<String>, venue: Venue) -> Self {
        Self {
            ticker: ticker.into(),
            venue,
        }
    }

    pub fn market(&self) -> &'static str {
        self.venue.market()
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.venue.market(), self.ticker)
    }
}

/// Upper-case a ticker and strip separators (`BTC/USDT`, `btc-usdt` → `BTCUSDT`).
pub fn normalize_ticker(ticker: &str) -> Option<String> {
    let norm: String = ticker
        .trim()
        .chars()
        .filter(|c| !matches!(c, '/' | '-' | '_'))
        .map(|c| c.to_ascii_uppercase())
        .collect();
    if norm.is_empty() || !norm.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(norm)
}
