//! In-memory fetcher and writer shared by the integration tests.

#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use klinesync_core::data::{DataError, DataFetcher, DatasetWriter};
use klinesync_core::domain::{Bar, Resolution, Symbol, Venue};
use std::collections::HashMap;
use std::sync::Mutex;

pub fn day(d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, d, 0, 0, 0).unwrap()
}

/// `n` consecutive minute bars starting at `start`.
pub fn minute_bars(ticker: &str, start: DateTime<Utc>, n: i64) -> Vec<Bar> {
    (0..n)
        .map(|i| {
            let base = 100.0 + (i % 60) as f64;
            Bar {
                symbol: ticker.to_string(),
                open_time: start + Duration::minutes(i),
                open: base,
                high: base + 1.0,
                low: base - 1.0,
                close: base + 0.5,
                volume: 10.0,
            }
        })
        .collect()
}

/// How the fake venue answers for one ticker.
pub enum Script {
    /// Bars served, filtered to the requested window.
    Bars(Vec<Bar>),
    /// Bars served as-is, whatever the window.
    Raw(Vec<Bar>),
    Empty,
    ResolveError,
    FetchError,
    Panic,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FetchCall {
    pub ticker: String,
    pub resolution: Resolution,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

#[derive(Default)]
pub struct FakeFetcher {
    scripts: HashMap<String, Script>,
    calls: Mutex<Vec<FetchCall>>,
    unavailable: bool,
}

impl FakeFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, ticker: &str, script: Script) -> Self {
        self.scripts.insert(ticker.to_string(), script);
        self
    }

    /// Report the venue as blocked.
    pub fn unavailable(mut self) -> Self {
        self.unavailable = true;
        self
    }

    pub fn calls(&self) -> Vec<FetchCall> {
        self.calls.lock().unwrap().clone()
    }
}

impl DataFetcher for FakeFetcher {
    fn name(&self) -> &str {
        "fake"
    }

    fn is_available(&self) -> bool {
        !self.unavailable
    }

    fn resolve_symbol(&self, ticker: &str) -> Result<Symbol, DataError> {
        match self.scripts.get(ticker) {
            None | Some(Script::ResolveError) => Err(DataError::SymbolNotFound {
                symbol: ticker.to_string(),
            }),
            Some(_) => Ok(Symbol::new(ticker, Venue::Binance)),
        }
    }

    fn fetch(
        &self,
        symbol: &Symbol,
        resolution: Resolution,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Bar>, DataError> {
        self.calls.lock().unwrap().push(FetchCall {
            ticker: symbol.ticker.clone(),
            resolution,
            from,
            to,
        });
        match self.scripts.get(&symbol.ticker) {
            Some(Script::Bars(bars)) => Ok(bars
                .iter()
                .filter(|b| b.open_time >= from && b.open_time < to)
                .cloned()
                .collect()),
            Some(Script::Raw(bars)) => Ok(bars.clone()),
            Some(Script::Empty) => Ok(Vec::new()),
            Some(Script::Panic) => panic!("venue adapter bug for {}", symbol.ticker),
            _ => Err(DataError::NetworkUnreachable("connection refused".into())),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WriteCall {
    pub ticker: String,
    pub resolution: Resolution,
    pub bars: usize,
}

#[derive(Default)]
pub struct RecordingWriter {
    fail_on: Option<(String, Resolution)>,
    writes: Mutex<Vec<WriteCall>>,
}

impl RecordingWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(ticker: &str, resolution: Resolution) -> Self {
        Self {
            fail_on: Some((ticker.to_string(), resolution)),
            ..Self::default()
        }
    }

    pub fn writes(&self) -> Vec<WriteCall> {
        self.writes.lock().unwrap().clone()
    }

    pub fn writes_for(&self, ticker: &str) -> Vec<(Resolution, usize)> {
        self.writes()
            .into_iter()
            .filter(|w| w.ticker == ticker)
            .map(|w| (w.resolution, w.bars))
            .collect()
    }
}

impl DatasetWriter for RecordingWriter {
    fn write(&self, resolution: Resolution, symbol: &Symbol, bars: &[Bar]) -> Result<(), DataError> {
        if self
            .fail_on
            .as_ref()
            .is_some_and(|(t, r)| *t == symbol.ticker && *r == resolution)
        {
            return Err(DataError::DatasetError("disk full".into()));
        }
        self.writes.lock().unwrap().push(WriteCall {
            ticker: symbol.ticker.clone(),
            resolution,
            bars: bars.len(),
        });
        Ok(())
    }
}
