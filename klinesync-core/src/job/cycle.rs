//! Download cycle: fetch, aggregate and persist bars for every requested ticker.
//!
//! Tickers are isolated from one another. A failure at any stage of one
//! ticker, a panic included, is recorded in its [`TickerReport`] and the
//! cycle moves on.

use super::scheduler::panic_message;
use crate::config::ConfigError;
use crate::data::{aggregate, DataError, DataFetcher, DatasetWriter};
use crate::domain::{normalize_ticker, Bar, Resolution, ResolutionRequest, Symbol, TimeWindow};
use rayon::prelude::*;
use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use thiserror::Error;

/// What a cycle downloads: a non-empty ticker list and a resolution request.
///
/// Tickers naming the same symbol (`btc-usdt`, `BTCUSDT`) are kept once, in
/// first-seen order.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleRequest {
    tickers: Vec<String>,
    resolution: ResolutionRequest,
}

impl CycleRequest {
    pub fn new(
        tickers: Vec<String>,
        resolution: Option<ResolutionRequest>,
    ) -> Result<Self, ConfigError> {
        let mut seen = HashSet::new();
        let tickers: Vec<String> = tickers
            .into_iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .filter(|t| {
                let key = normalize_ticker(t).unwrap_or_else(|| t.to_ascii_uppercase());
                seen.insert(key)
            })
            .collect();
        if tickers.is_empty() {
            return Err(ConfigError::MissingTickers);
        }
        let resolution = resolution.ok_or(ConfigError::MissingResolution)?;
        Ok(Self {
            tickers,
            resolution,
        })
    }

    pub fn tickers(&self) -> &[String] {
        &self.tickers
    }

    pub fn resolution(&self) -> ResolutionRequest {
        self.resolution
    }
}

/// Stage at which a ticker failed.
#[derive(Debug, Error)]
pub enum TickerError {
    #[error("symbol resolution failed: {0}")]
    Resolution(#[source] DataError),

    #[error("fetch failed: {0}")]
    Fetch(#[source] DataError),

    #[error("write of {resolution} bars failed: {source}")]
    Write {
        resolution: Resolution,
        #[source]
        source: DataError,
    },

    #[error("panicked: {0}")]
    Panicked(String),
}

#[derive(Debug)]
pub enum TickerOutcome {
    /// Bars persisted, as `(resolution, bar count)` in write order.
    Written(Vec<(Resolution, usize)>),
    /// The venue returned nothing for the window.
    NoData,
    Failed(TickerError),
}

#[derive(Debug)]
pub struct TickerReport {
    pub ticker: String,
    pub outcome: TickerOutcome,
}

/// Per-ticker results of one cycle, in request order.
#[derive(Debug)]
pub struct CycleReport {
    pub window: TimeWindow,
    pub tickers: Vec<TickerReport>,
}

impl CycleReport {
    pub fn succeeded(&self) -> usize {
        self.count(|o| matches!(o, TickerOutcome::Written(_)))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, TickerOutcome::Failed(_)))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, TickerOutcome::NoData))
    }

    pub fn outcome(&self, ticker: &str) -> Option<&TickerOutcome> {
        self.tickers
            .iter()
            .find(|r| r.ticker == ticker)
            .map(|r| &r.outcome)
    }

    fn count(&self, pred: impl Fn(&TickerOutcome) -> bool) -> usize {
        self.tickers.iter().filter(|r| pred(&r.outcome)).count()
    }
}

/// One pass over the ticker list. Owns the fetcher and the dataset writer.
pub struct DownloadCycle {
    fetcher: Arc<dyn DataFetcher>,
    writer: Arc<dyn DatasetWriter>,
    parallel: bool,
}

impl DownloadCycle {
    pub fn new(fetcher: Arc<dyn DataFetcher>, writer: Arc<dyn DatasetWriter>) -> Self {
        Self {
            fetcher,
            writer,
            parallel: false,
        }
    }

    /// Process tickers on the rayon pool. Report order is unaffected.
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn run(&self, request: &CycleRequest, window: TimeWindow) -> CycleReport {
        let fetcher = self.fetcher.name();
        tracing::info!(
            fetcher,
            tickers = request.tickers.len(),
            resolution = %request.resolution,
            from = %window.from(),
            to = %window.to(),
            "download cycle started"
        );

        let tickers: Vec<TickerReport> = if self.parallel {
            request
                .tickers
                .par_iter()
                .map(|t| self.run_ticker(t, request.resolution, window))
                .collect()
        } else {
            request
                .tickers
                .iter()
                .map(|t| self.run_ticker(t, request.resolution, window))
                .collect()
        };

        let report = CycleReport { window, tickers };
        tracing::info!(
            fetcher,
            succeeded = report.succeeded(),
            skipped = report.skipped(),
            failed = report.failed(),
            "download cycle finished"
        );
        report
    }

    fn run_ticker(
        &self,
        ticker: &str,
        request: ResolutionRequest,
        window: TimeWindow,
    ) -> TickerReport {
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            self.download_ticker(ticker, request, window)
        }))
        .unwrap_or_else(|payload| {
            Err(TickerError::Panicked(
                panic_message(payload.as_ref()).to_string(),
            ))
        });

        let outcome = match result {
            Ok(None) => {
                tracing::info!(ticker, "no data in window, skipped");
                TickerOutcome::NoData
            }
            Ok(Some(written)) => TickerOutcome::Written(written),
            Err(e) => {
                tracing::warn!(ticker, error = %e, "ticker failed");
                TickerOutcome::Failed(e)
            }
        };
        TickerReport {
            ticker: ticker.to_string(),
            outcome,
        }
    }

    /// `Ok(None)` when the venue had no bars for the window.
    fn download_ticker(
        &self,
        ticker: &str,
        request: ResolutionRequest,
        window: TimeWindow,
    ) -> Result<Option<Vec<(Resolution, usize)>>, TickerError> {
        if !self.fetcher.is_available() {
            return Err(TickerError::Fetch(DataError::CircuitBreakerTripped));
        }
        let symbol = self
            .fetcher
            .resolve_symbol(ticker)
            .map_err(TickerError::Resolution)?;

        let resolution = request.fetch_resolution();
        let mut bars = self
            .fetcher
            .fetch(&symbol, resolution, window.from(), window.to())
            .map_err(TickerError::Fetch)?;

        let fetched = bars.len();
        bars.retain(|b| window.contains(b.open_time) && b.is_sane());
        if bars.len() < fetched {
            tracing::warn!(
                symbol = %symbol,
                dropped = fetched - bars.len(),
                "discarded bars outside the window or with inconsistent prices"
            );
        }
        if bars.is_empty() {
            return Ok(None);
        }

        let mut written = Vec::with_capacity(1 + request.derived().len());
        self.write(resolution, &symbol, &bars)?;
        written.push((resolution, bars.len()));

        for &derived in request.derived() {
            let coarse = aggregate(&bars, derived.duration());
            self.write(derived, &symbol, &coarse)?;
            written.push((derived, coarse.len()));
        }

        Ok(Some(written))
    }

    fn write(
        &self,
        resolution: Resolution,
        symbol: &Symbol,
        bars: &[Bar],
    ) -> Result<(), TickerError> {
        self.writer
            .write(resolution, symbol, bars)
            .map_err(|source| TickerError::Write { resolution, source })?;
        tracing::debug!(
            symbol = %symbol,
            resolution = %resolution,
            bars = bars.len(),
            "bars written"
        );
        Ok(())
    }
}
