//! Data fetcher trait and structured error types.
//!
//! The DataFetcher trait abstracts over exchange venues so the download cycle
//! can be driven by the Binance adapter in production and by in-memory fakes
//! in tests.

use crate::domain::{Bar, Resolution, Symbol};
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Structured error types for fetch and persistence operations.
///
/// These are designed to be displayable in log lines and CLI output alike.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("rate limited by venue (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("response format changed: {0}")]
    ResponseFormatChanged(String),

    #[error("symbol not found: {symbol}")]
    SymbolNotFound { symbol: String },

    #[error("hard stop: venue has blocked requests (circuit breaker tripped)")]
    CircuitBreakerTripped,

    #[error("dataset error: {0}")]
    DatasetError(String),

    #[error("parquet I/O error: {0}")]
    ParquetError(String),

    #[error("data error: {0}")]
    Other(String),
}

/// Capability interface every venue implements.
pub trait DataFetcher: Send + Sync {
    /// Human-readable name of this fetcher.
    fn name(&self) -> &str;

    /// Map a ticker to a tradable symbol on this venue.
    fn resolve_symbol(&self, ticker: &str) -> Result<Symbol, DataError>;

    /// Fetch bars with `from <= open_time < to`, ascending by open time.
    ///
    /// An empty vector means the venue has no data for the window.
    fn fetch(
        &self,
        symbol: &Symbol,
        resolution: Resolution,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Bar>, DataError>;

    /// Check if the fetcher is currently available (not rate-limited, not blocked).
    fn is_available(&self) -> bool {
        true
    }
}
