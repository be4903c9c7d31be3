//! KlineSync Core: recurring exchange kline download into a local bar dataset.
//!
//! This crate contains:
//! - Domain types (bars, symbols, venues, resolutions, time windows)
//! - Bar aggregation from minute to hour and daily buckets
//! - The Binance data fetcher with retry and circuit breaker
//! - The Parquet bar dataset and the symbol-properties database
//! - The download cycle, its non-overlapping scheduler and interval trigger
//! - Job configuration (TOML file plus overrides)

pub mod config;
pub mod data;
pub mod domain;
pub mod job;
