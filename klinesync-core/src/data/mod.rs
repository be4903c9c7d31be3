//! Data acquisition, aggregation and persistence

pub mod aggregate;
pub mod binance;
pub mod circuit_breaker;
pub mod dataset;
pub mod exchange_info;
pub mod provider;

pub use aggregate::aggregate;
pub use binance::BinanceClient;
pub use circuit_breaker::CircuitBreaker;
pub use dataset::{DatasetWriter, ParquetDataset, SeriesMeta};
pub use exchange_info::{update_symbol_properties, ExchangeInfoSource, SymbolProperties, UpdateSummary};
pub use provider::{DataError, DataFetcher};
