//! Parquet dataset with Hive-style partitioning.
//!
//! Layout: `{root}/{market}/{resolution}/symbol={TICKER}/{partition}.parquet`
//! where the partition is the UTC day (`YYYYMMDD`) for minute bars and the
//! UTC year (`YYYY`) for hour and daily bars.
//!
//! Features:
//! - Merge-on-write keyed by open time (incoming bars win), so re-writing an
//!   overlapping window is idempotent
//! - Atomic writes (write to .tmp, rename into place)
//! - Quarantine for corrupt partitions ({filename}.quarantined)
//! - Metadata sidecar per series (covered range, hash of last write)

use super::provider::DataError;
use crate::domain::{Bar, Resolution, Symbol};
use chrono::{DateTime, Utc};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Persists bars for one `(resolution, symbol)` series.
///
/// Implementations must be idempotent: writing the same or an overlapping
/// window again must not corrupt or duplicate earlier data. Empty input is a
/// no-op.
pub trait DatasetWriter: Send + Sync {
    fn write(&self, resolution: Resolution, symbol: &Symbol, bars: &[Bar]) -> Result<(), DataError>;
}

/// Metadata sidecar for a stored series.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeriesMeta {
    pub symbol: String,
    pub market: String,
    pub resolution: Resolution,
    pub first_open_time: DateTime<Utc>,
    pub last_open_time: DateTime<Utc>,
    pub last_write_bars: usize,
    pub data_hash: String,
    pub written_at: DateTime<Utc>,
}

/// The Parquet dataset.
pub struct ParquetDataset {
    root: PathBuf,
}

impl ParquetDataset {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory of the dataset.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `{root}/{market}/{resolution}/symbol={TICKER}/`
    fn series_dir(&self, resolution: Resolution, symbol: &Symbol) -> PathBuf {
        self.root
            .join(symbol.market())
            .join(resolution.as_str())
            .join(format!("symbol={}", symbol.ticker))
    }

    fn partition_path(&self, resolution: Resolution, symbol: &Symbol, key: &str) -> PathBuf {
        self.series_dir(resolution, symbol).join(format!("{key}.parquet"))
    }

    fn meta_path(&self, resolution: Resolution, symbol: &Symbol) -> PathBuf {
        self.series_dir(resolution, symbol).join("meta.json")
    }

    /// Load all stored bars of a series, ascending by open time.
    ///
    /// A series that was never written loads as empty.
    pub fn load(&self, resolution: Resolution, symbol: &Symbol) -> Result<Vec<Bar>, DataError> {
        let dir = self.series_dir(resolution, symbol);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let entries =
            fs::read_dir(&dir).map_err(|e| DataError::DatasetError(format!("read dir: {e}")))?;

        let mut all_bars = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| DataError::DatasetError(format!("dir entry: {e}")))?;
            let path = entry.path();

            // Skip meta.json, .tmp and .quarantined files
            if path.extension().and_then(|e| e.to_str()) != Some("parquet") {
                continue;
            }

            match load_partition(&path, &symbol.ticker) {
                Ok(bars) => all_bars.extend(bars),
                Err(e) => quarantine(&path, &e),
            }
        }

        all_bars.sort_by_key(|b| b.open_time);
        Ok(all_bars)
    }

    /// Sidecar metadata of a series, if it was ever written.
    pub fn get_meta(&self, resolution: Resolution, symbol: &Symbol) -> Option<SeriesMeta> {
        let content = fs::read_to_string(self.meta_path(resolution, symbol)).ok()?;
        serde_json::from_str(&content).ok()
    }

    fn write_meta(
        &self,
        resolution: Resolution,
        symbol: &Symbol,
        bars: &[Bar],
    ) -> Result<(), DataError> {
        let (Some(first), Some(last)) = (bars.first(), bars.last()) else {
            return Ok(());
        };
        let previous = self.get_meta(resolution, symbol);

        let meta = SeriesMeta {
            symbol: symbol.ticker.clone(),
            market: symbol.market().to_string(),
            resolution,
            first_open_time: previous
                .as_ref()
                .map_or(first.open_time, |m| m.first_open_time.min(first.open_time)),
            last_open_time: previous
                .as_ref()
                .map_or(last.open_time, |m| m.last_open_time.max(last.open_time)),
            last_write_bars: bars.len(),
            data_hash: blake3::hash(
                &serde_json::to_vec(bars)
                    .map_err(|e| DataError::DatasetError(format!("hash serialization: {e}")))?,
            )
            .to_hex()
            .to_string(),
            written_at: Utc::now(),
        };
        let meta_json = serde_json::to_string_pretty(&meta)
            .map_err(|e| DataError::DatasetError(format!("meta serialization: {e}")))?;
        fs::write(self.meta_path(resolution, symbol), meta_json)
            .map_err(|e| DataError::DatasetError(format!("meta write: {e}")))
    }
}

impl DatasetWriter for ParquetDataset {
    fn write(&self, resolution: Resolution, symbol: &Symbol, bars: &[Bar]) -> Result<(), DataError> {
        if bars.is_empty() {
            tracing::debug!(symbol = %symbol, resolution = %resolution, "nothing to write");
            return Ok(());
        }

        let dir = self.series_dir(resolution, symbol);
        fs::create_dir_all(&dir)
            .map_err(|e| DataError::DatasetError(format!("failed to create dir: {e}")))?;

        let mut by_partition: BTreeMap<String, Vec<&Bar>> = BTreeMap::new();
        for bar in bars {
            by_partition
                .entry(partition_key(resolution, bar.open_time))
                .or_default()
                .push(bar);
        }

        for (key, incoming) in &by_partition {
            let path = self.partition_path(resolution, symbol, key);

            let existing = if path.exists() {
                load_partition(&path, &symbol.ticker).unwrap_or_else(|e| {
                    quarantine(&path, &e);
                    Vec::new()
                })
            } else {
                Vec::new()
            };

            let mut merged: BTreeMap<i64, &Bar> = BTreeMap::new();
            for bar in &existing {
                merged.insert(bar.open_time_ms(), bar);
            }
            for bar in incoming {
                merged.insert(bar.open_time_ms(), *bar);
            }
            let rows: Vec<&Bar> = merged.into_values().collect();

            let mut df = bars_to_dataframe(&rows)?;
            let tmp_path = path.with_extension("parquet.tmp");
            write_parquet(&mut df, &tmp_path)?;

            fs::rename(&tmp_path, &path).map_err(|e| {
                let _ = fs::remove_file(&tmp_path);
                DataError::DatasetError(format!("atomic rename failed: {e}"))
            })?;
        }

        self.write_meta(resolution, symbol, bars)?;

        tracing::debug!(
            symbol = %symbol,
            resolution = %resolution,
            bars = bars.len(),
            partitions = by_partition.len(),
            "wrote bars"
        );
        Ok(())
    }
}

/// Partition key: UTC day for minute bars, UTC year otherwise.
fn partition_key(resolution: Resolution, open_time: DateTime<Utc>) -> String {
    match resolution {
        Resolution::Minute => open_time.format("%Y%m%d").to_string(),
        Resolution::Hour | Resolution::Daily => open_time.format("%Y").to_string(),
    }
}

fn quarantine(path: &Path, err: &DataError) {
    let target = path.with_extension("parquet.quarantined");
    tracing::warn!(path = %path.display(), error = %err, "quarantining corrupt partition");
    let _ = fs::rename(path, target);
}

// ── Parquet I/O helpers ─────────────────────────────────────────────

const COLUMNS: [&str; 6] = ["open_time", "open", "high", "low", "close", "volume"];

/// Convert bars to a Polars DataFrame.
fn bars_to_dataframe(bars: &[&Bar]) -> Result<DataFrame, DataError> {
    let times: Vec<i64> = bars.iter().map(|b| b.open_time_ms()).collect();
    let opens: Vec<f64> = bars.iter().map(|b| b.open).collect();
    let highs: Vec<f64> = bars.iter().map(|b| b.high).collect();
    let lows: Vec<f64> = bars.iter().map(|b| b.low).collect();
    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let volumes: Vec<f64> = bars.iter().map(|b| b.volume).collect();

    DataFrame::new(vec![
        Column::new("open_time".into(), times)
            .cast(&DataType::Datetime(TimeUnit::Milliseconds, None))
            .map_err(|e| DataError::ParquetError(format!("open_time cast: {e}")))?,
        Column::new("open".into(), opens),
        Column::new("high".into(), highs),
        Column::new("low".into(), lows),
        Column::new("close".into(), closes),
        Column::new("volume".into(), volumes),
    ])
    .map_err(|e| DataError::ParquetError(format!("dataframe creation: {e}")))
}

fn write_parquet(df: &mut DataFrame, path: &Path) -> Result<(), DataError> {
    let file =
        fs::File::create(path).map_err(|e| DataError::ParquetError(format!("create file: {e}")))?;
    ParquetWriter::new(file)
        .finish(df)
        .map_err(|e| DataError::ParquetError(format!("write parquet: {e}")))?;
    Ok(())
}

/// Load one partition and validate its columns.
fn load_partition(path: &Path, ticker: &str) -> Result<Vec<Bar>, DataError> {
    let file = fs::File::open(path).map_err(|e| DataError::ParquetError(format!("open: {e}")))?;
    let df = ParquetReader::new(file)
        .finish()
        .map_err(|e| DataError::ParquetError(format!("read: {e}")))?;

    for col_name in &COLUMNS {
        if df.column(col_name).is_err() {
            return Err(DataError::DatasetError(format!(
                "missing column '{col_name}'"
            )));
        }
    }

    dataframe_to_bars(&df, ticker)
}

fn dataframe_to_bars(df: &DataFrame, ticker: &str) -> Result<Vec<Bar>, DataError> {
    let map_err = |e: PolarsError| DataError::ParquetError(format!("column read: {e}"));

    let times = df
        .column("open_time")
        .map_err(map_err)?
        .cast(&DataType::Int64)
        .map_err(map_err)?;
    let time_ca = times.i64().map_err(map_err)?;
    let open_ca = df.column("open").map_err(map_err)?.f64().map_err(map_err)?;
    let high_ca = df.column("high").map_err(map_err)?.f64().map_err(map_err)?;
    let low_ca = df.column("low").map_err(map_err)?.f64().map_err(map_err)?;
    let close_ca = df.column("close").map_err(map_err)?.f64().map_err(map_err)?;
    let vol_ca = df.column("volume").map_err(map_err)?.f64().map_err(map_err)?;

    let n = df.height();
    let mut bars = Vec::with_capacity(n);
    for i in 0..n {
        let ms = time_ca
            .get(i)
            .ok_or_else(|| DataError::ParquetError(format!("null open_time at row {i}")))?;
        let open_time = DateTime::<Utc>::from_timestamp_millis(ms)
            .ok_or_else(|| DataError::ParquetError(format!("invalid open_time at row {i}")))?;

        bars.push(Bar {
            symbol: ticker.to_string(),
            open_time,
            open: open_ca.get(i).unwrap_or(f64::NAN),
            high: high_ca.get(i).unwrap_or(f64::NAN),
            low: low_ca.get(i).unwrap_or(f64::NAN),
            close: close_ca.get(i).unwrap_or(f64::NAN),
            volume: vol_ca.get(i).unwrap_or(0.0),
        });
    }

    Ok(bars)
}
