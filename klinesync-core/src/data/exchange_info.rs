//! Symbol-properties database update.
//!
//! The database is a CSV file shared by every market. An update replaces the
//! rows of one market with what the venue currently lists and keeps every
//! other market's rows untouched.

use super::provider::DataError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// One row of the symbol-properties database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolProperties {
    pub market: String,
    pub symbol: String,
    #[serde(rename = "type")]
    pub security_type: String,
    pub description: String,
    pub quote_currency: String,
    pub contract_multiplier: f64,
    pub minimum_price_variation: f64,
    pub lot_size: f64,
    pub market_ticker: String,
    pub minimum_order_size: Option<f64>,
}

/// A venue that can list its tradable symbols.
pub trait ExchangeInfoSource {
    /// Market name the rows belong to.
    fn market(&self) -> &str;

    /// Current properties of every tradable symbol.
    fn symbol_properties(&self) -> Result<Vec<SymbolProperties>, DataError>;
}

/// Outcome of an update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateSummary {
    pub market: String,
    pub written: usize,
    pub removed: usize,
    pub kept_other_markets: usize,
}

/// Read every row of a symbol-properties file. A missing file is empty.
pub fn read_symbol_properties(path: &Path) -> Result<Vec<SymbolProperties>, DataError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let mut reader = csv::ReaderBuilder::new()
        .comment(Some(b'#'))
        .from_path(path)
        .map_err(|e| DataError::DatasetError(format!("open {}: {e}", path.display())))?;
    reader
        .deserialize()
        .collect::<Result<Vec<SymbolProperties>, _>>()
        .map_err(|e| DataError::DatasetError(format!("parse {}: {e}", path.display())))
}

/// Write rows atomically (temp file, then rename).
pub fn write_symbol_properties(path: &Path, rows: &[SymbolProperties]) -> Result<(), DataError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|e| DataError::DatasetError(format!("failed to create dir: {e}")))?;
    }

    let tmp_path = path.with_extension("csv.tmp");
    {
        let mut writer = csv::Writer::from_path(&tmp_path)
            .map_err(|e| DataError::DatasetError(format!("create {}: {e}", tmp_path.display())))?;
        for row in rows {
            writer
                .serialize(row)
                .map_err(|e| DataError::DatasetError(format!("write row: {e}")))?;
        }
        writer
            .flush()
            .map_err(|e| DataError::DatasetError(format!("flush: {e}")))?;
    }

    fs::rename(&tmp_path, path).map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        DataError::DatasetError(format!("atomic rename failed: {e}"))
    })
}

/// Fetch the source's symbols and merge them into the database at `path`.
pub fn update_symbol_properties(
    source: &dyn ExchangeInfoSource,
    path: &Path,
) -> Result<UpdateSummary, DataError> {
    let market = source.market().to_string();
    let fresh = source.symbol_properties()?;
    let existing = read_symbol_properties(path)?;

    let (ours, mut merged): (Vec<_>, Vec<_>) =
        existing.into_iter().partition(|row| row.market == market);
    let kept_other_markets = merged.len();

    let written = fresh.len();
    let removed = ours
        .iter()
        .filter(|old| !fresh.iter().any(|new| new.symbol == old.symbol))
        .count();

    merged.extend(fresh);
    merged.sort_by(|a, b| (&a.market, &a.symbol).cmp(&(&b.market, &b.symbol)));
    write_symbol_properties(path, &merged)?;

    tracing::info!(
        market = %market,
        written,
        removed,
        path = %path.display(),
        "symbol properties updated"
    );

    Ok(UpdateSummary {
        market,
        written,
        removed,
        kept_other_markets,
    })
}
