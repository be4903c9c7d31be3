//! Binance / Binance.US REST adapter.
//!
//! Fetches klines from `/api/v3/klines` and symbol metadata from
//! `/api/v3/exchangeInfo`. Handles rate limiting, retries with exponential
//! backoff, response parsing, and the circuit breaker. Both venues share the
//! same API shape and differ only in base URL and market name.

use super::circuit_breaker::CircuitBreaker;
use super::exchange_info::{ExchangeInfoSource, SymbolProperties};
use super::provider::{DataError, DataFetcher};
use crate::domain::{normalize_ticker, Bar, Resolution, Symbol, Venue};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Maximum klines per request accepted by the venue.
const KLINE_LIMIT: usize = 1000;

/// `/api/v3/exchangeInfo` response (fields we use).
#[derive(Debug, Deserialize)]
struct ExchangeInfo {
    symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SymbolInfo {
    symbol: String,
    status: String,
    base_asset: String,
    quote_asset: String,
    #[serde(default)]
    filters: Vec<SymbolFilter>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "filterType")]
enum SymbolFilter {
    #[serde(rename = "PRICE_FILTER", rename_all = "camelCase")]
    Price { tick_size: String },
    #[serde(rename = "LOT_SIZE", rename_all = "camelCase")]
    LotSize { step_size: String },
    #[serde(rename = "MIN_NOTIONAL", rename_all = "camelCase")]
    MinNotional { min_notional: String },
    #[serde(rename = "NOTIONAL", rename_all = "camelCase")]
    Notional { min_notional: String },
    #[serde(other)]
    Other,
}

/// Binance REST client for one venue.
pub struct BinanceClient {
    venue: Venue,
    base_url: String,
    client: reqwest::blocking::Client,
    circuit_breaker: Arc<CircuitBreaker>,
    max_retries: u32,
    base_delay: Duration,
}

impl BinanceClient {
    pub fn new(venue: Venue, circuit_breaker: Arc<CircuitBreaker>) -> Result<Self, DataError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("klinesync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| DataError::Other(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            venue,
            base_url: venue.base_url().to_string(),
            client,
            circuit_breaker,
            max_retries: 3,
            base_delay: Duration::from_millis(500),
        })
    }

    /// GET a JSON document with retry and circuit breaker logic.
    ///
    /// `subject` names the symbol a 400 response is blamed on.
    fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
        subject: &str,
    ) -> Result<T, DataError> {
        if !self.circuit_breaker.is_allowed() {
            tracing::warn!(
                path,
                cooldown = ?self.circuit_breaker.remaining_cooldown(),
                "circuit breaker open, request refused"
            );
            return Err(DataError::CircuitBreakerTripped);
        }

        let url = format!("{}{path}", self.base_url);
        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = self.base_delay * 2u32.pow(attempt - 1);
                tracing::debug!(%url, attempt, ?delay, "retrying venue request");
                std::thread::sleep(delay);
            }

            if !self.circuit_breaker.is_allowed() {
                return Err(DataError::CircuitBreakerTripped);
            }

            let resp = match self.client.get(&url).query(query).send() {
                Ok(resp) => resp,
                Err(e) if e.is_connect() || e.is_timeout() => {
                    last_error = Some(DataError::NetworkUnreachable(e.to_string()));
                    continue;
                }
                Err(e) => return Err(DataError::NetworkUnreachable(e.to_string())),
            };

            let retry_after = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            match classify_status(
                resp.status(),
                retry_after.as_deref(),
                subject,
                &self.circuit_breaker,
            ) {
                StatusAction::Accept => {}
                StatusAction::Retry(e) => {
                    tracing::debug!(%url, error = %e, "retryable venue response");
                    last_error = Some(e);
                    continue;
                }
                StatusAction::Fail(e) => return Err(e),
            }

            let body = resp.json::<T>().map_err(|e| {
                DataError::ResponseFormatChanged(format!("failed to parse {path} response: {e}"))
            })?;
            self.circuit_breaker.record_success();
            return Ok(body);
        }

        Err(last_error.unwrap_or_else(|| DataError::Other("max retries exceeded".into())))
    }

    fn exchange_info(&self, symbol: Option<&str>) -> Result<ExchangeInfo, DataError> {
        let query: Vec<(&str, String)> = symbol
            .map(|s| vec![("symbol", s.to_string())])
            .unwrap_or_default();
        self.get_json("/api/v3/exchangeInfo", &query, symbol.unwrap_or(""))
    }
}

/// How `get_json` treats a response status.
#[derive(Debug)]
enum StatusAction {
    Accept,
    Retry(DataError),
    Fail(DataError),
}

/// Map a response status to an action, updating the breaker on the way.
///
/// 418 is the venue's auto-ban after ignoring 429s; it and 403 trip the breaker.
fn classify_status(
    status: reqwest::StatusCode,
    retry_after: Option<&str>,
    subject: &str,
    breaker: &CircuitBreaker,
) -> StatusAction {
    use reqwest::StatusCode;

    if status == StatusCode::IM_A_TEAPOT || status == StatusCode::FORBIDDEN {
        breaker.trip();
        return StatusAction::Fail(DataError::CircuitBreakerTripped);
    }
    if status == StatusCode::TOO_MANY_REQUESTS {
        breaker.record_failure();
        let retry_after_secs = retry_after
            .and_then(|v| v.trim().parse::<u64>().ok())
            .unwrap_or(60);
        return StatusAction::Retry(DataError::RateLimited { retry_after_secs });
    }
    if status == StatusCode::BAD_REQUEST {
        return StatusAction::Fail(DataError::SymbolNotFound {
            symbol: subject.to_string(),
        });
    }
    if !status.is_success() {
        breaker.record_failure();
        return StatusAction::Retry(DataError::Other(format!("HTTP {status}")));
    }
    StatusAction::Accept
}

/// Walk `[from_ms, to_ms)` page by page.
///
/// `page(cursor)` returns up to `limit` raw klines opening at or after
/// `cursor`. Paging stops on a short page, an empty page, a cursor past
/// `to_ms`, or a page that does not move the cursor forward.
fn collect_pages<F>(
    ticker: &str,
    from_ms: i64,
    to_ms: i64,
    step_ms: i64,
    limit: usize,
    mut page: F,
) -> Result<Vec<Bar>, DataError>
where
    F: FnMut(i64) -> Result<Vec<Vec<Value>>, DataError>,
{
    let mut cursor = from_ms;
    let mut bars = Vec::new();

    while cursor < to_ms {
        let rows = page(cursor)?;
        let (parsed, last_open) = parse_kline_page(ticker, &rows, cursor, to_ms)?;
        bars.extend(parsed);

        let Some(last_open) = last_open else { break };
        let next = last_open + step_ms;
        if rows.len() < limit || next <= cursor {
            break;
        }
        cursor = next;
    }
    Ok(bars)
}

fn kline_number(row: &[Value], idx: usize, field: &str) -> Result<f64, DataError> {
    row.get(idx)
        .and_then(|v| match v {
            Value::String(s) => s.parse::<f64>().ok(),
            Value::Number(n) => n.as_f64(),
            _ => None,
        })
        .ok_or_else(|| DataError::ResponseFormatChanged(format!("kline {field} missing or not numeric")))
}

/// Parse one kline row: `[openTime, open, high, low, close, volume, closeTime, ...]`.
fn parse_kline(ticker: &str, row: &[Value]) -> Result<Bar, DataError> {
    let open_ms = row
        .first()
        .and_then(Value::as_i64)
        .ok_or_else(|| DataError::ResponseFormatChanged("kline open time missing".into()))?;
    let open_time = DateTime::<Utc>::from_timestamp_millis(open_ms).ok_or_else(|| {
        DataError::ResponseFormatChanged(format!("invalid kline open time: {open_ms}"))
    })?;

    Ok(Bar {
        symbol: ticker.to_string(),
        open_time,
        open: kline_number(row, 1, "open")?,
        high: kline_number(row, 2, "high")?,
        low: kline_number(row, 3, "low")?,
        close: kline_number(row, 4, "close")?,
        volume: kline_number(row, 5, "volume")?,
    })
}

/// Parse a page of klines, keeping rows with `from_ms <= open_time < to_ms`.
///
/// Returns the parsed bars and the open time of the last row seen.
fn parse_kline_page(
    ticker: &str,
    rows: &[Vec<Value>],
    from_ms: i64,
    to_ms: i64,
) -> Result<(Vec<Bar>, Option<i64>), DataError> {
    let mut bars = Vec::with_capacity(rows.len());
    let mut last_open = None;
    for row in rows {
        let bar = parse_kline(ticker, row)?;
        let ms = bar.open_time_ms();
        last_open = Some(ms);
        if ms >= from_ms && ms < to_ms {
            bars.push(bar);
        }
    }
    Ok((bars, last_open))
}

fn parse_decimal(raw: &str) -> Option<f64> {
    raw.parse::<f64>().ok()
}

/// Convert venue symbol metadata into a symbol-properties row.
///
/// Symbols that are not `TRADING` or lack a price or lot filter are skipped.
fn to_properties(market: &str, info: SymbolInfo) -> Option<SymbolProperties> {
    if info.status != "TRADING" {
        return None;
    }

    let mut tick_size = None;
    let mut lot_size = None;
    let mut min_notional = None;
    for filter in &info.filters {
        match filter {
            SymbolFilter::Price { tick_size: t } => tick_size = parse_decimal(t),
            SymbolFilter::LotSize { step_size } => lot_size = parse_decimal(step_size),
            SymbolFilter::MinNotional { min_notional: m } | SymbolFilter::Notional { min_notional: m } => {
                min_notional = min_notional.or_else(|| parse_decimal(m))
            }
            SymbolFilter::Other => {}
        }
    }

    let pair = format!("{}{}", info.base_asset, info.quote_asset);
    Some(SymbolProperties {
        market: market.to_string(),
        symbol: pair.to_ascii_lowercase(),
        security_type: "crypto".to_string(),
        description: pair,
        quote_currency: info.quote_asset,
        contract_multiplier: 1.0,
        minimum_price_variation: tick_size?,
        lot_size: lot_size?,
        market_ticker: info.symbol,
        minimum_order_size: min_notional,
    })
}

impl DataFetcher for BinanceClient {
    fn name(&self) -> &str {
        match self.venue {
            Venue::Binance => "binance",
            Venue::BinanceUs => "binance_us",
        }
    }

    fn resolve_symbol(&self, ticker: &str) -> Result<Symbol, DataError> {
        let norm = normalize_ticker(ticker).ok_or_else(|| DataError::SymbolNotFound {
            symbol: ticker.to_string(),
        })?;

        let info = self.exchange_info(Some(&norm))?;
        if info.symbols.iter().any(|s| s.symbol == norm) {
            Ok(Symbol::new(norm, self.venue))
        } else {
            Err(DataError::SymbolNotFound { symbol: norm })
        }
    }

    fn fetch(
        &self,
        symbol: &Symbol,
        resolution: Resolution,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Bar>, DataError> {
        let bars = collect_pages(
            &symbol.ticker,
            from.timestamp_millis(),
            to.timestamp_millis(),
            resolution.duration().num_milliseconds(),
            KLINE_LIMIT,
            |cursor| {
                let query = [
                    ("symbol", symbol.ticker.clone()),
                    ("interval", resolution.interval_code().to_string()),
                    ("startTime", cursor.to_string()),
                    ("endTime", (to.timestamp_millis() - 1).to_string()),
                    ("limit", KLINE_LIMIT.to_string()),
                ];
                self.get_json("/api/v3/klines", &query, &symbol.ticker)
            },
        )?;

        tracing::debug!(
            symbol = %symbol,
            resolution = %resolution,
            bars = bars.len(),
            "fetched klines"
        );
        Ok(bars)
    }

    fn is_available(&self) -> bool {
        self.circuit_breaker.is_allowed()
    }
}

impl ExchangeInfoSource for BinanceClient {
    fn market(&self) -> &str {
        self.venue.market()
    }

    fn symbol_properties(&self) -> Result<Vec<SymbolProperties>, DataError> {
        let info = self.exchange_info(None)?;
        let market = self.venue.market();
        Ok(info
            .symbols
            .into_iter()
            .filter_map(|s| to_properties(market, s))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const KLINES: &str = r#"[
        [1714521600000, "60000.01", "60100.00", "59950.50", "60050.00", "12.345", 1714521659999, "741000.0", 812, "6.1", "366000.0", "0"],
        [1714521660000, "60050.00", "60070.00", "60010.00", "60020.00", "3.5", 1714521719999, "210000.0", 301, "1.2", "72000.0", "0"]
    ]"#;

    const EXCHANGE_INFO: &str = r#"{
        "timezone": "UTC",
        "symbols": [
            {
                "symbol": "BTCUSDT",
                "status": "TRADING",
                "baseAsset": "BTC",
                "quoteAsset": "USDT",
                "filters": [
                    {"filterType": "PRICE_FILTER", "minPrice": "0.01", "maxPrice": "1000000.00", "tickSize": "0.01"},
                    {"filterType": "LOT_SIZE", "minQty": "0.00001", "maxQty": "9000.0", "stepSize": "0.00001"},
                    {"filterType": "ICEBERG_PARTS", "limit": 10},
                    {"filterType": "NOTIONAL", "minNotional": "5.00", "applyMinToMarket": true}
                ]
            },
            {
                "symbol": "LUNAUSDT",
                "status": "BREAK",
                "baseAsset": "LUNA",
                "quoteAsset": "USDT",
                "filters": []
            }
        ]
    }"#;

    #[test]
    fn parses_kline_rows() {
        let rows: Vec<Vec<Value>> = serde_json::from_str(KLINES).unwrap();
        let (bars, last) = parse_kline_page("BTCUSDT", &rows, 0, i64::MAX).unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(last, Some(1_714_521_660_000));
        assert_eq!(
            bars[0].open_time,
            Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap()
        );
        assert_eq!(bars[0].open, 60000.01);
        assert_eq!(bars[0].low, 59950.5);
        assert_eq!(bars[1].volume, 3.5);
    }

    #[test]
    fn page_filter_is_half_open() {
        let rows: Vec<Vec<Value>> = serde_json::from_str(KLINES).unwrap();
        let (bars, _) =
            parse_kline_page("BTCUSDT", &rows, 1_714_521_600_000, 1_714_521_660_000).unwrap();
        assert_eq!(bars.len(), 1);
    }

    #[test]
    fn malformed_kline_is_format_error() {
        let rows: Vec<Vec<Value>> = serde_json::from_str(r#"[[1714521600000, "abc"]]"#).unwrap();
        let err = parse_kline_page("BTCUSDT", &rows, 0, i64::MAX).unwrap_err();
        assert!(matches!(err, DataError::ResponseFormatChanged(_)));
    }

    #[test]
    fn exchange_info_to_properties() {
        let info: ExchangeInfo = serde_json::from_str(EXCHANGE_INFO).unwrap();
        let props: Vec<SymbolProperties> = info
            .symbols
            .into_iter()
            .filter_map(|s| to_properties("binance", s))
            .collect();

        assert_eq!(props.len(), 1, "non-trading symbols are skipped");
        let btc = &props[0];
        assert_eq!(btc.symbol, "btcusdt");
        assert_eq!(btc.market_ticker, "BTCUSDT");
        assert_eq!(btc.quote_currency, "USDT");
        assert_eq!(btc.minimum_price_variation, 0.01);
        assert_eq!(btc.lot_size, 0.00001);
        assert_eq!(btc.minimum_order_size, Some(5.0));
    }

    fn kline_row(open_ms: i64) -> Vec<Value> {
        vec![
            Value::from(open_ms),
            Value::from("100.0"),
            Value::from("101.0"),
            Value::from("99.0"),
            Value::from("100.5"),
            Value::from("2.0"),
        ]
    }

    /// A venue holding one kline per minute in `[0, total)` minutes.
    fn minute_venue(total: i64, limit: usize) -> impl FnMut(i64) -> Result<Vec<Vec<Value>>, DataError> {
        move |cursor| {
            Ok((0..total)
                .map(|i| i * 60_000)
                .filter(|ms| *ms >= cursor)
                .take(limit)
                .map(kline_row)
                .collect())
        }
    }

    #[test]
    fn pages_advance_cursor_until_short_page() {
        let mut cursors = Vec::new();
        let mut venue = minute_venue(8, 3);
        let bars = collect_pages("BTCUSDT", 0, 8 * 60_000, 60_000, 3, |cursor| {
            cursors.push(cursor);
            venue(cursor)
        })
        .unwrap();

        assert_eq!(cursors, vec![0, 180_000, 360_000]);
        assert_eq!(bars.len(), 8);
        for pair in bars.windows(2) {
            assert_eq!(pair[1].open_time_ms() - pair[0].open_time_ms(), 60_000);
        }
    }

    #[test]
    fn paging_stops_at_window_end() {
        let mut calls = 0;
        let mut venue = minute_venue(100, 3);
        let bars = collect_pages("BTCUSDT", 0, 6 * 60_000, 60_000, 3, |cursor| {
            calls += 1;
            venue(cursor)
        })
        .unwrap();

        // two full pages reach the end; no third request
        assert_eq!(calls, 2);
        assert_eq!(bars.len(), 6);
        assert_eq!(bars.last().unwrap().open_time_ms(), 5 * 60_000);
    }

    #[test]
    fn paging_stops_on_empty_or_stuck_page() {
        let bars = collect_pages("BTCUSDT", 0, 60 * 60_000, 60_000, 3, |_| Ok(Vec::new())).unwrap();
        assert!(bars.is_empty());

        // a venue that keeps answering with rows before the cursor
        let mut calls = 0;
        let bars = collect_pages("BTCUSDT", 600_000, 60 * 60_000, 60_000, 3, |_| {
            calls += 1;
            Ok(vec![kline_row(0), kline_row(60_000), kline_row(120_000)])
        })
        .unwrap();
        assert_eq!(calls, 1);
        assert!(bars.is_empty());
    }

    #[test]
    fn page_error_aborts_fetch() {
        let mut calls = 0;
        let mut venue = minute_venue(10, 3);
        let err = collect_pages("BTCUSDT", 0, 10 * 60_000, 60_000, 3, |cursor| {
            calls += 1;
            if calls == 2 {
                return Err(DataError::RateLimited { retry_after_secs: 5 });
            }
            venue(cursor)
        })
        .unwrap_err();
        assert!(matches!(err, DataError::RateLimited { retry_after_secs: 5 }));
    }

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(Duration::from_secs(60), 2)
    }

    #[test]
    fn ban_statuses_trip_the_breaker() {
        for status in [reqwest::StatusCode::IM_A_TEAPOT, reqwest::StatusCode::FORBIDDEN] {
            let cb = breaker();
            let action = classify_status(status, None, "BTCUSDT", &cb);
            assert!(matches!(action, StatusAction::Fail(DataError::CircuitBreakerTripped)));
            assert!(!cb.is_allowed());
            assert!(cb.remaining_cooldown() > Duration::ZERO);
        }
    }

    #[test]
    fn rate_limit_is_retried_with_retry_after() {
        let cb = breaker();
        let action = classify_status(reqwest::StatusCode::TOO_MANY_REQUESTS, Some("7"), "BTCUSDT", &cb);
        assert!(matches!(
            action,
            StatusAction::Retry(DataError::RateLimited { retry_after_secs: 7 })
        ));
        assert!(cb.is_allowed());

        // missing header falls back to a minute; second 429 opens the breaker
        let action = classify_status(reqwest::StatusCode::TOO_MANY_REQUESTS, None, "BTCUSDT", &cb);
        assert!(matches!(
            action,
            StatusAction::Retry(DataError::RateLimited { retry_after_secs: 60 })
        ));
        assert!(!cb.is_allowed());
    }

    #[test]
    fn bad_request_names_the_symbol() {
        let cb = breaker();
        match classify_status(reqwest::StatusCode::BAD_REQUEST, None, "NOPEUSDT", &cb) {
            StatusAction::Fail(DataError::SymbolNotFound { symbol }) => assert_eq!(symbol, "NOPEUSDT"),
            other => panic!("unexpected action: {other:?}"),
        }
        assert!(cb.is_allowed());
    }

    #[test]
    fn server_errors_retry_and_success_is_accepted() {
        let cb = breaker();
        assert!(matches!(
            classify_status(reqwest::StatusCode::BAD_GATEWAY, None, "BTCUSDT", &cb),
            StatusAction::Retry(DataError::Other(_))
        ));
        assert!(matches!(
            classify_status(reqwest::StatusCode::OK, None, "BTCUSDT", &cb),
            StatusAction::Accept
        ));
    }
}
