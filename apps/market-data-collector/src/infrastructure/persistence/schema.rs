//! Per-kind SQLite tables and the statements that touch them.
//!
//! | Kind      | Table       | Natural key                         |
//! |-----------|-------------|-------------------------------------|
//! | ticker    | `ticker`    | `(timestamp, symbol)`               |
//! | order book| `orderbook` | `(timestamp, symbol)`               |
//! | trade     | `trades`    | `(timestamp, symbol, payload_hash)` |
//! | candle    | `ohlcv`     | `(timestamp, symbol, timeframe)`    |
//! | balance   | `balance`   | `day` (UTC)                         |
//! | order     | `orders`    | venue id                            |
//! | fill      | `mytrades`  | venue id                            |
//! | position  | `positions` | `(timestamp, symbol)`               |
//!
//! Every write is `INSERT OR REPLACE`, so a redelivered record overwrites
//! its earlier copy instead of duplicating it.

use chrono::DateTime;
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, params, params_from_iter};
use serde_json::Value;
use sha2::{Digest, Sha256};

use super::StoreError;
use crate::domain::market::DataKind;
use crate::domain::record::Record;

/// Table name for a kind.
#[must_use]
pub const fn table_name(kind: DataKind) -> &'static str {
    match kind {
        DataKind::Ticker => "ticker",
        DataKind::OrderBook => "orderbook",
        DataKind::Trade => "trades",
        DataKind::Candle => "ohlcv",
        DataKind::Balance => "balance",
        DataKind::Order => "orders",
        DataKind::Fill => "mytrades",
        DataKind::Position => "positions",
    }
}

fn create_sql(kind: DataKind) -> &'static str {
    match kind {
        DataKind::Ticker => {
            "CREATE TABLE IF NOT EXISTS ticker (
                 id           INTEGER PRIMARY KEY AUTOINCREMENT,
                 timestamp    INTEGER NOT NULL,
                 symbol       TEXT    NOT NULL,
                 collected_at INTEGER NOT NULL,
                 data         TEXT    NOT NULL,
                 UNIQUE(timestamp, symbol)
             );
             CREATE INDEX IF NOT EXISTS idx_ticker_ts ON ticker(timestamp);"
        }
        DataKind::OrderBook => {
            "CREATE TABLE IF NOT EXISTS orderbook (
                 id           INTEGER PRIMARY KEY AUTOINCREMENT,
                 timestamp    INTEGER NOT NULL,
                 symbol       TEXT    NOT NULL,
                 collected_at INTEGER NOT NULL,
                 data         TEXT    NOT NULL,
                 UNIQUE(timestamp, symbol)
             );
             CREATE INDEX IF NOT EXISTS idx_orderbook_ts ON orderbook(timestamp);"
        }
        DataKind::Trade => {
            "CREATE TABLE IF NOT EXISTS trades (
                 id           INTEGER PRIMARY KEY AUTOINCREMENT,
                 timestamp    INTEGER NOT NULL,
                 symbol       TEXT    NOT NULL,
                 payload_hash TEXT    NOT NULL,
                 collected_at INTEGER NOT NULL,
                 data         TEXT    NOT NULL,
                 UNIQUE(timestamp, symbol, payload_hash)
             );
             CREATE INDEX IF NOT EXISTS idx_trades_ts ON trades(timestamp);"
        }
        DataKind::Candle => {
            "CREATE TABLE IF NOT EXISTS ohlcv (
                 id           INTEGER PRIMARY KEY AUTOINCREMENT,
                 timestamp    INTEGER NOT NULL,
                 symbol       TEXT    NOT NULL,
                 timeframe    TEXT    NOT NULL,
                 collected_at INTEGER NOT NULL,
                 data         TEXT    NOT NULL,
                 UNIQUE(timestamp, symbol, timeframe)
             );
             CREATE INDEX IF NOT EXISTS idx_ohlcv_ts ON ohlcv(timestamp);"
        }
        DataKind::Balance => {
            "CREATE TABLE IF NOT EXISTS balance (
                 id           INTEGER PRIMARY KEY AUTOINCREMENT,
                 timestamp    INTEGER NOT NULL,
                 symbol       TEXT    NOT NULL DEFAULT '',
                 day          TEXT    NOT NULL UNIQUE,
                 quote_total  REAL    NOT NULL DEFAULT 0,
                 collected_at INTEGER NOT NULL,
                 data         TEXT    NOT NULL
             );
             CREATE INDEX IF NOT EXISTS idx_balance_ts ON balance(timestamp);"
        }
        DataKind::Order => {
            "CREATE TABLE IF NOT EXISTS orders (
                 id           TEXT    PRIMARY KEY,
                 timestamp    INTEGER NOT NULL,
                 symbol       TEXT    NOT NULL,
                 status       TEXT,
                 collected_at INTEGER NOT NULL,
                 data         TEXT    NOT NULL
             );
             CREATE INDEX IF NOT EXISTS idx_orders_ts ON orders(timestamp);"
        }
        DataKind::Fill => {
            "CREATE TABLE IF NOT EXISTS mytrades (
                 id           TEXT    PRIMARY KEY,
                 timestamp    INTEGER NOT NULL,
                 symbol       TEXT    NOT NULL,
                 collected_at INTEGER NOT NULL,
                 data         TEXT    NOT NULL
             );
             CREATE INDEX IF NOT EXISTS idx_mytrades_ts ON mytrades(timestamp);"
        }
        DataKind::Position => {
            "CREATE TABLE IF NOT EXISTS positions (
                 id           INTEGER PRIMARY KEY AUTOINCREMENT,
                 timestamp    INTEGER NOT NULL,
                 symbol       TEXT    NOT NULL,
                 collected_at INTEGER NOT NULL,
                 data         TEXT    NOT NULL,
                 UNIQUE(timestamp, symbol)
             );
             CREATE INDEX IF NOT EXISTS idx_positions_ts ON positions(timestamp);"
        }
    }
}

/// Create the table (and index) for `kind` if missing.
pub fn ensure_table(conn: &Connection, kind: DataKind) -> Result<(), StoreError> {
    conn.execute_batch(create_sql(kind))?;
    Ok(())
}

/// Whether the table for `kind` exists.
pub fn table_exists(conn: &Connection, kind: DataKind) -> Result<bool, StoreError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        params![table_name(kind)],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

pub(crate) fn sha256_hex(data: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Insert or replace one record. The table must exist.
pub fn upsert(conn: &Connection, record: &Record) -> Result<(), StoreError> {
    let data = serde_json::to_string(&record.payload)?;
    let r = record;

    match r.kind {
        DataKind::Ticker | DataKind::OrderBook | DataKind::Position => {
            let sql = format!(
                "INSERT OR REPLACE INTO {} (timestamp, symbol, collected_at, data)
                 VALUES (?1, ?2, ?3, ?4)",
                table_name(r.kind)
            );
            conn.execute(&sql, params![r.timestamp, r.symbol, r.collected_at, data])?;
        }
        DataKind::Trade => {
            let hash = sha256_hex(&data);
            conn.execute(
                "INSERT OR REPLACE INTO trades (timestamp, symbol, payload_hash, collected_at, data)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![r.timestamp, r.symbol, hash, r.collected_at, data],
            )?;
        }
        DataKind::Candle => {
            let timeframe = r
                .timeframe
                .ok_or(StoreError::MissingField("timeframe"))?;
            conn.execute(
                "INSERT OR REPLACE INTO ohlcv (timestamp, symbol, timeframe, collected_at, data)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![r.timestamp, r.symbol, timeframe.as_str(), r.collected_at, data],
            )?;
        }
        DataKind::Balance => {
            let day = utc_day(r.timestamp).ok_or(StoreError::MissingField("timestamp"))?;
            conn.execute(
                "INSERT OR REPLACE INTO balance (timestamp, symbol, day, quote_total, collected_at, data)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    r.timestamp,
                    r.symbol,
                    day,
                    quote_total(&r.payload),
                    r.collected_at,
                    data
                ],
            )?;
        }
        DataKind::Order => {
            let status = r.payload.get("status").and_then(Value::as_str);
            conn.execute(
                "INSERT OR REPLACE INTO orders (id, timestamp, symbol, status, collected_at, data)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    row_id(r, &data),
                    r.timestamp,
                    r.symbol,
                    status,
                    r.collected_at,
                    data
                ],
            )?;
        }
        DataKind::Fill => {
            conn.execute(
                "INSERT OR REPLACE INTO mytrades (id, timestamp, symbol, collected_at, data)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![row_id(r, &data), r.timestamp, r.symbol, r.collected_at, data],
            )?;
        }
    }
    Ok(())
}

/// Venue id, or `<timestamp>-<hash prefix>` when the venue sent none.
fn row_id(record: &Record, data: &str) -> String {
    record.venue_id().unwrap_or_else(|| {
        let hash = sha256_hex(data);
        format!("{}-{}", record.timestamp, &hash[..16])
    })
}

fn utc_day(timestamp_ms: i64) -> Option<String> {
    DateTime::from_timestamp_millis(timestamp_ms).map(|dt| dt.date_naive().to_string())
}

/// USDT total from a balance payload (`total.USDT` or `USDT.total`).
fn quote_total(payload: &Value) -> f64 {
    payload
        .pointer("/total/USDT")
        .or_else(|| payload.pointer("/USDT/total"))
        .and_then(Value::as_f64)
        .unwrap_or(0.0)
}

/// Filters for a newest-first read.
#[derive(Debug, Clone, Default)]
pub struct ReadFilter<'a> {
    /// Symbol filter; ignored for balances and empty private symbols.
    pub symbol: &'a str,
    /// Candle timeframe.
    pub timeframe: Option<&'a str>,
    /// Inclusive lower timestamp bound.
    pub since: Option<i64>,
    /// Inclusive upper timestamp bound.
    pub until: Option<i64>,
}

fn where_clause(kind: DataKind, filter: &ReadFilter<'_>) -> (String, Vec<SqlValue>) {
    let mut clauses = Vec::new();
    let mut values = Vec::new();

    let filter_symbol = match kind {
        DataKind::Balance => false,
        k if k.is_private() => !filter.symbol.is_empty(),
        _ => true,
    };
    if filter_symbol {
        values.push(SqlValue::Text(filter.symbol.to_string()));
        clauses.push(format!("symbol = ?{}", values.len()));
    }
    if kind == DataKind::Candle
        && let Some(tf) = filter.timeframe
    {
        values.push(SqlValue::Text(tf.to_string()));
        clauses.push(format!("timeframe = ?{}", values.len()));
    }
    if let Some(since) = filter.since {
        values.push(SqlValue::Integer(since));
        clauses.push(format!("timestamp >= ?{}", values.len()));
    }
    if let Some(until) = filter.until {
        values.push(SqlValue::Integer(until));
        clauses.push(format!("timestamp <= ?{}", values.len()));
    }

    let clause = if clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", clauses.join(" AND "))
    };
    (clause, values)
}

/// Up to `limit` payloads, newest first.
pub fn select_recent(
    conn: &Connection,
    kind: DataKind,
    filter: &ReadFilter<'_>,
    limit: usize,
) -> Result<Vec<Value>, StoreError> {
    let (clause, mut values) = where_clause(kind, filter);
    values.push(SqlValue::Integer(i64::try_from(limit).unwrap_or(i64::MAX)));
    let sql = format!(
        "SELECT data FROM {}{clause} ORDER BY timestamp DESC, rowid DESC LIMIT ?{}",
        table_name(kind),
        values.len()
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(values.iter()), |row| row.get::<_, String>(0))?;

    let mut out = Vec::new();
    for row in rows {
        let text = row?;
        match serde_json::from_str(&text) {
            Ok(value) => out.push(value),
            Err(e) => tracing::warn!(table = table_name(kind), error = %e, "Skipping undecodable row"),
        }
    }
    Ok(out)
}

/// Newest timestamp matching `filter`.
pub fn select_latest_timestamp(
    conn: &Connection,
    kind: DataKind,
    filter: &ReadFilter<'_>,
) -> Result<Option<i64>, StoreError> {
    let (clause, values) = where_clause(kind, filter);
    let sql = format!("SELECT MAX(timestamp) FROM {}{clause}", table_name(kind));
    let latest = conn.query_row(&sql, params_from_iter(values.iter()), |row| {
        row.get::<_, Option<i64>>(0)
    })?;
    Ok(latest)
}

/// Delete rows older than `cutoff_ms` from every existing table.
pub fn delete_older_than(conn: &Connection, cutoff_ms: i64) -> Result<usize, StoreError> {
    let mut deleted = 0;
    for kind in DataKind::all() {
        if !table_exists(conn, *kind)? {
            continue;
        }
        let sql = format!("DELETE FROM {} WHERE timestamp < ?1", table_name(*kind));
        deleted += conn.execute(&sql, params![cutoff_ms])?;
    }
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::domain::account::AccountId;

    fn conn_with(kind: DataKind) -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        ensure_table(&conn, kind).unwrap();
        conn
    }

    fn count(conn: &Connection, table: &str) -> i64 {
        conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))
            .unwrap()
    }

    #[test]
    fn ticker_replaces_on_same_timestamp() {
        let conn = conn_with(DataKind::Ticker);
        let a = Record::market("x", "BTC/USDT", DataKind::Ticker, json!({"last": 1}), 10);
        let b = Record::market("x", "BTC/USDT", DataKind::Ticker, json!({"last": 2}), 10);
        upsert(&conn, &a).unwrap();
        upsert(&conn, &b).unwrap();

        assert_eq!(count(&conn, "ticker"), 1);
        let rows = select_recent(
            &conn,
            DataKind::Ticker,
            &ReadFilter {
                symbol: "BTC/USDT",
                ..ReadFilter::default()
            },
            10,
        )
        .unwrap();
        assert_eq!(rows, vec![json!({"last": 2})]);
    }

    #[test]
    fn distinct_trades_at_same_timestamp_are_kept() {
        let conn = conn_with(DataKind::Trade);
        let t1 = json!({"timestamp": 5, "id": "1", "price": 10.0});
        let t2 = json!({"timestamp": 5, "id": "2", "price": 10.0});
        upsert(&conn, &Record::market("x", "BTC/USDT", DataKind::Trade, t1.clone(), 9)).unwrap();
        upsert(&conn, &Record::market("x", "BTC/USDT", DataKind::Trade, t2, 9)).unwrap();
        upsert(&conn, &Record::market("x", "BTC/USDT", DataKind::Trade, t1, 9)).unwrap();

        assert_eq!(count(&conn, "trades"), 2);
    }

    #[test]
    fn candles_key_on_timeframe() {
        let conn = conn_with(DataKind::Candle);
        let row = json!({"timestamp": 60_000, "close": 1.0});
        let h1 = Record::candle("x", "BTC/USDT", crate::domain::market::Timeframe::H1, row.clone(), 0);
        let h4 = Record::candle("x", "BTC/USDT", crate::domain::market::Timeframe::H4, row, 0);
        upsert(&conn, &h1).unwrap();
        upsert(&conn, &h4).unwrap();
        upsert(&conn, &h1).unwrap();
        assert_eq!(count(&conn, "ohlcv"), 2);

        let only_h4 = select_recent(
            &conn,
            DataKind::Candle,
            &ReadFilter {
                symbol: "BTC/USDT",
                timeframe: Some("4h"),
                ..ReadFilter::default()
            },
            10,
        )
        .unwrap();
        assert_eq!(only_h4.len(), 1);
    }

    #[test]
    fn balance_keeps_one_row_per_day() {
        let conn = conn_with(DataKind::Balance);
        let account = AccountId::new("abcdef", "main");
        let day_ms = 86_400_000;
        for (i, total) in [(1, 10.0), (2, 20.0)] {
            let r = Record::private(
                "x",
                account.clone(),
                DataKind::Balance,
                json!({"total": {"USDT": total}}),
                day_ms + i,
            );
            upsert(&conn, &r).unwrap();
        }
        assert_eq!(count(&conn, "balance"), 1);
        let total: f64 = conn
            .query_row("SELECT quote_total FROM balance", [], |r| r.get(0))
            .unwrap();
        assert!((total - 20.0).abs() < f64::EPSILON);
    }

    #[test]
    fn orders_key_on_venue_id_with_hash_fallback() {
        let conn = conn_with(DataKind::Order);
        let account = AccountId::new("abcdef", "main");
        let open = json!({"id": "o1", "symbol": "BTC/USDT", "status": "open", "timestamp": 1});
        let filled = json!({"id": "o1", "symbol": "BTC/USDT", "status": "closed", "timestamp": 1});
        let anonymous = json!({"symbol": "BTC/USDT", "timestamp": 2});
        for payload in [open, filled, anonymous.clone(), anonymous] {
            upsert(&conn, &Record::private("x", account.clone(), DataKind::Order, payload, 0))
                .unwrap();
        }
        assert_eq!(count(&conn, "orders"), 2);
        let status: String = conn
            .query_row("SELECT status FROM orders WHERE id = 'o1'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(status, "closed");
    }

    #[test]
    fn recent_rows_are_newest_first_and_bounded() {
        let conn = conn_with(DataKind::Trade);
        for ts in 1..=5 {
            let r = Record::market("x", "BTC/USDT", DataKind::Trade, json!({"timestamp": ts}), 0);
            upsert(&conn, &r).unwrap();
        }
        let filter = ReadFilter {
            symbol: "BTC/USDT",
            since: Some(2),
            until: Some(4),
            ..ReadFilter::default()
        };
        let rows = select_recent(&conn, DataKind::Trade, &filter, 2).unwrap();
        assert_eq!(rows, vec![json!({"timestamp": 4}), json!({"timestamp": 3})]);

        let latest = select_latest_timestamp(&conn, DataKind::Trade, &filter).unwrap();
        assert_eq!(latest, Some(4));
    }

    #[test]
    fn delete_older_than_spans_existing_tables() {
        let conn = conn_with(DataKind::Trade);
        ensure_table(&conn, DataKind::Ticker).unwrap();
        for ts in [1, 2, 100] {
            let r = Record::market("x", "BTC/USDT", DataKind::Trade, json!({"timestamp": ts}), 0);
            upsert(&conn, &r).unwrap();
        }
        let tick = Record::market("x", "BTC/USDT", DataKind::Ticker, json!({}), 1);
        upsert(&conn, &tick).unwrap();

        assert_eq!(delete_older_than(&conn, 50).unwrap(), 3);
        assert_eq!(count(&conn, "trades"), 1);
        assert_eq!(count(&conn, "ticker"), 0);
    }

    #[test]
    fn sha256_is_lower_hex() {
        let hash = sha256_hex("abc");
        assert_eq!(hash.len(), 64);
        assert!(hash.starts_with("ba7816bf"));
    }
}
