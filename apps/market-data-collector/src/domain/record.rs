//! Normalized Record
//!
//! One unit of collected market data. The payload stays as the venue sent
//! it (JSON); the envelope carries what the store needs to route and key
//! the row.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::account::AccountId;
use super::market::{DataKind, Timeframe};

/// Current wall-clock time in epoch milliseconds.
#[must_use]
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// A market data record ready for persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Venue name.
    pub venue: String,
    /// Venue symbol; empty for account-wide snapshots such as balances.
    pub symbol: String,
    /// Data kind.
    pub kind: DataKind,
    /// Event or snapshot time, epoch milliseconds.
    pub timestamp: i64,
    /// When the collector received the payload, epoch milliseconds.
    pub collected_at: i64,
    /// Candle period (candles only).
    pub timeframe: Option<Timeframe>,
    /// Owning account (private kinds only).
    pub account: Option<AccountId>,
    /// Venue payload.
    pub payload: Value,
}

impl Record {
    /// Build a public market record.
    ///
    /// Snapshot kinds are stamped with `collected_at`; event kinds keep the
    /// payload's `timestamp` field when it is present.
    #[must_use]
    pub fn market(
        venue: impl Into<String>,
        symbol: impl Into<String>,
        kind: DataKind,
        payload: Value,
        collected_at: i64,
    ) -> Self {
        let timestamp = event_timestamp(kind, &payload, collected_at);
        Self {
            venue: venue.into(),
            symbol: symbol.into(),
            kind,
            timestamp,
            collected_at,
            timeframe: None,
            account: None,
            payload,
        }
    }

    /// Build a candle record.
    #[must_use]
    pub fn candle(
        venue: impl Into<String>,
        symbol: impl Into<String>,
        timeframe: Timeframe,
        payload: Value,
        collected_at: i64,
    ) -> Self {
        let mut record = Self::market(venue, symbol, DataKind::Candle, payload, collected_at);
        record.timeframe = Some(timeframe);
        record
    }

    /// Build a private account record. The symbol is read from the
    /// payload's `symbol` field and is empty when absent.
    #[must_use]
    pub fn private(
        venue: impl Into<String>,
        account: AccountId,
        kind: DataKind,
        payload: Value,
        collected_at: i64,
    ) -> Self {
        let symbol = payload
            .get("symbol")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let timestamp = event_timestamp(kind, &payload, collected_at);
        Self {
            venue: venue.into(),
            symbol,
            kind,
            timestamp,
            collected_at,
            timeframe: None,
            account: Some(account),
            payload,
        }
    }

    /// Override the record timestamp.
    #[must_use]
    pub const fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Venue-assigned identifier (`id` field), if any.
    #[must_use]
    pub fn venue_id(&self) -> Option<String> {
        match self.payload.get("id")? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

#[allow(clippy::cast_possible_truncation)]
fn event_timestamp(kind: DataKind, payload: &Value, collected_at: i64) -> i64 {
    if kind.is_snapshot() {
        return collected_at;
    }
    payload
        .get("timestamp")
        .and_then(|ts| ts.as_i64().or_else(|| ts.as_f64().map(|f| f as i64)))
        .unwrap_or(collected_at)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn snapshot_kinds_use_collection_time() {
        let record = Record::market(
            "binance",
            "BTC/USDT",
            DataKind::Ticker,
            json!({"timestamp": 1, "last": 100.0}),
            5_000,
        );
        assert_eq!(record.timestamp, 5_000);
    }

    #[test]
    fn event_kinds_keep_venue_time() {
        let record = Record::market(
            "binance",
            "BTC/USDT",
            DataKind::Trade,
            json!({"timestamp": 1_234, "price": 1.0}),
            5_000,
        );
        assert_eq!(record.timestamp, 1_234);

        let missing = Record::market("binance", "BTC/USDT", DataKind::Trade, json!({}), 5_000);
        assert_eq!(missing.timestamp, 5_000);
    }

    #[test]
    fn private_record_reads_symbol_from_payload() {
        let account = AccountId::new("abcdef", "main");
        let order = Record::private(
            "binance",
            account.clone(),
            DataKind::Order,
            json!({"id": "o-1", "symbol": "ETH/USDT", "timestamp": 77}),
            100,
        );
        assert_eq!(order.symbol, "ETH/USDT");
        assert_eq!(order.timestamp, 77);
        assert_eq!(order.account, Some(account.clone()));

        let balance = Record::private("binance", account, DataKind::Balance, json!({}), 100);
        assert_eq!(balance.symbol, "");
    }

    #[test]
    fn venue_id_accepts_strings_and_numbers() {
        let account = AccountId::new("a", "b");
        let text = Record::private("v", account.clone(), DataKind::Fill, json!({"id": "x9"}), 0);
        let number = Record::private("v", account.clone(), DataKind::Fill, json!({"id": 42}), 0);
        let none = Record::private("v", account, DataKind::Fill, json!({"id": ""}), 0);
        assert_eq!(text.venue_id().as_deref(), Some("x9"));
        assert_eq!(number.venue_id().as_deref(), Some("42"));
        assert_eq!(none.venue_id(), None);
    }
}
