//! Market Vocabulary
//!
//! The closed set of data kinds the collector understands, the candle
//! periods it can aggregate by, and the symbol notation venues use.
//!
//! # Symbols
//!
//! Spot markets are written `BASE/QUOTE` (`BTC/USDT`). Derivative
//! markets carry a settlement currency after a colon
//! (`BTC/USDT:USDT`). The settlement suffix is the only signal used to
//! tell the two apart.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::DomainError;

// =============================================================================
// Data Kind
// =============================================================================

/// Category of a market data record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataKind {
    /// Best bid/ask and last price snapshot.
    Ticker,
    /// Depth snapshot of the order book.
    #[serde(alias = "orderbook")]
    OrderBook,
    /// Public trade prints.
    #[serde(alias = "trades")]
    Trade,
    /// OHLCV candle for a timeframe.
    #[serde(alias = "ohlcv")]
    Candle,
    /// Account balance snapshot.
    Balance,
    /// Open order of an account.
    #[serde(alias = "orders")]
    Order,
    /// Account fill (own trade).
    #[serde(alias = "mytrades")]
    Fill,
    /// Open derivative position of an account.
    #[serde(alias = "positions")]
    Position,
}

impl DataKind {
    /// Every data kind, public first.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::Ticker,
            Self::OrderBook,
            Self::Trade,
            Self::Candle,
            Self::Balance,
            Self::Order,
            Self::Fill,
            Self::Position,
        ]
    }

    /// Kinds that belong to a private account rather than a market.
    #[must_use]
    pub const fn is_private(self) -> bool {
        matches!(
            self,
            Self::Balance | Self::Order | Self::Fill | Self::Position
        )
    }

    /// Kinds the venue pushes over a subscription. The rest are polled.
    #[must_use]
    pub const fn is_streamed(self) -> bool {
        !self.is_private()
    }

    /// Kinds whose stored timestamp is the collection time.
    ///
    /// Snapshots describe "the state now"; event kinds keep the venue's
    /// event time so that redelivered events overwrite themselves.
    #[must_use]
    pub const fn is_snapshot(self) -> bool {
        matches!(
            self,
            Self::Ticker | Self::OrderBook | Self::Balance | Self::Position
        )
    }

    /// Stable label used in config keys, logs and metric labels.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ticker => "ticker",
            Self::OrderBook => "order_book",
            Self::Trade => "trade",
            Self::Candle => "candle",
            Self::Balance => "balance",
            Self::Order => "order",
            Self::Fill => "fill",
            Self::Position => "position",
        }
    }

    /// Default polling interval for pull-based kinds.
    #[must_use]
    pub const fn default_interval(self) -> Duration {
        match self {
            Self::Ticker | Self::OrderBook | Self::Trade => Duration::from_secs(1),
            Self::Candle | Self::Balance => Duration::from_secs(60),
            Self::Order | Self::Fill => Duration::from_secs(10),
            Self::Position => Duration::from_secs(30),
        }
    }
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ticker" => Ok(Self::Ticker),
            "order_book" | "orderbook" => Ok(Self::OrderBook),
            "trade" | "trades" => Ok(Self::Trade),
            "candle" | "ohlcv" => Ok(Self::Candle),
            "balance" => Ok(Self::Balance),
            "order" | "orders" => Ok(Self::Order),
            "fill" | "mytrades" => Ok(Self::Fill),
            "position" | "positions" => Ok(Self::Position),
            other => Err(DomainError::UnknownKind(other.to_string())),
        }
    }
}

// =============================================================================
// Timeframe
// =============================================================================

/// Candle aggregation period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    /// One minute.
    #[serde(rename = "1m")]
    M1,
    /// Three minutes.
    #[serde(rename = "3m")]
    M3,
    /// Five minutes.
    #[serde(rename = "5m")]
    M5,
    /// Fifteen minutes.
    #[serde(rename = "15m")]
    M15,
    /// Thirty minutes.
    #[serde(rename = "30m")]
    M30,
    /// One hour.
    #[serde(rename = "1h")]
    H1,
    /// Two hours.
    #[serde(rename = "2h")]
    H2,
    /// Four hours.
    #[serde(rename = "4h")]
    H4,
    /// Six hours.
    #[serde(rename = "6h")]
    H6,
    /// Twelve hours.
    #[serde(rename = "12h")]
    H12,
    /// One day.
    #[serde(rename = "1d")]
    D1,
    /// One week.
    #[serde(rename = "1w")]
    W1,
}

impl Timeframe {
    /// Venue notation (`1m`, `4h`, `1d`, ...).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::M1 => "1m",
            Self::M3 => "3m",
            Self::M5 => "5m",
            Self::M15 => "15m",
            Self::M30 => "30m",
            Self::H1 => "1h",
            Self::H2 => "2h",
            Self::H4 => "4h",
            Self::H6 => "6h",
            Self::H12 => "12h",
            Self::D1 => "1d",
            Self::W1 => "1w",
        }
    }

    /// Length of one candle.
    #[must_use]
    pub const fn duration(self) -> Duration {
        const MINUTE: u64 = 60;
        const HOUR: u64 = 60 * MINUTE;
        let secs = match self {
            Self::M1 => MINUTE,
            Self::M3 => 3 * MINUTE,
            Self::M5 => 5 * MINUTE,
            Self::M15 => 15 * MINUTE,
            Self::M30 => 30 * MINUTE,
            Self::H1 => HOUR,
            Self::H2 => 2 * HOUR,
            Self::H4 => 4 * HOUR,
            Self::H6 => 6 * HOUR,
            Self::H12 => 12 * HOUR,
            Self::D1 => 24 * HOUR,
            Self::W1 => 7 * 24 * HOUR,
        };
        Duration::from_secs(secs)
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "1m" => Ok(Self::M1),
            "3m" => Ok(Self::M3),
            "5m" => Ok(Self::M5),
            "15m" => Ok(Self::M15),
            "30m" => Ok(Self::M30),
            "1h" => Ok(Self::H1),
            "2h" => Ok(Self::H2),
            "4h" => Ok(Self::H4),
            "6h" => Ok(Self::H6),
            "12h" => Ok(Self::H12),
            "1d" => Ok(Self::D1),
            "1w" => Ok(Self::W1),
            other => Err(DomainError::InvalidTimeframe(other.to_string())),
        }
    }
}

// =============================================================================
// Market Type & Symbol
// =============================================================================

/// Venue market segment a symbol trades on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketType {
    /// Spot market.
    Spot,
    /// Perpetual or dated derivative.
    Derivative,
}

impl MarketType {
    /// Label used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Spot => "spot",
            Self::Derivative => "derivative",
        }
    }
}

/// A validated trading pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Symbol {
    raw: String,
    base: String,
    quote: String,
    settle: Option<String>,
}

impl Symbol {
    /// Parse `BASE/QUOTE` or `BASE/QUOTE:SETTLE`.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::InvalidSymbol`] when a component is missing
    /// or contains characters other than ASCII alphanumerics.
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        let invalid = || DomainError::InvalidSymbol(raw.to_string());
        let trimmed = raw.trim();

        let (pair, settle) = match trimmed.split_once(':') {
            Some((pair, settle)) => (pair, Some(settle)),
            None => (trimmed, None),
        };
        let (base, quote) = pair.split_once('/').ok_or_else(invalid)?;

        let valid = |part: &str| !part.is_empty() && part.chars().all(|c| c.is_ascii_alphanumeric());
        if !valid(base) || !valid(quote) || settle.is_some_and(|s| !valid(s)) {
            return Err(invalid());
        }

        Ok(Self {
            raw: trimmed.to_string(),
            base: base.to_string(),
            quote: quote.to_string(),
            settle: settle.map(str::to_string),
        })
    }

    /// Symbol as written by the venue.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Base currency.
    #[must_use]
    pub fn base(&self) -> &str {
        &self.base
    }

    /// Quote currency.
    #[must_use]
    pub fn quote(&self) -> &str {
        &self.quote
    }

    /// Settlement currency for derivatives.
    #[must_use]
    pub fn settle(&self) -> Option<&str> {
        self.settle.as_deref()
    }

    /// Segment derived from the presence of a settlement currency.
    #[must_use]
    pub const fn market_type(&self) -> MarketType {
        if self.settle.is_some() {
            MarketType::Derivative
        } else {
            MarketType::Spot
        }
    }

    /// File-safe stem: `BTC_USDT` or `BTC_USDT_USDT`.
    #[must_use]
    pub fn file_stem(&self) -> String {
        match &self.settle {
            Some(settle) => format!("{}_{}_{settle}", self.base, self.quote),
            None => format!("{}_{}", self.base, self.quote),
        }
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for Symbol {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
