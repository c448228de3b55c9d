//! Market Source Port (Driven Port)
//!
//! Interface to a venue connection. One source instance serves one
//! venue market segment (spot or derivatives) or one private account.
//! Streaming operations push payloads as they arrive; private data is
//! pulled on demand.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::Value;

use crate::domain::account::{AccountId, Credentials};
use crate::domain::market::{MarketType, Timeframe};

/// Stream of raw venue payloads.
///
/// Trade streams may yield an array per item; candle streams yield the
/// venue's OHLCV rows.
pub type PayloadStream = BoxStream<'static, Result<Value, SourceError>>;

/// Source error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SourceError {
    /// Connection error.
    #[error("Source connection error: {message}")]
    ConnectionError {
        /// Error details.
        message: String,
    },

    /// Authentication failed.
    #[error("Source authentication failed: {message}")]
    AuthenticationFailed {
        /// Error details.
        message: String,
    },

    /// Venue rejected the request parameters (e.g. unsupported depth).
    #[error("Request rejected: {message}")]
    InvalidRequest {
        /// Error details.
        message: String,
    },

    /// Operation is not offered by this venue.
    #[error("Operation not supported: {operation}")]
    Unsupported {
        /// Operation name.
        operation: &'static str,
    },

    /// Stream ended without an error.
    #[error("Stream closed by venue")]
    StreamClosed,
}

impl SourceError {
    /// Shorthand for a connection error.
    #[must_use]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::ConnectionError {
            message: message.into(),
        }
    }

    /// Errors that retrying cannot fix.
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(self, Self::Unsupported { .. })
    }
}

/// Which side of a venue a source connects to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SourceScope {
    /// Public market data for one segment.
    Public(MarketType),
    /// Private data for one account.
    Private(AccountId),
}

/// Everything a factory needs to open a source.
#[derive(Debug, Clone)]
pub struct SourceSpec {
    /// Venue name.
    pub venue: String,
    /// Segment or account.
    pub scope: SourceScope,
    /// Use the venue's sandbox.
    pub testnet: bool,
    /// Credentials (private scope only).
    pub credentials: Option<Credentials>,
}

/// Connection to a venue.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// Subscribe to ticker snapshots.
    async fn stream_ticker(&self, symbol: &str) -> Result<PayloadStream, SourceError>;

    /// Subscribe to order book snapshots, optionally bounded to `depth`
    /// levels per side.
    async fn stream_order_book(
        &self,
        symbol: &str,
        depth: Option<u32>,
    ) -> Result<PayloadStream, SourceError>;

    /// Subscribe to public trades.
    async fn stream_trades(&self, symbol: &str) -> Result<PayloadStream, SourceError>;

    /// Subscribe to candles of one timeframe.
    async fn stream_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
    ) -> Result<PayloadStream, SourceError>;

    /// Fetch the account balance.
    async fn fetch_balance(&self) -> Result<Value, SourceError> {
        Err(SourceError::Unsupported {
            operation: "fetch_balance",
        })
    }

    /// Fetch open orders.
    async fn fetch_open_orders(&self) -> Result<Vec<Value>, SourceError> {
        Err(SourceError::Unsupported {
            operation: "fetch_open_orders",
        })
    }

    /// Fetch recent own trades.
    async fn fetch_my_trades(&self) -> Result<Vec<Value>, SourceError> {
        Err(SourceError::Unsupported {
            operation: "fetch_my_trades",
        })
    }

    /// Fetch open positions.
    async fn fetch_positions(&self) -> Result<Vec<Value>, SourceError> {
        Err(SourceError::Unsupported {
            operation: "fetch_positions",
        })
    }

    /// Release the connection.
    async fn close(&self) -> Result<(), SourceError> {
        Ok(())
    }
}

/// Opens venue connections. Supplied by the embedding application.
pub trait SourceFactory: Send + Sync {
    /// Open a source for `spec`.
    ///
    /// # Errors
    ///
    /// Returns an error when the venue is unknown or the connection cannot
    /// be set up.
    fn connect(&self, spec: &SourceSpec) -> Result<Arc<dyn MarketDataSource>, SourceError>;
}
