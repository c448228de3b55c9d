//! Domain Layer - Market data records and their storage routing.
//!
//! Pure types with no I/O: what a record is, which venue market it
//! belongs to, which account produced it, and which shard file it lands
//! in. Everything here is cheap to clone and serializable.

/// Data kinds, timeframes, market types and symbol parsing.
pub mod market;

/// Private account identity and credentials.
pub mod account;

/// Normalized market data record.
pub mod record;

/// Shard routing (venue / asset class / partition).
pub mod shard;

use thiserror::Error;

/// Validation errors raised while building domain values.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DomainError {
    /// Symbol does not follow `BASE/QUOTE` or `BASE/QUOTE:SETTLE`.
    #[error("invalid symbol '{0}': expected BASE/QUOTE or BASE/QUOTE:SETTLE")]
    InvalidSymbol(String),

    /// Timeframe label is not one of the supported candle periods.
    #[error("unsupported timeframe '{0}'")]
    InvalidTimeframe(String),

    /// Data kind label is not recognized.
    #[error("unknown data kind '{0}'")]
    UnknownKind(String),

    /// A private record was routed without an account.
    #[error("{0} records require an account")]
    MissingAccount(&'static str),
}
