//! Shard Routing
//!
//! Every record lands in exactly one SQLite file, chosen from its venue,
//! its asset class and a partition name:
//!
//! ```text
//! <data_dir>/<venue>/spot/BTC_USDT.db
//! <data_dir>/<venue>/futures/BTC_USDT_USDT.db
//! <data_dir>/<venue>/private/abcdef_main.db
//! ```
//!
//! Routing is a pure function of the record, so readers and the writer
//! always agree on where a given stream lives.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::DomainError;
use super::account::AccountId;
use super::market::{DataKind, MarketType, Symbol};

/// Shard file extension.
pub const SHARD_EXTENSION: &str = "db";

/// Storage class of a shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetClass {
    /// Spot market data.
    Spot,
    /// Derivative market data.
    #[serde(alias = "futures")]
    Derivative,
    /// Private account data.
    Private,
}

impl AssetClass {
    /// Directory name under the venue directory.
    #[must_use]
    pub const fn dir_name(self) -> &'static str {
        match self {
            Self::Spot => "spot",
            Self::Derivative => "futures",
            Self::Private => "private",
        }
    }

    /// Inverse of [`Self::dir_name`].
    #[must_use]
    pub fn from_dir_name(name: &str) -> Option<Self> {
        match name {
            "spot" => Some(Self::Spot),
            "futures" => Some(Self::Derivative),
            "private" => Some(Self::Private),
            _ => None,
        }
    }
}

impl From<MarketType> for AssetClass {
    fn from(market: MarketType) -> Self {
        match market {
            MarketType::Spot => Self::Spot,
            MarketType::Derivative => Self::Derivative,
        }
    }
}

/// Address of one shard file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShardKey {
    venue: String,
    asset_class: AssetClass,
    partition: String,
}

impl ShardKey {
    /// Shard for a public market symbol.
    #[must_use]
    pub fn for_symbol(venue: &str, symbol: &Symbol) -> Self {
        Self {
            venue: sanitize_venue(venue),
            asset_class: symbol.market_type().into(),
            partition: symbol.file_stem(),
        }
    }

    /// Shard for a private account.
    #[must_use]
    pub fn for_account(venue: &str, account: &AccountId) -> Self {
        Self {
            venue: sanitize_venue(venue),
            asset_class: AssetClass::Private,
            partition: account.file_stem(),
        }
    }

    /// Route a `(venue, symbol, kind, account)` tuple.
    ///
    /// # Errors
    ///
    /// Returns an error when a public symbol is malformed or a private kind
    /// has no account.
    pub fn resolve(
        venue: &str,
        symbol: &str,
        kind: DataKind,
        account: Option<&AccountId>,
    ) -> Result<Self, DomainError> {
        if kind.is_private() {
            let account = account.ok_or(DomainError::MissingAccount(kind.as_str()))?;
            return Ok(Self::for_account(venue, account));
        }
        let symbol = Symbol::parse(symbol)?;
        Ok(Self::for_symbol(venue, &symbol))
    }

    /// Recover a key from a path relative to the data directory.
    #[must_use]
    pub fn from_relative_path(path: &Path) -> Option<Self> {
        let mut parts = path.components().map(|c| c.as_os_str().to_str());
        let venue = parts.next()??;
        let class = AssetClass::from_dir_name(parts.next()??)?;
        let file = Path::new(parts.next()??);
        if parts.next().is_some() {
            return None;
        }
        if file.extension()?.to_str()? != SHARD_EXTENSION {
            return None;
        }
        let partition = file.file_stem()?.to_str()?;
        Some(Self {
            venue: venue.to_string(),
            asset_class: class,
            partition: partition.to_string(),
        })
    }

    /// Venue directory name.
    #[must_use]
    pub fn venue(&self) -> &str {
        &self.venue
    }

    /// Asset class.
    #[must_use]
    pub const fn asset_class(&self) -> AssetClass {
        self.asset_class
    }

    /// Partition (file stem).
    #[must_use]
    pub fn partition(&self) -> &str {
        &self.partition
    }

    /// Path of the shard file relative to the data directory.
    #[must_use]
    pub fn relative_path(&self) -> PathBuf {
        PathBuf::from(&self.venue)
            .join(self.asset_class.dir_name())
            .join(format!("{}.{SHARD_EXTENSION}", self.partition))
    }
}

impl fmt::Display for ShardKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.venue,
            self.asset_class.dir_name(),
            self.partition
        )
    }
}

fn sanitize_venue(venue: &str) -> String {
    let cleaned: String = venue
        .trim()
        .to_ascii_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "unknown".to_string()
    } else {
        cleaned
    }
}
