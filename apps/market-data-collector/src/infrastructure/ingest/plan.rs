//! Ingestion Plan
//!
//! Expands the configuration into source groups: one group per venue
//! market segment (spot, derivatives) and one per private account. Each
//! group owns the stream specs that share its source handle.

use std::time::Duration;

use crate::application::ports::{SourceScope, SourceSpec};
use crate::domain::account::AccountId;
use crate::domain::market::{DataKind, MarketType, Symbol, Timeframe};
use crate::infrastructure::config::{CollectorConfig, VenueConfig};

/// One supervised stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSpec {
    /// Venue name.
    pub venue: String,
    /// Segment or account the stream belongs to.
    pub scope: SourceScope,
    /// Data kind.
    pub kind: DataKind,
    /// Symbol (public kinds).
    pub symbol: Option<String>,
    /// Candle period (candles only).
    pub timeframe: Option<Timeframe>,
    /// Poll interval (pull-based kinds).
    pub poll_interval: Duration,
    /// Requested order book depth.
    pub depth: Option<u32>,
}

impl StreamSpec {
    /// Short label for logs.
    #[must_use]
    pub fn label(&self) -> String {
        let target = match (&self.symbol, &self.scope) {
            (Some(symbol), _) => symbol.clone(),
            (None, SourceScope::Private(account)) => account.to_string(),
            (None, SourceScope::Public(market)) => market.as_str().to_string(),
        };
        match self.timeframe {
            Some(tf) => format!("{}:{}:{}:{}", self.venue, target, self.kind, tf),
            None => format!("{}:{}:{}", self.venue, target, self.kind),
        }
    }
}

/// Streams sharing one source handle.
#[derive(Debug, Clone)]
pub struct SourceGroup {
    /// How to open the source.
    pub spec: SourceSpec,
    /// Streams served by it.
    pub streams: Vec<StreamSpec>,
}

/// Every source group the orchestrator should launch.
#[derive(Debug, Clone, Default)]
pub struct IngestionPlan {
    /// Groups in venue order.
    pub groups: Vec<SourceGroup>,
}

impl IngestionPlan {
    /// Build the plan for every enabled venue.
    ///
    /// Invalid symbols and accounts without credentials are skipped with
    /// a warning.
    #[must_use]
    pub fn from_config(config: &CollectorConfig) -> Self {
        let mut groups = Vec::new();
        for (venue, venue_config) in config.enabled_venues() {
            groups.extend(public_groups(venue, venue_config, config));
            groups.extend(private_groups(venue, venue_config, config));
        }
        Self { groups }
    }

    /// Total stream count.
    #[must_use]
    pub fn stream_count(&self) -> usize {
        self.groups.iter().map(|g| g.streams.len()).sum()
    }

    /// Whether there is nothing to run.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stream_count() == 0
    }
}

fn public_groups(venue: &str, venue_config: &VenueConfig, config: &CollectorConfig) -> Vec<SourceGroup> {
    let mut spot = Vec::new();
    let mut derivative = Vec::new();
    for raw in &venue_config.symbols {
        match Symbol::parse(raw) {
            Ok(symbol) => match symbol.market_type() {
                MarketType::Spot => spot.push(symbol),
                MarketType::Derivative => derivative.push(symbol),
            },
            Err(e) => tracing::warn!(venue, symbol = %raw, error = %e, "Skipping symbol"),
        }
    }

    let timeframes = config.collection.parsed_timeframes();
    [(MarketType::Spot, spot), (MarketType::Derivative, derivative)]
        .into_iter()
        .filter(|(_, symbols)| !symbols.is_empty())
        .filter_map(|(market, symbols)| {
            let scope = SourceScope::Public(market);
            let mut streams = Vec::new();
            for symbol in &symbols {
                for kind in DataKind::all().iter().copied().filter(|k| !k.is_private()) {
                    if !config.collection.is_enabled(kind) {
                        continue;
                    }
                    let base = StreamSpec {
                        venue: venue.to_string(),
                        scope: scope.clone(),
                        kind,
                        symbol: Some(symbol.as_str().to_string()),
                        timeframe: None,
                        poll_interval: config.collection.interval(kind),
                        depth: None,
                    };
                    match kind {
                        DataKind::Candle => streams.extend(timeframes.iter().map(|tf| StreamSpec {
                            timeframe: Some(*tf),
                            ..base.clone()
                        })),
                        DataKind::OrderBook => streams.push(StreamSpec {
                            depth: config.collection.order_book_depth,
                            ..base
                        }),
                        _ => streams.push(base),
                    }
                }
            }
            if streams.is_empty() {
                return None;
            }
            Some(SourceGroup {
                spec: SourceSpec {
                    venue: venue.to_string(),
                    scope,
                    testnet: venue_config.testnet,
                    credentials: None,
                },
                streams,
            })
        })
        .collect()
}

fn private_groups(venue: &str, venue_config: &VenueConfig, config: &CollectorConfig) -> Vec<SourceGroup> {
    let kinds: Vec<DataKind> = DataKind::all()
        .iter()
        .copied()
        .filter(|k| k.is_private() && config.collection.is_enabled(*k))
        .collect();
    if kinds.is_empty() {
        return Vec::new();
    }

    let mut groups = Vec::new();
    for (label, account) in &venue_config.accounts {
        let credentials = account.credentials();
        if !credentials.is_complete() {
            tracing::warn!(venue, account = %label, "Skipping account without key and secret");
            continue;
        }
        let id = AccountId::from_credentials(&credentials, label);
        let scope = SourceScope::Private(id);
        let streams = kinds
            .iter()
            .map(|kind| StreamSpec {
                venue: venue.to_string(),
                scope: scope.clone(),
                kind: *kind,
                symbol: None,
                timeframe: None,
                poll_interval: config.collection.interval(*kind),
                depth: None,
            })
            .collect();
        groups.push(SourceGroup {
            spec: SourceSpec {
                venue: venue.to_string(),
                scope,
                testnet: venue_config.testnet,
                credentials: Some(credentials),
            },
            streams,
        });
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = r"
venues:
  alpha:
    symbols: [BTC/USDT, ETH/USDT, BTC/USDT:USDT, not-a-symbol]
    accounts:
      main:
        api_key: abcdef123
        secret: s3cret
      empty:
        api_key: ''
        secret: ''
  beta:
    enabled: false
    symbols: [SOL/USDT]
collection:
  timeframes: [1m, 1h]
  kinds:
    position:
      enabled: false
";

    fn plan() -> IngestionPlan {
        // Parsed without validation so the bad symbol reaches the planner.
        let config: CollectorConfig = serde_yaml_bw::from_str(YAML).unwrap();
        IngestionPlan::from_config(&config)
    }

    #[test]
    fn splits_spot_and_derivative_groups() {
        let plan = plan();
        let scopes: Vec<&SourceScope> = plan.groups.iter().map(|g| &g.spec.scope).collect();
        assert_eq!(scopes.len(), 3);
        assert_eq!(scopes[0], &SourceScope::Public(MarketType::Spot));
        assert_eq!(scopes[1], &SourceScope::Public(MarketType::Derivative));
        assert!(matches!(scopes[2], SourceScope::Private(id) if id.to_string() == "abcdef_main"));
    }

    #[test]
    fn expands_candles_per_timeframe() {
        let plan = plan();
        let spot = &plan.groups[0];
        // ticker, order book, trades, 2 candles per symbol
        assert_eq!(spot.streams.len(), 2 * 5);
        let candles: Vec<_> = spot
            .streams
            .iter()
            .filter(|s| s.kind == DataKind::Candle)
            .filter_map(|s| s.timeframe)
            .collect();
        assert_eq!(candles, vec![Timeframe::M1, Timeframe::H1, Timeframe::M1, Timeframe::H1]);
    }

    #[test]
    fn order_book_carries_depth() {
        let plan = plan();
        let book = plan.groups[0]
            .streams
            .iter()
            .find(|s| s.kind == DataKind::OrderBook)
            .unwrap();
        assert_eq!(book.depth, Some(20));
    }

    #[test]
    fn private_group_skips_disabled_kinds() {
        let plan = plan();
        let private = &plan.groups[2];
        let kinds: Vec<DataKind> = private.streams.iter().map(|s| s.kind).collect();
        assert!(!kinds.contains(&DataKind::Position));
        assert!(kinds.contains(&DataKind::Balance));
        assert!(private.spec.credentials.is_some());
    }

    #[test]
    fn disabled_venue_contributes_nothing() {
        let plan = plan();
        assert!(plan.groups.iter().all(|g| g.spec.venue == "alpha"));
    }

    #[test]
    fn symbols_without_enabled_kinds_open_no_source() {
        let yaml = r"
venues:
  alpha:
    symbols: [BTC/USDT]
collection:
  kinds:
    ticker: { enabled: false }
    order_book: { enabled: false }
    trade: { enabled: false }
    candle: { enabled: false }
";
        let config: CollectorConfig = serde_yaml_bw::from_str(yaml).unwrap();
        let plan = IngestionPlan::from_config(&config);
        assert!(plan.groups.is_empty());
        assert!(plan.is_empty());
    }

    #[test]
    fn label_includes_timeframe() {
        let plan = plan();
        let candle = plan.groups[0]
            .streams
            .iter()
            .find(|s| s.kind == DataKind::Candle)
            .unwrap();
        assert_eq!(candle.label(), "alpha:BTC/USDT:candle:1m");
    }
}
