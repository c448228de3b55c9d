//! Application Ports (Driven)
//!
//! - `MarketDataSource`: one venue connection (public segment or account)
//! - `SourceFactory`: opens sources from configuration

mod market_source_port;

pub use market_source_port::{
    MarketDataSource, PayloadStream, SourceError, SourceFactory, SourceScope, SourceSpec,
};
