//! Sharded Store Integration Tests
//!
//! Routing across spot, derivative and private shards, redelivery,
//! reopening from disk and retention per asset class.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde_json::json;
use tempfile::TempDir;

use market_data_collector::domain::record::now_millis;
use market_data_collector::infrastructure::persistence::RetentionPolicy;
use market_data_collector::{
    AccountId, AssetClass, DataKind, ReadQuery, Record, ShardedStore, StoreConfig, is_fresh,
};

const DAY_MS: i64 = 24 * 60 * 60 * 1_000;

fn store_with(dir: &TempDir, retention: RetentionPolicy) -> ShardedStore {
    let mut config = StoreConfig::new(dir.path());
    config.maintenance = None;
    config.retention = retention;
    ShardedStore::new(config)
}

fn ticker(symbol: &str, last: f64, at: i64) -> Record {
    Record::market("alpha", symbol, DataKind::Ticker, json!({"last": last}), at)
}

// =============================================================================
// Routing
// =============================================================================

#[test]
fn records_land_in_their_asset_class_directory() {
    let dir = TempDir::new().unwrap();
    let store = store_with(&dir, RetentionPolicy::default());
    let now = now_millis();
    let account = AccountId::new("abcdef", "main");

    assert!(store.write(&ticker("BTC/USDT", 1.0, now)));
    assert!(store.write(&ticker("BTC/USDT:USDT", 2.0, now)));
    assert!(store.write(&Record::private(
        "alpha",
        account.clone(),
        DataKind::Order,
        json!({"id": "o-1", "symbol": "BTC/USDT", "status": "open", "timestamp": now}),
        now,
    )));

    assert!(dir.path().join("alpha/spot/BTC_USDT.db").is_file());
    assert!(dir.path().join("alpha/futures/BTC_USDT_USDT.db").is_file());
    assert!(dir.path().join("alpha/private/abcdef_main.db").is_file());

    let spot = store.read(&ReadQuery::new("alpha", "BTC/USDT", DataKind::Ticker, 10));
    let perp = store.read(&ReadQuery::new("alpha", "BTC/USDT:USDT", DataKind::Ticker, 10));
    assert_eq!(spot, vec![json!({"last": 1.0})]);
    assert_eq!(perp, vec![json!({"last": 2.0})]);

    let orders = store.read(&ReadQuery::private("alpha", account, DataKind::Order, 10));
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0]["status"], "open");

    let classes: Vec<AssetClass> = store
        .discover_shards()
        .iter()
        .map(|key| key.asset_class())
        .collect();
    assert_eq!(
        classes,
        vec![AssetClass::Spot, AssetClass::Derivative, AssetClass::Private]
    );
}

#[test]
fn reads_are_newest_first() {
    let dir = TempDir::new().unwrap();
    let store = store_with(&dir, RetentionPolicy::default());
    let now = now_millis();

    for (i, last) in [100.0, 200.0, 300.0].into_iter().enumerate() {
        let offset = i64::try_from(i).unwrap();
        assert!(store.write(&ticker("BTC/USDT", last, now + offset)));
    }

    let rows = store.read(&ReadQuery::new("alpha", "BTC/USDT", DataKind::Ticker, 2));
    assert_eq!(rows, vec![json!({"last": 300.0}), json!({"last": 200.0})]);

    let since = store.read(
        &ReadQuery::new("alpha", "BTC/USDT", DataKind::Ticker, 10).with_range(Some(now + 1), None),
    );
    assert_eq!(since.len(), 2);
}

#[test]
fn redelivered_orders_keep_latest_status() {
    let dir = TempDir::new().unwrap();
    let store = store_with(&dir, RetentionPolicy::default());
    let account = AccountId::new("abcdef", "main");
    let now = now_millis();

    for status in ["open", "closed"] {
        let payload = json!({"id": 42, "symbol": "ETH/USDT", "status": status, "timestamp": now});
        assert!(store.write(&Record::private("alpha", account.clone(), DataKind::Order, payload, now)));
    }

    let rows = store.read(&ReadQuery::private("alpha", account, DataKind::Order, 10));
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["status"], "closed");
}

#[test]
fn data_survives_store_reopen() {
    let dir = TempDir::new().unwrap();
    let now = now_millis();
    {
        let store = store_with(&dir, RetentionPolicy::default());
        assert!(store.write(&ticker("SOL/USDT", 25.0, now)));
        store.close_all();
    }

    let store = store_with(&dir, RetentionPolicy::default());
    let query = ReadQuery::new("alpha", "SOL/USDT", DataKind::Ticker, 1);
    assert_eq!(store.read(&query), vec![json!({"last": 25.0})]);
    assert_eq!(store.latest_timestamp(&query), Some(now));
    assert!(is_fresh(
        store.latest_timestamp(&query),
        now + 1_000,
        Duration::from_secs(60)
    ));
}

#[test]
fn concurrent_writers_share_shards() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(store_with(&dir, RetentionPolicy::default()));
    let base = now_millis();

    let handles: Vec<_> = (0..4_i64)
        .map(|worker| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for i in 0..25_i64 {
                    let trade = json!({"id": format!("{worker}-{i}"), "timestamp": base + i});
                    let record = Record::market("alpha", "BTC/USDT", DataKind::Trade, trade, base);
                    assert!(store.write(&record));
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let rows = store.read(&ReadQuery::new("alpha", "BTC/USDT", DataKind::Trade, 1_000));
    assert_eq!(rows.len(), 100);
    assert_eq!(store.open_shards(), 1);
}

// =============================================================================
// Retention
// =============================================================================

#[test]
fn sweep_honours_per_class_windows() {
    let dir = TempDir::new().unwrap();
    let overrides = BTreeMap::from([(AssetClass::Derivative, 3)]);
    let store = store_with(&dir, RetentionPolicy::with_overrides(1, overrides));
    let now = now_millis();

    for symbol in ["BTC/USDT", "BTC/USDT:USDT"] {
        assert!(store.write(&ticker(symbol, 1.0, now - 2 * DAY_MS)));
        assert!(store.write(&ticker(symbol, 2.0, now - DAY_MS / 2)));
    }

    // Spot keeps one day; derivatives keep three.
    assert_eq!(store.sweep_all(now), 1);

    let spot = store.read(&ReadQuery::new("alpha", "BTC/USDT", DataKind::Ticker, 10));
    let perp = store.read(&ReadQuery::new("alpha", "BTC/USDT:USDT", DataKind::Ticker, 10));
    assert_eq!(spot, vec![json!({"last": 2.0})]);
    assert_eq!(perp.len(), 2);
}

#[test]
fn sweep_reaches_shards_written_by_another_process() {
    let dir = TempDir::new().unwrap();
    let now = now_millis();
    {
        let writer = store_with(&dir, RetentionPolicy::uniform(1));
        assert!(writer.write(&ticker("BTC/USDT", 1.0, now - 5 * DAY_MS)));
    }

    let sweeper = store_with(&dir, RetentionPolicy::uniform(1));
    assert_eq!(sweeper.open_shards(), 0);
    assert_eq!(sweeper.sweep_all(now), 1);
    assert!(
        sweeper
            .read(&ReadQuery::new("alpha", "BTC/USDT", DataKind::Ticker, 10))
            .is_empty()
    );
}
