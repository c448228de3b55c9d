//! Sharded SQLite store.
//!
//! One connection per shard file, opened lazily on first use and cached.
//! Writes never surface errors: they report success as a boolean so a
//! single bad record cannot take down the stream that produced it.
//! Reads never create shard files.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, NaiveDate};
use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags};
use serde_json::Value;

use super::retention::{MaintenanceWindow, RetentionPolicy};
use super::schema::{self, ReadFilter};
use super::StoreError;
use crate::domain::account::AccountId;
use crate::domain::market::{DataKind, Timeframe};
use crate::domain::record::Record;
use crate::domain::shard::{SHARD_EXTENSION, ShardKey};
use crate::infrastructure::config::CollectorConfig;
use crate::infrastructure::metrics;

// =============================================================================
// Configuration
// =============================================================================

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Root directory of all shards.
    pub data_dir: PathBuf,
    /// Row retention.
    pub retention: RetentionPolicy,
    /// Daily sweep window; `None` disables sweeping on write.
    pub maintenance: Option<MaintenanceWindow>,
    /// SQLite busy timeout.
    pub busy_timeout: Duration,
}

impl StoreConfig {
    /// Defaults rooted at `data_dir`.
    #[must_use]
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            retention: RetentionPolicy::default(),
            maintenance: Some(MaintenanceWindow::default()),
            busy_timeout: Duration::from_secs(30),
        }
    }

    /// Derive from the collector configuration.
    #[must_use]
    pub fn from_config(config: &CollectorConfig) -> Self {
        let storage = &config.storage;
        let maintenance = if storage.maintenance.enabled {
            MaintenanceWindow::parse(&storage.maintenance.time)
        } else {
            None
        };
        Self {
            data_dir: config.runtime.data_dir.clone(),
            retention: RetentionPolicy::with_overrides(
                storage.retention_days,
                storage.retention_overrides.clone(),
            ),
            maintenance,
            busy_timeout: storage.busy_timeout(),
        }
    }
}

// =============================================================================
// Read Query
// =============================================================================

/// A newest-first read against one stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadQuery {
    /// Venue name.
    pub venue: String,
    /// Symbol; may be empty for private kinds.
    pub symbol: String,
    /// Data kind.
    pub kind: DataKind,
    /// Maximum rows returned.
    pub limit: usize,
    /// Candle timeframe.
    pub timeframe: Option<Timeframe>,
    /// Inclusive lower timestamp bound (ms).
    pub since: Option<i64>,
    /// Inclusive upper timestamp bound (ms).
    pub until: Option<i64>,
    /// Account for private kinds.
    pub account: Option<AccountId>,
}

impl ReadQuery {
    /// Query the latest `limit` rows of a public stream.
    #[must_use]
    pub fn new(venue: impl Into<String>, symbol: impl Into<String>, kind: DataKind, limit: usize) -> Self {
        Self {
            venue: venue.into(),
            symbol: symbol.into(),
            kind,
            limit,
            timeframe: None,
            since: None,
            until: None,
            account: None,
        }
    }

    /// Query a private stream of `account`.
    #[must_use]
    pub fn private(venue: impl Into<String>, account: AccountId, kind: DataKind, limit: usize) -> Self {
        let mut query = Self::new(venue, "", kind, limit);
        query.account = Some(account);
        query
    }

    /// Restrict candles to one timeframe.
    #[must_use]
    pub const fn with_timeframe(mut self, timeframe: Timeframe) -> Self {
        self.timeframe = Some(timeframe);
        self
    }

    /// Restrict to a timestamp range.
    #[must_use]
    pub const fn with_range(mut self, since: Option<i64>, until: Option<i64>) -> Self {
        self.since = since;
        self.until = until;
        self
    }

    /// Restrict private rows to a symbol.
    #[must_use]
    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = symbol.into();
        self
    }

    fn shard_key(&self) -> Result<ShardKey, StoreError> {
        Ok(ShardKey::resolve(
            &self.venue,
            &self.symbol,
            self.kind,
            self.account.as_ref(),
        )?)
    }

    fn filter(&self) -> ReadFilter<'_> {
        ReadFilter {
            symbol: &self.symbol,
            timeframe: self.timeframe.map(Timeframe::as_str),
            since: self.since,
            until: self.until,
        }
    }
}

/// Whether the newest row is younger than `max_age`.
#[must_use]
pub fn is_fresh(latest_ms: Option<i64>, now_ms: i64, max_age: Duration) -> bool {
    let max_age_ms = i64::try_from(max_age.as_millis()).unwrap_or(i64::MAX);
    latest_ms.is_some_and(|ts| now_ms.saturating_sub(ts) <= max_age_ms)
}

// =============================================================================
// Shard
// =============================================================================

struct Shard {
    key: ShardKey,
    conn: Mutex<Connection>,
    tables: Mutex<HashSet<DataKind>>,
    last_sweep: Mutex<Option<NaiveDate>>,
}

impl Shard {
    fn ensure_table(&self, conn: &Connection, kind: DataKind) -> Result<(), StoreError> {
        let mut tables = self.tables.lock();
        if !tables.contains(&kind) {
            schema::ensure_table(conn, kind)?;
            tables.insert(kind);
        }
        Ok(())
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum OpenMode {
    Create,
    ExistingOnly,
}

// =============================================================================
// Store
// =============================================================================

/// Sharded, lazily opened SQLite persistence.
pub struct ShardedStore {
    config: StoreConfig,
    shards: Mutex<HashMap<ShardKey, Arc<Shard>>>,
}

impl ShardedStore {
    /// Create a store. No file is touched until the first write.
    #[must_use]
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            shards: Mutex::new(HashMap::new()),
        }
    }

    /// Root directory.
    #[must_use]
    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    /// Absolute path of a shard file.
    #[must_use]
    pub fn shard_path(&self, key: &ShardKey) -> PathBuf {
        self.config.data_dir.join(key.relative_path())
    }

    /// Number of cached connections.
    #[must_use]
    pub fn open_shards(&self) -> usize {
        self.shards.lock().len()
    }

    /// Persist one record. Returns `false` (and logs) on any failure.
    pub fn write(&self, record: &Record) -> bool {
        self.write_at(record, Local::now())
    }

    pub(crate) fn write_at(&self, record: &Record, now: DateTime<Local>) -> bool {
        let shard = match self.try_write(record) {
            Ok(shard) => shard,
            Err(e) => {
                tracing::warn!(
                    venue = %record.venue,
                    symbol = %record.symbol,
                    kind = %record.kind,
                    error = %e,
                    "Write failed"
                );
                metrics::record_write_failure(record.kind);
                return false;
            }
        };
        metrics::record_persisted(record.kind);
        self.maybe_sweep(&shard, now);
        true
    }

    fn try_write(&self, record: &Record) -> Result<Arc<Shard>, StoreError> {
        let key = ShardKey::resolve(
            &record.venue,
            &record.symbol,
            record.kind,
            record.account.as_ref(),
        )?;
        let shard = self
            .shard(&key, OpenMode::Create)?
            .ok_or(StoreError::ShardMissing)?;
        {
            let conn = shard.conn.lock();
            shard.ensure_table(&conn, record.kind)?;
            schema::upsert(&conn, record)?;
        }
        Ok(shard)
    }

    fn maybe_sweep(&self, shard: &Shard, now: DateTime<Local>) {
        let Some(window) = self.config.maintenance else {
            return;
        };
        {
            let mut last = shard.last_sweep.lock();
            if !window.is_due(now.naive_local(), *last) {
                return;
            }
            *last = Some(now.date_naive());
        }
        if let Err(e) = self.sweep(shard, now.timestamp_millis()) {
            tracing::warn!(shard = %shard.key, error = %e, "Retention sweep failed");
        }
    }

    fn sweep(&self, shard: &Shard, now_ms: i64) -> Result<usize, StoreError> {
        let cutoff = self.config.retention.cutoff_ms(shard.key.asset_class(), now_ms);
        let deleted = schema::delete_older_than(&shard.conn.lock(), cutoff)?;
        if deleted > 0 {
            tracing::info!(shard = %shard.key, deleted, cutoff, "Retention sweep removed rows");
            metrics::record_retention_deleted(deleted);
        }
        Ok(deleted)
    }

    /// Newest-first rows matching `query`. Missing shards and tables read
    /// as empty.
    #[must_use]
    pub fn read(&self, query: &ReadQuery) -> Vec<Value> {
        if query.limit == 0 {
            return Vec::new();
        }
        let result = self.with_existing_table(query, |conn| {
            schema::select_recent(conn, query.kind, &query.filter(), query.limit)
        });
        match result {
            Ok(rows) => rows.unwrap_or_default(),
            Err(e) => {
                tracing::warn!(
                    venue = %query.venue,
                    symbol = %query.symbol,
                    kind = %query.kind,
                    error = %e,
                    "Read failed"
                );
                Vec::new()
            }
        }
    }

    /// Timestamp of the newest row matching `query`.
    #[must_use]
    pub fn latest_timestamp(&self, query: &ReadQuery) -> Option<i64> {
        let result = self.with_existing_table(query, |conn| {
            schema::select_latest_timestamp(conn, query.kind, &query.filter())
        });
        match result {
            Ok(latest) => latest.flatten(),
            Err(e) => {
                tracing::warn!(kind = %query.kind, error = %e, "Latest timestamp lookup failed");
                None
            }
        }
    }

    fn with_existing_table<T>(
        &self,
        query: &ReadQuery,
        f: impl FnOnce(&Connection) -> Result<T, StoreError>,
    ) -> Result<Option<T>, StoreError> {
        let key = query.shard_key()?;
        let Some(shard) = self.shard(&key, OpenMode::ExistingOnly)? else {
            return Ok(None);
        };
        let conn = shard.conn.lock();
        let known = shard.tables.lock().contains(&query.kind);
        if !known && !schema::table_exists(&conn, query.kind)? {
            return Ok(None);
        }
        f(&conn).map(Some)
    }

    /// Sweep one shard now, regardless of the maintenance window.
    ///
    /// # Errors
    ///
    /// Returns an error when the shard cannot be opened or the delete fails.
    pub fn sweep_shard(&self, key: &ShardKey, now_ms: i64) -> Result<usize, StoreError> {
        match self.shard(key, OpenMode::ExistingOnly)? {
            Some(shard) => self.sweep(&shard, now_ms),
            None => Ok(0),
        }
    }

    /// Sweep every shard file under the data directory, including shards
    /// that were not written during this process's lifetime.
    pub fn sweep_all(&self, now_ms: i64) -> usize {
        let mut total = 0;
        for key in self.discover_shards() {
            match self.sweep_shard(&key, now_ms) {
                Ok(deleted) => total += deleted,
                Err(e) => tracing::warn!(shard = %key, error = %e, "Retention sweep failed"),
            }
        }
        total
    }

    /// Shard files present on disk.
    #[must_use]
    pub fn discover_shards(&self) -> Vec<ShardKey> {
        let root = &self.config.data_dir;
        let mut keys = Vec::new();
        for venue in read_dirs(root) {
            for class in read_dirs(&venue) {
                let Ok(entries) = std::fs::read_dir(&class) else {
                    continue;
                };
                for entry in entries.flatten() {
                    let path = entry.path();
                    if path.extension().and_then(|e| e.to_str()) != Some(SHARD_EXTENSION) {
                        continue;
                    }
                    if let Some(key) = path
                        .strip_prefix(root)
                        .ok()
                        .and_then(ShardKey::from_relative_path)
                    {
                        keys.push(key);
                    }
                }
            }
        }
        keys.sort();
        keys
    }

    /// Close every cached connection. Later calls reopen lazily.
    pub fn close_all(&self) {
        let closed = {
            let mut shards = self.shards.lock();
            let count = shards.len();
            shards.clear();
            count
        };
        if closed > 0 {
            tracing::debug!(closed, "Closed shard connections");
        }
    }

    fn shard(&self, key: &ShardKey, mode: OpenMode) -> Result<Option<Arc<Shard>>, StoreError> {
        if let Some(shard) = self.shards.lock().get(key) {
            return Ok(Some(Arc::clone(shard)));
        }

        // Opening may wait on the file's busy timeout; the map stays
        // unlocked meanwhile. A racing opener keeps the first insert.
        let Some(conn) = self.open_connection(key, mode)? else {
            return Ok(None);
        };
        let mut shards = self.shards.lock();
        let shard = shards.entry(key.clone()).or_insert_with(|| {
            Arc::new(Shard {
                key: key.clone(),
                conn: Mutex::new(conn),
                tables: Mutex::new(HashSet::new()),
                last_sweep: Mutex::new(None),
            })
        });
        Ok(Some(Arc::clone(shard)))
    }

    fn open_connection(&self, key: &ShardKey, mode: OpenMode) -> Result<Option<Connection>, StoreError> {
        let path = self.shard_path(key);
        let conn = match mode {
            OpenMode::Create => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                Connection::open(&path)?
            }
            OpenMode::ExistingOnly => {
                if !path.is_file() {
                    return Ok(None);
                }
                Connection::open_with_flags(
                    &path,
                    OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
                )?
            }
        };
        conn.busy_timeout(self.config.busy_timeout)?;
        if let Err(e) = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get::<_, String>(0)) {
            tracing::debug!(shard = %key, error = %e, "WAL mode unavailable");
        }
        tracing::debug!(shard = %key, path = %path.display(), "Opened shard");
        Ok(Some(conn))
    }
}

impl std::fmt::Debug for ShardedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardedStore")
            .field("data_dir", &self.config.data_dir)
            .field("open_shards", &self.open_shards())
            .finish_non_exhaustive()
    }
}

fn read_dirs(path: &Path) -> Vec<PathBuf> {
    std::fs::read_dir(path)
        .map(|entries| {
            entries
                .flatten()
                .map(|e| e.path())
                .filter(|p| p.is_dir())
                .collect()
        })
        .unwrap_or_default()
}
