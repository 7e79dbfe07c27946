//! Two-tier TTL cache for month listings and per-movie credits.
//!
//! **L1** – [`DashMap`] in-memory map (lock-free concurrent reads).
//! **L2** – Optional SQLite database on disk (persists across process restarts).
//!
//! On [`get`](QueryCache::get): check L1 first; on miss, fall through to L2 and
//! promote the row back into L1 on hit, keeping its original expiry. On
//! [`set`](QueryCache::set): write-through to both tiers.
//!
//! Values are stored as JSON text. Every row carries an absolute expiry in
//! epoch milliseconds; a row whose expiry is `<= now` reads as absent and is
//! evicted on the spot.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use rusqlite::{Connection, OpenFlags, OptionalExtension, params};
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Storage failure in the cache. This is the only error kind the fetch layer
/// surfaces to its callers.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cache database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("cache value serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("cache directory error: {0}")]
    Io(#[from] std::io::Error),
}

/// A value plus its absolute expiry (epoch milliseconds).
#[derive(Clone, Debug)]
struct CacheEntry {
    value: String,
    expires_at: i64,
}

impl CacheEntry {
    fn is_live(&self, now: i64) -> bool {
        self.expires_at > now
    }
}

/// Open a SQLite connection with WAL mode and standard pragmas.
fn open_sqlite(path: &Path, read_only: bool) -> Result<Connection, rusqlite::Error> {
    let flags = if read_only {
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX
    } else {
        OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX
    };
    let conn = Connection::open_with_flags(path, flags)?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA busy_timeout = 5000;",
    )?;
    Ok(conn)
}

/// SQLite writer connection (L2 upserts, deletes, prune, clear).
struct SqliteWriter {
    conn: Connection,
}

impl SqliteWriter {
    fn open(path: &Path) -> Result<Self, rusqlite::Error> {
        let conn = open_sqlite(path, false)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS cache (
                 key        TEXT PRIMARY KEY,
                 value      TEXT NOT NULL,
                 expires_at INTEGER NOT NULL
             );",
        )?;
        Ok(Self { conn })
    }

    fn upsert(&self, key: &str, value: &str, expires_at: i64) -> Result<(), rusqlite::Error> {
        self.conn.execute(
            "INSERT OR REPLACE INTO cache (key, value, expires_at) VALUES (?1, ?2, ?3)",
            params![key, value, expires_at],
        )?;
        Ok(())
    }

    /// Delete `key` only if it is still expired, so a concurrent fresh write wins.
    fn delete_expired(&self, key: &str, now: i64) -> Result<(), rusqlite::Error> {
        self.conn.execute(
            "DELETE FROM cache WHERE key = ?1 AND expires_at <= ?2",
            params![key, now],
        )?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), rusqlite::Error> {
        self.conn
            .execute("DELETE FROM cache WHERE key = ?1", params![key])?;
        Ok(())
    }

    fn prune(&self, now: i64) -> Result<usize, rusqlite::Error> {
        self.conn
            .execute("DELETE FROM cache WHERE expires_at <= ?1", params![now])
    }

    fn clear(&self) -> Result<(), rusqlite::Error> {
        self.conn.execute("DELETE FROM cache", [])?;
        // Without VACUUM the deleted pages stay allocated as free pages.
        self.conn.execute_batch("VACUUM")?;
        Ok(())
    }

    fn count(&self) -> Result<usize, rusqlite::Error> {
        self.conn
            .query_row("SELECT COUNT(*) FROM cache", [], |row| row.get(0))
    }
}

/// Pool of read-only SQLite connections for concurrent L2 lookups.
///
/// Each reader gets its own connection (WAL mode allows concurrent reads).
/// Connections are returned to the pool after use; an empty pool opens a new one.
struct ReadPool {
    pool: Mutex<Vec<Connection>>,
    path: PathBuf,
}

impl ReadPool {
    fn new(path: &Path) -> Self {
        Self {
            pool: Mutex::new(Vec::new()),
            path: path.to_path_buf(),
        }
    }

    fn acquire(&self) -> Result<Connection, rusqlite::Error> {
        if let Ok(mut pool) = self.pool.lock()
            && let Some(conn) = pool.pop()
        {
            return Ok(conn);
        }
        open_sqlite(&self.path, true)
    }

    fn release(&self, conn: Connection) {
        if let Ok(mut pool) = self.pool.lock() {
            pool.push(conn);
        }
    }

    /// Raw row lookup. Expiry is judged by the caller.
    fn get(&self, key: &str) -> Result<Option<CacheEntry>, rusqlite::Error> {
        let conn = self.acquire()?;
        let result = Self::query(&conn, key);
        self.release(conn);
        result
    }

    /// Expiry stamp of the row for `key`, without reading its value.
    fn expiry(&self, key: &str) -> Result<Option<i64>, rusqlite::Error> {
        let conn = self.acquire()?;
        let result = conn
            .prepare_cached("SELECT expires_at FROM cache WHERE key = ?1")
            .and_then(|mut stmt| stmt.query_row(params![key], |row| row.get(0)).optional());
        self.release(conn);
        result
    }

    fn query(conn: &Connection, key: &str) -> Result<Option<CacheEntry>, rusqlite::Error> {
        let mut stmt = conn.prepare_cached("SELECT value, expires_at FROM cache WHERE key = ?1")?;
        stmt.query_row(params![key], |row| {
            Ok(CacheEntry {
                value: row.get(0)?,
                expires_at: row.get(1)?,
            })
        })
        .optional()
    }
}

/// Current wall-clock time in epoch milliseconds.
pub(crate) fn now_ms() -> i64 {
    let ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    i64::try_from(ms).unwrap_or(i64::MAX)
}

fn ttl_ms(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX)
}

/// Thread-safe two-tier TTL cache.
///
/// L1: [`DashMap`] for lock-free concurrent access from fetch tasks.
/// L2: Optional SQLite database; reads use a [`ReadPool`] of concurrent connections,
///     writes go through a single [`SqliteWriter`] behind a [`Mutex`].
pub struct QueryCache {
    entries: DashMap<String, CacheEntry>,
    sqlite_writer: Option<Mutex<SqliteWriter>>,
    read_pool: Option<ReadPool>,
    path: Option<PathBuf>,
    pruned_on_open: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl QueryCache {
    /// Create an in-memory-only cache (no disk persistence).
    pub fn in_memory() -> Self {
        Self {
            entries: DashMap::new(),
            sqlite_writer: None,
            read_pool: None,
            path: None,
            pruned_on_open: 0,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Open a persistent cache backed by a SQLite database at `path`.
    ///
    /// Expired rows are pruned on open. L1 starts empty and fills lazily.
    pub fn open(path: &Path) -> Result<Self, CacheError> {
        let writer = SqliteWriter::open(path)?;
        let pruned = writer.prune(now_ms())?;
        if pruned > 0 {
            tracing::debug!(path = %path.display(), pruned, "pruned expired cache rows on open");
        }
        Ok(Self {
            entries: DashMap::new(),
            sqlite_writer: Some(Mutex::new(writer)),
            read_pool: Some(ReadPool::new(path)),
            path: Some(path.to_path_buf()),
            pruned_on_open: pruned,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        })
    }

    fn with_writer<R>(
        &self,
        f: impl FnOnce(&SqliteWriter) -> Result<R, rusqlite::Error>,
    ) -> Result<Option<R>, CacheError> {
        match self.sqlite_writer {
            Some(ref writer) => {
                let writer = writer.lock().unwrap_or_else(|e| e.into_inner());
                Ok(Some(f(&writer)?))
            }
            None => Ok(None),
        }
    }

    /// Look up `key`, returning `None` when absent, expired, or undecodable.
    ///
    /// With persistence, SQLite is authoritative: an L1 entry is served only
    /// while the row on disk still carries the same expiry stamp, so a clear
    /// or overwrite by another process is seen on the next read. Expired rows
    /// are evicted from both tiers as a side effect. Rows whose JSON no longer
    /// decodes as `T` are treated as absent and removed.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError> {
        let now = now_ms();

        let l1 = self.entries.get(key).map(|e| e.value().clone());
        if let Some(entry) = l1 {
            if entry.is_live(now) && self.still_on_disk(key, entry.expires_at)? {
                return self.decode_hit(key, &entry.value, "L1");
            }
            self.entries
                .remove_if(key, |_, e| e.expires_at == entry.expires_at);
        }

        if let Some(ref pool) = self.read_pool
            && let Some(entry) = pool.get(key)?
        {
            if entry.is_live(now) {
                let decoded = self.decode_hit(key, &entry.value, "L2")?;
                if decoded.is_some() {
                    self.entries.insert(key.to_string(), entry);
                }
                return Ok(decoded);
            }
            tracing::trace!(key, "cache row expired, evicting");
            self.with_writer(|w| w.delete_expired(key, now))?;
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(key, "cache miss");
        Ok(None)
    }

    /// Whether the L2 row for `key` still has expiry `expires_at`. Always true
    /// for an in-memory cache.
    fn still_on_disk(&self, key: &str, expires_at: i64) -> Result<bool, CacheError> {
        match self.read_pool {
            Some(ref pool) => {
                let on_disk = pool.expiry(key)?;
                if on_disk != Some(expires_at) {
                    tracing::trace!(key, "L1 entry stale against disk, dropping");
                }
                Ok(on_disk == Some(expires_at))
            }
            None => Ok(true),
        }
    }

    fn decode_hit<T: DeserializeOwned>(
        &self,
        key: &str,
        text: &str,
        tier: &'static str,
    ) -> Result<Option<T>, CacheError> {
        match serde_json::from_str(text) {
            Ok(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(key, tier, "cache hit");
                Ok(Some(value))
            }
            Err(e) => {
                tracing::warn!(key, error = %e, "cached value does not decode, discarding");
                self.remove(key)?;
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    /// Upsert `key` with an expiry of `now + ttl`. Last write wins.
    pub fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let text = serde_json::to_string(value)?;
        let expires_at = now_ms().saturating_add(ttl_ms(ttl));
        tracing::trace!(key, ttl_ms = ttl_ms(ttl), "cache set");

        let entry = CacheEntry {
            value: text,
            expires_at,
        };
        match self.sqlite_writer {
            // L1 is updated under the writer lock so both tiers see writes in
            // the same order, and never ahead of a failed disk write.
            Some(ref writer) => {
                let writer = writer.lock().unwrap_or_else(|e| e.into_inner());
                writer.upsert(key, &entry.value, expires_at)?;
                self.entries.insert(key.to_string(), entry);
            }
            None => {
                self.entries.insert(key.to_string(), entry);
            }
        }
        Ok(())
    }

    /// Remove a single key from both tiers.
    pub fn remove(&self, key: &str) -> Result<(), CacheError> {
        let removed = self.with_writer(|w| {
            w.delete(key)?;
            self.entries.remove(key);
            Ok(())
        })?;
        if removed.is_none() {
            self.entries.remove(key);
        }
        Ok(())
    }

    /// Delete every expired row. Returns the number of keys removed.
    ///
    /// With persistence the count comes from SQLite (every L1 entry is also
    /// on disk); otherwise it is the number of L1 entries dropped.
    pub fn prune(&self) -> Result<usize, CacheError> {
        let now = now_ms();
        let mut l1_removed = 0usize;
        self.entries.retain(|_, entry| {
            if entry.is_live(now) {
                true
            } else {
                l1_removed += 1;
                false
            }
        });
        let removed = self.with_writer(|w| w.prune(now))?.unwrap_or(l1_removed);
        tracing::debug!(removed, "cache pruned");
        Ok(removed)
    }

    /// Remove all entries from both L1 and L2.
    pub fn clear(&self) -> Result<(), CacheError> {
        let cleared = self.with_writer(|w| {
            w.clear()?;
            self.entries.clear();
            Ok(())
        })?;
        if cleared.is_none() {
            self.entries.clear();
        }
        Ok(())
    }

    /// Number of cache hits since creation.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Number of cache misses since creation.
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Number of entries currently in L1.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Rows in the persistent L2 store (0 if no SQLite backing).
    pub fn disk_len(&self) -> Result<usize, CacheError> {
        Ok(self.with_writer(|w| w.count())?.unwrap_or(0))
    }

    /// Whether this cache has a persistent SQLite backing store.
    pub fn has_persistence(&self) -> bool {
        self.sqlite_writer.is_some()
    }

    /// Expired rows deleted when the SQLite file was opened.
    pub fn pruned_on_open(&self) -> usize {
        self.pruned_on_open
    }

    /// Location of the SQLite file, if persistent.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

impl std::fmt::Debug for QueryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryCache")
            .field("l1_entries", &self.entries.len())
            .field("hits", &self.hits())
            .field("misses", &self.misses())
            .field("path", &self.path)
            .finish()
    }
}

/// Build a [`QueryCache`] from an optional path.
///
/// With a path, opens (creating the parent directory) a persistent cache;
/// if that fails, logs a warning and falls back to memory only.
pub fn build_cache(path: Option<&Path>) -> QueryCache {
    if let Some(path) = path {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        match QueryCache::open(path) {
            Ok(cache) => {
                tracing::info!(path = %path.display(), "opened persistent cache");
                return cache;
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to open cache, falling back to in-memory");
            }
        }
    }
    QueryCache::in_memory()
}
