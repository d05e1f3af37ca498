//! SQLite-backed session store.
//!
//! Scalar values and lists live in separate tables; a key is either a value
//! or a list, never both. List elements are ordered by a per-key sequence
//! number assigned at append time.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{Connection, OptionalExtension, params};

use super::{SessionStore, StoreError, StoreResult, parse_counter, resolve_range, secure_path};

const BACKEND: &str = "sqlite";

const SCHEMA: &str = r"
    CREATE TABLE IF NOT EXISTS kv (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS lists (
        key TEXT NOT NULL,
        seq INTEGER NOT NULL,
        value TEXT NOT NULL,
        PRIMARY KEY (key, seq)
    );
";

#[derive(Debug)]
pub struct SqliteStore {
    db: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens (or creates) a database at `path` with owner-only permissions.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        secure_path::prepare(path)?;
        let db = Connection::open(path)?;
        tracing::debug!(path = %path.display(), "Opened sqlite session store");
        Self::initialize(db)
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        Self::initialize(Connection::open_in_memory()?)
    }

    fn initialize(db: Connection) -> StoreResult<Self> {
        db.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=FULL;")?;
        db.execute_batch(SCHEMA)?;
        Ok(Self { db: Mutex::new(db) })
    }

    fn with_db<T>(&self, f: impl FnOnce(&mut Connection) -> StoreResult<T>) -> StoreResult<T> {
        let mut db = self.db.lock().map_err(|_| StoreError::poisoned(BACKEND))?;
        f(&mut db)
    }
}

fn list_len(db: &Connection, key: &str) -> rusqlite::Result<i64> {
    db.query_row(
        "SELECT COUNT(*) FROM lists WHERE key = ?1",
        params![key],
        |row| row.get(0),
    )
}

impl SessionStore for SqliteStore {
    fn backend_name(&self) -> &'static str {
        BACKEND
    }

    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.with_db(|db| {
            let value = db
                .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                    row.get(0)
                })
                .optional()?;
            Ok(value)
        })
    }

    fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        self.with_db(|db| {
            let tx = db.transaction()?;
            tx.execute("DELETE FROM lists WHERE key = ?1", params![key])?;
            tx.execute(
                "INSERT INTO kv (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )?;
            tx.commit()?;
            Ok(())
        })
    }

    fn rpush(&self, key: &str, value: &str) -> StoreResult<u64> {
        self.with_db(|db| {
            let tx = db.transaction()?;
            tx.execute(
                "INSERT INTO lists (key, seq, value)
                 VALUES (?1, COALESCE((SELECT MAX(seq) + 1 FROM lists WHERE key = ?1), 0), ?2)",
                params![key, value],
            )?;
            let len = list_len(&tx, key)?;
            tx.commit()?;
            Ok(u64::try_from(len).unwrap_or(0))
        })
    }

    fn lrange(&self, key: &str, start: i64, end: i64) -> StoreResult<Vec<String>> {
        self.with_db(|db| {
            let tx = db.transaction()?;
            let len = usize::try_from(list_len(&tx, key)?).unwrap_or(0);
            let Some((from, to)) = resolve_range(len, start, end) else {
                return Ok(Vec::new());
            };

            let mut stmt = tx.prepare(
                "SELECT value FROM lists WHERE key = ?1
                 ORDER BY seq LIMIT ?2 OFFSET ?3",
            )?;
            let limit = i64::try_from(to - from).unwrap_or(i64::MAX);
            let offset = i64::try_from(from).unwrap_or(i64::MAX);
            let values = stmt
                .query_map(params![key, limit, offset], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(values)
        })
    }

    fn incr(&self, key: &str) -> StoreResult<i64> {
        self.with_db(|db| {
            let tx = db.transaction()?;
            let current: Option<String> = tx
                .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                    row.get(0)
                })
                .optional()?;
            let current = match current {
                Some(raw) => parse_counter(key, &raw)?,
                None => 0,
            };
            let next = current
                .checked_add(1)
                .ok_or_else(|| StoreError::NotAnInteger {
                    key: key.to_string(),
                })?;
            tx.execute(
                "INSERT INTO kv (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, next.to_string()],
            )?;
            tx.commit()?;
            Ok(next)
        })
    }

    fn delete(&self, key: &str) -> StoreResult<bool> {
        self.with_db(|db| {
            let tx = db.transaction()?;
            let values = tx.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
            let items = tx.execute("DELETE FROM lists WHERE key = ?1", params![key])?;
            tx.commit()?;
            Ok(values + items > 0)
        })
    }
}
