//! Durable key/value, list and counter storage for session state.
//!
//! The operation set deliberately mirrors a Redis subset (`GET`, `SET`,
//! `RPUSH`, `LRANGE`, `INCR`, `DEL`) so that sessions written by any backend
//! use the same keys and the same list index semantics.
//!
//! Every operation touches exactly one key. There are no cross-key
//! transactions; callers that need ordering across keys must serialize
//! themselves.

mod memory;
#[cfg(feature = "redis-backend")]
mod redis;
mod secure_path;
mod sqlite;

pub use memory::MemoryStore;
#[cfg(feature = "redis-backend")]
pub use redis::{RedisConfig, RedisStore};
pub use sqlite::SqliteStore;

use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend could not be reached or refused the operation.
    #[error("{backend} store unavailable: {message}")]
    Unavailable {
        backend: &'static str,
        message: String,
    },
    /// `INCR` (or a cursor read) hit a value that is not a base-10 integer.
    #[error("value at `{key}` is not an integer")]
    NotAnInteger { key: String },
    #[error("failed to prepare store path: {0}")]
    Io(#[from] std::io::Error),
    #[error("sqlite store error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[cfg(feature = "redis-backend")]
    #[error("redis store error: {0}")]
    Redis(#[from] ::redis::RedisError),
}

impl StoreError {
    pub(crate) fn poisoned(backend: &'static str) -> Self {
        Self::Unavailable {
            backend,
            message: "connection lock poisoned".to_string(),
        }
    }
}

/// Session persistence backend.
///
/// Implementations must be safe to share across tasks; each method is a
/// single atomic operation on one key.
pub trait SessionStore: Send + Sync {
    /// Short backend label used in logs and errors.
    fn backend_name(&self) -> &'static str;

    fn get(&self, key: &str) -> StoreResult<Option<String>>;

    fn set(&self, key: &str, value: &str) -> StoreResult<()>;

    /// Appends to the list at `key`, creating it if needed. Returns the new length.
    fn rpush(&self, key: &str, value: &str) -> StoreResult<u64>;

    /// Inclusive range with Redis index semantics: negative indexes count from
    /// the tail (`-1` is the last element) and out-of-range bounds are clamped.
    fn lrange(&self, key: &str, start: i64, end: i64) -> StoreResult<Vec<String>>;

    /// Increments the integer at `key`, treating an absent key as 0.
    fn incr(&self, key: &str) -> StoreResult<i64>;

    /// Removes `key` regardless of its type. Returns whether anything was removed.
    fn delete(&self, key: &str) -> StoreResult<bool>;
}

/// Resolves Redis-style inclusive `[start, end]` list bounds to a half-open
/// slice range over a list of `len` elements, or `None` when empty.
pub(crate) fn resolve_range(len: usize, start: i64, end: i64) -> Option<(usize, usize)> {
    let len = i64::try_from(len).unwrap_or(i64::MAX);
    if len == 0 {
        return None;
    }

    let start = if start < 0 { len + start } else { start }.max(0);
    let end = if end < 0 { len + end } else { end }.min(len - 1);

    if start > end || start >= len {
        return None;
    }

    Some((start as usize, end as usize + 1))
}

pub(crate) fn parse_counter(key: &str, raw: &str) -> StoreResult<i64> {
    raw.trim().parse::<i64>().map_err(|_| StoreError::NotAnInteger {
        key: key.to_string(),
    })
}
