//! Redis-backed session store.
//!
//! Uses plain Redis commands, so session keys written here are readable by any
//! other client of the same server.

use std::sync::Mutex;

use redis::{Client, Connection, ConnectionAddr, ConnectionInfo, RedisConnectionInfo};

use super::{SessionStore, StoreError, StoreResult};

const BACKEND: &str = "redis";

#[derive(Clone, PartialEq, Eq)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 6379,
            username: None,
            password: None,
        }
    }
}

impl std::fmt::Debug for RedisConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl RedisConfig {
    fn connection_info(&self) -> ConnectionInfo {
        ConnectionInfo {
            addr: ConnectionAddr::Tcp(self.host.clone(), self.port),
            redis: RedisConnectionInfo {
                db: 0,
                username: self.username.clone().filter(|u| !u.is_empty()),
                password: self.password.clone().filter(|p| !p.is_empty()),
                ..RedisConnectionInfo::default()
            },
        }
    }
}

/// A single synchronous connection, re-established after I/O failures.
pub struct RedisStore {
    client: Client,
    conn: Mutex<Option<Connection>>,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore").finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Connects eagerly so that a bad address fails at startup.
    pub fn connect(config: &RedisConfig) -> StoreResult<Self> {
        let client = Client::open(config.connection_info())?;
        let conn = client.get_connection()?;
        tracing::debug!(host = %config.host, port = config.port, "Connected to redis session store");
        Ok(Self {
            client,
            conn: Mutex::new(Some(conn)),
        })
    }

    fn query<T: redis::FromRedisValue>(&self, cmd: &redis::Cmd) -> StoreResult<T> {
        let mut slot = self.conn.lock().map_err(|_| StoreError::poisoned(BACKEND))?;
        if slot.is_none() {
            *slot = Some(self.client.get_connection()?);
        }
        let Some(conn) = slot.as_mut() else {
            return Err(StoreError::Unavailable {
                backend: BACKEND,
                message: "no connection".to_string(),
            });
        };

        match cmd.query(conn) {
            Ok(value) => Ok(value),
            Err(err) => {
                if err.is_io_error() || err.is_connection_dropped() {
                    tracing::warn!(error = %err, "Redis connection lost; will reconnect");
                    *slot = None;
                }
                Err(map_error(err))
            }
        }
    }
}

fn map_error(err: redis::RedisError) -> StoreError {
    if err.kind() == redis::ErrorKind::ResponseError
        && err.detail().is_some_and(|detail| detail.contains("not an integer"))
    {
        return StoreError::NotAnInteger {
            key: String::new(),
        };
    }
    StoreError::Redis(err)
}

impl SessionStore for RedisStore {
    fn backend_name(&self) -> &'static str {
        BACKEND
    }

    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.query(redis::cmd("GET").arg(key))
    }

    fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        self.query(redis::cmd("SET").arg(key).arg(value))
    }

    fn rpush(&self, key: &str, value: &str) -> StoreResult<u64> {
        self.query(redis::cmd("RPUSH").arg(key).arg(value))
    }

    fn lrange(&self, key: &str, start: i64, end: i64) -> StoreResult<Vec<String>> {
        self.query(redis::cmd("LRANGE").arg(key).arg(start).arg(end))
    }

    fn incr(&self, key: &str) -> StoreResult<i64> {
        self.query::<i64>(redis::cmd("INCR").arg(key))
            .map_err(|err| match err {
                StoreError::NotAnInteger { .. } => StoreError::NotAnInteger {
                    key: key.to_string(),
                },
                other => other,
            })
    }

    fn delete(&self, key: &str) -> StoreResult<bool> {
        let removed: u64 = self.query(redis::cmd("DEL").arg(key))?;
        Ok(removed > 0)
    }
}
