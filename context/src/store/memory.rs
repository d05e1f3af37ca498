use std::collections::HashMap;
use std::sync::Mutex;

use super::{SessionStore, StoreError, StoreResult, parse_counter, resolve_range};

const BACKEND: &str = "memory";

#[derive(Debug, Default)]
struct MemoryState {
    values: HashMap<String, String>,
    lists: HashMap<String, Vec<String>>,
}

/// Process-local store. Nothing survives a restart.
///
/// Used by tests and by throwaway interactive sessions.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently holding a value or a list.
    #[must_use]
    pub fn key_count(&self) -> usize {
        self.state
            .lock()
            .map(|state| state.values.len() + state.lists.len())
            .unwrap_or(0)
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut MemoryState) -> StoreResult<T>) -> StoreResult<T> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| StoreError::poisoned(BACKEND))?;
        f(&mut state)
    }
}

impl SessionStore for MemoryStore {
    fn backend_name(&self) -> &'static str {
        BACKEND
    }

    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.with_state(|state| Ok(state.values.get(key).cloned()))
    }

    fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        self.with_state(|state| {
            state.lists.remove(key);
            state.values.insert(key.to_string(), value.to_string());
            Ok(())
        })
    }

    fn rpush(&self, key: &str, value: &str) -> StoreResult<u64> {
        self.with_state(|state| {
            let list = state.lists.entry(key.to_string()).or_default();
            list.push(value.to_string());
            Ok(list.len() as u64)
        })
    }

    fn lrange(&self, key: &str, start: i64, end: i64) -> StoreResult<Vec<String>> {
        self.with_state(|state| {
            let Some(list) = state.lists.get(key) else {
                return Ok(Vec::new());
            };
            Ok(resolve_range(list.len(), start, end)
                .map(|(from, to)| list[from..to].to_vec())
                .unwrap_or_default())
        })
    }

    fn incr(&self, key: &str) -> StoreResult<i64> {
        self.with_state(|state| {
            let current = match state.values.get(key) {
                Some(raw) => parse_counter(key, raw)?,
                None => 0,
            };
            let next = current.checked_add(1).ok_or_else(|| StoreError::NotAnInteger {
                key: key.to_string(),
            })?;
            state.values.insert(key.to_string(), next.to_string());
            Ok(next)
        })
    }

    fn delete(&self, key: &str) -> StoreResult<bool> {
        self.with_state(|state| {
            let had_value = state.values.remove(key).is_some();
            let had_list = state.lists.remove(key).is_some();
            Ok(had_value || had_list)
        })
    }
}
