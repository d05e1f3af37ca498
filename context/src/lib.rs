//! Session persistence and token-bounded prompt assembly
//!
//! This module provides:
//! - The [`SessionStore`] abstraction with in-memory, SQLite and (optionally) Redis backends
//! - Exact token counting via tiktoken
//! - [`ContextBuilder`], which trims the oldest history until a prompt fits the model ceiling
//!
//! # Architecture
//!
//! ```text
//! ContextBuilder
//! ├── store: Arc<dyn SessionStore> (base prompt, history list, history cursor)
//! ├── counter: Arc<dyn CountTokens> (tiktoken)
//! ├── markers: TurnMarkers (turn layout)
//! └── limits: ContextLimits (ceiling + reply reserve)
//!
//! AssembledPrompt (ephemeral result)
//! └── prompt + remaining reply budget
//! ```

mod builder;
mod store;
mod token_counter;

pub use builder::{
    AssembledPrompt, ContextBuilder, ContextLimits, DEFAULT_MAX_TOKENS, default_base_prompt,
    read_history_cursor,
};
#[cfg(feature = "redis-backend")]
pub use store::{RedisConfig, RedisStore};
pub use store::{MemoryStore, SessionStore, SqliteStore, StoreError, StoreResult};
pub use token_counter::{CountTokens, Encoding, TokenCounter, UnknownEncoding};
