//! Session orchestration for Threadline.
//!
//! [`SessionOrchestrator`] ties a [`SessionStore`], a [`CompletionProvider`]
//! and a token counter together. Each turn:
//!
//! 1. assembles a prompt that fits the context window, evicting the oldest
//!    history when needed;
//! 2. calls the provider, either one-shot ([`SessionOrchestrator::ask`]) or
//!    streamed ([`SessionOrchestrator::ask_stream`]);
//! 3. appends exactly one history record, and only for a completed turn.
//!
//! Callers serialize turns per session; there is no per-session locking.

mod config;
mod error;
mod orchestrator;
mod turn;


pub use config::{
    AppConfig, ConfigError, ContextConfig, DEFAULT_MODEL, ProviderConfig, StoreBackend,
    StoreConfig, ThreadlineConfig, config_dir, config_path, expand_env_vars,
};
pub use error::ChatError;
pub use orchestrator::{SessionConfig, SessionHistory, SessionOrchestrator, reset_session};
pub use turn::TurnStream;

pub use threadline_context::{
    self, ContextLimits, CountTokens, Encoding, MemoryStore, SessionStore, SqliteStore,
    StoreError, TokenCounter,
};
pub use threadline_providers::{self, CompletionProvider, OpenAiCompletions, ProviderError};
pub use threadline_types::{self, SessionId, Temperature, TurnMarkers};
