//! Text-completion provider clients.
//!
//! # Architecture
//!
//! - [`CompletionProvider`] - object-safe seam the orchestrator calls through
//! - [`openai`] - OpenAI-compatible legacy Completions API client
//! - [`retry`] - backoff policy applied before a response is accepted
//!
//! Streaming responses are parsed on a spawned task and delivered through a
//! bounded [`ChunkReceiver`]. The sequence is finite, ordered and cannot be
//! restarted: the channel closes once the provider is exhausted, after an
//! `Err` item, or when the receiver is dropped (which also stops the body
//! read).

pub mod openai;
pub mod retry;
mod sse;

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use threadline_types::{Completion, CompletionChunk, CompletionRequest};
use tokio::sync::mpsc;

pub use openai::{DEFAULT_API_BASE, OpenAiCompletions, OpenAiConfig};
pub use threadline_types;

pub type ProviderFut<'a, T> = Pin<Box<dyn Future<Output = Result<T, ProviderError>> + Send + 'a>>;

/// Fragments of one streamed completion. A closed channel means exhaustion.
pub type ChunkReceiver = mpsc::Receiver<Result<CompletionChunk, ProviderError>>;
pub type ChunkSender = mpsc::Sender<Result<CompletionChunk, ProviderError>>;

/// Capacity of the fragment channel; the parser task waits when it is full.
pub const CHUNK_CHANNEL_CAPACITY: usize = 64;

const CONNECT_TIMEOUT_SECS: u64 = 30;
const TCP_KEEPALIVE_SECS: u64 = 60;
const POOL_MAX_IDLE_PER_HOST: usize = 16;
const POOL_IDLE_TIMEOUT_SECS: u64 = 90;
const MAX_ERROR_BODY_BYTES: usize = 32 * 1024;

pub trait CompletionProvider: Send + Sync {
    /// Short label for logs.
    fn name(&self) -> &'static str;

    /// One-shot completion. `request.stream` is ignored.
    fn complete<'a>(&'a self, request: &'a CompletionRequest) -> ProviderFut<'a, Completion>;

    /// Streamed completion. Resolves once the provider has accepted the
    /// request; fragments then arrive on the returned receiver.
    fn stream<'a>(&'a self, request: &'a CompletionRequest) -> ProviderFut<'a, ChunkReceiver>;
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("no API key configured")]
    MissingApiKey,
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("request failed after {attempts} attempt(s): {source}")]
    Connection {
        attempts: u32,
        #[source]
        source: reqwest::Error,
    },
    #[error("request failed: {0}")]
    Request(#[source] reqwest::Error),
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("stream interrupted: {0}")]
    Stream(String),
    #[error("stream idle for {}s", .0.as_secs())]
    IdleTimeout(Duration),
}

impl ProviderError {
    /// Whether the error came from the remote API rather than the transport.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Shared client settings; callers add a proxy or timeout before building.
pub fn http_client_builder() -> reqwest::ClientBuilder {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .redirect(reqwest::redirect::Policy::none())
        .tcp_keepalive(Some(Duration::from_secs(TCP_KEEPALIVE_SECS)))
        .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
        .pool_idle_timeout(Some(Duration::from_secs(POOL_IDLE_TIMEOUT_SECS)))
}

/// Reads at most 32 KiB of an error body so a misbehaving server cannot
/// stall or bloat error reporting.
pub async fn read_capped_error_body(response: reqwest::Response) -> String {
    use futures_util::StreamExt;

    let mut body = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let Ok(chunk) = chunk else { break };
        body.extend_from_slice(&chunk);
        if body.len() > MAX_ERROR_BODY_BYTES {
            body.truncate(MAX_ERROR_BODY_BYTES);
            let text = String::from_utf8_lossy(&body);
            return format!("{text}...(truncated)");
        }
    }
    String::from_utf8_lossy(&body).into_owned()
}

/// Pulls `error.message` out of an OpenAI-style error body, falling back to
/// the raw text.
fn api_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|json| {
            json.pointer("/error/message")
                .and_then(serde_json::Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.trim().to_string())
}
