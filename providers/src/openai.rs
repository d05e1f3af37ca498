//! OpenAI-compatible legacy Completions API (`POST {api_base}/completions`).

use std::time::Duration;

use threadline_types::{ApiKey, Completion, CompletionRequest};
use tokio::sync::mpsc;

use crate::retry::{RetryConfig, RetryOutcome, send_with_retry};
use crate::sse::{DEFAULT_STREAM_IDLE_TIMEOUT, process_sse_stream};
use crate::{
    CHUNK_CHANNEL_CAPACITY, ChunkReceiver, CompletionProvider, ProviderError, ProviderFut,
    api_error_message, http_client_builder, read_capped_error_body,
};

pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: ApiKey,
    /// Base URL without the `/completions` suffix.
    pub api_base: String,
    /// Proxy URL applied to every scheme.
    pub proxy: Option<String>,
    pub retry: RetryConfig,
    /// Longest silence tolerated between streamed fragments.
    pub stream_idle_timeout: Duration,
}

impl OpenAiConfig {
    #[must_use]
    pub fn new(api_key: ApiKey) -> Self {
        Self {
            api_key,
            api_base: DEFAULT_API_BASE.to_string(),
            proxy: None,
            retry: RetryConfig::default(),
            stream_idle_timeout: DEFAULT_STREAM_IDLE_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    #[must_use]
    pub fn with_proxy(mut self, proxy: Option<String>) -> Self {
        self.proxy = proxy.filter(|p| !p.trim().is_empty());
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn with_stream_idle_timeout(mut self, timeout: Duration) -> Self {
        self.stream_idle_timeout = timeout;
        self
    }
}

#[derive(Debug, Clone)]
pub struct OpenAiCompletions {
    client: reqwest::Client,
    endpoint: String,
    auth_header: String,
    retry: RetryConfig,
    idle_timeout: Duration,
}

impl OpenAiCompletions {
    pub fn new(config: OpenAiConfig) -> Result<Self, ProviderError> {
        if config.api_key.is_empty() {
            return Err(ProviderError::MissingApiKey);
        }

        let mut builder = http_client_builder();
        if let Some(proxy) = &config.proxy {
            let proxy = reqwest::Proxy::all(proxy).map_err(ProviderError::Client)?;
            builder = builder.proxy(proxy);
        }
        let client = builder.build().map_err(ProviderError::Client)?;

        Ok(Self {
            client,
            endpoint: format!("{}/completions", config.api_base.trim_end_matches('/')),
            auth_header: format!("Bearer {}", config.api_key.expose_secret()),
            retry: config.retry,
            idle_timeout: config.stream_idle_timeout,
        })
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Sends `body`, retrying per policy, and returns the accepted 2xx response.
    async fn send(&self, body: &CompletionRequest) -> Result<reqwest::Response, ProviderError> {
        let outcome = send_with_retry(
            || {
                self.client
                    .post(&self.endpoint)
                    .header("Authorization", &self.auth_header)
                    .json(body)
            },
            &self.retry,
        )
        .await;

        match outcome {
            RetryOutcome::Success(response) => Ok(response),
            RetryOutcome::HttpError(response) => {
                let status = response.status().as_u16();
                let body = read_capped_error_body(response).await;
                Err(ProviderError::Api {
                    status,
                    message: api_error_message(&body),
                })
            }
            RetryOutcome::ConnectionError { attempts, source } => {
                Err(ProviderError::Connection { attempts, source })
            }
            RetryOutcome::NonRetryable(err) => Err(ProviderError::Request(err)),
        }
    }

    async fn complete_once(&self, request: &CompletionRequest) -> Result<Completion, ProviderError> {
        let body = CompletionRequest {
            stream: false,
            ..request.clone()
        };
        let response = self.send(&body).await?;
        let text = response.text().await.map_err(ProviderError::Request)?;
        let completion: Completion = serde_json::from_str(&text)
            .map_err(|err| ProviderError::InvalidResponse(err.to_string()))?;

        tracing::debug!(
            model = %body.model,
            choices = completion.choices.len(),
            usage = ?completion.usage,
            "Completion received"
        );
        Ok(completion)
    }

    async fn open_stream(&self, request: &CompletionRequest) -> Result<ChunkReceiver, ProviderError> {
        let body = CompletionRequest {
            stream: true,
            ..request.clone()
        };
        let response = self.send(&body).await?;

        let (tx, rx) = mpsc::channel(CHUNK_CHANNEL_CAPACITY);
        let idle_timeout = self.idle_timeout;
        tokio::spawn(process_sse_stream(response, tx, idle_timeout));

        tracing::debug!(model = %body.model, "Completion stream opened");
        Ok(rx)
    }
}

impl CompletionProvider for OpenAiCompletions {
    fn name(&self) -> &'static str {
        "openai"
    }

    fn complete<'a>(&'a self, request: &'a CompletionRequest) -> ProviderFut<'a, Completion> {
        Box::pin(self.complete_once(request))
    }

    fn stream<'a>(&'a self, request: &'a CompletionRequest) -> ProviderFut<'a, ChunkReceiver> {
        Box::pin(self.open_stream(request))
    }
}
