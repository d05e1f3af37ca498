//! Per-turn orchestration: assemble context, call the provider, commit history.

use std::sync::Arc;

use threadline_context::{
    ContextBuilder, ContextLimits, CountTokens, SessionStore, read_history_cursor,
};
use threadline_providers::CompletionProvider;
use threadline_types::{
    Completion, CompletionRequest, STOP_SEQUENCE, SessionId, StoreKeys, Temperature, TurnMarkers,
};

use crate::ChatError;
use crate::turn::{PendingCommit, TurnStream};

/// Settings fixed for the lifetime of an orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub model: String,
    pub markers: TurnMarkers,
    /// Inserted into the default base prompt.
    pub extra_prompt: String,
    pub limits: ContextLimits,
}

/// Snapshot of a session's stored history.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionHistory {
    /// Every record ever committed, oldest first, evicted ones included.
    pub records: Vec<String>,
    /// Index of the first record still eligible for prompts.
    pub cursor: usize,
}

impl SessionHistory {
    /// Reads a session's records and cursor from `store` without touching
    /// them. A cursor past the end is clamped to the record count.
    pub fn load(store: &dyn SessionStore, session: &SessionId) -> Result<Self, ChatError> {
        let keys = StoreKeys::for_session(session);
        let records = store.lrange(&keys.history, 0, -1)?;
        let cursor = read_history_cursor(store, session)?.min(records.len());
        Ok(Self { records, cursor })
    }

    /// Records still eligible for prompts.
    #[must_use]
    pub fn active(&self) -> &[String] {
        &self.records[self.cursor.min(self.records.len())..]
    }

    #[must_use]
    pub fn evicted(&self) -> &[String] {
        &self.records[..self.cursor.min(self.records.len())]
    }
}

/// Deletes the session's base prompt, history and cursor. Idempotent.
pub fn reset_session(store: &dyn SessionStore, session: &SessionId) -> Result<(), ChatError> {
    for key in StoreKeys::for_session(session).all() {
        store.delete(key)?;
    }
    tracing::debug!(session = %session, "Session reset");
    Ok(())
}

pub struct SessionOrchestrator {
    config: SessionConfig,
    store: Arc<dyn SessionStore>,
    provider: Arc<dyn CompletionProvider>,
    builder: ContextBuilder,
}

impl std::fmt::Debug for SessionOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionOrchestrator")
            .field("config", &self.config)
            .field("store", &self.store.backend_name())
            .field("provider", &self.provider.name())
            .finish_non_exhaustive()
    }
}

impl SessionOrchestrator {
    #[must_use]
    pub fn new(
        config: SessionConfig,
        store: Arc<dyn SessionStore>,
        provider: Arc<dyn CompletionProvider>,
        counter: Arc<dyn CountTokens>,
    ) -> Self {
        let builder = ContextBuilder::new(Arc::clone(&store), counter, config.markers.clone())
            .with_limits(config.limits)
            .with_extra_prompt(config.extra_prompt.clone());
        Self {
            config,
            store,
            provider,
            builder,
        }
    }

    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    fn prepare(
        &self,
        session: &SessionId,
        user_message: &str,
        temperature: Temperature,
        stream: bool,
    ) -> Result<CompletionRequest, ChatError> {
        let assembled = self.builder.build(session, user_message)?;
        let Some(max_tokens) = assembled.reply_budget() else {
            tracing::warn!(
                session = %session,
                prompt_tokens = assembled.prompt_tokens,
                ceiling = self.config.limits.max_tokens,
                "Refusing turn: prompt leaves no room for a reply"
            );
            return Err(ChatError::ContextOverflow {
                prompt_tokens: assembled.prompt_tokens,
                ceiling: self.config.limits.max_tokens,
            });
        };

        tracing::debug!(
            session = %session,
            prompt_tokens = assembled.prompt_tokens,
            max_tokens,
            evicted = assembled.evicted,
            history_entries = assembled.history_entries,
            stream,
            "Prompt assembled"
        );

        Ok(CompletionRequest {
            model: self.config.model.clone(),
            prompt: assembled.prompt,
            temperature,
            max_tokens,
            stop: vec![STOP_SEQUENCE.to_string()],
            stream,
        })
    }

    fn pending_commit(&self, session: &SessionId, user_message: &str) -> PendingCommit {
        PendingCommit {
            store: Arc::clone(&self.store),
            session: session.clone(),
            user_message: user_message.to_string(),
            markers: self.config.markers.clone(),
        }
    }

    /// Runs one turn without streaming and returns the provider's full response.
    ///
    /// History gains one record only if the response carried text.
    pub async fn ask(
        &self,
        session: &SessionId,
        user_message: &str,
        temperature: Temperature,
    ) -> Result<Completion, ChatError> {
        let request = self.prepare(session, user_message, temperature, false)?;
        let completion = self.provider.complete(&request).await?;

        let Some(reply) = completion.first_text() else {
            tracing::warn!(session = %session, "Completion had no text; history unchanged");
            return Err(ChatError::EmptyCompletion);
        };
        self.pending_commit(session, user_message).commit(reply)?;
        Ok(completion)
    }

    /// Starts a streamed turn. History is written when the returned stream
    /// completes, never if it is dropped early or fails.
    pub async fn ask_stream(
        &self,
        session: &SessionId,
        user_message: &str,
        temperature: Temperature,
    ) -> Result<TurnStream, ChatError> {
        let request = self.prepare(session, user_message, temperature, true)?;
        let rx = self.provider.stream(&request).await?;
        Ok(TurnStream::new(
            rx,
            self.pending_commit(session, user_message),
        ))
    }

    /// Stores `content` as the session's base prompt. Empty content is
    /// ignored; returns whether anything was written.
    pub fn set_base_prompt(&self, session: &SessionId, content: &str) -> Result<bool, ChatError> {
        if content.is_empty() {
            return Ok(false);
        }
        let keys = StoreKeys::for_session(session);
        self.store
            .set(&keys.base_prompt, &TurnMarkers::stored_base_prompt(content))?;
        tracing::debug!(session = %session, "Base prompt updated");
        Ok(true)
    }

    /// See [`reset_session`].
    pub fn reset(&self, session: &SessionId) -> Result<(), ChatError> {
        reset_session(self.store.as_ref(), session)
    }

    pub fn history(&self, session: &SessionId) -> Result<SessionHistory, ChatError> {
        SessionHistory::load(self.store.as_ref(), session)
    }

    /// The base prompt the next turn would use.
    pub fn base_prompt(&self, session: &SessionId) -> Result<String, ChatError> {
        Ok(self.builder.base_prompt(session)?)
    }
}
