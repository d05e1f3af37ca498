use threadline_context::StoreError;
use threadline_providers::ProviderError;

/// Failure of a single turn or session operation.
///
/// None of these leave a partial history record behind; only history cursor
/// advances already persisted before the failure remain.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    /// The provider answered without usable text.
    #[error("completion contained no text")]
    EmptyCompletion,
    /// The store could not be reached or rejected an operation.
    #[error("session store unavailable: {0}")]
    StoreUnavailable(StoreError),
    /// The store answered, but a session value it holds is malformed.
    #[error("session data is corrupt: {0}")]
    CorruptSession(StoreError),
    #[error("completion provider unavailable: {0}")]
    ProviderUnavailable(#[from] ProviderError),
    /// Even with all history evicted the prompt leaves no room for a reply.
    #[error("prompt needs {prompt_tokens} tokens but the context window is {ceiling}")]
    ContextOverflow { prompt_tokens: u32, ceiling: u32 },
}

impl From<StoreError> for ChatError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotAnInteger { .. } => Self::CorruptSession(err),
            other => Self::StoreUnavailable(other),
        }
    }
}
