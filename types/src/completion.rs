//! Wire types for a text-completion API.
//!
//! The shapes follow the OpenAI legacy Completions endpoint. Unknown fields are
//! ignored and every response field is optional so that compatible servers
//! which omit metadata still parse.

use serde::{Deserialize, Serialize};

use crate::Temperature;

/// One completion call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionRequest {
    pub model: String,
    pub prompt: String,
    pub temperature: Temperature,
    pub max_tokens: u32,
    pub stop: Vec<String>,
    pub stream: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletionChoice {
    #[serde(default)]
    pub index: u32,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub finish_reason: Option<String>,
    /// Emitted instead of `finish_reason` by some chat-tuned completion models.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_details: Option<serde_json::Value>,
}

impl CompletionChoice {
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn finished(reason: impl Into<String>) -> Self {
        Self {
            text: Some(String::new()),
            finish_reason: Some(reason.into()),
            ..Self::default()
        }
    }

    /// Whether the provider flagged this choice as the last one.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finish_reason.is_some() || self.finish_details.is_some()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionUsage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

/// A complete (non-streamed) response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub choices: Vec<CompletionChoice>,
    #[serde(default)]
    pub usage: Option<CompletionUsage>,
}

impl Completion {
    /// Text of the first choice, if present and non-empty.
    #[must_use]
    pub fn first_text(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|choice| choice.text.as_deref())
            .filter(|text| !text.is_empty())
    }
}

/// One fragment of a streamed response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletionChunk {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub choices: Vec<CompletionChoice>,
}

impl CompletionChunk {
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            id: None,
            choices: vec![CompletionChoice::text(text)],
        }
    }

    #[must_use]
    pub fn finished(reason: impl Into<String>) -> Self {
        Self {
            id: None,
            choices: vec![CompletionChoice::finished(reason)],
        }
    }

    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn first_choice(&self) -> Option<&CompletionChoice> {
        self.choices.first()
    }
}
