//! Token-bounded prompt assembly.
//!
//! A prompt is `base_prompt + history[cursor..].join("\n") + "User: <msg>\n<bot>:"`.
//! When that exceeds the model ceiling, the oldest remaining history entry is
//! dropped and the persisted cursor advanced, one entry at a time, until the
//! prompt fits or no history remains.
//!
//! History entries are never deleted; eviction only moves the cursor.

use std::sync::Arc;

use chrono::{Local, NaiveDate};
use threadline_types::{SessionId, StoreKeys, TurnMarkers};

use crate::store::{SessionStore, StoreResult, parse_counter};
use crate::token_counter::CountTokens;

/// Context window of the legacy completion models.
pub const DEFAULT_MAX_TOKENS: u32 = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextLimits {
    /// Hard ceiling shared by prompt and reply.
    pub max_tokens: u32,
    /// Tokens that must remain for the reply before a prompt counts as fitting.
    pub min_reply_tokens: u32,
}

impl Default for ContextLimits {
    fn default() -> Self {
        Self {
            max_tokens: DEFAULT_MAX_TOKENS,
            min_reply_tokens: 0,
        }
    }
}

impl ContextLimits {
    fn fits(&self, prompt_tokens: u32) -> bool {
        u64::from(prompt_tokens) + u64::from(self.min_reply_tokens) <= u64::from(self.max_tokens)
    }
}

/// Result of one assembly. Not persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledPrompt {
    pub prompt: String,
    pub prompt_tokens: u32,
    /// `max_tokens - prompt_tokens`; zero or negative when even an empty
    /// history could not fit.
    pub remaining_tokens: i64,
    /// Entries evicted during this assembly.
    pub evicted: usize,
    /// History entries included in `prompt`.
    pub history_entries: usize,
}

impl AssembledPrompt {
    /// Reply budget, or `None` if the prompt alone fills the window.
    #[must_use]
    pub fn reply_budget(&self) -> Option<u32> {
        u32::try_from(self.remaining_tokens)
            .ok()
            .filter(|budget| *budget > 0)
    }
}

/// Base prompt used when a session has none stored.
///
/// The trailing blank line separates it from the first history record.
#[must_use]
pub fn default_base_prompt(bot_name: &str, extra_prompt: &str, today: NaiveDate) -> String {
    let extra = extra_prompt.trim();
    let extra = if extra.is_empty() {
        String::new()
    } else {
        format!(" {extra}")
    };
    format!(
        "Your name is {bot_name}.{extra} Please answer conversationally. Today's date is: {}\n\n",
        today.format("%Y-%m-%d")
    )
}

pub struct ContextBuilder {
    store: Arc<dyn SessionStore>,
    counter: Arc<dyn CountTokens>,
    markers: TurnMarkers,
    limits: ContextLimits,
    extra_prompt: String,
}

impl std::fmt::Debug for ContextBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextBuilder")
            .field("store", &self.store.backend_name())
            .field("markers", &self.markers)
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

impl ContextBuilder {
    #[must_use]
    pub fn new(
        store: Arc<dyn SessionStore>,
        counter: Arc<dyn CountTokens>,
        markers: TurnMarkers,
    ) -> Self {
        Self {
            store,
            counter,
            markers,
            limits: ContextLimits::default(),
            extra_prompt: String::new(),
        }
    }

    #[must_use]
    pub fn with_limits(mut self, limits: ContextLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Text inserted into the default base prompt after the bot's name.
    #[must_use]
    pub fn with_extra_prompt(mut self, extra_prompt: impl Into<String>) -> Self {
        self.extra_prompt = extra_prompt.into();
        self
    }

    #[must_use]
    pub fn limits(&self) -> ContextLimits {
        self.limits
    }

    #[must_use]
    pub fn markers(&self) -> &TurnMarkers {
        &self.markers
    }

    /// The stored base prompt, or the dated default when unset or empty.
    pub fn base_prompt(&self, session: &SessionId) -> StoreResult<String> {
        let keys = StoreKeys::for_session(session);
        match self.store.get(&keys.base_prompt)? {
            Some(stored) if !stored.is_empty() => Ok(stored),
            _ => Ok(default_base_prompt(
                self.markers.bot_name(),
                &self.extra_prompt,
                Local::now().date_naive(),
            )),
        }
    }

    /// Persisted history cursor, 0 when unset.
    pub fn history_cursor(&self, session: &SessionId) -> StoreResult<usize> {
        read_history_cursor(self.store.as_ref(), session)
    }

    /// Assembles the prompt for `user_message`, evicting history as needed.
    ///
    /// Each eviction is persisted before the prompt is recomputed, so a store
    /// failure part-way leaves only the increments already applied.
    ///
    /// The entries skipped follow the value `INCR` returns rather than a local
    /// count, so overlapping turns on one session share their evictions. A
    /// cursor found beyond the end of history is written back as the history
    /// length.
    pub fn build(&self, session: &SessionId, user_message: &str) -> StoreResult<AssembledPrompt> {
        let keys = StoreKeys::for_session(session);
        let base = self.base_prompt(session)?;
        let mut cursor = self.history_cursor(session)?;
        let entries = self
            .store
            .lrange(&keys.history, i64::try_from(cursor).unwrap_or(i64::MAX), -1)?;
        if entries.is_empty() && cursor > 0 {
            cursor = self.clamp_cursor(session, &keys, cursor)?;
        }
        let end = cursor + entries.len();
        let tail = self.markers.prompt_tail(user_message);

        let mut skip = 0;
        loop {
            let remaining = &entries[skip..];
            let prompt = format!("{base}{}{tail}", remaining.join("\n"));
            let prompt_tokens = self.counter.count(&prompt);

            if self.limits.fits(prompt_tokens) || remaining.is_empty() {
                let assembled = AssembledPrompt {
                    prompt,
                    prompt_tokens,
                    remaining_tokens: i64::from(self.limits.max_tokens) - i64::from(prompt_tokens),
                    evicted: skip,
                    history_entries: remaining.len(),
                };
                if !self.limits.fits(prompt_tokens) {
                    tracing::warn!(
                        session = %session,
                        prompt_tokens,
                        max_tokens = self.limits.max_tokens,
                        "Prompt exceeds context window with no history left to evict"
                    );
                }
                return Ok(assembled);
            }

            let new_cursor = usize::try_from(self.store.incr(&keys.history_start)?).unwrap_or(0);
            skip = new_cursor
                .saturating_sub(cursor)
                .clamp(skip + 1, entries.len());
            tracing::debug!(
                session = %session,
                prompt_tokens,
                cursor = new_cursor,
                "Evicted oldest history entry"
            );

            if new_cursor > end {
                tracing::warn!(
                    session = %session,
                    cursor = new_cursor,
                    history_len = end,
                    "Concurrent eviction overshot history; clamping cursor"
                );
                self.store.set(&keys.history_start, &end.to_string())?;
            }
        }
    }

    fn clamp_cursor(
        &self,
        session: &SessionId,
        keys: &StoreKeys,
        cursor: usize,
    ) -> StoreResult<usize> {
        let len = self.store.lrange(&keys.history, 0, -1)?.len();
        if cursor <= len {
            return Ok(cursor);
        }
        tracing::warn!(
            session = %session,
            cursor,
            history_len = len,
            "History cursor past end of history; clamping"
        );
        self.store.set(&keys.history_start, &len.to_string())?;
        Ok(len)
    }
}

/// Reads a session's history cursor straight from `store`, 0 when unset.
///
/// A value that is not an integer is reported as
/// [`StoreError::NotAnInteger`](crate::StoreError::NotAnInteger).
pub fn read_history_cursor(store: &dyn SessionStore, session: &SessionId) -> StoreResult<usize> {
    let key = StoreKeys::for_session(session).history_start;
    let Some(raw) = store.get(&key)? else {
        return Ok(0);
    };
    Ok(usize::try_from(parse_counter(&key, &raw)?).unwrap_or(0))
}
