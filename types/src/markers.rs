//! Structural markers separating turns inside a plain-text prompt.
//!
//! These strings are part of the persisted history format and the prompt sent
//! to the provider, so changing any of them invalidates stored sessions.

use crate::SessionId;

/// Delimiter the provider uses to know where a turn ends. Also appended to
/// every stored base prompt.
pub const STOP_SEQUENCE: &str = "\n\n\n";

/// Prefix of every user turn (followed by a single space).
pub const USER_PREFIX: &str = "User:";

/// Provider end-of-turn token emitted by chat-tuned completion models.
pub const DEFAULT_END_MARKER: &str = "<|im_end|>";

pub const DEFAULT_BOT_NAME: &str = "ChatGPT";

/// Bot identity plus the end marker; everything needed to format a turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnMarkers {
    bot_name: String,
    end_marker: String,
}

impl Default for TurnMarkers {
    fn default() -> Self {
        Self::new(DEFAULT_BOT_NAME, DEFAULT_END_MARKER)
    }
}

impl TurnMarkers {
    #[must_use]
    pub fn new(bot_name: impl Into<String>, end_marker: impl Into<String>) -> Self {
        Self {
            bot_name: bot_name.into(),
            end_marker: end_marker.into(),
        }
    }

    #[must_use]
    pub fn bot_name(&self) -> &str {
        &self.bot_name
    }

    #[must_use]
    pub fn end_marker(&self) -> &str {
        &self.end_marker
    }

    /// `"<bot>:"` with no trailing space; the provider continues from here.
    #[must_use]
    pub fn bot_label(&self) -> String {
        format!("{}:", self.bot_name)
    }

    /// The new-turn suffix of an assembled prompt:
    /// `"User: <msg>\n<bot>:"`.
    #[must_use]
    pub fn prompt_tail(&self, user_message: &str) -> String {
        format!("{USER_PREFIX} {user_message}\n{}", self.bot_label())
    }

    /// One persisted history entry:
    /// `"User: <msg>\n\n\n<bot>: <reply><end-marker>\n"`.
    #[must_use]
    pub fn history_record(&self, user_message: &str, reply: &str) -> String {
        format!(
            "{USER_PREFIX} {user_message}{STOP_SEQUENCE}{} {reply}{}\n",
            self.bot_label(),
            self.end_marker
        )
    }

    #[must_use]
    pub fn is_end_marker(&self, text: &str) -> bool {
        !self.end_marker.is_empty() && text == self.end_marker
    }

    /// Removes one trailing end marker, if present.
    #[must_use]
    pub fn strip_end_marker<'a>(&self, reply: &'a str) -> &'a str {
        if self.end_marker.is_empty() {
            return reply;
        }
        reply.strip_suffix(self.end_marker.as_str()).unwrap_or(reply)
    }

    /// Stored form of a caller-supplied base prompt.
    #[must_use]
    pub fn stored_base_prompt(content: &str) -> String {
        format!("{content}{STOP_SEQUENCE}")
    }
}

/// Store keys owned by one session.
///
/// The naming is fixed for compatibility with sessions persisted by earlier
/// deployments sharing the same store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreKeys {
    pub base_prompt: String,
    pub history: String,
    pub history_start: String,
}

impl StoreKeys {
    #[must_use]
    pub fn for_session(id: &SessionId) -> Self {
        let id = id.as_str();
        Self {
            base_prompt: format!("base_prompt_{id}"),
            history: format!("chat_history_{id}"),
            history_start: format!("chat_history_start_{id}"),
        }
    }

    /// Every key, in deletion order.
    #[must_use]
    pub fn all(&self) -> [&str; 3] {
        [&self.base_prompt, &self.history, &self.history_start]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn helper() -> TurnMarkers {
        TurnMarkers::new("Helper", "<end>")
    }

    #[test]
    fn history_record_layout() {
        assert_eq!(
            helper().history_record("Hi", "Hello"),
            "User: Hi\n\n\nHelper: Hello<end>\n"
        );
    }

    #[test]
    fn prompt_tail_ends_with_bot_label() {
        assert_eq!(helper().prompt_tail("Hi"), "User: Hi\nHelper:");
    }

    #[test]
    fn strip_end_marker_removes_only_one_suffix() {
        let markers = helper();
        assert_eq!(markers.strip_end_marker("Hello<end>"), "Hello");
        assert_eq!(markers.strip_end_marker("Hello<end><end>"), "Hello<end>");
        assert_eq!(markers.strip_end_marker("Hello"), "Hello");
    }

    #[test]
    fn empty_end_marker_never_matches() {
        let markers = TurnMarkers::new("Bot", "");
        assert!(!markers.is_end_marker(""));
        assert_eq!(markers.strip_end_marker("abc"), "abc");
    }

    #[test]
    fn stored_base_prompt_appends_stop_sequence() {
        assert_eq!(
            TurnMarkers::stored_base_prompt("You are Helper."),
            "You are Helper.\n\n\n"
        );
    }

    #[test]
    fn store_keys_use_fixed_prefixes() {
        let keys = SessionId::new("42").unwrap().keys();
        assert_eq!(keys.base_prompt, "base_prompt_42");
        assert_eq!(keys.history, "chat_history_42");
        assert_eq!(keys.history_start, "chat_history_start_42");
        assert_eq!(keys.all().len(), 3);
    }
}
