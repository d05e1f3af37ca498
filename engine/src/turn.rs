//! Consumer side of one streamed turn.

use std::sync::Arc;

use futures_util::Stream;
use threadline_context::SessionStore;
use threadline_providers::ChunkReceiver;
use threadline_types::{SessionId, StoreKeys, TurnMarkers};

use crate::ChatError;

/// Everything needed to append the finished turn to history.
pub(crate) struct PendingCommit {
    pub(crate) store: Arc<dyn SessionStore>,
    pub(crate) session: SessionId,
    pub(crate) user_message: String,
    pub(crate) markers: TurnMarkers,
}

impl PendingCommit {
    /// Appends exactly one history record for `reply`.
    pub(crate) fn commit(self, reply: &str) -> Result<(), ChatError> {
        let reply = self.markers.strip_end_marker(reply);
        let record = self.markers.history_record(&self.user_message, reply);
        let keys = StoreKeys::for_session(&self.session);
        let len = self.store.rpush(&keys.history, &record)?;
        tracing::debug!(
            session = %self.session,
            history_len = len,
            reply_bytes = reply.len(),
            "Committed turn to history"
        );
        Ok(())
    }
}

/// Reply fragments of one turn, in provider order.
///
/// The turn is committed to history once, when [`next`](Self::next) first
/// returns `None`. Dropping the stream earlier abandons the turn: nothing is
/// written and the provider stops reading the response.
pub struct TurnStream {
    rx: ChunkReceiver,
    pending: Option<PendingCommit>,
    reply: String,
}

impl std::fmt::Debug for TurnStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TurnStream")
            .field("finished", &self.is_finished())
            .field("reply_bytes", &self.reply.len())
            .finish_non_exhaustive()
    }
}

impl TurnStream {
    pub(crate) fn new(rx: ChunkReceiver, pending: PendingCommit) -> Self {
        Self {
            rx,
            pending: Some(pending),
            reply: String::new(),
        }
    }

    /// Text forwarded so far.
    #[must_use]
    pub fn reply(&self) -> &str {
        &self.reply
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.pending.is_none()
    }

    /// Next fragment, an error that ends the turn, or `None` once the turn
    /// has been committed. Keeps returning `None` afterwards.
    pub async fn next(&mut self) -> Option<Result<String, ChatError>> {
        if self.is_finished() {
            return None;
        }

        let chunk = match self.rx.recv().await {
            None => return self.conclude(),
            Some(Err(err)) => return self.abort(ChatError::ProviderUnavailable(err)),
            Some(Ok(chunk)) => chunk,
        };

        let Some(choice) = chunk.choices.into_iter().next() else {
            return self.abort(ChatError::EmptyCompletion);
        };
        if choice.is_finished() {
            return self.conclude();
        }
        let Some(text) = choice.text else {
            return self.abort(ChatError::EmptyCompletion);
        };
        if self.is_end_marker(&text) {
            return self.conclude();
        }

        self.reply.push_str(&text);
        Some(Ok(text))
    }

    /// Adapts the turn into a [`Stream`] with the same items as [`next`](Self::next).
    pub fn into_stream(self) -> impl Stream<Item = Result<String, ChatError>> + Send {
        futures_util::stream::unfold(self, |mut turn| async move {
            turn.next().await.map(|item| (item, turn))
        })
    }

    /// Reads the whole turn, returning the committed reply.
    pub async fn collect_reply(mut self) -> Result<String, ChatError> {
        while let Some(item) = self.next().await {
            item?;
        }
        Ok(std::mem::take(&mut self.reply))
    }

    fn is_end_marker(&self, text: &str) -> bool {
        self.pending
            .as_ref()
            .is_some_and(|pending| pending.markers.is_end_marker(text))
    }

    fn conclude(&mut self) -> Option<Result<String, ChatError>> {
        self.rx.close();
        let pending = self.pending.take()?;
        match pending.commit(&self.reply) {
            Ok(()) => None,
            Err(err) => Some(Err(err)),
        }
    }

    fn abort(&mut self, err: ChatError) -> Option<Result<String, ChatError>> {
        self.rx.close();
        if let Some(pending) = self.pending.take() {
            tracing::warn!(session = %pending.session, error = %err, "Turn failed; history unchanged");
        }
        Some(Err(err))
    }
}

impl Drop for TurnStream {
    fn drop(&mut self) {
        if let Some(pending) = self.pending.take() {
            tracing::debug!(
                session = %pending.session,
                reply_bytes = self.reply.len(),
                "Turn stream dropped before completion; discarding reply"
            );
        }
    }
}
