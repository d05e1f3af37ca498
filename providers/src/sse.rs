//! Server-sent events decoding for streamed completions.

use std::time::Duration;

use threadline_types::CompletionChunk;

use crate::{ChunkSender, ProviderError};

pub(crate) const DEFAULT_STREAM_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

const MAX_SSE_BUFFER_BYTES: usize = 4 * 1024 * 1024;

const MAX_SSE_PARSE_ERRORS: usize = 3;

const DONE_MARKER: &str = "[DONE]";

fn find_sse_event_boundary(buffer: &[u8]) -> Option<(usize, usize)> {
    let lf = buffer.windows(2).position(|w| w == b"\n\n");
    let crlf = buffer.windows(4).position(|w| w == b"\r\n\r\n");
    match (lf, crlf) {
        (Some(a), Some(b)) if b < a => Some((b, 4)),
        (Some(a), _) => Some((a, 2)),
        (None, Some(b)) => Some((b, 4)),
        (None, None) => None,
    }
}

fn drain_next_sse_event(buffer: &mut Vec<u8>) -> Option<Vec<u8>> {
    let (pos, delim_len) = find_sse_event_boundary(buffer)?;
    let event = buffer[..pos].to_vec();
    buffer.drain(..pos + delim_len);
    Some(event)
}

/// Joins every `data:` line of one event; `None` for comment/keepalive events.
fn extract_sse_data(event: &str) -> Option<String> {
    let mut lines = event
        .lines()
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|rest| rest.strip_prefix(' ').unwrap_or(rest))
        .peekable();

    lines.peek()?;
    Some(lines.collect::<Vec<_>>().join("\n"))
}

/// Returns false once the receiver has gone away.
async fn send_item(tx: &ChunkSender, item: Result<CompletionChunk, ProviderError>) -> bool {
    tx.send(item).await.is_ok()
}

/// Decodes a streamed completion body into `tx` until `[DONE]`, an error,
/// or the receiver hanging up.
///
/// A body that ends without `[DONE]` is only an error if no chunk carried a
/// finish signal.
pub(crate) async fn process_sse_stream(
    response: reqwest::Response,
    tx: ChunkSender,
    idle_timeout: Duration,
) {
    use futures_util::StreamExt;

    let mut stream = response.bytes_stream();
    let mut buffer: Vec<u8> = Vec::new();
    let mut parse_errors = 0usize;
    let mut saw_finish = false;

    loop {
        let Ok(next) = tokio::time::timeout(idle_timeout, stream.next()).await else {
            let _ = send_item(&tx, Err(ProviderError::IdleTimeout(idle_timeout))).await;
            return;
        };

        let Some(bytes) = next else { break };
        let bytes = match bytes {
            Ok(bytes) => bytes,
            Err(err) => {
                let _ = send_item(&tx, Err(ProviderError::Stream(err.to_string()))).await;
                return;
            }
        };
        buffer.extend_from_slice(&bytes);

        if buffer.len() > MAX_SSE_BUFFER_BYTES {
            let _ = send_item(
                &tx,
                Err(ProviderError::Stream(
                    "SSE buffer exceeded maximum size (4 MiB)".to_string(),
                )),
            )
            .await;
            return;
        }

        while let Some(event) = drain_next_sse_event(&mut buffer) {
            if event.is_empty() {
                continue;
            }

            let Ok(event) = std::str::from_utf8(&event) else {
                let _ = send_item(
                    &tx,
                    Err(ProviderError::Stream(
                        "received invalid UTF-8 from SSE stream".to_string(),
                    )),
                )
                .await;
                return;
            };

            let Some(data) = extract_sse_data(event) else {
                continue;
            };

            if data.trim() == DONE_MARKER {
                return;
            }

            match serde_json::from_str::<CompletionChunk>(&data) {
                Ok(chunk) => {
                    parse_errors = 0;
                    saw_finish |= chunk.choices.iter().any(|c| c.is_finished());
                    if !send_item(&tx, Ok(chunk)).await {
                        tracing::debug!("Chunk receiver dropped; abandoning stream");
                        return;
                    }
                }
                Err(err) => {
                    parse_errors = parse_errors.saturating_add(1);
                    tracing::warn!(
                        %err,
                        payload_bytes = data.len(),
                        "Invalid SSE JSON payload"
                    );
                    if parse_errors >= MAX_SSE_PARSE_ERRORS {
                        let _ = send_item(
                            &tx,
                            Err(ProviderError::InvalidResponse(format!(
                                "invalid stream payload: {err}"
                            ))),
                        )
                        .await;
                        return;
                    }
                }
            }
        }
    }

    if !saw_finish {
        let _ = send_item(
            &tx,
            Err(ProviderError::Stream(
                "connection closed before stream completed".to_string(),
            )),
        )
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod boundary {
        use super::*;

        #[test]
        fn finds_lf_boundary() {
            assert_eq!(find_sse_event_boundary(b"data: x\n\nrest"), Some((7, 2)));
        }

        #[test]
        fn finds_crlf_boundary() {
            assert_eq!(
                find_sse_event_boundary(b"data: x\r\n\r\nrest"),
                Some((7, 4))
            );
        }

        #[test]
        fn prefers_earlier_boundary() {
            assert_eq!(
                find_sse_event_boundary(b"a\r\n\r\nb\n\n"),
                Some((1, 4))
            );
            assert_eq!(find_sse_event_boundary(b"a\n\nb\r\n\r\n"), Some((1, 2)));
        }

        #[test]
        fn none_without_boundary() {
            assert_eq!(find_sse_event_boundary(b"data: partial"), None);
            assert_eq!(find_sse_event_boundary(b""), None);
        }
    }

    mod drain {
        use super::*;

        #[test]
        fn drains_events_in_order() {
            let mut buffer = b"data: one\n\ndata: two\n\ndata: thr".to_vec();
            assert_eq!(drain_next_sse_event(&mut buffer).unwrap(), b"data: one");
            assert_eq!(drain_next_sse_event(&mut buffer).unwrap(), b"data: two");
            assert_eq!(drain_next_sse_event(&mut buffer), None);
            assert_eq!(buffer, b"data: thr");
        }
    }

    mod data {
        use super::*;

        #[test]
        fn single_line() {
            assert_eq!(extract_sse_data("data: {\"a\":1}").unwrap(), "{\"a\":1}");
        }

        #[test]
        fn without_space() {
            assert_eq!(extract_sse_data("data:[DONE]").unwrap(), "[DONE]");
        }

        #[test]
        fn multiline_is_joined() {
            assert_eq!(
                extract_sse_data("data: first\r\nid: 3\ndata: second").unwrap(),
                "first\nsecond"
            );
        }

        #[test]
        fn comments_have_no_data() {
            assert_eq!(extract_sse_data(": keepalive"), None);
            assert_eq!(extract_sse_data("event: ping"), None);
        }

        #[test]
        fn empty_data_is_some() {
            assert_eq!(extract_sse_data("data:").unwrap(), "");
        }
    }
}
