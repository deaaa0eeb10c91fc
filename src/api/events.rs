//! Decoding of the `/chat/stream` response body.
//!
//! The server frames each event as a `data: <json>` line. Network reads do
//! not respect line boundaries, so bytes are buffered until a newline arrives
//! and only complete lines are decoded.

use super::error::{ChatError, ChatResult};
use futures::stream::{self, BoxStream, Stream, StreamExt};
use serde::Deserialize;
use std::collections::VecDeque;

/// One decoded unit of the chat stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamEvent {
    Content(String),
    Done,
    Error(String),
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StreamEvent::Content(_))
    }
}

pub type EventStream = BoxStream<'static, ChatResult<StreamEvent>>;

#[derive(Deserialize)]
struct EventPayload {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    done: Option<bool>,
    #[serde(default)]
    error: Option<String>,
}

impl EventPayload {
    fn into_event(self) -> Option<StreamEvent> {
        if let Some(content) = self.content.filter(|c| !c.is_empty()) {
            return Some(StreamEvent::Content(content));
        }
        if self.done == Some(true) {
            return Some(StreamEvent::Done);
        }
        self.error.filter(|e| !e.is_empty()).map(StreamEvent::Error)
    }
}

/// Decodes a single protocol line (without its trailing newline).
///
/// Blank lines, lines without a `data:` prefix and payloads that are not
/// valid JSON all yield `None`.
pub fn decode_line(raw: &[u8]) -> Option<StreamEvent> {
    let decoded = String::from_utf8_lossy(raw);
    let line = decoded.strip_suffix('\r').unwrap_or(decoded.as_ref());
    let payload = line.strip_prefix("data:")?;
    let payload = payload.strip_prefix(' ').unwrap_or(payload).trim();
    if payload.is_empty() {
        return None;
    }

    match serde_json::from_str::<EventPayload>(payload) {
        Ok(parsed) => parsed.into_event(),
        Err(err) => {
            tracing::debug!(error = %err, "dropping unparseable stream line");
            None
        }
    }
}

/// Line reassembly buffer that persists across reads.
#[derive(Debug, Default)]
pub struct EventDecoder {
    buffer: Vec<u8>,
}

impl EventDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one read's worth of bytes, returning the events completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(event) = decode_line(&line[..pos]) {
                events.push(event);
            }
        }
        events
    }

    /// Decodes whatever is left once the byte stream has ended.
    pub fn finish(&mut self) -> Option<StreamEvent> {
        let rest = std::mem::take(&mut self.buffer);
        if rest.is_empty() {
            None
        } else {
            decode_line(&rest)
        }
    }

    pub fn pending_bytes(&self) -> usize {
        self.buffer.len()
    }
}

struct DecodeState<S> {
    bytes: S,
    decoder: EventDecoder,
    pending: VecDeque<StreamEvent>,
    exhausted: bool,
    finished: bool,
}

/// Turns a stream of byte chunks into a stream of [`StreamEvent`]s.
///
/// The returned stream stops after the first `Done` or `Error`. When the
/// bytes run out without either, a synthetic `Done` is emitted so consumers
/// always observe a terminal event. A read error is yielded once and ends
/// the stream.
pub fn decode_event_stream<S, B, E>(bytes: S) -> EventStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Into<ChatError> + Send + 'static,
{
    let state = DecodeState {
        bytes: Box::pin(bytes),
        decoder: EventDecoder::new(),
        pending: VecDeque::new(),
        exhausted: false,
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if state.finished {
                return None;
            }
            if let Some(event) = state.pending.pop_front() {
                if event.is_terminal() {
                    state.finished = true;
                }
                return Some((Ok(event), state));
            }
            if state.exhausted {
                return None;
            }

            match state.bytes.next().await {
                Some(Ok(chunk)) => {
                    let events = state.decoder.push(chunk.as_ref());
                    state.pending.extend(events);
                }
                Some(Err(err)) => {
                    state.finished = true;
                    return Some((Err(err.into()), state));
                }
                None => {
                    state.exhausted = true;
                    if let Some(event) = state.decoder.finish() {
                        state.pending.push_back(event);
                    }
                    tracing::debug!("stream ended without a terminal event");
                    state.pending.push_back(StreamEvent::Done);
                }
            }
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "data: {\"content\": \"RAG \"}\n\n\
                          data: {\"content\": \"is \"}\n\n\
                          data: {\"content\": \"retrieval\"}\n\n\
                          data: {\"done\": true}\n\n";

    fn chunked(input: &[u8], size: usize) -> Vec<ChatResult<Vec<u8>>> {
        input.chunks(size).map(|c| Ok(c.to_vec())).collect()
    }

    async fn collect(chunks: Vec<ChatResult<Vec<u8>>>) -> Vec<ChatResult<StreamEvent>> {
        decode_event_stream(stream::iter(chunks)).collect().await
    }

    #[test]
    fn decodes_each_payload_shape() {
        assert_eq!(
            decode_line(br#"data: {"content":"hi"}"#),
            Some(StreamEvent::Content("hi".into()))
        );
        assert_eq!(decode_line(br#"data: {"done":true}"#), Some(StreamEvent::Done));
        assert_eq!(
            decode_line(br#"data: {"error":"boom"}"#),
            Some(StreamEvent::Error("boom".into()))
        );
        assert_eq!(decode_line(b"data:{\"done\":true}\r"), Some(StreamEvent::Done));
    }

    #[test]
    fn ignores_noise_lines() {
        assert_eq!(decode_line(b""), None);
        assert_eq!(decode_line(b": keep-alive"), None);
        assert_eq!(decode_line(b"event: message"), None);
        assert_eq!(decode_line(br#"data: {"cont"#), None);
        assert_eq!(decode_line(br#"data: {"done":false}"#), None);
        assert_eq!(decode_line(br#"data: {"content":""}"#), None);
        assert_eq!(decode_line(br#"data: {"error":""}"#), None);
    }

    #[test]
    fn split_line_is_reassembled() {
        let mut decoder = EventDecoder::new();
        assert!(decoder.push(br#"data: {"cont"#).is_empty());
        assert_eq!(decoder.pending_bytes(), 12);
        let events = decoder.push(b"ent\":\"hi\"}\n");
        assert_eq!(events, vec![StreamEvent::Content("hi".into())]);
        assert_eq!(decoder.pending_bytes(), 0);
    }

    #[test]
    fn one_read_may_hold_many_lines() {
        let mut decoder = EventDecoder::new();
        let events = decoder.push(SAMPLE.as_bytes());
        assert_eq!(events.len(), 4);
        assert_eq!(events[3], StreamEvent::Done);
    }

    #[tokio::test]
    async fn decoding_is_chunk_boundary_invariant() {
        let whole = collect(vec![Ok(SAMPLE.as_bytes().to_vec())]).await;
        for size in 1..SAMPLE.len() {
            let split = collect(chunked(SAMPLE.as_bytes(), size)).await;
            assert_eq!(split, whole, "chunk size {size}");
        }
    }

    #[tokio::test]
    async fn multibyte_characters_survive_splits() {
        let body = "data: {\"content\":\"héllo ✓\"}\n".as_bytes();
        for size in 1..body.len() {
            let events = collect(chunked(body, size)).await;
            assert_eq!(
                events[0],
                Ok(StreamEvent::Content("héllo ✓".into())),
                "chunk size {size}"
            );
        }
    }

    #[tokio::test]
    async fn stops_at_first_terminal_event() {
        let body = b"data: {\"content\":\"a\"}\ndata: {\"error\":\"quota\"}\ndata: {\"content\":\"b\"}\n";
        let events = collect(vec![Ok(body.to_vec())]).await;
        assert_eq!(
            events,
            vec![
                Ok(StreamEvent::Content("a".into())),
                Ok(StreamEvent::Error("quota".into())),
            ]
        );
    }

    #[tokio::test]
    async fn natural_end_is_implicit_done() {
        let events = collect(chunked(b"data: {\"content\":\"a\"}\n", 4)).await;
        assert_eq!(
            events,
            vec![Ok(StreamEvent::Content("a".into())), Ok(StreamEvent::Done)]
        );

        let empty = collect(Vec::new()).await;
        assert_eq!(empty, vec![Ok(StreamEvent::Done)]);
    }

    #[tokio::test]
    async fn unterminated_final_line_is_flushed() {
        let events = collect(vec![Ok(b"data: {\"content\":\"tail\"}".to_vec())]).await;
        assert_eq!(
            events,
            vec![Ok(StreamEvent::Content("tail".into())), Ok(StreamEvent::Done)]
        );
    }

    #[tokio::test]
    async fn read_error_ends_stream() {
        let chunks = vec![
            Ok(b"data: {\"content\":\"a\"}\n".to_vec()),
            Err(ChatError::Transport("connection reset".into())),
            Ok(b"data: {\"content\":\"b\"}\n".to_vec()),
        ];
        let events = collect(chunks).await;
        assert_eq!(
            events,
            vec![
                Ok(StreamEvent::Content("a".into())),
                Err(ChatError::Transport("connection reset".into())),
            ]
        );
    }
}
