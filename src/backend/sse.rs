//! Server-sent-events framing.
//!
//! Both HTTP flavours can deliver JSON-RPC messages as an SSE body: the
//! streamable transport when a POST is answered with `text/event-stream`, and
//! the legacy transport on its long-lived GET stream.

use futures::stream::{self, Stream, StreamExt};

use super::errors::BackendError;

/// One parsed SSE event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// The `event:` field; `None` means the default `message` type.
    pub event: Option<String>,
    /// All `data:` lines joined with `\n`.
    pub data: String,
}

impl SseEvent {
    /// Whether this event carries a JSON-RPC message.
    pub fn is_message(&self) -> bool {
        matches!(self.event.as_deref(), None | Some("message"))
    }
}

/// Parse a single event block (the text between blank lines).
///
/// Returns `None` for comments and keep-alives that carry no data.
pub fn parse_event(block: &str) -> Option<SseEvent> {
    let mut event = None;
    let mut data_lines: Vec<&str> = Vec::new();

    for line in block.lines() {
        if line.starts_with(':') {
            continue;
        }
        if let Some(value) = field_value(line, "event") {
            event = Some(value.to_string());
        } else if let Some(value) = field_value(line, "data") {
            data_lines.push(value);
        }
    }

    if data_lines.is_empty() {
        return None;
    }
    Some(SseEvent {
        event,
        data: data_lines.join("\n"),
    })
}

fn field_value<'a>(line: &'a str, field: &str) -> Option<&'a str> {
    let rest = line.strip_prefix(field)?.strip_prefix(':')?;
    Some(rest.strip_prefix(' ').unwrap_or(rest))
}

/// Turn an HTTP response body into a stream of SSE events.
///
/// Buffers partial events across chunk boundaries and flushes any trailing
/// event when the body ends.
pub fn sse_events(
    backend: String,
    response: reqwest::Response,
) -> impl Stream<Item = Result<SseEvent, BackendError>> + Send {
    let byte_stream = response.bytes_stream();

    stream::unfold(
        (byte_stream, String::new(), backend, false),
        |(mut byte_stream, mut buffer, backend, done)| async move {
            if done {
                return None;
            }
            loop {
                if let Some(end) = buffer.find("\n\n") {
                    let block = buffer[..end].to_string();
                    buffer.drain(..end + 2);
                    match parse_event(&block) {
                        Some(event) => return Some((Ok(event), (byte_stream, buffer, backend, false))),
                        None => continue,
                    }
                }

                match byte_stream.next().await {
                    Some(Ok(bytes)) => {
                        let text = String::from_utf8_lossy(&bytes);
                        buffer.push_str(&text.replace("\r\n", "\n"));
                    }
                    Some(Err(e)) => {
                        let err = BackendError::TransportError {
                            backend: backend.clone(),
                            reason: format!("event stream read error: {e}"),
                        };
                        return Some((Err(err), (byte_stream, buffer, backend, true)));
                    }
                    None => {
                        let tail = std::mem::take(&mut buffer);
                        return parse_event(tail.trim())
                            .map(|event| (Ok(event), (byte_stream, buffer, backend, true)));
                    }
                }
            }
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_message_event() {
        let event = parse_event("event: message\ndata: {\"id\":1}").unwrap();
        assert!(event.is_message());
        assert_eq!(event.data, "{\"id\":1}");
    }

    #[test]
    fn test_parse_default_event_type() {
        let event = parse_event("data:{\"id\":2}").unwrap();
        assert_eq!(event.event, None);
        assert!(event.is_message());
        assert_eq!(event.data, "{\"id\":2}");
    }

    #[test]
    fn test_parse_endpoint_event() {
        let event = parse_event("event: endpoint\ndata: /messages?sessionId=abc").unwrap();
        assert!(!event.is_message());
        assert_eq!(event.event.as_deref(), Some("endpoint"));
        assert_eq!(event.data, "/messages?sessionId=abc");
    }

    #[test]
    fn test_multiline_data_joined() {
        let event = parse_event("data: {\"a\":\ndata: 1}").unwrap();
        assert_eq!(event.data, "{\"a\":\n1}");
    }

    #[test]
    fn test_comment_only_block_is_skipped() {
        assert!(parse_event(": keep-alive").is_none());
        assert!(parse_event("event: ping").is_none());
    }
}
