//! SSE (Server-Sent Events) record assembly and byte-stream adapters.
//!
//! Lines come from [`LineDecoder`]; records are grouped per the
//! [SSE specification](https://html.spec.whatwg.org/multipage/server-sent-events.html):
//! a blank line terminates a record, `:` starts a comment, `event:` names the
//! record and every `data:` line appends to its payload.

use std::collections::VecDeque;
use std::fmt;

use futures_util::{Stream, StreamExt};
use memchr::memchr;
use smallvec::SmallVec;

use super::line::{Chunk, LineDecoder};
use crate::error::QianfanError;

/// One blank-line-terminated SSE record.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ServerSentEvent {
    pub event: Option<String>,
    pub data: String,
    /// Every non-blank line that contributed to this record, comments included.
    pub raw: Vec<String>,
}

impl ServerSentEvent {
    /// Whether the record carries a non-empty `event:` name.
    #[must_use]
    pub fn is_named(&self) -> bool {
        self.event.as_deref().is_some_and(|name| !name.is_empty())
    }

    /// Whether the payload is the `[DONE]` end-of-stream sentinel.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.data.starts_with("[DONE]")
    }
}

/// Incremental SSE record parser, fed one line at a time.
#[derive(Debug, Default)]
pub struct SseDecoder {
    event: Option<String>,
    data: SmallVec<[String; 4]>,
    raw_lines: Vec<String>,
}

impl SseDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one line (without its terminator) and return a record if it completed one.
    pub fn decode(&mut self, line: &str) -> Option<ServerSentEvent> {
        let line = line.strip_suffix('\r').unwrap_or(line);

        if line.is_empty() {
            let has_event = self.event.as_deref().is_some_and(|name| !name.is_empty());
            if !has_event && self.data.is_empty() {
                // Keep-alive: nothing to emit, and nothing carried into the next record.
                self.event = None;
                self.raw_lines.clear();
                return None;
            }
            let data = self.data.join("\n");
            self.data.clear();
            return Some(ServerSentEvent {
                event: self.event.take(),
                data,
                raw: std::mem::take(&mut self.raw_lines),
            });
        }

        self.raw_lines.push(line.to_owned());
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match memchr(b':', line.as_bytes()) {
            Some(colon) => (&line[..colon], &line[colon + 1..]),
            None => (line, ""),
        };
        let value = value.strip_prefix(' ').unwrap_or(value);

        match field {
            "event" => self.event = Some(value.to_owned()),
            "data" => self.data.push(value.to_owned()),
            // id, retry and unknown fields
            _ => {}
        }
        None
    }
}

/// Split a byte stream into lines using [`LineDecoder`].
///
/// The decoder is flushed once the source ends, so a final unterminated line
/// is still yielded. Transport errors end the stream after being yielded.
pub fn line_stream<S, B, E>(byte_stream: S) -> impl Stream<Item = Result<String, QianfanError>> + Send
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: fmt::Display + Send + 'static,
{
    futures_util::stream::unfold(
        (
            Box::pin(byte_stream),
            LineDecoder::new(),
            VecDeque::<String>::with_capacity(8),
            false,
        ),
        |(mut stream, mut decoder, mut pending, mut finished)| async move {
            loop {
                if let Some(line) = pending.pop_front() {
                    return Some((Ok(line), (stream, decoder, pending, finished)));
                }
                if finished {
                    return None;
                }

                let decoded = match stream.as_mut().next().await {
                    Some(Ok(bytes)) => decoder.decode(Chunk::Bytes(bytes.as_ref())),
                    Some(Err(err)) => {
                        finished = true;
                        let err = QianfanError::Transport(format!("Failed to read stream: {err}"));
                        return Some((Err(err), (stream, decoder, pending, finished)));
                    }
                    None => {
                        finished = true;
                        decoder.flush()
                    }
                };
                match decoded {
                    Ok(lines) => pending.extend(lines),
                    Err(err) => {
                        finished = true;
                        pending.clear();
                        return Some((Err(err), (stream, decoder, pending, finished)));
                    }
                }
            }
        },
    )
}

/// Turn a byte stream into a stream of [`ServerSentEvent`] records.
///
/// This is the primary entry point for converting an HTTP response body
/// stream into parsed SSE records.
pub fn sse_event_stream<S, B, E>(
    byte_stream: S,
) -> impl Stream<Item = Result<ServerSentEvent, QianfanError>> + Send
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: fmt::Display + Send + 'static,
{
    let mut decoder = SseDecoder::new();
    line_stream(byte_stream).filter_map(move |line| {
        let item = match line {
            Ok(line) => decoder.decode(&line).map(Ok),
            Err(err) => Some(Err(err)),
        };
        futures_util::future::ready(item)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn feed(lines: &[&str]) -> Vec<ServerSentEvent> {
        let mut decoder = SseDecoder::new();
        lines.iter().filter_map(|line| decoder.decode(line)).collect()
    }

    #[test]
    fn test_named_event_then_done() {
        let events = feed(&["event: foo", "data: {\"a\":1}", "", "data: [DONE]", ""]);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event.as_deref(), Some("foo"));
        assert_eq!(events[0].data, "{\"a\":1}");
        assert_eq!(events[0].raw, vec!["event: foo", "data: {\"a\":1}"]);
        assert!(events[1].event.is_none());
        assert_eq!(events[1].data, "[DONE]");
        assert!(events[1].is_done());
    }

    #[test]
    fn test_multiline_data_joined() {
        let events = feed(&["data: line1", "data: line2", "data:line3", ""]);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "line1\nline2\nline3");
    }

    #[test]
    fn test_blank_lines_without_fields_are_ignored() {
        assert!(feed(&["", "", ""]).is_empty());
    }

    #[test]
    fn test_comment_keepalive_does_not_leak_into_next_record() {
        let events = feed(&[": ping", "", "data: x", ""]);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].raw, vec!["data: x"]);
    }

    #[test]
    fn test_comment_inside_record_is_kept_in_raw() {
        let events = feed(&["data: a", ": note", ""]);
        assert_eq!(events[0].data, "a");
        assert_eq!(events[0].raw, vec!["data: a", ": note"]);
    }

    #[test]
    fn test_unknown_fields_and_bare_names() {
        let events = feed(&["id: 7", "retry: 100", "data", ""]);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "");
    }

    #[test]
    fn test_only_one_leading_space_is_stripped() {
        let events = feed(&["data:  two spaces", ""]);
        assert_eq!(events[0].data, " two spaces");
    }

    #[test]
    fn test_trailing_cr_stripped() {
        let events = feed(&["data: x\r", "\r"]);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "x");
    }

    #[test]
    fn test_value_keeps_later_colons() {
        let events = feed(&["data: {\"t\":\"a:b\"}", ""]);
        assert_eq!(events[0].data, "{\"t\":\"a:b\"}");
    }

    #[tokio::test]
    async fn test_sse_event_stream_across_chunks() {
        let source = futures_util::stream::iter(vec![
            Ok::<Bytes, std::convert::Infallible>(Bytes::from_static(b"data: {\"x\"")),
            Ok(Bytes::from_static(b":1}\r")),
            Ok(Bytes::from_static(b"\n\r\nevent: ping\ndata: {}\n\n")),
        ]);
        let events: Vec<ServerSentEvent> = sse_event_stream(source)
            .map(|event| event.unwrap())
            .collect()
            .await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].data, "{\"x\":1}");
        assert_eq!(events[1].event.as_deref(), Some("ping"));
    }

    #[tokio::test]
    async fn test_line_stream_flushes_final_line() {
        let source = futures_util::stream::iter(vec![
            Ok::<Bytes, std::convert::Infallible>(Bytes::from_static(b"{\"a\":1}\n{\"a\"")),
            Ok(Bytes::from_static(b":2}")),
        ]);
        let lines: Vec<String> = line_stream(source).map(|line| line.unwrap()).collect().await;
        assert_eq!(lines, vec!["{\"a\":1}", "{\"a\":2}"]);
    }

    #[tokio::test]
    async fn test_line_stream_surfaces_transport_error_and_stops() {
        let source = futures_util::stream::iter(vec![
            Ok(Bytes::from_static(b"a\n")),
            Err("connection reset"),
            Ok(Bytes::from_static(b"b\n")),
        ]);
        let items: Vec<Result<String, QianfanError>> = line_stream(source).collect().await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_deref().unwrap(), "a");
        assert!(matches!(items[1], Err(QianfanError::Transport(_))));
    }
}
