pub mod line;
pub mod sse;
mod tee;

pub use line::{Chunk, LineDecoder};
pub use sse::{line_stream, sse_event_stream, ServerSentEvent, SseDecoder};

use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::future::{AbortHandle, Abortable};
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::QianfanError;
use crate::util::{api_error_from_body, body_preview};

/// A lazy, consume-once sequence of parsed items from a streaming response.
///
/// Call [`Stream::iter`] once to consume it, or [`Stream::tee`] to split it
/// into two streams that each see every item. Aborting (explicitly, or by
/// dropping an unfinished [`StreamIter`]) stops reading from the transport.
pub struct Stream<T = Value> {
    source: Option<BoxStream<'static, Result<T, QianfanError>>>,
    abort: AbortHandle,
}

impl<T> fmt::Debug for Stream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("consumed", &self.source.is_none())
            .field("aborted", &self.abort.is_aborted())
            .finish()
    }
}

impl<T: Send + 'static> Stream<T> {
    /// Wrap any item stream, attaching a fresh abort handle.
    pub fn from_item_stream<S>(items: S) -> Self
    where
        S: futures_util::Stream<Item = Result<T, QianfanError>> + Send + 'static,
    {
        let (abort, registration) = AbortHandle::new_pair();
        Self {
            source: Some(Abortable::new(items, registration).boxed()),
            abort,
        }
    }
}

impl<T: DeserializeOwned + Send + 'static> Stream<T> {
    /// Parse an `text/event-stream` HTTP response body.
    #[must_use]
    pub fn from_sse_response(response: reqwest::Response) -> Self {
        // Read errors would otherwise carry the request URL and its access token.
        Self::from_sse_bytes(
            response
                .bytes_stream()
                .map(|chunk| chunk.map_err(reqwest::Error::without_url)),
        )
    }

    /// Parse SSE records from a byte stream.
    ///
    /// Each data-only record's payload is parsed as JSON. A `[DONE]` payload ends
    /// the stream, named records are skipped, and a parse failure ends it with
    /// [`QianfanError::StreamDecode`].
    pub fn from_sse_bytes<S, B, E>(byte_stream: S) -> Self
    where
        S: futures_util::Stream<Item = Result<B, E>> + Send + 'static,
        B: AsRef<[u8]> + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let events = Box::pin(sse_event_stream(byte_stream));
        let items = futures_util::stream::unfold(Some(events), |events| async move {
            let mut events = events?;
            loop {
                let event = match events.next().await? {
                    Ok(event) => event,
                    Err(err) => return Some((Err(err), None)),
                };
                if event.is_done() {
                    return None;
                }
                if event.is_named() {
                    tracing::debug!(
                        event = event.event.as_deref().unwrap_or_default(),
                        "skipping named SSE event"
                    );
                    continue;
                }
                let item = parse_item(&event.data);
                let next = item.is_ok().then_some(events);
                return Some((item, next));
            }
        });
        Self::from_item_stream(items)
    }

    /// Parse newline-delimited JSON from a byte stream. Blank lines are skipped.
    pub fn from_readable_stream<S, B, E>(byte_stream: S) -> Self
    where
        S: futures_util::Stream<Item = Result<B, E>> + Send + 'static,
        B: AsRef<[u8]> + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let items = line_stream(byte_stream).filter_map(|line| {
            let item = match line {
                Ok(line) if line.trim().is_empty() => None,
                Ok(line) => Some(parse_item(&line)),
                Err(err) => Some(Err(err)),
            };
            futures_util::future::ready(item)
        });
        Self::from_item_stream(items)
    }
}

impl<T> Stream<T> {
    /// Start consuming the stream.
    ///
    /// # Errors
    ///
    /// Returns [`QianfanError::AlreadyConsumed`] when the stream was already
    /// iterated or teed.
    pub fn iter(&mut self) -> Result<StreamIter<T>, QianfanError> {
        let source = self.source.take().ok_or(QianfanError::AlreadyConsumed)?;
        Ok(StreamIter {
            source: Some(source),
            abort: self.abort.clone(),
        })
    }

    /// Stop reading from the transport. Pending and future reads end the stream.
    pub fn abort(&self) {
        self.abort.abort();
    }

    #[must_use]
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    #[must_use]
    pub fn is_consumed(&self) -> bool {
        self.source.is_none()
    }

    /// Drain every item into a `Vec`, stopping at the first error.
    ///
    /// # Errors
    ///
    /// Returns the first error the stream yields, or
    /// [`QianfanError::AlreadyConsumed`].
    pub async fn collect_all(mut self) -> Result<Vec<T>, QianfanError> {
        let mut iter = self.iter()?;
        let mut items = Vec::new();
        while let Some(item) = iter.next().await {
            items.push(item?);
        }
        Ok(items)
    }
}

impl<T: Clone + Send + 'static> Stream<T> {
    /// Split into two streams that each yield every item, in order.
    ///
    /// Items one branch has not read yet are buffered for it. Each branch has
    /// its own abort handle; the underlying transport is aborted once both
    /// branches are dropped before the stream finished.
    ///
    /// # Errors
    ///
    /// Returns [`QianfanError::AlreadyConsumed`] when the stream was already
    /// iterated or teed.
    pub fn tee(&mut self) -> Result<(Stream<T>, Stream<T>), QianfanError> {
        let source = self.source.take().ok_or(QianfanError::AlreadyConsumed)?;
        let shared = tee::Shared::new(source, self.abort.clone());
        let left = Stream::from_item_stream(tee::branch(shared.clone(), 0));
        let right = Stream::from_item_stream(tee::branch(shared, 1));
        Ok((left, right))
    }
}

/// The consuming side of a [`Stream`].
///
/// Ends after the first error. Dropping it before the end aborts the stream.
pub struct StreamIter<T> {
    source: Option<BoxStream<'static, Result<T, QianfanError>>>,
    abort: AbortHandle,
}

impl<T> StreamIter<T> {
    /// Stop consuming and abort the transport.
    pub fn close(mut self) {
        if self.source.take().is_some() {
            self.abort.abort();
        }
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.source.is_none()
    }
}

impl<T> futures_util::Stream for StreamIter<T> {
    type Item = Result<T, QianfanError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let Some(source) = this.source.as_mut() else {
            return Poll::Ready(None);
        };
        match source.poll_next_unpin(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(Ok(item))) => Poll::Ready(Some(Ok(item))),
            Poll::Ready(Some(Err(err))) => {
                this.source = None;
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(None) => {
                this.source = None;
                Poll::Ready(None)
            }
        }
    }
}

impl<T> Drop for StreamIter<T> {
    fn drop(&mut self) {
        if self.source.is_some() {
            tracing::debug!("stream iterator dropped before the end, aborting");
            self.abort.abort();
        }
    }
}

impl<T> fmt::Debug for StreamIter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamIter")
            .field("finished", &self.source.is_none())
            .finish()
    }
}

/// Parse one JSON payload, surfacing in-band API errors.
pub(crate) fn parse_item<T: DeserializeOwned>(data: &str) -> Result<T, QianfanError> {
    let value: Value = serde_json::from_str(data).map_err(|err| {
        QianfanError::StreamDecode(format!("{err}: {}", body_preview(data.as_bytes())))
    })?;
    parse_value(value)
}

pub(crate) fn parse_value<T: DeserializeOwned>(value: Value) -> Result<T, QianfanError> {
    if let Some(err) = api_error_from_body(http::StatusCode::OK.as_u16(), &value) {
        return Err(err);
    }
    serde_json::from_value(value).map_err(|err| QianfanError::StreamDecode(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use serde::Deserialize;
    use std::convert::Infallible;

    #[derive(Debug, Clone, PartialEq, Deserialize)]
    struct Delta {
        x: i64,
    }

    fn sse(body: &'static str) -> Stream<Delta> {
        Stream::from_sse_bytes(futures_util::stream::iter(vec![Ok::<_, Infallible>(
            Bytes::from_static(body.as_bytes()),
        )]))
    }

    fn numbered(count: i64) -> Stream<Delta> {
        let body: String = (1..=count)
            .map(|x| format!("data: {{\"x\":{x}}}\n\n"))
            .chain(std::iter::once("data: [DONE]\n\n".to_string()))
            .collect();
        let chunks: Vec<Result<Bytes, Infallible>> = body
            .into_bytes()
            .chunks(7)
            .map(|chunk| Ok(Bytes::copy_from_slice(chunk)))
            .collect();
        Stream::from_sse_bytes(futures_util::stream::iter(chunks))
    }

    async fn drain(stream: &mut Stream<Delta>) -> Vec<Result<Delta, QianfanError>> {
        stream.iter().unwrap().collect().await
    }

    #[tokio::test]
    async fn test_done_terminates_cleanly() {
        let items = sse("data: {\"x\":1}\n\ndata: [DONE]\n\ndata: {\"x\":2}\n\n")
            .collect_all()
            .await
            .unwrap();
        assert_eq!(items, vec![Delta { x: 1 }]);
    }

    #[tokio::test]
    async fn test_end_without_done_is_clean() {
        let items = sse("data: {\"x\":1}\n\ndata: {\"x\":2}").collect_all().await.unwrap();
        assert_eq!(items, vec![Delta { x: 1 }, Delta { x: 2 }]);
    }

    #[tokio::test]
    async fn test_named_events_are_skipped() {
        let items = sse("event: ping\ndata: {}\n\n: keep-alive\n\ndata: {\"x\":3}\n\n")
            .collect_all()
            .await
            .unwrap();
        assert_eq!(items, vec![Delta { x: 3 }]);
    }

    #[tokio::test]
    async fn test_decode_error_ends_stream() {
        let mut stream = sse("data: {bad\n\ndata: {\"x\":2}\n\n");
        let items = drain(&mut stream).await;
        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(QianfanError::StreamDecode(_))));
    }

    #[tokio::test]
    async fn test_in_stream_api_error() {
        let mut stream = sse("data: {\"error_code\":336003,\"error_msg\":\"invalid argument\"}\n\n");
        let items = drain(&mut stream).await;
        assert!(matches!(
            &items[0],
            Err(QianfanError::RequestFailed { code: Some(336003), .. })
        ));
    }

    #[tokio::test]
    async fn test_second_iter_is_already_consumed() {
        let mut stream = sse("data: {\"x\":1}\n\n");
        let _first = stream.iter().unwrap();
        assert!(matches!(stream.iter(), Err(QianfanError::AlreadyConsumed)));
        assert!(matches!(stream.tee(), Err(QianfanError::AlreadyConsumed)));
    }

    #[tokio::test]
    async fn test_readable_stream_parses_lines() {
        let source = futures_util::stream::iter(vec![
            Ok::<_, Infallible>(Bytes::from_static(b"{\"x\":1}\n\n{\"x\"")),
            Ok(Bytes::from_static(b":2}\r\n")),
        ]);
        let items = Stream::<Delta>::from_readable_stream(source)
            .collect_all()
            .await
            .unwrap();
        assert_eq!(items, vec![Delta { x: 1 }, Delta { x: 2 }]);
    }

    #[tokio::test]
    async fn test_dropping_unfinished_iter_aborts() {
        let mut stream = numbered(3);
        let handle = stream.abort_handle();
        let mut iter = stream.iter().unwrap();
        assert_eq!(iter.next().await.unwrap().unwrap(), Delta { x: 1 });
        drop(iter);
        assert!(handle.is_aborted());
    }

    #[tokio::test]
    async fn test_finished_iter_does_not_abort() {
        let mut stream = numbered(2);
        let handle = stream.abort_handle();
        let items = drain(&mut stream).await;
        assert_eq!(items.len(), 2);
        assert!(!handle.is_aborted());
    }

    #[tokio::test]
    async fn test_abort_ends_pending_read_gracefully() {
        let source = futures_util::stream::iter(vec![Ok::<_, Infallible>(Bytes::from_static(
            b"data: {\"x\":1}\n\n",
        ))])
        .chain(futures_util::stream::pending());
        let mut stream = Stream::<Delta>::from_sse_bytes(source);
        let handle = stream.abort_handle();
        let mut iter = stream.iter().unwrap();
        assert_eq!(iter.next().await.unwrap().unwrap(), Delta { x: 1 });

        let reader = tokio::spawn(async move { iter.next().await.is_none() });
        tokio::task::yield_now().await;
        handle.abort();
        assert!(reader.await.unwrap());
    }

    #[tokio::test]
    async fn test_close_aborts() {
        let mut stream = numbered(3);
        let handle = stream.abort_handle();
        stream.iter().unwrap().close();
        assert!(handle.is_aborted());
    }

    #[tokio::test]
    async fn test_tee_sequential() {
        let mut control = numbered(5);
        let expected = drain(&mut control).await;

        let (mut left, mut right) = numbered(5).tee().unwrap();
        let left_items = drain(&mut left).await;
        let right_items = drain(&mut right).await;
        assert_eq!(left_items, expected);
        assert_eq!(right_items, expected);
    }

    #[tokio::test]
    async fn test_tee_interleaved() {
        let (mut left, mut right) = numbered(4).tee().unwrap();
        let mut left = left.iter().unwrap();
        let mut right = right.iter().unwrap();

        let mut seen_left = Vec::new();
        let mut seen_right = Vec::new();
        seen_right.push(right.next().await.unwrap().unwrap().x);
        seen_right.push(right.next().await.unwrap().unwrap().x);
        seen_left.push(left.next().await.unwrap().unwrap().x);
        seen_right.push(right.next().await.unwrap().unwrap().x);
        while let Some(item) = left.next().await {
            seen_left.push(item.unwrap().x);
        }
        while let Some(item) = right.next().await {
            seen_right.push(item.unwrap().x);
        }
        assert_eq!(seen_left, vec![1, 2, 3, 4]);
        assert_eq!(seen_right, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_tee_delivers_error_to_both_branches() {
        let (mut left, mut right) = sse("data: {\"x\":1}\n\ndata: nope\n\n").tee().unwrap();
        for branch in [&mut left, &mut right] {
            let items = drain(branch).await;
            assert_eq!(items.len(), 2);
            assert_eq!(items[0].as_ref().unwrap(), &Delta { x: 1 });
            assert!(matches!(items[1], Err(QianfanError::StreamDecode(_))));
        }
    }

    #[tokio::test]
    async fn test_tee_source_aborted_only_after_both_branches_drop() {
        let mut stream = numbered(3);
        let handle = stream.abort_handle();
        let (mut left, right) = stream.tee().unwrap();

        let mut iter = left.iter().unwrap();
        assert_eq!(iter.next().await.unwrap().unwrap(), Delta { x: 1 });
        drop(iter);
        drop(left);
        assert!(!handle.is_aborted());

        drop(right);
        assert!(handle.is_aborted());
    }

    #[tokio::test]
    async fn test_tee_branch_survives_sibling_drop() {
        let (left, mut right) = numbered(3).tee().unwrap();
        drop(left);
        let items: Vec<i64> = drain(&mut right)
            .await
            .into_iter()
            .map(|item| item.unwrap().x)
            .collect();
        assert_eq!(items, vec![1, 2, 3]);
    }
}
