//! HTTP side of a relay session: a channel-backed [`ClientWriter`] and the
//! response framings a committed stream can be rendered in.

use std::{convert::Infallible, io};

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, HeaderMap, HeaderValue},
    response::{sse::Event, IntoResponse, Response, Sse},
};
use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use llmrelay_core::{AbortReason, ClientWriter, StreamChunk, TransportError};

use crate::error::ApiError;

const NDJSON: &str = "application/x-ndjson";
const EVENT_STREAM: &str = "text/event-stream";
const PLAIN_TEXT: &str = "text/plain; charset=utf-8";

/// Serialize a value as a JSON SSE data event.
pub fn sse_event<T: Serialize>(value: &T) -> Result<Event, serde_json::Error> {
    let json = serde_json::to_string(value)?;
    Ok(Event::default().data(json))
}

/// The terminal SSE message that signals the end of a stream.
pub fn sse_done() -> Event {
    Event::default().data("[DONE]")
}

/// What the relay task hands to the response body.
#[derive(Debug, Clone, PartialEq)]
pub enum BodyFrame {
    Chunk { index: u64, payload: Bytes },
    Done,
    /// The stream aborted; carries the JSON error body.
    Failed(Value),
}

pub type FrameStream = BoxStream<'static, BodyFrame>;

/// Wire framing of a streamed response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamFormat {
    /// Payload bytes as-is. An abort cuts the body short.
    Raw { content_type: &'static str },
    /// `data:` events, `data: [DONE]`, and `event: error` on abort.
    Sse,
    /// One JSON object per line, ending with `{"done":true}` or `{"error":..}`.
    Ndjson,
}

impl StreamFormat {
    pub fn text() -> Self {
        StreamFormat::Raw {
            content_type: PLAIN_TEXT,
        }
    }

    /// Pick a text framing from the `Accept` header; plain text by default.
    ///
    /// The highest-weighted supported media range wins, ties going to the
    /// earliest. Ranges with `q=0` are refused.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let accept = headers
            .get(header::ACCEPT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();

        let mut best: Option<(f32, StreamFormat)> = None;
        for range in accept.split(',') {
            let mut parts = range.split(';').map(str::trim);
            let media = parts.next().unwrap_or_default().to_ascii_lowercase();
            let format = match media.as_str() {
                EVENT_STREAM => StreamFormat::Sse,
                NDJSON => StreamFormat::Ndjson,
                "text/plain" => Self::text(),
                _ => continue,
            };
            let q = parts
                .filter_map(|param| param.strip_prefix("q=").or_else(|| param.strip_prefix("Q=")))
                .find_map(|value| value.trim().parse::<f32>().ok())
                .unwrap_or(1.0);
            if q <= 0.0 {
                continue;
            }
            if best.map_or(true, |(best_q, _)| q > best_q) {
                best = Some((q, format));
            }
        }
        best.map(|(_, format)| format).unwrap_or_else(Self::text)
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            StreamFormat::Raw { content_type } => *content_type,
            StreamFormat::Sse => EVENT_STREAM,
            StreamFormat::Ndjson => NDJSON,
        }
    }

    /// Render a committed frame stream as the response.
    pub fn into_response(self, frames: FrameStream) -> Response {
        match self {
            StreamFormat::Sse => Sse::new(frames.filter_map(|frame| async move {
                sse_frame(frame).map(Ok::<Event, Infallible>)
            }))
            .into_response(),
            StreamFormat::Ndjson => byte_response(
                NDJSON,
                frames.map(|frame| Ok::<Bytes, io::Error>(ndjson_frame(frame))),
            ),
            StreamFormat::Raw { content_type } => byte_response(
                content_type,
                frames.filter_map(|frame| async move { raw_frame(frame) }),
            ),
        }
    }
}

fn byte_response<S>(content_type: &'static str, stream: S) -> Response
where
    S: futures::Stream<Item = Result<Bytes, io::Error>> + Send + 'static,
{
    let mut response = Body::from_stream(stream).into_response();
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

fn sse_frame(frame: BodyFrame) -> Option<Event> {
    match frame {
        BodyFrame::Chunk { index, payload } => Some(
            Event::default()
                .id(index.to_string())
                .data(sse_text(&payload)),
        ),
        BodyFrame::Done => Some(sse_done()),
        BodyFrame::Failed(error) => sse_event(&error).ok().map(|event| event.event("error")),
    }
}

/// SSE fields cannot carry carriage returns; line breaks become `data:` lines.
fn sse_text(payload: &[u8]) -> String {
    String::from_utf8_lossy(payload)
        .replace("\r\n", "\n")
        .replace('\r', "\n")
}

fn ndjson_frame(frame: BodyFrame) -> Bytes {
    let value = match frame {
        BodyFrame::Chunk { index, payload } => json!({
            "index": index,
            "content": String::from_utf8_lossy(&payload),
        }),
        BodyFrame::Done => json!({ "done": true }),
        BodyFrame::Failed(error) => error,
    };
    let mut line = value.to_string();
    line.push('\n');
    Bytes::from(line)
}

fn raw_frame(frame: BodyFrame) -> Option<Result<Bytes, io::Error>> {
    match frame {
        BodyFrame::Chunk { payload, .. } => Some(Ok(payload)),
        BodyFrame::Done => None,
        BodyFrame::Failed(error) => Some(Err(io::Error::other(error.to_string()))),
    }
}

/// [`ClientWriter`] feeding a response body through a bounded channel.
///
/// The channel holds one frame, so a slow client stalls the relay instead
/// of buffering. Dropping the receiving body reads as a disconnect.
pub struct HttpBodyWriter {
    tx: mpsc::Sender<BodyFrame>,
}

impl HttpBodyWriter {
    pub fn channel() -> (Self, mpsc::Receiver<BodyFrame>) {
        let (tx, rx) = mpsc::channel(1);
        (Self { tx }, rx)
    }

    async fn send(&self, frame: BodyFrame) -> Result<(), TransportError> {
        self.tx
            .send(frame)
            .await
            .map_err(|_| TransportError::Disconnected)
    }
}

#[async_trait]
impl ClientWriter for HttpBodyWriter {
    async fn write_chunk(&mut self, chunk: &StreamChunk) -> Result<(), TransportError> {
        self.send(BodyFrame::Chunk {
            index: chunk.sequence_index,
            payload: chunk.payload.clone(),
        })
        .await
    }

    async fn finish(&mut self) -> Result<(), TransportError> {
        self.send(BodyFrame::Done).await
    }

    async fn abort(&mut self, reason: &AbortReason) -> Result<(), TransportError> {
        self.send(BodyFrame::Failed(ApiError::from(reason).body())).await
    }

    async fn closed(&mut self) {
        self.tx.closed().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use http_body_util::BodyExt;

    fn frames(list: Vec<BodyFrame>) -> FrameStream {
        stream::iter(list).boxed()
    }

    fn chunk(index: u64, text: &'static str) -> BodyFrame {
        BodyFrame::Chunk {
            index,
            payload: Bytes::from_static(text.as_bytes()),
        }
    }

    async fn body_text(resp: Response) -> String {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn test_format_from_accept_header() {
        let mut headers = HeaderMap::new();
        assert_eq!(StreamFormat::from_headers(&headers), StreamFormat::text());
        headers.insert(header::ACCEPT, HeaderValue::from_static("text/event-stream"));
        assert_eq!(StreamFormat::from_headers(&headers), StreamFormat::Sse);
        headers.insert(header::ACCEPT, HeaderValue::from_static("application/x-ndjson"));
        assert_eq!(StreamFormat::from_headers(&headers), StreamFormat::Ndjson);
    }

    #[test]
    fn test_format_honours_accept_weights() {
        let cases = [
            ("text/event-stream;q=0, application/x-ndjson", StreamFormat::Ndjson),
            ("application/x-ndjson;q=0.4, text/event-stream;q=0.9", StreamFormat::Sse),
            ("text/plain, text/event-stream;q=0.5", StreamFormat::text()),
            ("text/event-stream; charset=utf-8", StreamFormat::Sse),
            ("text/event-stream;q=0", StreamFormat::text()),
            ("*/*", StreamFormat::text()),
        ];
        for (accept, expected) in cases {
            let mut headers = HeaderMap::new();
            headers.insert(header::ACCEPT, HeaderValue::from_static(accept));
            assert_eq!(StreamFormat::from_headers(&headers), expected, "Accept: {accept}");
        }
    }

    #[tokio::test]
    async fn test_sse_framing() {
        let resp = StreamFormat::Sse.into_response(frames(vec![chunk(0, "Hi"), BodyFrame::Done]));
        let body = body_text(resp).await;
        assert!(body.contains("id: 0\ndata: Hi\n\n"));
        assert!(body.ends_with("data: [DONE]\n\n"));
    }

    #[tokio::test]
    async fn test_ndjson_framing_with_error() {
        let error = ApiError::Upstream("boom".into()).body();
        let resp =
            StreamFormat::Ndjson.into_response(frames(vec![chunk(0, "a"), BodyFrame::Failed(error)]));
        assert_eq!(resp.headers()[header::CONTENT_TYPE], NDJSON);
        let body = body_text(resp).await;
        let lines: Vec<Value> = body
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines[0]["content"], "a");
        assert_eq!(lines[1]["error"]["type"], "upstream_error");
    }

    #[tokio::test]
    async fn test_raw_abort_errors_body() {
        let error = ApiError::Upstream("boom".into()).body();
        let resp = StreamFormat::text()
            .into_response(frames(vec![chunk(0, "partial"), BodyFrame::Failed(error)]));
        let mut body = resp.into_body();
        let first = body.frame().await.unwrap().unwrap().into_data().unwrap();
        assert_eq!(first, Bytes::from_static(b"partial"));
        assert!(body.frame().await.unwrap().is_err());
    }

    #[tokio::test]
    async fn test_writer_reports_dropped_receiver_as_disconnect() {
        let (mut writer, rx) = HttpBodyWriter::channel();
        drop(rx);
        writer.closed().await;
        let err = writer
            .write_chunk(&StreamChunk::new(0, "x"))
            .await
            .unwrap_err();
        assert_eq!(err, TransportError::Disconnected);
    }
}
