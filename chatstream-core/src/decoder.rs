//! Frame decoding for `text/event-stream` chat-completion bodies.
//!
//! Contract:
//! - Frames are separated by a blank line; a frame may straddle any number of reads.
//! - Each frame yields at most one [`DeltaRecord`] (`choices[0].delta`). Frames that are empty,
//!   comments, or fail to parse are skipped and never end the stream.
//! - `data: [DONE]` ends decoding immediately; the underlying byte stream is dropped.
//! - A transport error is yielded once and ends the stream.

use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::stream::Stream;
use serde::Deserialize;

use crate::error::CoreResult;
use crate::model::DeltaRecord;
use crate::normalizer::normalize_delta;

/// Terminal payload sent by the upstream API.
pub const DONE_SENTINEL: &str = "[DONE]";

/// Boxed byte stream, as produced by a transport.
pub type ByteStream = futures::stream::BoxStream<'static, CoreResult<Bytes>>;

/// One decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Delta(DeltaRecord),
    Done,
}

impl Frame {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done)
    }
}

#[derive(Deserialize)]
struct ChunkWire {
    #[serde(default)]
    choices: Vec<ChoiceWire>,
}

#[derive(Deserialize)]
struct ChoiceWire {
    delta: Option<DeltaRecord>,
}

/// Push-based frame splitter. Holds the residual bytes between reads.
#[derive(Debug, Default)]
pub struct FrameParser {
    buf: Vec<u8>,
    /// Bytes of `buf` already searched without finding a boundary start.
    scanned: usize,
    done: bool,
}

impl FrameParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once the sentinel has been seen.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Feed one chunk; returns every frame completed by it, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Frame> {
        let mut out = Vec::new();
        if self.done || chunk.is_empty() {
            return out;
        }
        self.buf.extend_from_slice(chunk);
        while let Some((end, sep_len)) = find_boundary(&self.buf, self.scanned) {
            self.scanned = 0;
            let segment: Vec<u8> = self.buf.drain(..end + sep_len).take(end).collect();
            if let Some(frame) = parse_frame(&segment) {
                let terminal = frame.is_terminal();
                out.push(frame);
                if terminal {
                    self.done = true;
                    self.buf.clear();
                    break;
                }
            }
        }
        // A separator may start in the last two bytes and complete on the next push.
        self.scanned = self.buf.len().saturating_sub(2);
        out
    }

    /// Flush the residual segment once the byte stream has ended.
    pub fn finish(&mut self) -> Option<Frame> {
        if self.done {
            return None;
        }
        self.done = true;
        let rest = std::mem::take(&mut self.buf);
        parse_frame(&rest)
    }
}

/// Locate the first blank line at or after `from`. Returns (segment end, separator length).
fn find_boundary(buf: &[u8], from: usize) -> Option<(usize, usize)> {
    let mut i = from;
    while i < buf.len() {
        if buf[i] == b'\n' {
            match &buf[i + 1..] {
                [b'\n', ..] => return Some((i, 2)),
                [b'\r', b'\n', ..] => return Some((i, 3)),
                _ => {}
            }
        }
        i += 1;
    }
    None
}

/// `name: value` with a bare field name. Prefix-less JSON payloads never match.
fn is_field_line(line: &str) -> bool {
    match line.split_once(':') {
        Some((name, _)) => {
            !name.is_empty()
                && name
                    .bytes()
                    .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
        }
        None => false,
    }
}

/// Parse one complete frame. `None` means "skip".
pub fn parse_frame(raw: &[u8]) -> Option<Frame> {
    let text = String::from_utf8_lossy(raw);
    let mut data: Vec<&str> = Vec::new();
    for line in text.lines() {
        let line = line.trim_end_matches('\r');
        if let Some(rest) = line.strip_prefix("data:") {
            data.push(rest);
        } else if line.is_empty() || line.starts_with(':') || is_field_line(line) {
            // Comments plus `event:`, `id:`, `retry:` and unknown fields carry no payload.
            continue;
        } else {
            data.push(line);
        }
    }
    let payload = data.join("\n");
    let payload = payload.trim();
    if payload.is_empty() {
        return None;
    }
    if payload == DONE_SENTINEL {
        return Some(Frame::Done);
    }

    match serde_json::from_str::<ChunkWire>(payload) {
        Ok(chunk) => match chunk.choices.into_iter().next().and_then(|c| c.delta) {
            Some(delta) => Some(Frame::Delta(normalize_delta(delta))),
            None => {
                tracing::debug!(payload, "frame has no choices[0].delta; skipped");
                None
            }
        },
        Err(e) => {
            tracing::debug!(error = %e, payload, "malformed frame skipped");
            None
        }
    }
}

/// Lazy decoder over a byte stream. Yields deltas until the sentinel, the end of the
/// byte stream, or a transport error.
pub struct FrameDecoder<S> {
    inner: Option<S>,
    parser: FrameParser,
    ready: VecDeque<DeltaRecord>,
    error: Option<crate::error::ChatStreamError>,
}

impl<S> FrameDecoder<S>
where
    S: Stream<Item = CoreResult<Bytes>> + Unpin,
{
    pub fn new(inner: S) -> Self {
        Self {
            inner: Some(inner),
            parser: FrameParser::new(),
            ready: VecDeque::new(),
            error: None,
        }
    }

    /// Whether the underlying byte stream has been released.
    pub fn is_released(&self) -> bool {
        self.inner.is_none()
    }

    fn release(&mut self) {
        self.inner = None;
    }
}

impl<S> Stream for FrameDecoder<S>
where
    S: Stream<Item = CoreResult<Bytes>> + Unpin,
{
    type Item = CoreResult<DeltaRecord>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            // Frames already complete go out before anything else is read.
            if let Some(d) = self.ready.pop_front() {
                return Poll::Ready(Some(Ok(d)));
            }
            if let Some(err) = self.error.take() {
                return Poll::Ready(Some(Err(err)));
            }
            let Some(inner) = self.inner.as_mut() else {
                return Poll::Ready(None);
            };

            match Pin::new(inner).poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    let this = &mut *self;
                    for frame in this.parser.push(&chunk) {
                        match frame {
                            Frame::Delta(d) => this.ready.push_back(d),
                            Frame::Done => this.inner = None,
                        }
                    }
                }
                Poll::Ready(Some(Err(e))) => {
                    self.release();
                    self.error = Some(e);
                }
                Poll::Ready(None) => {
                    self.release();
                    if let Some(Frame::Delta(d)) = self.parser.finish() {
                        self.ready.push_back(d);
                    }
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ChatStreamError;
    use futures_util::StreamExt;

    const ROLE: &str = r#"data: {"id":"c1","object":"chat.completion.chunk","created":1,"model":"gpt-4o","choices":[{"delta":{"role":"assistant"},"index":0,"finish_reason":null}]}"#;
    const THE: &str = r#"data: {"id":"c1","object":"chat.completion.chunk","created":1,"model":"gpt-4o","choices":[{"delta":{"content":"The"},"index":0,"finish_reason":null}]}"#;
    const CAFE: &str = r#"data: {"choices":[{"delta":{"content":" café ☕"},"index":0}]}"#;
    const STOP: &str = r#"data: {"choices":[{"delta":{},"index":0,"finish_reason":"stop"}]}"#;

    fn body(frames: &[&str]) -> String {
        frames.iter().map(|f| format!("{f}\n\n")).collect()
    }

    fn chunked(bytes: &[u8], size: usize) -> ByteStream {
        let parts: Vec<CoreResult<Bytes>> = bytes
            .chunks(size.max(1))
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        futures::stream::iter(parts).boxed()
    }

    async fn decode_all(stream: ByteStream) -> Vec<DeltaRecord> {
        FrameDecoder::new(stream)
            .map(|r| r.expect("no transport error"))
            .collect()
            .await
    }

    #[tokio::test]
    async fn chunk_boundaries_do_not_change_output() {
        let text = body(&[ROLE, THE, CAFE, STOP, "data: [DONE]"]);
        let whole = decode_all(chunked(text.as_bytes(), text.len())).await;
        assert_eq!(whole.len(), 4);
        assert_eq!(whole[0], DeltaRecord::role("assistant"));
        assert_eq!(whole[1], DeltaRecord::content("The"));
        assert_eq!(whole[2], DeltaRecord::content(" café ☕"));
        assert_eq!(whole[3], DeltaRecord::default());

        for size in [1, 2, 3, 7, 64] {
            let got = decode_all(chunked(text.as_bytes(), size)).await;
            assert_eq!(got, whole, "chunk size {size}");
        }
    }

    #[tokio::test]
    async fn malformed_frame_is_skipped() {
        let text = body(&[ROLE, "data: { bad", THE, "data: [DONE]"]);
        let got = decode_all(chunked(text.as_bytes(), 5)).await;
        assert_eq!(got, vec![DeltaRecord::role("assistant"), DeltaRecord::content("The")]);
    }

    #[tokio::test]
    async fn sentinel_stops_before_remaining_bytes() {
        let text = body(&[ROLE, "data: [DONE]", THE]);
        let mut dec = FrameDecoder::new(chunked(text.as_bytes(), text.len()));
        assert_eq!(dec.next().await.unwrap().unwrap(), DeltaRecord::role("assistant"));
        assert!(dec.is_released());
        assert!(dec.next().await.is_none());
    }

    #[tokio::test]
    async fn end_of_bytes_without_sentinel_ends_sequence() {
        let text = body(&[ROLE, THE]);
        let got = decode_all(chunked(text.as_bytes(), 4)).await;
        assert_eq!(got.len(), 2);
    }

    #[tokio::test]
    async fn trailing_frame_without_blank_line_is_flushed() {
        let text = format!("{ROLE}\n\n{THE}");
        let got = decode_all(chunked(text.as_bytes(), 9)).await;
        assert_eq!(got, vec![DeltaRecord::role("assistant"), DeltaRecord::content("The")]);
    }

    #[tokio::test]
    async fn transport_error_is_yielded_once() {
        let parts: Vec<CoreResult<Bytes>> = vec![
            Ok(Bytes::from(format!("{ROLE}\n\n"))),
            Err(ChatStreamError::Stream {
                provider: "test".into(),
                message: "reset".into(),
            }),
            Ok(Bytes::from(format!("{THE}\n\n"))),
        ];
        let mut dec = FrameDecoder::new(futures::stream::iter(parts).boxed());
        assert!(dec.next().await.unwrap().is_ok());
        let err = dec.next().await.unwrap().unwrap_err();
        assert_eq!(err.kind(), "stream");
        assert!(dec.next().await.is_none());
    }

    #[test]
    fn parser_yields_all_frames_of_one_chunk() {
        let mut p = FrameParser::new();
        assert!(p.push(b"").is_empty());
        let frames = p.push(body(&[ROLE, THE]).as_bytes());
        assert_eq!(frames.len(), 2);
        assert!(p.push(b"data: {\"choices\":[{\"delta\":{\"content\":\"x\"}}]}").is_empty());
        assert_eq!(
            p.push(b"\n\n"),
            vec![Frame::Delta(DeltaRecord::content("x"))]
        );
    }

    #[test]
    fn crlf_frames_and_sse_fields() {
        let mut p = FrameParser::new();
        let raw = ": keep-alive\r\n\r\nevent: message\r\nid: 4\r\ndata: {\"choices\":[{\"delta\":{\"content\":\"hi\"}}]}\r\n\r\ndata: [DONE]\r\n\r\n";
        let frames = p.push(raw.as_bytes());
        assert_eq!(
            frames,
            vec![Frame::Delta(DeltaRecord::content("hi")), Frame::Done]
        );
        assert!(p.is_done());
        assert!(p.push(b"data: {}\n\n").is_empty());
    }

    #[test]
    fn unknown_fields_do_not_corrupt_the_payload() {
        let raw = "foo: bar\nx-trace_id: 7\ndata: {\"choices\":[{\"delta\":{\"content\":\"hi\"}}]}";
        assert_eq!(
            parse_frame(raw.as_bytes()),
            Some(Frame::Delta(DeltaRecord::content("hi")))
        );
        // Prefix-less JSON is still read as data.
        assert_eq!(
            parse_frame(br#"{"choices":[{"delta":{"role":"assistant"}}]}"#),
            Some(Frame::Delta(DeltaRecord::role("assistant")))
        );
    }

    #[test]
    fn byte_at_a_time_resumes_scanning() {
        let text = "a".repeat(20_000);
        let raw = format!(
            "data: {{\"choices\":[{{\"delta\":{{\"content\":\"{text}\"}}}}]}}\r\n\r\n"
        );
        let mut p = FrameParser::new();
        let mut frames = Vec::new();
        for (i, b) in raw.as_bytes().iter().enumerate() {
            frames.extend(p.push(std::slice::from_ref(b)));
            if frames.is_empty() {
                assert_eq!(p.scanned, (i + 1).saturating_sub(2));
            }
        }
        assert_eq!(frames, vec![Frame::Delta(DeltaRecord::content(text))]);
        assert_eq!(p.scanned, 0);
    }

    #[test]
    fn frames_without_delta_or_choices_are_skipped() {
        assert_eq!(parse_frame(br#"data: {"choices":[]}"#), None);
        assert_eq!(parse_frame(br#"data: {"error":{"message":"boom"}}"#), None);
        assert_eq!(parse_frame(b"data:   "), None);
        assert_eq!(parse_frame(b"data: [DONE]"), Some(Frame::Done));
    }

    #[test]
    fn backtick_quirk_is_normalized_in_frames() {
        let f = parse_frame(br#"data: {"choices":[{"delta":{"content":"`  let"}}]}"#);
        assert_eq!(f, Some(Frame::Delta(DeltaRecord::content("`let"))));
    }
}
