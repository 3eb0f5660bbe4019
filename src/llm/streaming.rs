// Line framing for streaming vendor responses.
//
// SSE format:
//   event: event_name\n
//   data: json_payload\n
//   \n
//
// Rules:
// - Lines starting with ':' are comments (ignored).
// - Empty line is the event boundary.
// - data fields can span multiple lines (joined with '\n').
// - event field sets the event type for the next dispatched event.
//
// NDJSON format: one complete JSON document per line.

use bytes::Bytes;
use futures_util::Stream;
use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

use super::error::{LlmError, Result};

/// A parsed SSE event.
#[derive(Debug, Clone, PartialEq)]
pub struct SseEvent {
    pub event_type: Option<String>,
    pub data: String,
}

/// Boxed stream of framed items, as handed to the adapters.
pub type FrameStream<T> = Pin<Box<dyn Stream<Item = Result<T>> + Send>>;

/// Parse a byte stream into SSE events.
pub fn parse_sse_stream<S>(vendor: &'static str, byte_stream: S) -> FrameStream<SseEvent>
where
    S: Stream<Item = reqwest::Result<Bytes>> + Unpin + Send + 'static,
{
    Box::pin(LineStream::new(vendor, byte_stream, SseFramer::default()))
}

/// Parse a byte stream into non-empty NDJSON lines.
pub fn parse_ndjson_stream<S>(vendor: &'static str, byte_stream: S) -> FrameStream<String>
where
    S: Stream<Item = reqwest::Result<Bytes>> + Unpin + Send + 'static,
{
    Box::pin(LineStream::new(vendor, byte_stream, NdjsonFramer))
}

/// Turns complete lines into frames.
trait Framer {
    type Frame;

    fn line(&mut self, line: &str) -> Option<Self::Frame>;

    /// Called once the body ends, after any trailing partial line.
    fn finish(&mut self) -> Option<Self::Frame>;
}

#[derive(Default)]
struct SseFramer {
    current_event_type: Option<String>,
    current_data: Vec<String>,
}

impl SseFramer {
    fn dispatch(&mut self) -> Option<SseEvent> {
        if self.current_data.is_empty() {
            self.current_event_type = None;
            return None;
        }
        let event = SseEvent {
            event_type: self.current_event_type.take(),
            data: self.current_data.join("\n"),
        };
        self.current_data.clear();
        Some(event)
    }
}

impl Framer for SseFramer {
    type Frame = SseEvent;

    fn line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.dispatch();
        }

        // Comment line.
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.find(':') {
            Some(pos) => {
                let value = &line[pos + 1..];
                // Strip single leading space per SSE spec.
                let value = value.strip_prefix(' ').unwrap_or(value);
                (&line[..pos], value)
            }
            None => (line, ""),
        };

        match field {
            "event" => self.current_event_type = Some(value.to_string()),
            "data" => self.current_data.push(value.to_string()),
            _ => {} // id, retry
        }
        None
    }

    fn finish(&mut self) -> Option<SseEvent> {
        self.dispatch()
    }
}

struct NdjsonFramer;

impl Framer for NdjsonFramer {
    type Frame = String;

    fn line(&mut self, line: &str) -> Option<String> {
        let line = line.trim();
        (!line.is_empty()).then(|| line.to_string())
    }

    fn finish(&mut self) -> Option<String> {
        None
    }
}

struct LineStream<S, F: Framer> {
    vendor: &'static str,
    inner: S,
    buffer: Vec<u8>,
    framer: F,
    pending: VecDeque<F::Frame>,
    ended: bool,
}

impl<S, F> LineStream<S, F>
where
    S: Stream<Item = reqwest::Result<Bytes>> + Unpin,
    F: Framer,
{
    fn new(vendor: &'static str, inner: S, framer: F) -> Self {
        Self {
            vendor,
            inner,
            buffer: Vec::new(),
            framer,
            pending: VecDeque::new(),
            ended: false,
        }
    }

    /// Split buffered bytes into complete lines. Lines are decoded only once
    /// complete so multi-byte characters split across chunks survive.
    fn process_bytes(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);

        while let Some(newline_pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=newline_pos).collect();
            let line = String::from_utf8_lossy(&raw[..raw.len() - 1]);
            if let Some(frame) = self.framer.line(line.trim_end_matches('\r')) {
                self.pending.push_back(frame);
            }
        }
    }

    fn finish(&mut self) {
        if !self.buffer.is_empty() {
            let raw = std::mem::take(&mut self.buffer);
            let line = String::from_utf8_lossy(&raw).into_owned();
            if let Some(frame) = self.framer.line(line.trim_end_matches('\r')) {
                self.pending.push_back(frame);
            }
        }
        if let Some(frame) = self.framer.finish() {
            self.pending.push_back(frame);
        }
    }
}

impl<S, F> Stream for LineStream<S, F>
where
    S: Stream<Item = reqwest::Result<Bytes>> + Unpin,
    F: Framer + Unpin,
    F::Frame: Unpin,
{
    type Item = Result<F::Frame>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;

        loop {
            if let Some(frame) = this.pending.pop_front() {
                return Poll::Ready(Some(Ok(frame)));
            }
            if this.ended {
                return Poll::Ready(None);
            }

            match Pin::new(&mut this.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => this.process_bytes(&bytes),
                Poll::Ready(Some(Err(e))) => {
                    this.ended = true;
                    this.pending.clear();
                    return Poll::Ready(Some(Err(LlmError::transport(this.vendor, e))));
                }
                Poll::Ready(None) => {
                    // Flush a final event that lacked its blank-line terminator.
                    this.ended = true;
                    this.finish();
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
