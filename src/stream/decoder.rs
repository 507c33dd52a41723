use futures::stream::BoxStream;
use futures::StreamExt;
use serde_json::Value;
use tracing::{debug, warn};

use super::ByteStream;
use crate::error::Result;
use crate::types::AgentEvent;

const ENVELOPE_TYPE: &str = "stream_event";

/// One decoded line.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Event(AgentEvent),
    /// A line that was not a JSON object. Appended to the open prose block.
    RawText(String),
}

/// Incremental decoder over arbitrary chunk boundaries.
///
/// Bytes are buffered until a newline arrives, so a multi-byte character
/// split across two reads is only converted once it is whole.
#[derive(Debug)]
pub struct EventDecoder {
    buffer: Vec<u8>,
    prefix: String,
}

impl EventDecoder {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            buffer: Vec::new(),
            prefix: prefix.into(),
        }
    }

    /// Feed one chunk; returns every frame completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Frame> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&line[..line.len() - 1]);
            if let Some(frame) = parse_line(&text, &self.prefix) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Flush a trailing line that never got its newline.
    pub fn finish(&mut self) -> Vec<Frame> {
        if self.buffer.is_empty() {
            return Vec::new();
        }
        let line = std::mem::take(&mut self.buffer);
        let text = String::from_utf8_lossy(&line);
        parse_line(&text, &self.prefix).into_iter().collect()
    }
}

/// Decode a single physical line.
///
/// Blank lines and lines without the prefix (SSE comments, keep-alives) are
/// skipped. An empty prefix accepts every line.
pub fn parse_line(line: &str, prefix: &str) -> Option<Frame> {
    let line = line.trim_end_matches('\r');
    let Some(data) = line.strip_prefix(prefix) else {
        if !line.trim().is_empty() {
            debug!(line, "skipping unprefixed stream line");
        }
        return None;
    };
    if data.trim().is_empty() {
        return None;
    }

    let value = match serde_json::from_str::<Value>(data) {
        Ok(value @ Value::Object(_)) => value,
        _ => return Some(Frame::RawText(data.to_string())),
    };

    let value = unwrap_envelope(value);
    match serde_json::from_value::<AgentEvent>(value) {
        Ok(event) => Some(Frame::Event(event)),
        Err(err) => {
            warn!(error = %err, "malformed agent event, ignoring");
            Some(Frame::Event(AgentEvent::Unknown))
        }
    }
}

fn unwrap_envelope(mut value: Value) -> Value {
    let is_envelope = value.get("type").and_then(Value::as_str) == Some(ENVELOPE_TYPE);
    if is_envelope {
        if let Some(inner @ Value::Object(_)) = value.get_mut("event").map(Value::take) {
            return inner;
        }
    }
    value
}

/// Adapt a raw byte stream into decoded frames.
///
/// A transport error is yielded once and ends the stream.
pub fn decode_stream(bytes: ByteStream, prefix: String) -> BoxStream<'static, Result<Frame>> {
    let stream = async_stream::stream! {
        let mut decoder = EventDecoder::new(prefix);
        futures::pin_mut!(bytes);

        while let Some(chunk) = bytes.next().await {
            match chunk {
                Ok(chunk) => {
                    for frame in decoder.push(&chunk) {
                        yield Ok(frame);
                    }
                }
                Err(err) => {
                    yield Err(err);
                    return;
                }
            }
        }
        for frame in decoder.finish() {
            yield Ok(frame);
        }
    };
    stream.boxed()
}
