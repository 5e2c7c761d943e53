//! Line-level decoding of the upstream Server-Sent-Events byte stream.
//!
//! Bytes go in, [`DecodedLine`]s come out. Only `data:` lines produce output;
//! a payload that is not valid JSON is reported as [`DecodedLine::Malformed`]
//! so callers decide what skipping means.

use super::anthropic_types::StreamEvent;

pub const DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug, Clone)]
pub enum DecodedLine {
    Event(StreamEvent),
    /// A literal `data: [DONE]` line.
    Done,
    Malformed { payload: String, error: String },
}

/// Decode a single line (without its terminator). Non-`data:` lines yield `None`.
pub fn decode_line(line: &str) -> Option<DecodedLine> {
    let line = line.trim();
    let payload = line.strip_prefix("data:")?.trim();

    if payload == DONE_SENTINEL {
        return Some(DecodedLine::Done);
    }

    Some(match serde_json::from_str::<StreamEvent>(payload) {
        Ok(event) => DecodedLine::Event(event),
        Err(e) => DecodedLine::Malformed {
            payload: payload.to_string(),
            error: e.to_string(),
        },
    })
}

/// Incremental splitter: accumulates arbitrary byte chunks and decodes each
/// complete line. Multi-byte characters split across chunks are handled
/// because decoding only happens on whole lines.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buffer: Vec<u8>,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<DecodedLine> {
        self.buffer.extend_from_slice(chunk);

        let mut decoded = Vec::new();
        while let Some(newline_pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline_pos).collect();
            if let Some(d) = decode_line(&String::from_utf8_lossy(&line)) {
                decoded.push(d);
            }
        }
        decoded
    }

    /// Decode whatever is left once the upstream has closed.
    pub fn finish(&mut self) -> Option<DecodedLine> {
        if self.buffer.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buffer);
        decode_line(&String::from_utf8_lossy(&rest))
    }
}
