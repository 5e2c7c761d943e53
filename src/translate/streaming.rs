//! State machine for translating Anthropic stream events into `OpenAI` stream chunks.
//!
//! The [`StreamTranslator`] consumes decoded upstream lines one at a time and
//! emits the [`OutboundFrame`]s to write back, in order. It does no I/O.

use chrono::{DateTime, Utc};

use super::anthropic_types::StreamEvent;
use super::openai_types::{ChatCompletionChunk, ChunkChoice, ChunkDelta};
use super::response::fallback_completion_id;
use super::sse::{DecodedLine, DONE_SENTINEL};

/// One `data:` payload of the outbound event stream.
#[derive(Debug, Clone)]
pub enum OutboundFrame {
    Chunk(ChatCompletionChunk),
    Done,
    /// Error payload written in place of a stream when the upstream refuses it.
    Error(serde_json::Value),
}

impl OutboundFrame {
    /// The text that follows `data: ` on the wire.
    pub fn to_data(&self) -> String {
        match self {
            OutboundFrame::Chunk(chunk) => serde_json::to_string(chunk).unwrap_or_default(),
            OutboundFrame::Done => DONE_SENTINEL.to_string(),
            OutboundFrame::Error(payload) => payload.to_string(),
        }
    }
}

/// Usage:
///   let mut translator = StreamTranslator::new("claude-sonnet-4-5-20250929", Utc::now());
///   for line in decoded_lines {
///       for frame in translator.process_line(&line) { /* write frame */ }
///       if translator.is_finished() { break; }
///   }
#[derive(Debug)]
pub struct StreamTranslator {
    id: String,
    model: String,
    created: i64,
    finished: bool,
}

impl StreamTranslator {
    pub fn new(model: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: fallback_completion_id(now),
            model: model.to_string(),
            created: now.timestamp(),
            finished: false,
        }
    }

    /// Set once `message_stop` has been translated; nothing more is emitted after that.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn process_line(&mut self, line: &DecodedLine) -> Vec<OutboundFrame> {
        if self.finished {
            return Vec::new();
        }
        match line {
            DecodedLine::Event(event) => self.process_event(event),
            // Forwarded as-is; only message_stop ends the stream.
            DecodedLine::Done => vec![OutboundFrame::Done],
            DecodedLine::Malformed { .. } => Vec::new(),
        }
    }

    pub fn process_event(&mut self, event: &StreamEvent) -> Vec<OutboundFrame> {
        if self.finished {
            return Vec::new();
        }

        match event {
            StreamEvent::MessageStart { message } => {
                if let Some(ref id) = message.id {
                    self.id = id.clone();
                }
                if let Some(ref model) = message.model {
                    self.model = model.clone();
                }
                Vec::new()
            }
            StreamEvent::ContentBlockDelta { delta, .. } => {
                let text = delta.text.clone().unwrap_or_default();
                vec![OutboundFrame::Chunk(self.make_chunk(Some(text), None))]
            }
            StreamEvent::MessageStop => {
                self.finished = true;
                vec![
                    OutboundFrame::Chunk(self.make_chunk(None, Some("stop"))),
                    OutboundFrame::Done,
                ]
            }
            StreamEvent::Error { .. } | StreamEvent::Other => Vec::new(),
        }
    }

    fn make_chunk(&self, content: Option<String>, finish_reason: Option<&str>) -> ChatCompletionChunk {
        ChatCompletionChunk {
            id: self.id.clone(),
            object: "chat.completion.chunk".to_string(),
            created: self.created,
            model: self.model.clone(),
            choices: vec![ChunkChoice {
                index: 0,
                delta: ChunkDelta { content },
                finish_reason: finish_reason.map(String::from),
            }],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::anthropic_types::{BlockDelta, StreamMessage};
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_700_000_000_500).unwrap()
    }

    fn text_delta(text: &str) -> StreamEvent {
        StreamEvent::ContentBlockDelta {
            index: 0,
            delta: BlockDelta {
                text: Some(text.to_string()),
            },
        }
    }

    fn chunk(frame: &OutboundFrame) -> &ChatCompletionChunk {
        match frame {
            OutboundFrame::Chunk(c) => c,
            other => panic!("Expected chunk, got {other:?}"),
        }
    }

    #[test]
    fn test_simple_text_stream() {
        let mut translator = StreamTranslator::new("test-model", now());

        let frames = translator.process_event(&text_delta("Hi"));
        assert_eq!(frames.len(), 1);
        let first = chunk(&frames[0]);
        assert_eq!(first.object, "chat.completion.chunk");
        assert_eq!(first.id, "chatcmpl-1700000000500");
        assert_eq!(first.created, 1_700_000_000);
        assert_eq!(first.model, "test-model");
        assert_eq!(first.choices[0].delta.content.as_deref(), Some("Hi"));
        assert!(first.choices[0].finish_reason.is_none());

        let frames = translator.process_event(&text_delta(" there"));
        assert_eq!(chunk(&frames[0]).choices[0].delta.content.as_deref(), Some(" there"));

        let frames = translator.process_event(&StreamEvent::MessageStop);
        assert_eq!(frames.len(), 2);
        let last = chunk(&frames[0]);
        assert!(last.choices[0].delta.content.is_none());
        assert_eq!(last.choices[0].finish_reason.as_deref(), Some("stop"));
        assert!(matches!(frames[1], OutboundFrame::Done));
        assert!(translator.is_finished());

        assert!(translator.process_event(&text_delta("late")).is_empty());
    }

    #[test]
    fn test_message_start_sets_id_and_model() {
        let mut translator = StreamTranslator::new("requested", now());

        let frames = translator.process_event(&StreamEvent::MessageStart {
            message: StreamMessage {
                id: Some("msg_01xyz".to_string()),
                model: Some("claude-sonnet-4-5-20250929".to_string()),
            },
        });
        assert!(frames.is_empty());

        let frames = translator.process_event(&text_delta("a"));
        let c = chunk(&frames[0]);
        assert_eq!(c.id, "msg_01xyz");
        assert_eq!(c.model, "claude-sonnet-4-5-20250929");
    }

    #[test]
    fn test_delta_without_text_emits_empty_content() {
        let mut translator = StreamTranslator::new("m", now());
        let frames = translator.process_event(&StreamEvent::ContentBlockDelta {
            index: 1,
            delta: BlockDelta::default(),
        });

        assert_eq!(chunk(&frames[0]).choices[0].delta.content.as_deref(), Some(""));
    }

    #[test]
    fn test_other_lines_are_dropped_and_done_forwarded() {
        let mut translator = StreamTranslator::new("m", now());

        assert!(translator
            .process_line(&DecodedLine::Event(StreamEvent::Other))
            .is_empty());
        assert!(translator
            .process_line(&DecodedLine::Malformed {
                payload: "{".to_string(),
                error: "EOF".to_string(),
            })
            .is_empty());

        let frames = translator.process_line(&DecodedLine::Done);
        assert!(matches!(frames.as_slice(), [OutboundFrame::Done]));
        assert!(!translator.is_finished());
    }

    #[test]
    fn test_frame_data_encoding() {
        let mut translator = StreamTranslator::new("m", now());
        let frames = translator.process_event(&text_delta("Hi"));

        let data: serde_json::Value = serde_json::from_str(&frames[0].to_data()).unwrap();
        assert_eq!(data["choices"][0]["delta"]["content"], "Hi");
        assert!(data["choices"][0]["finish_reason"].is_null());
        assert_eq!(OutboundFrame::Done.to_data(), "[DONE]");
    }
}
