//! Type definitions for the [OpenAI Chat Completions API](https://platform.openai.com/docs/api-reference/chat).
//!
//! These types represent both the request format (what callers send to us)
//! and the response format (what we send back), including streaming chunks.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Request types (what callers send TO us)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatCompletionRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<ChatMessage>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<StopSequences>,
}

impl ChatCompletionRequest {
    pub fn is_streaming(&self) -> bool {
        self.stream.unwrap_or(false)
    }

    pub fn message_count(&self) -> usize {
        self.messages.as_ref().map_or(0, Vec::len)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    #[serde(default)]
    pub content: ChatContent,
}

impl ChatMessage {
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: ChatContent::Text(content.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChatContent {
    Text(String),
    Parts(Vec<ContentPart>),
    /// `null` or absent; forwarded as empty text.
    #[default]
    Empty,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentPart {
    #[serde(rename = "text")]
    Text { text: String },
    /// Images, audio and anything else we cannot forward as text.
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StopSequences {
    One(String),
    Many(Vec<String>),
}

// ---------------------------------------------------------------------------
// Response types (what we send BACK to callers)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionResponse {
    pub id: String,
    pub object: String, // "chat.completion"
    pub created: i64,
    pub model: String,
    pub choices: Vec<Choice>,
    pub usage: ChatUsage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    pub index: u64,
    pub message: ChoiceMessage,
    pub finish_reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChoiceMessage {
    pub role: String, // "assistant"
    pub content: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl ChatUsage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

// ---------------------------------------------------------------------------
// Streaming chunk types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionChunk {
    pub id: String,
    pub object: String, // "chat.completion.chunk"
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChunkChoice>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkChoice {
    pub index: u64,
    pub delta: ChunkDelta,
    /// Serialized as `null` on content chunks.
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// `{"error": {"message": ..., "type": ...}}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatErrorResponse {
    pub error: ChatError,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatError {
    pub message: String,
    #[serde(rename = "type")]
    pub error_type: String,
}

impl ChatErrorResponse {
    pub fn proxy_error(message: impl Into<String>) -> Self {
        Self {
            error: ChatError {
                message: message.into(),
                error_type: "proxy_error".to_string(),
            },
        }
    }
}

/// `{"error": "..."}`, used for method and configuration failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlainErrorResponse {
    pub error: String,
}

impl PlainErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

impl ChatContent {
    /// Flatten to plain text; non-text parts are dropped.
    pub fn as_text(&self) -> String {
        match self {
            ChatContent::Text(t) => t.clone(),
            ChatContent::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::Unsupported => None,
                })
                .collect::<Vec<_>>()
                .join(""),
            ChatContent::Empty => String::new(),
        }
    }
}

impl StopSequences {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            StopSequences::One(s) => vec![s],
            StopSequences::Many(v) => v,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_request_parses() {
        let req: ChatCompletionRequest = serde_json::from_str("{}").unwrap();
        assert!(req.model.is_none());
        assert!(req.messages.is_none());
        assert!(!req.is_streaming());
        assert_eq!(req.message_count(), 0);
    }

    #[test]
    fn test_content_parts_flatten_to_text() {
        let msg: ChatMessage = serde_json::from_value(serde_json::json!({
            "role": "user",
            "content": [
                {"type": "text", "text": "Describe "},
                {"type": "image_url", "image_url": {"url": "https://example.com/a.png"}},
                {"type": "text", "text": "this"}
            ]
        }))
        .unwrap();

        assert_eq!(msg.role, ChatRole::User);
        assert_eq!(msg.content.as_text(), "Describe this");
    }

    #[test]
    fn test_null_or_missing_content_is_empty_text() {
        let null: ChatMessage =
            serde_json::from_value(serde_json::json!({"role": "assistant", "content": null})).unwrap();
        assert_eq!(null.content.as_text(), "");

        let missing: ChatMessage = serde_json::from_value(serde_json::json!({"role": "user"})).unwrap();
        assert_eq!(missing.content.as_text(), "");
    }

    #[test]
    fn test_unknown_role_is_rejected() {
        let result: std::result::Result<ChatMessage, _> =
            serde_json::from_value(serde_json::json!({"role": "tool", "content": "x"}));
        assert!(result.is_err());
    }

    #[test]
    fn test_chunk_serializes_null_finish_reason_and_empty_delta() {
        let chunk = ChatCompletionChunk {
            id: "msg_1".to_string(),
            object: "chat.completion.chunk".to_string(),
            created: 1,
            model: "m".to_string(),
            choices: vec![ChunkChoice {
                index: 0,
                delta: ChunkDelta::default(),
                finish_reason: None,
            }],
        };

        let json = serde_json::to_value(&chunk).unwrap();
        assert_eq!(json["choices"][0]["delta"], serde_json::json!({}));
        assert!(json["choices"][0]["finish_reason"].is_null());
    }

    #[test]
    fn test_proxy_error_envelope_shape() {
        let json = serde_json::to_value(ChatErrorResponse::proxy_error("boom")).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"error": {"message": "boom", "type": "proxy_error"}})
        );
    }
}
