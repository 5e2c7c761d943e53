use chrono::{DateTime, Utc};

use super::anthropic_types::MessagesResponse;
use super::openai_types::{ChatCompletionResponse, ChatUsage, Choice, ChoiceMessage};
use crate::error::{ProxyError, Result};

/// Id used when the upstream did not supply one.
pub fn fallback_completion_id(now: DateTime<Utc>) -> String {
    format!("chatcmpl-{}", now.timestamp_millis())
}

/// Translate an Anthropic Messages response into an `OpenAI` Chat Completion response.
/// Pure function: `requested_model` is what we asked the upstream for, `now` stamps `created`.
///
/// # Errors
/// Returns [`ProxyError::EmptyContent`] when the first content block carries no text.
pub fn anthropic_to_openai(
    resp: &MessagesResponse,
    requested_model: &str,
    now: DateTime<Utc>,
) -> Result<ChatCompletionResponse> {
    let text = resp.first_text().ok_or(ProxyError::EmptyContent)?;

    let usage = resp
        .usage
        .as_ref()
        .map_or_else(ChatUsage::default, |u| {
            ChatUsage::new(u.input_tokens, u.output_tokens)
        });

    Ok(ChatCompletionResponse {
        id: resp
            .id
            .clone()
            .unwrap_or_else(|| fallback_completion_id(now)),
        object: "chat.completion".to_string(),
        created: now.timestamp(),
        model: resp
            .model
            .clone()
            .unwrap_or_else(|| requested_model.to_string()),
        choices: vec![Choice {
            index: 0,
            message: ChoiceMessage {
                role: "assistant".to_string(),
                content: text.to_string(),
            },
            finish_reason: resp
                .stop_reason
                .clone()
                .unwrap_or_else(|| "stop".to_string()),
        }],
        usage,
    })
}
