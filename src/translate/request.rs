//! Translate `OpenAI` Chat Completions requests into Anthropic Messages requests.
//!
//! System-role messages are lifted out of the conversation into the top-level
//! `system` field; everything else keeps its original relative order.

use super::anthropic_types::{Message, MessagesRequest, Role};
use super::openai_types::{ChatCompletionRequest, ChatMessage, ChatRole};
use crate::config::DefaultsConfig;

/// Separator between consecutive system messages in the combined prompt.
pub const SYSTEM_SEPARATOR: &str = "\n\n";

/// Translate an `OpenAI` Chat Completions request into an Anthropic Messages request.
/// Pure function: fields the caller left out are filled from `defaults`.
pub fn openai_to_anthropic(req: &ChatCompletionRequest, defaults: &DefaultsConfig) -> MessagesRequest {
    let messages = req.messages.as_deref().unwrap_or_default();
    let (system, messages) = split_system(messages);

    MessagesRequest {
        model: req
            .model
            .clone()
            .unwrap_or_else(|| defaults.model.clone()),
        max_tokens: req.max_tokens.unwrap_or(defaults.max_tokens),
        messages,
        system,
        stream: req.is_streaming(),
        temperature: req.temperature.unwrap_or(defaults.temperature),
        top_p: req.top_p,
        stop_sequences: req.stop.clone().map(|s| s.into_vec()),
    }
}

/// Partition into the combined system prompt (if any) and the remaining turns.
fn split_system(messages: &[ChatMessage]) -> (Option<String>, Vec<Message>) {
    let mut system_parts = Vec::new();
    let mut turns = Vec::with_capacity(messages.len());

    for msg in messages {
        let text = msg.content.as_text();
        match msg.role {
            ChatRole::System => system_parts.push(text),
            ChatRole::User => turns.push(Message {
                role: Role::User,
                content: text,
            }),
            ChatRole::Assistant => turns.push(Message {
                role: Role::Assistant,
                content: text,
            }),
        }
    }

    let system = system_parts.join(SYSTEM_SEPARATOR);
    let system = if system.is_empty() { None } else { Some(system) };

    (system, turns)
}
