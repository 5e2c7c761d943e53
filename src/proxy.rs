use crate::config::ProxyConfig;
use crate::error::{ProxyError, Result};
use crate::logging::{LogLevel, SharedLogger};
use crate::translate::anthropic_types::{MessagesRequest, MessagesResponse, StreamEvent};
use crate::translate::openai_types::{ChatCompletionRequest, ChatCompletionResponse, ChatErrorResponse};
use crate::translate::request::openai_to_anthropic;
use crate::translate::response::anthropic_to_openai;
use crate::translate::sse::{DecodedLine, LineDecoder};
use crate::translate::streaming::{OutboundFrame, StreamTranslator};

use bytes::Bytes;
use chrono::Utc;
use futures::stream::{self, Stream};
use futures::StreamExt;
use std::pin::Pin;

/// Outcome of proxying a non-streaming request
#[derive(Debug)]
pub enum ProxyResult {
    Success(ChatCompletionResponse),
    /// Upstream refused the request; status and body are handed back untouched.
    Passthrough { status: u16, body: Bytes },
}

/// Outcome of proxying a streaming request — the outbound `data:` payloads, in order
pub type FrameStream = Pin<Box<dyn Stream<Item = OutboundFrame> + Send>>;

/// Forward a non-streaming chat completion request to the upstream Messages API.
///
/// # Errors
/// [`ProxyError::EmptyContent`] when the upstream answered without text; any
/// other variant when the call or the response parsing failed.
pub async fn proxy_non_streaming(
    req: &ChatCompletionRequest,
    config: &ProxyConfig,
    api_key: &str,
    client: &reqwest::Client,
    logger: &SharedLogger,
) -> Result<ProxyResult> {
    let upstream_req = openai_to_anthropic(req, &config.defaults);

    let response = send_upstream(&upstream_req, config, api_key, client, logger).await?;

    let status = response.status();
    let body = response
        .bytes()
        .await
        .map_err(|e| ProxyError::upstream(format!("Failed to read response body: {}", e)))?;

    logger.debug(
        "proxy",
        format!("Response status={} body_len={}", status.as_u16(), body.len()),
    );

    if !status.is_success() {
        logger.log_with_context(
            LogLevel::Warn,
            "proxy",
            "Upstream error, passing through",
            serde_json::json!({
                "status": status.as_u16(),
                "body": truncate(&String::from_utf8_lossy(&body), 500),
            }),
        );
        return Ok(ProxyResult::Passthrough {
            status: status.as_u16(),
            body,
        });
    }

    let upstream_resp: MessagesResponse = serde_json::from_slice(&body).map_err(|e| {
        ProxyError::translation(format!(
            "Failed to parse upstream response: {}. Body: {}",
            e,
            truncate(&String::from_utf8_lossy(&body), 300)
        ))
    })?;

    let resp = anthropic_to_openai(&upstream_resp, &upstream_req.model, Utc::now())?;

    logger.info(
        "proxy",
        format!(
            "Completed: prompt={} completion={} tokens",
            resp.usage.prompt_tokens, resp.usage.completion_tokens
        ),
    );

    Ok(ProxyResult::Success(resp))
}

/// Forward a streaming chat completion request, returning the re-framed outbound stream.
///
/// An upstream that answers with an error status yields a one-frame stream
/// carrying the error payload.
///
/// # Errors
/// Only when the upstream connection cannot be opened at all.
pub async fn proxy_streaming(
    req: &ChatCompletionRequest,
    config: &ProxyConfig,
    api_key: &str,
    client: &reqwest::Client,
    logger: &SharedLogger,
) -> Result<FrameStream> {
    let upstream_req = openai_to_anthropic(req, &config.defaults);

    let response = send_upstream(&upstream_req, config, api_key, client, logger).await?;

    let status = response.status();

    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        logger.warn(
            "proxy",
            format!(
                "Streaming error status={}: {}",
                status.as_u16(),
                truncate(&body, 300)
            ),
        );

        let payload = serde_json::from_str::<serde_json::Value>(&body).unwrap_or_else(|_| {
            serde_json::to_value(ChatErrorResponse::proxy_error(format!(
                "Upstream returned status {}: {}",
                status.as_u16(),
                truncate(&body, 500)
            )))
            .unwrap_or_default()
        });

        return Ok(Box::pin(stream::once(async move {
            OutboundFrame::Error(payload)
        })));
    }

    let translator = StreamTranslator::new(&upstream_req.model, Utc::now());
    let event_stream = translate_stream(response.bytes_stream(), translator, logger.clone());

    Ok(Box::pin(event_stream))
}

async fn send_upstream(
    upstream_req: &MessagesRequest,
    config: &ProxyConfig,
    api_key: &str,
    client: &reqwest::Client,
    logger: &SharedLogger,
) -> Result<reqwest::Response> {
    let url = config.messages_url();

    logger.info(
        "proxy",
        format!(
            "POST {} model={} stream={} messages={}",
            url,
            upstream_req.model,
            upstream_req.stream,
            upstream_req.messages.len()
        ),
    );

    client
        .post(&url)
        .header("x-api-key", api_key)
        .header("anthropic-version", &config.upstream.anthropic_version)
        .header("content-type", "application/json")
        .json(upstream_req)
        .send()
        .await
        .map_err(|e| ProxyError::upstream(format!("Request failed: {}", e)))
}

/// Re-frame an upstream SSE byte stream into outbound frames.
///
/// Lazy: nothing is read from `byte_stream` until the returned stream is polled,
/// and dropping the returned stream drops (and so closes) the upstream.
pub fn translate_stream<S, E>(
    byte_stream: S,
    mut translator: StreamTranslator,
    logger: SharedLogger,
) -> impl Stream<Item = OutboundFrame> + Send + 'static
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    async_stream::stream! {
        let mut decoder = LineDecoder::new();

        tokio::pin!(byte_stream);

        'read: while let Some(chunk_result) = byte_stream.next().await {
            let chunk = match chunk_result {
                Ok(c) => c,
                Err(e) => {
                    logger.error("stream", format!("Byte stream error: {}", e));
                    break;
                }
            };

            for line in decoder.push(&chunk) {
                note_line(&line, &logger);
                for frame in translator.process_line(&line) {
                    yield frame;
                }
                if translator.is_finished() {
                    break 'read;
                }
            }
        }

        if !translator.is_finished() {
            if let Some(line) = decoder.finish() {
                note_line(&line, &logger);
                for frame in translator.process_line(&line) {
                    yield frame;
                }
            }
        }

        logger.info(
            "stream",
            if translator.is_finished() {
                "Stream completed"
            } else {
                "Upstream closed without message_stop"
            },
        );
    }
}

fn note_line(line: &DecodedLine, logger: &SharedLogger) {
    match line {
        DecodedLine::Malformed { payload, error } => logger.debug(
            "stream",
            format!("Skipping unparseable line: {} ({})", error, truncate(payload, 200)),
        ),
        DecodedLine::Event(StreamEvent::Error { error }) => {
            logger.warn("stream", format!("Upstream error event: {}", error));
        }
        DecodedLine::Event(event) => {
            logger.debug("stream", format!("Upstream event: {}", event.event_name()));
        }
        DecodedLine::Done => {}
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::openai_types::ChatCompletionChunk;

    fn run(chunks: Vec<&'static str>) -> Vec<OutboundFrame> {
        let byte_stream = stream::iter(
            chunks
                .into_iter()
                .map(|c| Ok::<Bytes, std::io::Error>(Bytes::from_static(c.as_bytes()))),
        );
        let translator = StreamTranslator::new("claude-test", Utc::now());
        let frames = translate_stream(byte_stream, translator, SharedLogger::disabled());
        tokio_test::block_on(frames.collect::<Vec<_>>())
    }

    fn chunk(frame: &OutboundFrame) -> &ChatCompletionChunk {
        match frame {
            OutboundFrame::Chunk(c) => c,
            other => panic!("Expected chunk, got {other:?}"),
        }
    }

    #[test]
    fn test_hi_there_stream() {
        let frames = run(vec![
            "event: message_start\ndata: {\"type\":\"message_start\",\"message\":{\"id\":\"msg_1\",\"model\":\"claude-test\"}}\n\n",
            "event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Hi\"}}\n\n",
            "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\" there\"}}\n\n",
            "data: {\"type\":\"message_stop\"}\n\n",
        ]);

        assert_eq!(frames.len(), 4);
        assert_eq!(chunk(&frames[0]).choices[0].delta.content.as_deref(), Some("Hi"));
        assert_eq!(chunk(&frames[1]).choices[0].delta.content.as_deref(), Some(" there"));
        assert_eq!(chunk(&frames[2]).choices[0].finish_reason.as_deref(), Some("stop"));
        assert!(matches!(frames[3], OutboundFrame::Done));
        assert_eq!(chunk(&frames[0]).id, "msg_1");
    }

    #[test]
    fn test_malformed_lines_are_skipped() {
        let frames = run(vec![
            "data: {\"type\":\"content_block_delta\",\"delta\":{\"text\":\"a\"}}\n",
            "data: {broken\n",
            "data: {\"type\":\"content_block_delta\",\"delta\":{\"text\":\"b\"}}\n",
        ]);

        let texts: Vec<&str> = frames
            .iter()
            .map(|f| chunk(f).choices[0].delta.content.as_deref().unwrap_or_default())
            .collect();
        assert_eq!(texts, vec!["a", "b"]);
    }

    #[test]
    fn test_ends_when_upstream_ends_without_stop() {
        let frames = run(vec![
            "data: {\"type\":\"content_block_delta\",\"delta\":{\"text\":\"partial\"}}\n",
        ]);

        assert_eq!(frames.len(), 1);
        assert!(chunk(&frames[0]).choices[0].finish_reason.is_none());
    }

    #[test]
    fn test_nothing_after_message_stop() {
        let frames = run(vec![
            "data: {\"type\":\"message_stop\"}\ndata: {\"type\":\"content_block_delta\",\"delta\":{\"text\":\"late\"}}\n",
        ]);

        assert_eq!(frames.len(), 2);
        assert!(matches!(frames[1], OutboundFrame::Done));
    }

    #[test]
    fn test_byte_stream_error_ends_stream() {
        let byte_stream = stream::iter(vec![
            Ok(Bytes::from_static(
                b"data: {\"type\":\"content_block_delta\",\"delta\":{\"text\":\"x\"}}\n",
            )),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset")),
            Ok(Bytes::from_static(
                b"data: {\"type\":\"content_block_delta\",\"delta\":{\"text\":\"y\"}}\n",
            )),
        ]);
        let translator = StreamTranslator::new("m", Utc::now());
        let frames: Vec<_> = tokio_test::block_on(
            translate_stream(byte_stream, translator, SharedLogger::disabled()).collect(),
        );

        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn test_stream_lines_are_logged_by_event_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stream.log");
        let logger = SharedLogger::new(&path).unwrap();

        let byte_stream = stream::iter(vec![Ok::<Bytes, std::io::Error>(Bytes::from_static(
            b"data: {\"type\":\"ping\"}\ndata: {oops\ndata: {\"type\":\"message_stop\"}\n",
        ))]);
        let translator = StreamTranslator::new("claude-test", Utc::now());
        let frames: Vec<_> =
            tokio_test::block_on(translate_stream(byte_stream, translator, logger).collect());
        assert_eq!(frames.len(), 2);

        let content = std::fs::read_to_string(&path).unwrap();
        let messages: Vec<String> = content
            .lines()
            .map(|l| serde_json::from_str::<crate::logging::LogEntry>(l).unwrap().message)
            .collect();

        assert!(messages.contains(&"Upstream event: other".to_string()));
        assert!(messages.contains(&"Upstream event: message_stop".to_string()));
        assert!(messages.iter().any(|m| m.starts_with("Skipping unparseable line")));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("hi", 10), "hi");
    }
}
