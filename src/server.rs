use crate::config::ProxyConfig;
use crate::error::ProxyError;
use crate::logging::SharedLogger;
use crate::proxy;
use crate::translate::openai_types::{ChatCompletionRequest, ChatErrorResponse, PlainErrorResponse};

use axum::body::Body;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::header::{self, HeaderName};
use axum::http::{Method, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use bytes::Bytes;
use futures::stream::StreamExt;
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub config: ProxyConfig,
    /// Upstream credential, resolved once at startup. `None` fails every request.
    pub api_key: Option<String>,
    pub client: reqwest::Client,
    pub logger: SharedLogger,
}

impl AppState {
    /// Build the state, reading the credential from the environment variable named in `config`.
    pub fn from_env(config: ProxyConfig, client: reqwest::Client, logger: SharedLogger) -> Self {
        let api_key = config.resolve_api_key();
        Self {
            config,
            api_key,
            client,
            logger,
        }
    }
}

/// Largest request body accepted; matches the upstream's own request size limit.
pub const MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

/// Every path accepts the chat completion contract. `GET /health` is the only exception;
/// other methods on `/health` go through the same method gate as everywhere else.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static("x-api-key"),
            HeaderName::from_static("anthropic-version"),
        ]);

    Router::new()
        .route("/health", get(handle_health).fallback(handle_chat))
        .fallback(handle_chat)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn handle_chat(
    State(state): State<Arc<AppState>>,
    method: Method,
    body: Bytes,
) -> Response {
    if method != Method::POST {
        return (
            StatusCode::METHOD_NOT_ALLOWED,
            Json(PlainErrorResponse::new("Method Not Allowed")),
        )
            .into_response();
    }

    let Some(api_key) = state.api_key.as_deref() else {
        let err = state.config.missing_api_key_error();
        state.logger.error("server", err.to_string());
        return error_response(&err);
    };

    let req: ChatCompletionRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => {
            state
                .logger
                .error("server", format!("Failed to parse request: {}", e));
            return error_response(&ProxyError::from(e));
        }
    };

    let is_streaming = req.is_streaming();

    state.logger.info(
        "server",
        format!(
            "Request: model={} streaming={} messages={}",
            req.model.as_deref().unwrap_or(&state.config.defaults.model),
            is_streaming,
            req.message_count()
        ),
    );

    if is_streaming {
        handle_streaming(&state, api_key, &req).await
    } else {
        handle_non_streaming(&state, api_key, &req).await
    }
}

async fn handle_non_streaming(state: &AppState, api_key: &str, req: &ChatCompletionRequest) -> Response {
    match proxy::proxy_non_streaming(req, &state.config, api_key, &state.client, &state.logger).await {
        Ok(proxy::ProxyResult::Success(resp)) => Json(resp).into_response(),
        Ok(proxy::ProxyResult::Passthrough { status, body }) => {
            let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
            Response::builder()
                .status(status)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body))
                .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
        }
        Err(e) => {
            state.logger.error("server", format!("Proxy error: {}", e));
            error_response(&e)
        }
    }
}

async fn handle_streaming(state: &AppState, api_key: &str, req: &ChatCompletionRequest) -> Response {
    let frames =
        match proxy::proxy_streaming(req, &state.config, api_key, &state.client, &state.logger).await {
            Ok(s) => s,
            Err(e) => {
                state.logger.error("server", format!("Streaming setup error: {}", e));
                return error_response(&e);
            }
        };

    let event_stream = frames.map(|frame| -> std::result::Result<Event, Infallible> {
        Ok(Event::default().data(frame.to_data()))
    });

    // Sse supplies content-type: text/event-stream and cache-control: no-cache.
    (
        [(header::CONNECTION, "keep-alive")],
        Sse::new(event_stream).keep_alive(KeepAlive::default()),
    )
        .into_response()
}

/// Render a failure as a 500. Configuration and empty-content failures use the
/// plain `{"error": "..."}` shape; everything else gets the `proxy_error` envelope.
fn error_response(err: &ProxyError) -> Response {
    match err {
        ProxyError::Config { .. } | ProxyError::EmptyContent => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(PlainErrorResponse::new(err.to_string())),
        )
            .into_response(),
        _ => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ChatErrorResponse::proxy_error(err.to_string())),
        )
            .into_response(),
    }
}

async fn handle_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
