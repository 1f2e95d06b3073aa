use crate::config::ProxyConfig;
use crate::error::ProxyError;
use crate::logging::SharedLogger;
use crate::providers::{ProviderCredentials, TargetProvider};
use crate::proxy::{self, ProxyResult, StreamOutcome, TranslateTarget, UpstreamClient};
use crate::retry::RetryPolicy;
use crate::routing::{Classifier, RoutingDecision, RoutingProbe};
use crate::sessions::SessionRegistry;
use crate::translate::anthropic_types::{ErrorResponse, MessagesRequest};

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub struct AppState {
    pub config: ProxyConfig,
    pub classifier: Classifier,
    pub upstream: UpstreamClient,
    pub logger: SharedLogger,
    pub sessions: SessionRegistry,
}

impl AppState {
    pub fn new(
        config: ProxyConfig,
        client: reqwest::Client,
        credentials: ProviderCredentials,
        logger: SharedLogger,
    ) -> Self {
        Self {
            classifier: Classifier::new(&config),
            sessions: SessionRegistry::new(config.sessions.log_dir.clone()),
            upstream: UpstreamClient {
                client,
                credentials,
                retry: RetryPolicy::default(),
                logger: logger.clone(),
            },
            logger,
            config,
        }
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/v1/messages", post(handle_messages))
        .route("/v1/messages/count_tokens", post(handle_count_tokens))
        .route("/", get(handle_health))
        .route("/health", get(handle_health))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn handle_messages(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let probe = RoutingProbe::from_body(&body);
    let decision = state.classifier.classify(&probe);

    if let Some(session) = state.sessions.attribute(&probe) {
        session.record(&probe, &decision);
        tracing::info!(
            "{} model={} messages={} route={}",
            session.tag(),
            probe.model,
            probe.messages.len(),
            decision.label
        );
    }

    if decision.passthrough {
        return relay(&state, &decision, "/v1/messages", &headers, body).await;
    }

    let req = match parse_request(&body) {
        Ok(r) => r,
        Err(e) => {
            state.logger.error("server", format!("Failed to parse request: {}", e));
            return error_response(&e);
        }
    };

    let target = TranslateTarget {
        url: &decision.upstream_url,
        target_model: &state.config.target.model,
        spoof_model: &state.config.target.spoof_model,
    };

    state.logger.info(
        "server",
        format!(
            "Request: model={} streaming={} messages={} route={}",
            req.model,
            req.is_streaming(),
            req.messages.len(),
            decision.label
        ),
    );

    let upstream = &state.upstream;
    if req.is_streaming() {
        let outcome = match state.config.target.provider {
            TargetProvider::OpenAi => proxy::chat_completion_stream(upstream, target, &req).await,
            TargetProvider::ChatGpt => proxy::responses_stream(upstream, target, &req).await,
        };
        stream_response(&state, &decision, outcome).await
    } else {
        let result = match state.config.target.provider {
            TargetProvider::OpenAi => proxy::chat_completion(upstream, target, &req).await,
            TargetProvider::ChatGpt => proxy::responses(upstream, target, &req).await,
        };
        match result {
            Ok(ProxyResult::Success(resp)) => Json(resp).into_response(),
            Ok(ProxyResult::Error(err, status)) => status_response(status, err),
            Err(e) => {
                state
                    .logger
                    .error("server", format!("Proxy error via {}: {}", decision.label, e));
                error_response(&e)
            }
        }
    }
}

/// Invalid JSON and JSON the typed request rejects are reported differently.
fn parse_request(body: &[u8]) -> crate::Result<MessagesRequest> {
    let value: serde_json::Value =
        serde_json::from_slice(body).map_err(|e| ProxyError::malformed(e.to_string()))?;
    serde_json::from_value(value)
        .map_err(|e| ProxyError::translation(format!("Invalid request body: {}", e)))
}

/// Commit to an SSE response only once the first event is in hand, so
/// failures before that still reach the client as a JSON error.
async fn stream_response(
    state: &AppState,
    decision: &RoutingDecision,
    outcome: crate::Result<StreamOutcome>,
) -> Response {
    let mut sse_stream = match outcome {
        Ok(StreamOutcome::Stream(s)) => s,
        Ok(StreamOutcome::Error(err, status)) => return status_response(status, err),
        Err(e) => {
            state
                .logger
                .error("server", format!("Streaming setup error via {}: {}", decision.label, e));
            return error_response(&e);
        }
    };

    let first = match sse_stream.next().await {
        Some(Ok(event)) => event,
        Some(Err(e)) => {
            state.logger.error("server", format!("Stream failed before first event: {}", e));
            return error_response(&e);
        }
        None => {
            let err = ErrorResponse::api_error("Upstream stream ended without events");
            return (StatusCode::BAD_GATEWAY, Json(err)).into_response();
        }
    };

    // After the first event an error can only end the stream.
    let event_stream = stream::once(async move { Ok(first) })
        .chain(sse_stream)
        .take_while(|item| futures::future::ready(item.is_ok()))
        .filter_map(|item| futures::future::ready(item.ok()))
        .map(|sse_event| -> std::result::Result<Event, Infallible> {
            Ok(Event::default().event(sse_event.event).data(sse_event.data))
        });

    Sse::new(event_stream)
        .keep_alive(KeepAlive::default())
        .into_response()
}

/// Relay to the Anthropic-compatible server, streaming the body through.
async fn relay(
    state: &AppState,
    decision: &RoutingDecision,
    path: &str,
    headers: &HeaderMap,
    body: Bytes,
) -> Response {
    let response = match proxy::passthrough(
        &state.upstream.client,
        &decision.upstream_url,
        path,
        headers,
        body,
        &state.logger,
    )
    .await
    {
        Ok(r) => r,
        Err(e) => {
            state.logger.error("server", format!("Passthrough error: {}", e));
            return error_response(&e);
        }
    };

    let status = StatusCode::from_u16(response.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        state.logger.warn(
            "server",
            format!(
                "Passthrough upstream status={}: {}",
                status.as_u16(),
                proxy::truncate(&body, proxy::LOG_BODY_LIMIT)
            ),
        );
        let err = ErrorResponse::api_error(format!("Upstream returned status {}", status.as_u16()));
        return (status, Json(err)).into_response();
    }

    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/json")
        .to_string();

    let mut builder = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, content_type.as_str());
    if content_type.contains("text/event-stream") {
        builder = builder.header(header::CACHE_CONTROL, "no-cache");
    }

    builder
        .body(Body::from_stream(response.bytes_stream()))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

async fn handle_count_tokens(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let probe = RoutingProbe::from_body(&body);
    let decision = state.classifier.classify(&probe);
    if decision.passthrough {
        return relay(&state, &decision, "/v1/messages/count_tokens", &headers, body).await;
    }

    let messages = serde_json::from_slice::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v.get("messages").cloned())
        .unwrap_or_else(|| serde_json::Value::Array(Vec::new()));

    Json(serde_json::json!({ "input_tokens": estimate_tokens(&messages) })).into_response()
}

/// Rough token estimate: one token per four characters of serialized messages.
pub fn estimate_tokens(messages: &serde_json::Value) -> u64 {
    let chars = serde_json::to_string(messages)
        .map(|s| s.chars().count())
        .unwrap_or(0);
    chars.div_ceil(4) as u64
}

async fn handle_health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let config = &state.config;
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "target": {
            "provider": config.target.provider.as_str(),
            "model": config.target.model,
            "url": config.effective_target_url(),
        },
        "spoof_model": config.target.spoof_model,
        "passthrough": {
            "matchers": config.passthrough.matchers,
            "base_url": config.passthrough.base_url,
            "lead_url": config.passthrough.lead_url,
        },
        "sessions": state.sessions.len(),
    }))
}

fn status_response(status: u16, err: ErrorResponse) -> Response {
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
    (status, Json(err)).into_response()
}

/// Map a relay failure onto the Anthropic error envelope.
fn error_response(e: &ProxyError) -> Response {
    status_response(e.status_code(), ErrorResponse::new(e.error_type(), e.client_message()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_tokens_four_chars_per_token() {
        // ["xxx...x"] with 396 x's serializes to exactly 400 characters.
        let messages = serde_json::json!(["x".repeat(396)]);
        assert_eq!(serde_json::to_string(&messages).unwrap().len(), 400);
        assert_eq!(estimate_tokens(&messages), 100);

        let messages = serde_json::json!(["x".repeat(397)]);
        assert_eq!(estimate_tokens(&messages), 101);
        assert_eq!(estimate_tokens(&serde_json::json!([])), 1);
    }

    #[test]
    fn test_parse_request_distinguishes_syntax_from_shape() {
        assert!(matches!(
            parse_request(b"{not json"),
            Err(ProxyError::MalformedRequest { .. })
        ));

        let unknown_block = serde_json::json!({
            "model": "claude-sonnet-4",
            "max_tokens": 10,
            "messages": [{"role": "user", "content": [{"type": "hologram", "data": 1}]}]
        });
        assert!(matches!(
            parse_request(unknown_block.to_string().as_bytes()),
            Err(ProxyError::Translation { .. })
        ));
    }

    #[test]
    fn test_error_response_status_and_envelope() {
        assert_eq!(
            error_response(&ProxyError::malformed("eof")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            error_response(&ProxyError::translation("bad block")).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            error_response(&ProxyError::provider("connection refused")).status(),
            StatusCode::BAD_GATEWAY
        );
    }
}
