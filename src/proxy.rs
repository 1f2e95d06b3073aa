use crate::error::{ProxyError, Result};
use crate::logging::{LogLevel, SharedLogger};
use crate::providers::ProviderCredentials;
use crate::retry::{send_with_retry, RetryPolicy};
use crate::translate::anthropic_types::{ErrorResponse, MessagesRequest, MessagesResponse, StreamEvent};
use crate::translate::openai_types::{ChatCompletionChunk, ChatCompletionResponse};
use crate::translate::request::anthropic_to_openai;
use crate::translate::response::{chat_error_to_anthropic, openai_to_anthropic, responses_to_anthropic};
use crate::translate::responses_request::anthropic_to_responses;
use crate::translate::responses_streaming::ResponsesStreamTranslator;
use crate::translate::responses_types::{OutputItem, ResponseObject, ResponsesStreamEvent};
use crate::translate::streaming::StreamTranslator;

use eventsource_stream::Eventsource;
use futures::stream::Stream;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use std::collections::BTreeMap;
use std::pin::Pin;

/// Upstream error bodies are cut to this many bytes in logs.
pub const LOG_BODY_LIMIT: usize = 500;

/// Inbound headers relayed verbatim on passthrough requests.
pub const PASSTHROUGH_HEADERS: [&str; 7] = [
    "x-api-key",
    "api-key",
    "authorization",
    "anthropic-version",
    "anthropic-beta",
    "cookie",
    "request-id",
];

/// Outcome of proxying a non-streaming request
pub enum ProxyResult {
    Success(MessagesResponse),
    Error(ErrorResponse, u16),
}

/// Outcome of proxying a streaming request. An upstream refusal is reported
/// before any event is produced, so the client still gets a JSON error.
pub enum StreamOutcome {
    Stream(SseStream),
    Error(ErrorResponse, u16),
}

/// Anthropic SSE events, in order. An `Err` item ends the stream.
pub type SseStream = Pin<Box<dyn Stream<Item = Result<SseEvent>> + Send>>;

#[derive(Debug, Clone)]
pub struct SseEvent {
    pub event: String,
    pub data: String,
}

impl SseEvent {
    pub fn from_stream_event(event: &StreamEvent) -> Result<Self> {
        Ok(Self {
            event: event.event_name().to_string(),
            data: serde_json::to_string(event)?,
        })
    }
}

/// Where a translated request goes and which model names it carries.
#[derive(Debug, Clone, Copy)]
pub struct TranslateTarget<'a> {
    pub url: &'a str,
    pub target_model: &'a str,
    pub spoof_model: &'a str,
}

/// Shared HTTP client plus the provider credentials and retry policy used
/// for every translated call.
#[derive(Clone)]
pub struct UpstreamClient {
    pub client: reqwest::Client,
    pub credentials: ProviderCredentials,
    pub retry: RetryPolicy,
    pub logger: SharedLogger,
}

impl UpstreamClient {
    fn provider_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let token = match &self.credentials {
            ProviderCredentials::OpenAi { api_key } => api_key,
            ProviderCredentials::ChatGpt {
                access_token,
                account_id,
            } => {
                if let Ok(v) = HeaderValue::from_str(account_id) {
                    headers.insert("chatgpt-account-id", v);
                }
                access_token
            }
        };
        if let Ok(v) = HeaderValue::from_str(&format!("Bearer {token}")) {
            headers.insert(AUTHORIZATION, v);
        }
        headers
    }

    /// POST a JSON body with provider credentials, retrying on 429.
    async fn post_json<T: serde::Serialize>(
        &self,
        url: &str,
        body: &T,
        extra: HeaderMap,
    ) -> Result<reqwest::Response> {
        let mut headers = self.provider_headers();
        headers.extend(extra);
        let payload = serde_json::to_vec(body)?;

        let response = send_with_retry(&self.retry, url, || {
            self.client
                .post(url)
                .headers(headers.clone())
                .body(payload.clone())
                .send()
        })
        .await
        .map_err(|e| ProxyError::provider(format!("Request to {url} failed: {e}")))?;

        let status = response.status().as_u16();
        if status == crate::retry::RATE_LIMITED {
            self.logger.warn("retry", format!("{url} still rate limited after {} retries", self.retry.max_retries));
        }
        Ok(response)
    }

    /// Read a non-2xx body, log it truncated, and hand it back.
    async fn upstream_error_body(&self, response: reqwest::Response, url: &str) -> (u16, String) {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        tracing::warn!(status, url, body = %truncate(&body, LOG_BODY_LIMIT), "Upstream error");
        self.logger.log_with_context(
            LogLevel::Warn,
            "proxy",
            format!("Upstream error status={status}"),
            serde_json::json!({ "url": url, "body": truncate(&body, LOG_BODY_LIMIT) }),
        );
        (status, body)
    }
}

// ---------------------------------------------------------------------------
// Chat Completions
// ---------------------------------------------------------------------------

/// Forward a non-streaming Anthropic request to a Chat Completions endpoint.
pub async fn chat_completion(
    upstream: &UpstreamClient,
    target: TranslateTarget<'_>,
    req: &MessagesRequest,
) -> Result<ProxyResult> {
    let openai_req = anthropic_to_openai(req, target.target_model);
    upstream
        .logger
        .info("proxy", format!("POST {} model={}", target.url, openai_req.model));

    let response = upstream.post_json(target.url, &openai_req, HeaderMap::new()).await?;
    if !response.status().is_success() {
        let (status, body) = upstream.upstream_error_body(response, target.url).await;
        return Ok(ProxyResult::Error(chat_error_to_anthropic(status, &body), status));
    }

    let status = response.status().as_u16();
    let body = response.bytes().await?;
    if body.is_empty() {
        return Err(ProxyError::UpstreamStreamMissing { status });
    }

    let openai_resp: ChatCompletionResponse = serde_json::from_slice(&body).map_err(|e| {
        ProxyError::translation(format!(
            "Failed to parse provider response: {}. Body: {}",
            e,
            truncate(&String::from_utf8_lossy(&body), 300)
        ))
    })?;

    let anthropic_resp = openai_to_anthropic(&openai_resp, target.spoof_model);
    upstream.logger.info(
        "proxy",
        format!(
            "Completed: in={} out={} tokens",
            anthropic_resp.usage.input_tokens, anthropic_resp.usage.output_tokens
        ),
    );
    Ok(ProxyResult::Success(anthropic_resp))
}

/// Forward a streaming Anthropic request to a Chat Completions endpoint.
pub async fn chat_completion_stream(
    upstream: &UpstreamClient,
    target: TranslateTarget<'_>,
    req: &MessagesRequest,
) -> Result<StreamOutcome> {
    let openai_req = anthropic_to_openai(req, target.target_model);
    upstream.logger.info(
        "proxy",
        format!("POST {} model={} (streaming)", target.url, openai_req.model),
    );

    let mut accept = HeaderMap::new();
    accept.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));
    let response = upstream.post_json(target.url, &openai_req, accept).await?;
    if !response.status().is_success() {
        let (status, body) = upstream.upstream_error_body(response, target.url).await;
        return Ok(StreamOutcome::Error(chat_error_to_anthropic(status, &body), status));
    }

    let status = response.status().as_u16();
    let events = chat_event_stream(
        response.bytes_stream(),
        status,
        target.spoof_model.to_string(),
        upstream.logger.clone(),
    );
    Ok(StreamOutcome::Stream(Box::pin(events)))
}

/// Decode a Chat Completions SSE body and translate it into Anthropic events.
pub fn chat_event_stream<S, B, E>(
    bytes: S,
    status: u16,
    spoof_model: String,
    logger: SharedLogger,
) -> impl Stream<Item = Result<SseEvent>> + Send + 'static
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    async_stream::stream! {
        let mut translator = StreamTranslator::new(&spoof_model);
        let events = bytes.eventsource();
        tokio::pin!(events);
        let mut received = false;

        while let Some(item) = events.next().await {
            let event = match item {
                Ok(ev) => ev,
                Err(e) => {
                    logger.error("stream", format!("Upstream stream error: {e}"));
                    yield Err(ProxyError::provider(format!("Upstream stream interrupted: {e}")));
                    return;
                }
            };
            received = true;

            let data = event.data.trim();
            if data == "[DONE]" {
                break;
            }
            if data.is_empty() {
                continue;
            }

            let chunk: ChatCompletionChunk = match serde_json::from_str(data) {
                Ok(c) => c,
                Err(e) => {
                    logger.debug("stream", format!("Skipping unparseable chunk: {e}"));
                    continue;
                }
            };

            for event in translator.process_chunk(&chunk) {
                yield SseEvent::from_stream_event(&event);
            }
        }

        if !received {
            yield Err(ProxyError::UpstreamStreamMissing { status });
            return;
        }

        // Usage can trail the finish reason, so the terminal events wait for
        // [DONE] or the end of the body.
        for event in translator.finish() {
            yield SseEvent::from_stream_event(&event);
        }

        logger.info("stream", "Stream completed");
    }
}

// ---------------------------------------------------------------------------
// Responses backend
// ---------------------------------------------------------------------------

fn responses_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));
    headers.insert("openai-beta", HeaderValue::from_static("responses=experimental"));
    headers.insert("originator", HeaderValue::from_static("codex_cli_rs"));
    if let Ok(v) = HeaderValue::from_str(&uuid::Uuid::new_v4().to_string()) {
        headers.insert("session_id", v);
    }
    headers
}

async fn open_responses(
    upstream: &UpstreamClient,
    target: TranslateTarget<'_>,
    req: &MessagesRequest,
) -> Result<std::result::Result<reqwest::Response, (ErrorResponse, u16)>> {
    let responses_req = anthropic_to_responses(req, target.target_model);
    upstream.logger.info(
        "proxy",
        format!(
            "POST {} model={} items={}",
            target.url,
            responses_req.model,
            responses_req.input.len()
        ),
    );

    let response = upstream
        .post_json(target.url, &responses_req, responses_headers())
        .await?;
    if response.status().is_success() {
        return Ok(Ok(response));
    }

    let (status, _) = upstream.upstream_error_body(response, target.url).await;
    Ok(Err((
        ErrorResponse::api_error(format!("Upstream returned status {status}")),
        status,
    )))
}

/// Forward a non-streaming request to the Responses backend. The backend
/// always streams, so the events are collected into the final response.
pub async fn responses(
    upstream: &UpstreamClient,
    target: TranslateTarget<'_>,
    req: &MessagesRequest,
) -> Result<ProxyResult> {
    let response = match open_responses(upstream, target, req).await? {
        Ok(r) => r,
        Err((err, status)) => return Ok(ProxyResult::Error(err, status)),
    };

    let status = response.status().as_u16();
    let (final_response, incomplete) = collect_responses(response.bytes_stream(), status).await?;
    let anthropic_resp = responses_to_anthropic(&final_response, incomplete, target.spoof_model);
    upstream.logger.info(
        "proxy",
        format!(
            "Completed: in={} out={} tokens",
            anthropic_resp.usage.input_tokens, anthropic_resp.usage.output_tokens
        ),
    );
    Ok(ProxyResult::Success(anthropic_resp))
}

/// Forward a streaming request to the Responses backend.
pub async fn responses_stream(
    upstream: &UpstreamClient,
    target: TranslateTarget<'_>,
    req: &MessagesRequest,
) -> Result<StreamOutcome> {
    let response = match open_responses(upstream, target, req).await? {
        Ok(r) => r,
        Err((err, status)) => return Ok(StreamOutcome::Error(err, status)),
    };

    let status = response.status().as_u16();
    let events = responses_event_stream(
        response.bytes_stream(),
        status,
        target.spoof_model.to_string(),
        upstream.logger.clone(),
    );
    Ok(StreamOutcome::Stream(Box::pin(events)))
}

/// Decode a Responses SSE body and translate it into Anthropic events.
pub fn responses_event_stream<S, B, E>(
    bytes: S,
    status: u16,
    spoof_model: String,
    logger: SharedLogger,
) -> impl Stream<Item = Result<SseEvent>> + Send + 'static
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    async_stream::stream! {
        let mut translator = ResponsesStreamTranslator::new(&spoof_model);
        let events = bytes.eventsource();
        tokio::pin!(events);
        let mut received = false;

        while let Some(item) = events.next().await {
            let event = match item {
                Ok(ev) => ev,
                Err(e) => {
                    logger.error("stream", format!("Upstream stream error: {e}"));
                    yield Err(ProxyError::provider(format!("Upstream stream interrupted: {e}")));
                    return;
                }
            };
            received = true;

            let upstream_event: ResponsesStreamEvent = match serde_json::from_str(&event.data) {
                Ok(ev) => ev,
                Err(e) => {
                    logger.debug("stream", format!("Skipping unparseable event {}: {e}", event.event));
                    continue;
                }
            };

            match translator.process_event(&upstream_event) {
                Ok(out) => {
                    for event in out {
                        yield SseEvent::from_stream_event(&event);
                    }
                }
                Err(e) => {
                    logger.error("stream", e.to_string());
                    yield Err(e);
                    return;
                }
            }

            if upstream_event.is_terminal() {
                break;
            }
        }

        if !received {
            yield Err(ProxyError::UpstreamStreamMissing { status });
            return;
        }

        for event in translator.finish() {
            yield SseEvent::from_stream_event(&event);
        }

        logger.info("stream", "Stream completed");
    }
}

/// Consume a Responses SSE body up to its terminal event. Returns the final
/// response object and whether it was incomplete.
pub async fn collect_responses<S, B, E>(bytes: S, status: u16) -> Result<(ResponseObject, bool)>
where
    S: Stream<Item = std::result::Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let events = bytes.eventsource();
    tokio::pin!(events);
    let mut received = false;
    let mut done_items: BTreeMap<u64, OutputItem> = BTreeMap::new();

    while let Some(item) = events.next().await {
        let event = item.map_err(|e| ProxyError::provider(format!("Upstream stream interrupted: {e}")))?;
        received = true;

        let Ok(upstream_event) = serde_json::from_str::<ResponsesStreamEvent>(&event.data) else {
            continue;
        };

        match upstream_event {
            ResponsesStreamEvent::OutputItemDone { output_index, item } => {
                done_items.insert(output_index, item);
            }
            ResponsesStreamEvent::Completed { mut response } => {
                if response.output.is_empty() {
                    response.output = done_items.into_values().collect();
                }
                return Ok((response, false));
            }
            ResponsesStreamEvent::Incomplete { mut response } => {
                if response.output.is_empty() {
                    response.output = done_items.into_values().collect();
                }
                return Ok((response, true));
            }
            ResponsesStreamEvent::Failed { response } => {
                let message = response.error.map(|e| e.message).unwrap_or_default();
                return Err(ProxyError::provider(format!("Upstream response failed: {message}")));
            }
            ResponsesStreamEvent::Error { message, .. } => {
                return Err(ProxyError::provider(format!("Upstream stream error: {message}")));
            }
            _ => {}
        }
    }

    if !received {
        return Err(ProxyError::UpstreamStreamMissing { status });
    }
    Err(ProxyError::provider("Upstream stream ended before the response completed"))
}

// ---------------------------------------------------------------------------
// Passthrough
// ---------------------------------------------------------------------------

/// Relay an Anthropic-format request unmodified. Exactly one upstream call;
/// rate limits are the client's to handle.
pub async fn passthrough(
    client: &reqwest::Client,
    base_url: &str,
    path: &str,
    inbound: &HeaderMap,
    body: bytes::Bytes,
    logger: &SharedLogger,
) -> Result<reqwest::Response> {
    let url = format!("{}{}", base_url.trim_end_matches('/'), path);
    logger.info("proxy", format!("Passthrough POST {url}"));

    let response = client
        .post(&url)
        .headers(passthrough_headers(inbound))
        .body(body)
        .send()
        .await
        .map_err(|e| ProxyError::provider(format!("Passthrough request to {url} failed: {e}")))?;

    logger.info(
        "proxy",
        format!("Passthrough response: status={}", response.status().as_u16()),
    );
    Ok(response)
}

/// The allow-listed subset of the inbound headers, plus a JSON content type.
pub fn passthrough_headers(inbound: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::new();
    out.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    for name in PASSTHROUGH_HEADERS {
        for value in inbound.get_all(name) {
            if let Ok(v) = HeaderValue::from_bytes(value.as_bytes()) {
                out.append(name, v);
            }
        }
    }
    out
}

/// Cut `s` to at most `max` bytes without splitting a character.
pub fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
