use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use futures_util::{StreamExt, stream};
use reqwest::header::ACCEPT;
use serde_json::Value;
use tracing::debug;

use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::protocol::{ChatCompletionChunk, ChatCompletionRequest, ChatMessage, UpstreamErrorBody};
use crate::sse::{DONE_MARKER, SseDecoder};

/// Content deltas in upstream order. Empty strings stand for steps that
/// carried no content.
pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<String, RelayError>> + Send>>;

/// Upstream inference service able to stream a chat completion.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    fn model(&self) -> &str;

    /// Opens one streaming completion for `messages`. Errors returned here
    /// happen before any content is produced.
    async fn stream_chat(&self, messages: &[ChatMessage]) -> Result<DeltaStream, RelayError>;
}

/// Provider speaking the OpenAI chat completions protocol (Groq, OpenAI,
/// vLLM, SGLang and friends).
pub struct OpenAiCompatibleProvider {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl OpenAiCompatibleProvider {
    pub fn new(config: &RelayConfig) -> Result<Self, RelayError> {
        let client = reqwest::Client::builder()
            .pool_idle_timeout(Some(std::time::Duration::from_secs(50)))
            .connect_timeout(config.connect_timeout())
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self::with_client(
            client,
            config.completions_url(),
            config.api_key.clone(),
            config.model.clone(),
        ))
    }

    pub fn with_client(
        client: reqwest::Client,
        endpoint: String,
        api_key: String,
        model: String,
    ) -> Self {
        Self {
            client,
            endpoint,
            api_key,
            model,
        }
    }
}

#[async_trait]
impl ChatProvider for OpenAiCompatibleProvider {
    fn model(&self) -> &str {
        &self.model
    }

    async fn stream_chat(&self, messages: &[ChatMessage]) -> Result<DeltaStream, RelayError> {
        let body = ChatCompletionRequest {
            model: &self.model,
            messages,
            stream: true,
        };
        debug!(
            endpoint = %self.endpoint,
            model = %self.model,
            messages = messages.len(),
            "Opening upstream completion stream"
        );

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .header(ACCEPT, "text/event-stream")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = match response.text().await {
                Ok(body) => body,
                Err(err) => format!("Failed to read upstream error body: {}", err),
            };
            return Err(RelayError::UpstreamStatus {
                status: status.as_u16(),
                message: upstream_error_message(&body),
            });
        }

        let bytes = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(RelayError::from));
        Ok(decode_deltas(bytes))
    }
}

/// Turns a non-2xx upstream body into a short description, preferring the
/// provider's own error message.
fn upstream_error_message(body: &str) -> String {
    match serde_json::from_str::<UpstreamErrorBody>(body) {
        Ok(parsed) => parsed.error.describe(),
        Err(_) if body.trim().is_empty() => "empty response body".to_string(),
        Err(_) => body.trim().to_string(),
    }
}

enum UpstreamEvent {
    Delta(String),
    Done,
}

fn parse_event(data: &str) -> Result<UpstreamEvent, RelayError> {
    if data.trim() == DONE_MARKER {
        return Ok(UpstreamEvent::Done);
    }

    let value: Value = serde_json::from_str(data)
        .map_err(|e| RelayError::MalformedUpstream(format!("invalid chunk JSON: {}", e)))?;

    if value.get("error").is_some() {
        let message = serde_json::from_value::<UpstreamErrorBody>(value)
            .map(|body| body.error.describe())
            .unwrap_or_else(|_| "unknown upstream error".to_string());
        return Err(RelayError::UpstreamStream(message));
    }

    let chunk: ChatCompletionChunk = serde_json::from_value(value)
        .map_err(|e| RelayError::MalformedUpstream(format!("unexpected chunk shape: {}", e)))?;
    Ok(UpstreamEvent::Delta(chunk.into_content()))
}

struct DecodeState {
    upstream: Pin<Box<dyn Stream<Item = Result<Bytes, RelayError>> + Send>>,
    decoder: SseDecoder,
    eof: bool,
    finished: bool,
}

/// Decodes an SSE byte stream into content deltas. The stream ends at
/// `[DONE]`, at the end of the body, or right after the first error.
pub fn decode_deltas<S>(upstream: S) -> DeltaStream
where
    S: Stream<Item = Result<Bytes, RelayError>> + Send + 'static,
{
    let state = DecodeState {
        upstream: Box::pin(upstream),
        decoder: SseDecoder::new(),
        eof: false,
        finished: false,
    };

    Box::pin(stream::unfold(state, |mut state| async move {
        loop {
            if state.finished {
                return None;
            }

            if let Some(data) = state.decoder.next_data() {
                match parse_event(&data) {
                    Ok(UpstreamEvent::Delta(text)) => return Some((Ok(text), state)),
                    Ok(UpstreamEvent::Done) => {
                        state.finished = true;
                        return None;
                    }
                    Err(err) => {
                        state.finished = true;
                        return Some((Err(err), state));
                    }
                }
            }

            if state.decoder.is_oversized() {
                state.finished = true;
                let err = RelayError::MalformedUpstream(
                    "SSE event exceeds the size limit without a terminating blank line".into(),
                );
                return Some((Err(err), state));
            }

            if state.eof {
                state.finished = true;
                return None;
            }

            match state.upstream.next().await {
                Some(Ok(bytes)) => state.decoder.push(&bytes),
                Some(Err(err)) => {
                    state.finished = true;
                    return Some((Err(err), state));
                }
                None => {
                    state.decoder.finish();
                    state.eof = true;
                }
            }
        }
    }))
}
