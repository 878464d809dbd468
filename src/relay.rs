use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use futures::Stream;
use futures_util::{StreamExt, stream};
use tracing::{debug, error, info};

use crate::error::RelayError;
use crate::protocol::{ChatMessage, ChatRequest};
use crate::provider::{ChatProvider, DeltaStream};

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are Seva, a friendly civic assistant for Delhi. Help with waste, water, and roads. Be concise and empathetic.";

/// Text fragments ready to be written to the HTTP response body.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<Bytes, RelayError>> + Send>>;

/// `[system_prompt] + messages`, caller order preserved.
pub fn build_conversation(
    system_prompt: &ChatMessage,
    messages: Vec<ChatMessage>,
) -> Vec<ChatMessage> {
    let mut conversation = Vec::with_capacity(messages.len() + 1);
    conversation.push(system_prompt.clone());
    conversation.extend(messages);
    conversation
}

/// Relays one conversation at a time to a shared provider. Cloning is cheap
/// and every clone talks to the same provider.
#[derive(Clone)]
pub struct ChatRelay {
    provider: Arc<dyn ChatProvider>,
    system_prompt: ChatMessage,
    stream_error_marker: Option<String>,
}

impl ChatRelay {
    pub fn new(provider: Arc<dyn ChatProvider>, system_prompt: impl Into<String>) -> Self {
        Self {
            provider,
            system_prompt: ChatMessage::system(system_prompt),
            stream_error_marker: None,
        }
    }

    pub fn with_stream_error_marker(mut self, marker: Option<String>) -> Self {
        self.stream_error_marker = marker;
        self
    }

    pub fn model(&self) -> &str {
        self.provider.model()
    }

    /// Opens the upstream stream for `request`. An `Err` means nothing was
    /// produced; once a stream is returned, later failures surface as the
    /// stream's final item.
    pub async fn relay(
        &self,
        request: ChatRequest,
        request_id: String,
    ) -> Result<FragmentStream, RelayError> {
        let conversation = build_conversation(&self.system_prompt, request.messages);
        debug!(
            request_id = %request_id,
            model = %self.provider.model(),
            conversation_len = conversation.len(),
            "Forwarding conversation upstream"
        );
        let deltas = self.provider.stream_chat(&conversation).await?;
        Ok(fragments(deltas, self.stream_error_marker.clone(), request_id))
    }
}

struct FragmentState {
    deltas: DeltaStream,
    marker: Option<String>,
    pending_error: Option<RelayError>,
    request_id: String,
    fragments: usize,
    bytes: usize,
    finished: bool,
}

impl Drop for FragmentState {
    fn drop(&mut self) {
        if !self.finished {
            info!(
                request_id = %self.request_id,
                fragments = self.fragments,
                "Client disconnected, upstream stream released"
            );
        }
    }
}

/// Skips empty deltas and applies the mid-stream failure policy: log, emit
/// the optional marker, then end the body with the error.
fn fragments(deltas: DeltaStream, marker: Option<String>, request_id: String) -> FragmentStream {
    let state = FragmentState {
        deltas,
        marker,
        pending_error: None,
        request_id,
        fragments: 0,
        bytes: 0,
        finished: false,
    };

    Box::pin(stream::unfold(state, |mut state| async move {
        if let Some(err) = state.pending_error.take() {
            state.finished = true;
            return Some((Err(err), state));
        }
        if state.finished {
            return None;
        }

        loop {
            match state.deltas.next().await {
                Some(Ok(text)) if text.is_empty() => continue,
                Some(Ok(text)) => {
                    state.fragments += 1;
                    state.bytes += text.len();
                    return Some((Ok(Bytes::from(text)), state));
                }
                Some(Err(err)) => {
                    error!(
                        request_id = %state.request_id,
                        fragments = state.fragments,
                        bytes = state.bytes,
                        error = %err,
                        "Upstream stream failed mid-response"
                    );
                    return match state.marker.take() {
                        Some(marker) => {
                            state.pending_error = Some(err);
                            Some((Ok(Bytes::from(marker)), state))
                        }
                        None => {
                            state.finished = true;
                            Some((Err(err), state))
                        }
                    };
                }
                None => {
                    state.finished = true;
                    info!(
                        request_id = %state.request_id,
                        fragments = state.fragments,
                        bytes = state.bytes,
                        "Chat relay completed"
                    );
                    return None;
                }
            }
        }
    }))
}
