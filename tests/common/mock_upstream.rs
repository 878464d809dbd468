//! Mock OpenAI-compatible upstream for relay tests

use std::{
    io,
    net::SocketAddr,
    sync::{Arc, Mutex},
    time::Duration,
};

use axum::{
    Json, Router,
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode, header::CONTENT_TYPE},
    response::{IntoResponse, Response},
    routing::post,
};
use bytes::Bytes;
use futures_util::stream::{self, StreamExt};
use serde_json::Value;
use tokio::net::TcpListener;

/// What the mock does with every chat completion request
#[derive(Clone, Debug)]
pub enum MockBehavior {
    /// Serve the given raw SSE events, then close the body
    Stream(Vec<String>),
    /// Serve the given events, then drop the connection mid-body
    Truncate(Vec<String>),
    /// Answer with a non-2xx status and body
    Reject { status: u16, body: String },
    /// Hold the response headers back for the given time, then stream events
    Stall(Duration, Vec<String>),
}

#[derive(Clone, Debug)]
pub struct RecordedRequest {
    pub authorization: Option<String>,
    pub accept: Option<String>,
    pub body: Value,
}

struct MockState {
    behavior: MockBehavior,
    requests: Mutex<Vec<RecordedRequest>>,
}

pub struct MockUpstream {
    addr: SocketAddr,
    state: Arc<MockState>,
    _handle: tokio::task::JoinHandle<()>,
}

impl MockUpstream {
    pub async fn start(behavior: MockBehavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let state = Arc::new(MockState {
            behavior,
            requests: Mutex::new(Vec::new()),
        });

        let app = Router::new()
            .route("/v1/chat/completions", post(chat_completions))
            .with_state(state.clone());

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        // Give the server a moment to start
        tokio::time::sleep(Duration::from_millis(20)).await;

        Self {
            addr,
            state,
            _handle: handle,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}/v1", self.addr)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().unwrap().clone()
    }
}

impl Drop for MockUpstream {
    fn drop(&mut self) {
        self._handle.abort();
    }
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

async fn chat_completions(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    state.requests.lock().unwrap().push(RecordedRequest {
        authorization: header_string(&headers, "authorization"),
        accept: header_string(&headers, "accept"),
        body,
    });

    match &state.behavior {
        MockBehavior::Stream(events) => sse_response(events.clone(), false),
        MockBehavior::Truncate(events) => sse_response(events.clone(), true),
        MockBehavior::Stall(delay, events) => {
            tokio::time::sleep(*delay).await;
            sse_response(events.clone(), false)
        }
        MockBehavior::Reject { status, body } => (
            StatusCode::from_u16(*status).unwrap(),
            [(CONTENT_TYPE, "application/json")],
            body.clone(),
        )
            .into_response(),
    }
}

fn sse_response(events: Vec<String>, truncate: bool) -> Response {
    let events = stream::iter(
        events
            .into_iter()
            .map(|event| Ok::<_, io::Error>(Bytes::from(event))),
    );

    let body = if truncate {
        // Pause first so the events already written are flushed to the client
        let failure = stream::once(async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Err(io::Error::other("upstream connection dropped"))
        });
        Body::from_stream(events.chain(failure))
    } else {
        Body::from_stream(events)
    };

    let mut response = Response::new(body);
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    response
}
