// These modules are used by several test binaries
#![allow(dead_code)]

pub mod mock_upstream;

use actix_cors::Cors;
use actix_web::{App, body::MessageBody, dev::ServiceResponse, test as actix_test, web};
use serde_json::json;
use seva_relay::config::RelayConfig;
use seva_relay::middleware::RequestIdMiddleware;
use seva_relay::server::{AppState, access_logger, configure, json_config};

pub const TEST_API_KEY: &str = "gsk_test_key";

/// Relay configuration pointing at a mock upstream
pub fn test_config(upstream_base_url: String) -> RelayConfig {
    RelayConfig {
        upstream_base_url,
        api_key: TEST_API_KEY.to_string(),
        request_timeout_secs: 5,
        connect_timeout_secs: 2,
        ..Default::default()
    }
}

/// Builds the relay app with the same middleware stack as `server::startup`
pub async fn create_app(
    config: RelayConfig,
) -> impl actix_web::dev::Service<
    actix_http::Request,
    Response = ServiceResponse<impl MessageBody>,
    Error = actix_web::Error,
> {
    let app_state = web::Data::new(AppState::from_config(&config).unwrap());
    actix_test::init_service(
        App::new()
            .wrap(Cors::permissive())
            .wrap(access_logger())
            .wrap(RequestIdMiddleware::default())
            .app_data(app_state)
            .app_data(json_config(config.max_payload_size))
            .configure(configure),
    )
    .await
}

/// One SSE event carrying a content delta
pub fn sse_delta(content: &str) -> String {
    format!(
        "data: {}\n\n",
        json!({
            "id": "chatcmpl-mock",
            "object": "chat.completion.chunk",
            "model": "llama-3.3-70b-versatile",
            "choices": [{"index": 0, "delta": {"content": content}, "finish_reason": null}]
        })
    )
}

/// Opening SSE event that only announces the assistant role
pub fn sse_role() -> String {
    format!(
        "data: {}\n\n",
        json!({
            "id": "chatcmpl-mock",
            "object": "chat.completion.chunk",
            "choices": [{"index": 0, "delta": {"role": "assistant", "content": ""}}]
        })
    )
}

/// Closing SSE event with usage but no choices
pub fn sse_usage() -> String {
    format!(
        "data: {}\n\n",
        json!({
            "id": "chatcmpl-mock",
            "object": "chat.completion.chunk",
            "choices": [],
            "x_groq": {"usage": {"prompt_tokens": 40, "completion_tokens": 8}}
        })
    )
}

pub fn sse_done() -> String {
    "data: [DONE]\n\n".to_string()
}
