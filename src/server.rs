use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{
    App, Error, HttpRequest, HttpResponse, HttpServer, error, get, middleware::Logger, post, web,
};
use futures_util::StreamExt;
use tracing::{debug, error, info, warn};

use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::middleware::{RequestIdMiddleware, get_request_id, logged_request_id};
use crate::protocol::ChatRequest;
use crate::provider::{ChatProvider, OpenAiCompatibleProvider};
use crate::relay::ChatRelay;

/// Process-wide state shared by all workers. Built once at startup and
/// dropped, together with the upstream connection pool, when the server stops.
pub struct AppState {
    relay: ChatRelay,
}

impl AppState {
    pub fn new(relay: ChatRelay) -> Self {
        Self { relay }
    }

    pub fn from_config(config: &RelayConfig) -> Result<Self, RelayError> {
        let provider: Arc<dyn ChatProvider> = Arc::new(OpenAiCompatibleProvider::new(config)?);
        let relay = ChatRelay::new(provider, config.system_prompt.clone())
            .with_stream_error_marker(config.stream_error_marker.clone());
        Ok(Self::new(relay))
    }
}

async fn sink_handler(req: HttpRequest, mut payload: web::Payload) -> Result<HttpResponse, Error> {
    // Drain the payload
    while let Some(chunk) = payload.next().await {
        if let Err(err) = chunk {
            debug!("Error while draining payload: {:?}", err);
            break;
        }
    }
    debug!(path = %req.path(), method = %req.method(), "No route matched");
    Ok(HttpResponse::NotFound().finish())
}

// Custom error handler for JSON payload errors.
fn json_error_handler(err: error::JsonPayloadError, req: &HttpRequest) -> Error {
    let request_id = get_request_id(req);
    let relay_error = match &err {
        error::JsonPayloadError::OverflowKnownLength { length, limit } => {
            RelayError::PayloadTooLarge(format!(
                "{} bytes exceeds limit of {} bytes",
                length, limit
            ))
        }
        error::JsonPayloadError::Overflow { limit } => {
            RelayError::PayloadTooLarge(format!("exceeds limit of {} bytes", limit))
        }
        _ => RelayError::InvalidRequest(format!("Invalid JSON payload: {}", err)),
    };
    log_failure(&request_id, &relay_error);
    relay_error.into()
}

pub fn json_config(max_payload_size: usize) -> web::JsonConfig {
    web::JsonConfig::default()
        .limit(max_payload_size)
        .content_type_required(false)
        .error_handler(json_error_handler)
}

fn log_failure(request_id: &str, err: &RelayError) {
    if err.is_client_error() {
        warn!(request_id = %request_id, error = %err, "Rejected chat request");
    } else {
        error!(request_id = %request_id, error = %err, "Upstream call failed");
    }
}

#[get("/health")]
pub async fn health() -> HttpResponse {
    HttpResponse::Ok().body("Ok")
}

#[post("/chat")]
pub async fn chat(
    req: HttpRequest,
    body: web::Json<ChatRequest>,
    data: web::Data<AppState>,
) -> Result<HttpResponse, RelayError> {
    let request_id = get_request_id(&req);
    let request = body.into_inner();

    info!(
        request_id = %request_id,
        messages = request.messages.len(),
        model = %data.relay.model(),
        "Relaying chat request"
    );

    let fragments = data
        .relay
        .relay(request, request_id.clone())
        .await
        .inspect_err(|err| log_failure(&request_id, err))?;

    Ok(HttpResponse::Ok()
        .content_type("text/plain; charset=utf-8")
        .streaming(fragments))
}

/// Access log line tagged with the request ID. Wrap it inside
/// `RequestIdMiddleware` so the ID is already assigned.
pub fn access_logger() -> Logger {
    Logger::new(r#"%a "%r" %s %b %T request_id=%{request_id}xi"#)
        .custom_request_replace("request_id", logged_request_id)
}

/// Registers the relay routes. Shared by `startup` and the integration tests.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(chat).service(health);
}

pub async fn startup(config: RelayConfig) -> anyhow::Result<()> {
    let app_state = web::Data::new(AppState::from_config(&config)?);

    info!("Initializing relay on {}:{}", config.host, config.port);
    info!("Upstream endpoint: {}", config.completions_url());
    info!("Model: {}", config.model);
    info!(
        "Upstream timeouts: connect {}s, request {}s",
        config.connect_timeout_secs, config.request_timeout_secs
    );
    info!("Max payload size: {} bytes", config.max_payload_size);

    let max_payload_size = config.max_payload_size;

    HttpServer::new(move || {
        // Last wrap is outermost: request IDs cover CORS preflights and the access log
        App::new()
            .wrap(Cors::permissive())
            .wrap(access_logger())
            .wrap(RequestIdMiddleware::default())
            .app_data(app_state.clone())
            .app_data(json_config(max_payload_size))
            .app_data(web::PayloadConfig::default().limit(max_payload_size))
            .configure(configure)
            .default_service(web::route().to(sink_handler))
    })
    .bind((config.host.clone(), config.port))?
    .run()
    .await?;

    info!("Relay stopped");
    Ok(())
}
