use actix_web::{HttpResponse, ResponseError, http::StatusCode};
use serde_json::json;

/// Everything that can go wrong between accepting a chat request and the end
/// of its relayed stream.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("Upstream request timed out")]
    UpstreamTimeout,

    #[error("Failed to contact upstream: {0}")]
    UpstreamTransport(String),

    #[error("Upstream returned {status}: {message}")]
    UpstreamStatus { status: u16, message: String },

    #[error("Upstream stream error: {0}")]
    UpstreamStream(String),

    #[error("Malformed upstream response: {0}")]
    MalformedUpstream(String),
}

impl RelayError {
    pub fn error_type(&self) -> &'static str {
        match self {
            RelayError::InvalidRequest(_) => "invalid_request_error",
            RelayError::PayloadTooLarge(_) => "payload_too_large",
            RelayError::UpstreamTimeout => "upstream_timeout",
            RelayError::UpstreamTransport(_)
            | RelayError::UpstreamStatus { .. }
            | RelayError::UpstreamStream(_)
            | RelayError::MalformedUpstream(_) => "upstream_error",
        }
    }

    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            RelayError::InvalidRequest(_) | RelayError::PayloadTooLarge(_)
        )
    }
}

impl From<reqwest::Error> for RelayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RelayError::UpstreamTimeout
        } else {
            RelayError::UpstreamTransport(err.to_string())
        }
    }
}

impl ResponseError for RelayError {
    fn status_code(&self) -> StatusCode {
        match self {
            RelayError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            RelayError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            RelayError::UpstreamTimeout => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::BAD_GATEWAY,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({
            "error": {
                "message": self.to_string(),
                "type": self.error_type(),
            }
        }))
    }
}
