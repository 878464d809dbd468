use actix_web::{
    Error, HttpMessage, HttpRequest,
    dev::{Service, ServiceRequest, ServiceResponse, Transform, forward_ready},
    http::header::{HeaderName, HeaderValue},
};
use futures_util::future::LocalBoxFuture;
use rand::{Rng, distr::Alphanumeric};
use std::future::{Ready, ready};

pub const REQUEST_ID_HEADER: &str = "x-request-id";

const REQUEST_ID_PREFIX: &str = "chat-";

/// Identifier attached to every request, its log lines and its response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(pub String);

fn generate_request_id() -> String {
    let random_part: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(24)
        .map(char::from)
        .collect();
    format!("{}{}", REQUEST_ID_PREFIX, random_part)
}

/// Extract request ID from request extensions or generate a new one
pub fn get_request_id(req: &HttpRequest) -> String {
    req.extensions()
        .get::<RequestId>()
        .map(|id| id.0.clone())
        .unwrap_or_else(generate_request_id)
}

/// Request ID for the access log. Only set once `RequestIdMiddleware` has run,
/// so the logger must be wrapped inside it.
pub fn logged_request_id(req: &ServiceRequest) -> String {
    req.extensions()
        .get::<RequestId>()
        .map(|id| id.0.clone())
        .unwrap_or_else(|| "-".to_string())
}

/// Middleware for injecting request ID into request extensions and echoing it
/// back in the `x-request-id` response header
pub struct RequestIdMiddleware {
    headers: Vec<String>,
}

impl Default for RequestIdMiddleware {
    fn default() -> Self {
        Self::new(vec![
            REQUEST_ID_HEADER.to_string(),
            "x-correlation-id".to_string(),
            "request-id".to_string(),
        ])
    }
}

impl RequestIdMiddleware {
    pub fn new(headers: Vec<String>) -> Self {
        Self { headers }
    }
}

impl<S, B> Transform<S, ServiceRequest> for RequestIdMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = RequestIdMiddlewareService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RequestIdMiddlewareService {
            service,
            headers: self.headers.clone(),
        }))
    }
}

pub struct RequestIdMiddlewareService<S> {
    service: S,
    headers: Vec<String>,
}

impl<S, B> Service<ServiceRequest> for RequestIdMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let request_id = self
            .headers
            .iter()
            .filter_map(|name| req.headers().get(name.as_str()))
            .filter_map(|value| value.to_str().ok())
            .find(|value| !value.is_empty())
            .map(str::to_string)
            .unwrap_or_else(generate_request_id);

        req.extensions_mut().insert(RequestId(request_id.clone()));

        let fut = self.service.call(req);
        Box::pin(async move {
            let mut res = fut.await?;
            if let Ok(value) = HeaderValue::from_str(&request_id) {
                res.headers_mut()
                    .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
            }
            Ok(res)
        })
    }
}
