//! HTTP surface.
//!
//! | Route | Method | Result |
//! |---|---|---|
//! | `/chat` | `POST` | [`Gateway::handle_chat`] |
//! | `/speech` | `POST` | [`Gateway::handle_speech`] |
//! | `/chat`, `/speech` | `OPTIONS` | 204 |
//! | `/chat`, `/speech` | other | 405 |
//! | `/health` | `GET` | `{"status":"ok"}` |
//!
//! Every response carries the CORS headers. The caller identity is the peer address. Behind
//! a trusted proxy ([`AppState::trust_forwarded_for`]) it is the last `X-Forwarded-For` hop,
//! the one the proxy appended; earlier hops are client-supplied and ignored.

use crate::error::GatewayError;
use crate::handler::{Gateway, GatewayResponse};
use crate::telemetry::TelemetrySink;
use crate::tier::CallerIdentity;
use axum::{
    body::Bytes,
    extract::{ConnectInfo, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;

const ALLOWED_METHODS: &str = "POST, OPTIONS";
const ALLOWED_HEADERS: &str = "Content-Type, Authorization";

/// Shared state for the router.
pub struct AppState<S> {
    gateway: Arc<Gateway<S>>,
    allowed_origin: HeaderValue,
    trust_forwarded_for: bool,
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            gateway: self.gateway.clone(),
            allowed_origin: self.allowed_origin.clone(),
            trust_forwarded_for: self.trust_forwarded_for,
        }
    }
}

impl<S> AppState<S> {
    pub fn new(
        gateway: Gateway<S>,
        allowed_origin: &str,
    ) -> Result<Self, header::InvalidHeaderValue> {
        Ok(Self {
            gateway: Arc::new(gateway),
            allowed_origin: HeaderValue::from_str(allowed_origin)?,
            trust_forwarded_for: false,
        })
    }

    /// Key callers by the last `X-Forwarded-For` hop. Off by default.
    pub fn trust_forwarded_for(mut self, trust: bool) -> Self {
        self.trust_forwarded_for = trust;
        self
    }
}

/// Build the router.
pub fn router<S>(state: AppState<S>) -> Router
where
    S: TelemetrySink,
{
    let origin = state.allowed_origin.clone();
    Router::new()
        .route("/chat", post(chat::<S>).options(preflight).fallback(method_not_allowed))
        .route("/speech", post(speech::<S>).options(preflight).fallback(method_not_allowed))
        .route("/health", get(health))
        .with_state(state)
        .layer(middleware::map_response_with_state(origin, add_cors))
}

async fn chat<S>(
    State(state): State<AppState<S>>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response
where
    S: TelemetrySink,
{
    let caller = caller_identity(&headers, peer, state.trust_forwarded_for);
    match parse_body(&body) {
        Ok(value) => into_http(state.gateway.handle_chat(&caller, &value).await),
        Err(err) => into_http(state.gateway.reject(err)),
    }
}

async fn speech<S>(
    State(state): State<AppState<S>>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response
where
    S: TelemetrySink,
{
    let caller = caller_identity(&headers, peer, state.trust_forwarded_for);
    match parse_body(&body) {
        Ok(value) => into_http(state.gateway.handle_speech(&caller, &value).await),
        Err(err) => into_http(state.gateway.reject(err)),
    }
}

async fn preflight() -> StatusCode {
    StatusCode::NO_CONTENT
}

async fn method_not_allowed() -> Response {
    let mut response = (
        StatusCode::METHOD_NOT_ALLOWED,
        Json(json!({ "error": "method_not_allowed", "message": "Method not allowed." })),
    )
        .into_response();
    response.headers_mut().insert(header::ALLOW, HeaderValue::from_static(ALLOWED_METHODS));
    response
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({ "status": "ok" })))
}

async fn add_cors(State(origin): State<HeaderValue>, mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin);
    headers.insert(header::ACCESS_CONTROL_ALLOW_METHODS, HeaderValue::from_static(ALLOWED_METHODS));
    headers.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, HeaderValue::from_static(ALLOWED_HEADERS));
    response
}

fn caller_identity(
    headers: &HeaderMap,
    peer: Option<ConnectInfo<SocketAddr>>,
    trust_forwarded_for: bool,
) -> CallerIdentity {
    // the proxy appends the address it saw, so only the last hop is not client-controlled
    let forwarded = headers
        .get_all("x-forwarded-for")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .last()
        .filter(|v| trust_forwarded_for && !v.is_empty());

    match (forwarded, peer) {
        (Some(hop), _) => CallerIdentity::new(Some(hop)),
        (None, Some(ConnectInfo(addr))) => CallerIdentity::from(addr.ip()),
        (None, None) => CallerIdentity::unknown(),
    }
}

fn parse_body(body: &[u8]) -> Result<Value, GatewayError> {
    serde_json::from_slice(body)
        .map_err(|_| GatewayError::invalid_input("request body must be valid JSON"))
}

fn into_http(response: GatewayResponse) -> Response {
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut http = (status, Json(response.body)).into_response();
    if let Some(secs) = response.retry_after {
        http.headers_mut().insert(header::RETRY_AFTER, HeaderValue::from(secs));
    }
    http
}
