//! Request handling: validate, admit, call, map.
//!
//! [`Gateway`] is transport-agnostic. It takes a caller identity and an already-parsed JSON
//! body and produces a status, a JSON body and an optional `Retry-After` value. The HTTP layer
//! in [`crate::server`] only moves those onto the wire.
//!
//! Per request the order is fixed:
//! 1. validate the body (invalid input never charges quota)
//! 2. [`RateLimitCoordinator::admit`] (a denied request never reaches the upstream)
//! 3. build the [`UpstreamRequest`]
//! 4. one [`ResilientCaller::call`] (which owns all retrying)

use crate::clock::{Clock, SystemClock};
use crate::error::GatewayError;
use crate::rate_limit::{AdmissionDecision, RateLimitCoordinator};
use crate::retry::ResilientCaller;
use crate::telemetry::{NullSink, TelemetrySink};
use crate::tier::CallerIdentity;
use crate::upstream::{Modality, Role, Turn, UpstreamClient, UpstreamReply, UpstreamRequest};
use base64::Engine;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::Instrument;
use uuid::Uuid;

/// Per-request limits and presentation settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewaySettings {
    pub max_message_chars: usize,
    pub max_history_turns: usize,
    pub system_prompt: Option<String>,
    /// Include upstream and internal detail in error bodies.
    pub expose_detail: bool,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self { max_message_chars: 4000, max_history_turns: 20, system_prompt: None, expose_detail: true }
    }
}

/// What the transport layer should send back.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayResponse {
    pub status: u16,
    pub body: Value,
    /// Seconds for a `Retry-After` header.
    pub retry_after: Option<u64>,
}

impl GatewayResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Validated client input, not yet an upstream request.
#[derive(Debug)]
struct Input {
    message: String,
    history: Vec<Turn>,
}

pub struct Gateway<S = NullSink> {
    coordinator: RateLimitCoordinator<S>,
    caller: ResilientCaller<S>,
    upstream: Arc<dyn UpstreamClient>,
    clock: Arc<dyn Clock>,
    settings: GatewaySettings,
}

impl<S> std::fmt::Debug for Gateway<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("coordinator", &self.coordinator)
            .field("caller", &self.caller)
            .field("upstream", &self.upstream)
            .field("settings", &self.settings)
            .finish()
    }
}

impl<S> Gateway<S>
where
    S: TelemetrySink,
{
    pub fn new<U>(
        coordinator: RateLimitCoordinator<S>,
        caller: ResilientCaller<S>,
        upstream: U,
        settings: GatewaySettings,
    ) -> Self
    where
        U: UpstreamClient + 'static,
    {
        Self {
            coordinator,
            caller,
            upstream: Arc::new(upstream),
            clock: Arc::new(SystemClock),
            settings,
        }
    }

    /// Clock used for `retryAfterSeconds`. Should match the counter store's clock.
    pub fn with_clock<C>(mut self, clock: C) -> Self
    where
        C: Clock + 'static,
    {
        self.clock = Arc::new(clock);
        self
    }

    pub fn settings(&self) -> &GatewaySettings {
        &self.settings
    }

    /// Handle a chat request body: `{ message, conversationHistory? }`.
    pub async fn handle_chat(&self, caller: &CallerIdentity, body: &Value) -> GatewayResponse {
        self.handle(Modality::Text, caller, body).await
    }

    /// Handle a speech request body: `{ text }`.
    pub async fn handle_speech(&self, caller: &CallerIdentity, body: &Value) -> GatewayResponse {
        self.handle(Modality::Speech, caller, body).await
    }

    /// Error response for a request that failed before reaching the gateway, e.g. a body that
    /// is not JSON. Carries a fresh `requestId` like every other response.
    pub fn reject(&self, err: GatewayError) -> GatewayResponse {
        let request_id = Uuid::new_v4();
        let _entered = tracing::info_span!("request", request_id = %request_id).entered();
        self.error_response(err, &request_id)
    }

    async fn handle(&self, modality: Modality, caller: &CallerIdentity, body: &Value) -> GatewayResponse {
        let request_id = Uuid::new_v4();
        let span = tracing::info_span!(
            "request",
            request_id = %request_id,
            caller = %caller,
            modality = ?modality
        );

        async move {
            match self.process(modality, caller, body).await {
                Ok(reply) => GatewayResponse {
                    status: 200,
                    body: reply_body(reply, &request_id),
                    retry_after: None,
                },
                Err(err) => self.error_response(err, &request_id),
            }
        }
        .instrument(span)
        .await
    }

    async fn process(
        &self,
        modality: Modality,
        caller: &CallerIdentity,
        body: &Value,
    ) -> Result<UpstreamReply, GatewayError> {
        let input = self.validate(modality, body)?;

        if let AdmissionDecision::Denied(denial) = self.coordinator.admit(caller).await {
            return Err(GatewayError::rate_limited(denial, self.clock.now()));
        }

        let request = match modality {
            Modality::Text => UpstreamRequest::chat(input.message, input.history)
                .with_system_prompt(self.settings.system_prompt.clone()),
            Modality::Speech => UpstreamRequest::speech(input.message),
        };

        let reply = self.caller.call(self.upstream.as_ref(), &request).await.into_result()?;
        match (modality, &reply) {
            (Modality::Text, UpstreamReply::Text(_)) | (Modality::Speech, UpstreamReply::Audio { .. }) => {
                Ok(reply)
            }
            _ => Err(GatewayError::UpstreamProtocol {
                detail: format!("reply does not match requested {:?} modality", modality),
            }),
        }
    }

    fn validate(&self, modality: Modality, body: &Value) -> Result<Input, GatewayError> {
        let object = body
            .as_object()
            .ok_or_else(|| GatewayError::invalid_input("request body must be a JSON object"))?;

        let field = match modality {
            Modality::Text => "message",
            Modality::Speech => "text",
        };
        let message = required_text(object, field, self.settings.max_message_chars)?;

        let history = match modality {
            Modality::Text => parse_history(object, self.settings.max_history_turns)?,
            Modality::Speech => Vec::new(),
        };

        Ok(Input { message, history })
    }

    fn error_response(&self, err: GatewayError, request_id: &Uuid) -> GatewayResponse {
        match &err {
            GatewayError::Internal(detail) => tracing::error!(error = %detail, "internal failure"),
            GatewayError::InvalidInput(reason) => tracing::debug!(reason = %reason, "invalid input"),
            other => tracing::debug!(error = %other, status = other.status(), "request failed"),
        }

        let mut body = err.to_body(self.settings.expose_detail);
        body["requestId"] = Value::String(request_id.to_string());
        GatewayResponse { status: err.status(), body, retry_after: err.retry_after() }
    }
}

fn required_text(object: &Map<String, Value>, field: &str, max_chars: usize) -> Result<String, GatewayError> {
    let text = match object.get(field) {
        Some(Value::String(s)) => s,
        Some(Value::Null) | None => {
            return Err(GatewayError::invalid_input(format!("`{}` is required", field)))
        }
        Some(_) => return Err(GatewayError::invalid_input(format!("`{}` must be a string", field))),
    };
    if text.trim().is_empty() {
        return Err(GatewayError::invalid_input(format!("`{}` must not be empty", field)));
    }
    if text.chars().count() > max_chars {
        return Err(GatewayError::invalid_input(format!(
            "`{}` exceeds {} characters",
            field, max_chars
        )));
    }
    Ok(text.clone())
}

fn parse_history(object: &Map<String, Value>, max_turns: usize) -> Result<Vec<Turn>, GatewayError> {
    let entries = match object.get("conversationHistory") {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(entries)) => entries,
        Some(_) => return Err(GatewayError::invalid_input("`conversationHistory` must be an array")),
    };

    let mut turns = Vec::with_capacity(entries.len().min(max_turns));
    for (index, entry) in entries.iter().enumerate() {
        let role = entry
            .get("role")
            .and_then(Value::as_str)
            .and_then(Role::parse)
            .ok_or_else(|| {
                GatewayError::invalid_input(format!(
                    "conversationHistory[{}].role must be one of user, model, assistant",
                    index
                ))
            })?;
        let content = entry.get("content").and_then(Value::as_str).ok_or_else(|| {
            GatewayError::invalid_input(format!("conversationHistory[{}].content must be a string", index))
        })?;
        // empty turns are rejected by the upstream
        if content.trim().is_empty() {
            continue;
        }
        turns.push(Turn { role, content: content.to_string() });
    }

    let excess = turns.len().saturating_sub(max_turns);
    turns.drain(..excess);
    Ok(turns)
}

fn reply_body(reply: UpstreamReply, request_id: &Uuid) -> Value {
    match reply {
        UpstreamReply::Text(text) => json!({ "response": text, "requestId": request_id.to_string() }),
        UpstreamReply::Audio { data, mime_type } => json!({
            "audioContent": base64::engine::general_purpose::STANDARD.encode(data),
            "mimeType": mime_type,
            "requestId": request_id.to_string(),
        }),
    }
}
