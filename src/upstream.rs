//! The downstream AI service, seen through one call.
//!
//! [`UpstreamClient::send`] performs exactly one attempt. Failures carry the provider-reported
//! status, condition code and message so [`crate::outcome::classify`] can decide between
//! transient and fatal without re-reading provider payloads anywhere else.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

pub mod gemini;

pub use gemini::{GeminiClient, GeminiConfig};

/// Speaker of one conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

impl Role {
    /// Parse a client-supplied role. `assistant` is accepted as an alias for `model`.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "user" => Some(Role::User),
            "model" | "assistant" => Some(Role::Model),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Model => "model",
        }
    }
}

/// One prior turn of the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

/// What the caller wants back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modality {
    Text,
    Speech,
}

/// A fully-formed request, ready to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamRequest {
    pub modality: Modality,
    pub message: String,
    pub history: Vec<Turn>,
    pub system_prompt: Option<String>,
}

impl UpstreamRequest {
    pub fn chat(message: impl Into<String>, history: Vec<Turn>) -> Self {
        Self { modality: Modality::Text, message: message.into(), history, system_prompt: None }
    }

    pub fn speech(text: impl Into<String>) -> Self {
        Self {
            modality: Modality::Speech,
            message: text.into(),
            history: Vec::new(),
            system_prompt: None,
        }
    }

    pub fn with_system_prompt(mut self, prompt: Option<String>) -> Self {
        self.system_prompt = prompt;
        self
    }
}

/// Successful upstream payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamReply {
    Text(String),
    Audio { data: Vec<u8>, mime_type: String },
}

/// Where a failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureSource {
    /// The provider answered with an error status.
    Provider,
    /// The request never got a provider answer (connect, TLS, timeout).
    Transport,
    /// The provider answered success but the body was empty or malformed.
    Protocol,
}

/// One failed attempt, as reported by the client.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{}", describe(.origin, .status, .code, .message))]
pub struct UpstreamFailure {
    pub origin: FailureSource,
    /// HTTP status, when there was one.
    pub status: Option<u16>,
    /// Provider condition code (e.g. `UNAVAILABLE`, `RESOURCE_EXHAUSTED`).
    pub code: Option<String>,
    pub message: String,
}

impl UpstreamFailure {
    pub fn provider(status: u16, code: Option<String>, message: impl Into<String>) -> Self {
        Self { origin: FailureSource::Provider, status: Some(status), code, message: message.into() }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self { origin: FailureSource::Transport, status: None, code: None, message: message.into() }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self { origin: FailureSource::Protocol, status: None, code: None, message: message.into() }
    }
}

fn describe(origin: &FailureSource, status: &Option<u16>, code: &Option<String>, message: &str) -> String {
    match (status, code.as_deref()) {
        (Some(status), Some(code)) => format!("upstream {} {}: {}", status, code, message),
        (Some(status), None) => format!("upstream {}: {}", status, message),
        (None, _) => match origin {
            FailureSource::Protocol => format!("malformed upstream response: {}", message),
            _ => format!("upstream unreachable: {}", message),
        },
    }
}

/// Performs one call to the AI service.
#[async_trait]
pub trait UpstreamClient: Send + Sync + fmt::Debug {
    async fn send(&self, request: &UpstreamRequest) -> Result<UpstreamReply, UpstreamFailure>;
}

#[async_trait]
impl<T> UpstreamClient for Arc<T>
where
    T: UpstreamClient + ?Sized,
{
    async fn send(&self, request: &UpstreamRequest) -> Result<UpstreamReply, UpstreamFailure> {
        (**self).send(request).await
    }
}
