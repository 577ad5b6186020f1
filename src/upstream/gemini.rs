//! `generateContent`-style HTTP client.
//!
//! Chat requests send the history plus the new user turn; speech requests ask for an `AUDIO`
//! response and decode the inline base64 payload. Provider errors are reported with their HTTP
//! status and the `error.status` condition code (`UNAVAILABLE`, `RESOURCE_EXHAUSTED`, ...).

use super::{Modality, UpstreamClient, UpstreamFailure, UpstreamReply, UpstreamRequest};
use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

/// Longest provider error body echoed into a failure message.
const MAX_ERROR_BODY: usize = 512;

/// Connection settings for [`GeminiClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeminiConfig {
    /// Base URL up to and excluding `/models/...`.
    pub endpoint: String,
    pub api_key: String,
    pub chat_model: String,
    pub speech_model: String,
    pub voice: String,
    pub timeout: Duration,
}

/// HTTP client for the upstream AI service.
#[derive(Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    config: GeminiConfig,
}

impl std::fmt::Debug for GeminiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiClient")
            .field("endpoint", &self.config.endpoint)
            .field("chat_model", &self.config.chat_model)
            .field("speech_model", &self.config.speech_model)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { http, config })
    }

    fn url_for(&self, modality: Modality) -> String {
        let model = match modality {
            Modality::Text => &self.config.chat_model,
            Modality::Speech => &self.config.speech_model,
        };
        format!("{}/models/{}:generateContent", self.config.endpoint.trim_end_matches('/'), model)
    }
}

#[async_trait]
impl UpstreamClient for GeminiClient {
    async fn send(&self, request: &UpstreamRequest) -> Result<UpstreamReply, UpstreamFailure> {
        let body = build_body(request, &self.config.voice);
        let response = self
            .http
            .post(self.url_for(request.modality))
            .header("x-goog-api-key", &self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| UpstreamFailure::transport(e.to_string()))?;

        let status = response.status();
        let text = response.text().await.map_err(|e| UpstreamFailure::transport(e.to_string()))?;

        if !status.is_success() {
            return Err(parse_error(status.as_u16(), &text));
        }
        parse_reply(request.modality, &text)
    }
}

/// Request body for one attempt.
pub(crate) fn build_body(request: &UpstreamRequest, voice: &str) -> Value {
    match request.modality {
        Modality::Text => {
            let mut contents: Vec<Value> = request
                .history
                .iter()
                .map(|turn| json!({ "role": turn.role.as_str(), "parts": [{ "text": turn.content }] }))
                .collect();
            contents.push(json!({ "role": "user", "parts": [{ "text": request.message }] }));

            let mut body = json!({ "contents": contents });
            if let Some(prompt) = request.system_prompt.as_deref().filter(|p| !p.trim().is_empty()) {
                body["systemInstruction"] = json!({ "parts": [{ "text": prompt }] });
            }
            body
        }
        Modality::Speech => json!({
            "contents": [{ "parts": [{ "text": request.message }] }],
            "generationConfig": {
                "responseModalities": ["AUDIO"],
                "speechConfig": {
                    "voiceConfig": { "prebuiltVoiceConfig": { "voiceName": voice } }
                }
            }
        }),
    }
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: Option<String>,
}

pub(crate) fn parse_error(status: u16, body: &str) -> UpstreamFailure {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => UpstreamFailure::provider(status, envelope.error.status, envelope.error.message),
        Err(_) => {
            let mut message: String = body.chars().take(MAX_ERROR_BODY).collect();
            if message.trim().is_empty() {
                message = format!("HTTP {}", status);
            }
            UpstreamFailure::provider(status, None, message)
        }
    }
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    text: Option<String>,
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

pub(crate) fn parse_reply(modality: Modality, body: &str) -> Result<UpstreamReply, UpstreamFailure> {
    let parsed: GenerateResponse = serde_json::from_str(body)
        .map_err(|e| UpstreamFailure::protocol(format!("invalid JSON: {}", e)))?;
    let parts = parsed
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|c| c.parts)
        .unwrap_or_default();

    match modality {
        Modality::Text => {
            let text: String = parts.into_iter().filter_map(|p| p.text).collect();
            if text.trim().is_empty() {
                return Err(UpstreamFailure::protocol("response contained no text"));
            }
            Ok(UpstreamReply::Text(text))
        }
        Modality::Speech => {
            let inline = parts
                .into_iter()
                .find_map(|p| p.inline_data)
                .ok_or_else(|| UpstreamFailure::protocol("response contained no audio"))?;
            let data = base64::engine::general_purpose::STANDARD
                .decode(inline.data.as_bytes())
                .map_err(|e| UpstreamFailure::protocol(format!("audio is not valid base64: {}", e)))?;
            if data.is_empty() {
                return Err(UpstreamFailure::protocol("response contained empty audio"));
            }
            Ok(UpstreamReply::Audio { data, mime_type: inline.mime_type })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::{FailureSource, Role, Turn};

    #[test]
    fn chat_body_appends_user_turn_after_history() {
        let request = UpstreamRequest::chat(
            "and now?",
            vec![
                Turn { role: Role::User, content: "hi".into() },
                Turn { role: Role::Model, content: "hello".into() },
            ],
        )
        .with_system_prompt(Some("be brief".into()));

        let body = build_body(&request, "Kore");
        let contents = body["contents"].as_array().unwrap();
        assert_eq!(contents.len(), 3);
        assert_eq!(contents[1]["role"], "model");
        assert_eq!(contents[2]["parts"][0]["text"], "and now?");
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "be brief");
    }

    #[test]
    fn speech_body_requests_audio_with_voice() {
        let body = build_body(&UpstreamRequest::speech("read this"), "Puck");
        assert_eq!(body["generationConfig"]["responseModalities"][0], "AUDIO");
        assert_eq!(
            body["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]["voiceName"],
            "Puck"
        );
    }

    #[test]
    fn provider_error_envelope_is_parsed() {
        let failure = parse_error(
            503,
            r#"{"error":{"code":503,"message":"The model is overloaded.","status":"UNAVAILABLE"}}"#,
        );
        assert_eq!(failure.status, Some(503));
        assert_eq!(failure.code.as_deref(), Some("UNAVAILABLE"));
        assert_eq!(failure.message, "The model is overloaded.");
    }

    #[test]
    fn non_json_error_keeps_status() {
        let failure = parse_error(502, "");
        assert_eq!(failure.code, None);
        assert_eq!(failure.message, "HTTP 502");
    }

    #[test]
    fn text_reply_concatenates_parts() {
        let body = r#"{"candidates":[{"content":{"parts":[{"text":"Hel"},{"text":"lo"}]}}]}"#;
        assert_eq!(parse_reply(Modality::Text, body).unwrap(), UpstreamReply::Text("Hello".into()));
    }

    #[test]
    fn empty_text_is_protocol_error() {
        let err = parse_reply(Modality::Text, r#"{"candidates":[]}"#).unwrap_err();
        assert_eq!(err.origin, FailureSource::Protocol);
        let err = parse_reply(Modality::Text, "not json").unwrap_err();
        assert_eq!(err.origin, FailureSource::Protocol);
    }

    #[test]
    fn audio_reply_is_decoded() {
        let body = r#"{"candidates":[{"content":{"parts":[{"inlineData":{"mimeType":"audio/L16;rate=24000","data":"AAEC"}}]}}]}"#;
        assert_eq!(
            parse_reply(Modality::Speech, body).unwrap(),
            UpstreamReply::Audio { data: vec![0, 1, 2], mime_type: "audio/L16;rate=24000".into() }
        );
    }
}
