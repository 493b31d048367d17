use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{StoryError, StoryResult};
use crate::utils::http::get_http_client;

/// The single seam between the generators and the model provider. Both
/// generators hold one of these, so tests can swap in a scripted fake.
#[async_trait]
pub trait ContentProvider: Send + Sync {
    async fn generate_content(&self, model: &str, payload: &Value) -> StoryResult<GeminiResponse>;
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GeminiResponse {
    pub candidates: Option<Vec<GeminiCandidate>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeminiCandidate {
    pub content: Option<GeminiContent>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeminiContent {
    pub parts: Option<Vec<GeminiPart>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum GeminiPart {
    Text {
        text: String,
        #[serde(default)]
        thought: Option<bool>,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: GeminiInlineData,
    },
    Other(Value),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiInlineData {
    pub mime_type: String,
    pub data: String,
}

impl GeminiResponse {
    fn first_candidate_parts(&self) -> &[GeminiPart] {
        self.candidates
            .as_deref()
            .and_then(|candidates| candidates.first())
            .and_then(|candidate| candidate.content.as_ref())
            .and_then(|content| content.parts.as_deref())
            .unwrap_or(&[])
    }

    /// Concatenated non-thought text of the first candidate.
    pub fn text(&self) -> String {
        let mut text = String::new();
        for part in self.first_candidate_parts() {
            if let GeminiPart::Text { text: chunk, thought } = part {
                if thought.unwrap_or(false) {
                    continue;
                }
                text.push_str(chunk);
            }
        }
        text
    }

    /// The first inline image payload across all candidates that decodes.
    pub fn first_image(&self) -> Option<(String, Vec<u8>)> {
        let candidates = self.candidates.as_deref().unwrap_or(&[]);
        for candidate in candidates {
            let Some(parts) = candidate
                .content
                .as_ref()
                .and_then(|content| content.parts.as_deref())
            else {
                continue;
            };
            for part in parts {
                let GeminiPart::InlineData { inline_data } = part else {
                    continue;
                };
                if !inline_data.mime_type.starts_with("image/") {
                    continue;
                }
                match general_purpose::STANDARD.decode(&inline_data.data) {
                    Ok(bytes) if !bytes.is_empty() => {
                        return Some((inline_data.mime_type.clone(), bytes));
                    }
                    Ok(_) => {}
                    Err(err) => warn!("Skipping undecodable inline image: {err}"),
                }
            }
        }
        None
    }
}

pub fn build_safety_settings(profile: &str) -> Vec<Value> {
    let threshold = match profile {
        "standard" => "BLOCK_MEDIUM_AND_ABOVE",
        "permissive" => "OFF",
        _ => {
            warn!(
                "Unknown GEMINI_SAFETY_SETTINGS value '{}', using permissive defaults.",
                profile
            );
            "OFF"
        }
    };

    vec![
        json!({ "category": "HARM_CATEGORY_HARASSMENT", "threshold": threshold }),
        json!({ "category": "HARM_CATEGORY_HATE_SPEECH", "threshold": threshold }),
        json!({ "category": "HARM_CATEGORY_SEXUALLY_EXPLICIT", "threshold": threshold }),
        json!({ "category": "HARM_CATEGORY_DANGEROUS_CONTENT", "threshold": threshold }),
        json!({ "category": "HARM_CATEGORY_CIVIC_INTEGRITY", "threshold": threshold }),
    ]
}

pub fn build_image_config(aspect_ratio: &str, image_size: &str) -> Option<Value> {
    let mut map = Map::new();

    let trimmed = aspect_ratio.trim();
    if !trimmed.is_empty() {
        map.insert("aspectRatio".to_string(), json!(trimmed));
    }

    let trimmed = image_size.trim();
    if !trimmed.is_empty() {
        map.insert("imageSize".to_string(), json!(trimmed));
    }

    if map.is_empty() {
        None
    } else {
        Some(Value::Object(map))
    }
}

pub(crate) fn truncate_for_log(value: &str, limit: usize) -> String {
    if value.chars().count() <= limit {
        return value.to_string();
    }
    let truncated: String = value.chars().take(limit).collect();
    format!("{truncated}... (truncated)")
}

fn summarize_gemini_parts(parts: &[Value]) -> Vec<Value> {
    parts
        .iter()
        .map(|part| {
            if let Some(text) = part.get("text").and_then(|value| value.as_str()) {
                json!({ "text": truncate_for_log(text, 200) })
            } else if let Some(inline_data) = part.get("inlineData") {
                let mime_type = inline_data
                    .get("mimeType")
                    .and_then(|value| value.as_str())
                    .unwrap_or("unknown");
                let data_len = inline_data
                    .get("data")
                    .and_then(|value| value.as_str())
                    .map(|value| value.len())
                    .unwrap_or(0);
                json!({ "inlineData": { "mimeType": mime_type, "dataLen": data_len } })
            } else {
                json!({ "unknownPart": true })
            }
        })
        .collect()
}

pub(crate) fn summarize_gemini_payload(payload: &Value) -> Value {
    let mut summary = Map::new();

    if let Some(contents) = payload.get("contents").and_then(|value| value.as_array()) {
        let mut summarized_contents = Vec::new();
        for content in contents {
            let role = content
                .get("role")
                .and_then(|value| value.as_str())
                .unwrap_or("user");
            let parts = content
                .get("parts")
                .and_then(|value| value.as_array())
                .map(|parts| summarize_gemini_parts(parts))
                .unwrap_or_default();
            summarized_contents.push(json!({ "role": role, "parts": parts }));
        }
        summary.insert("contents".to_string(), Value::Array(summarized_contents));
    }

    if let Some(config) = payload.get("generationConfig") {
        let mut config = config.clone();
        // The story schema is large and static.
        if let Some(object) = config.as_object_mut() {
            if object.remove("responseJsonSchema").is_some() {
                object.insert("responseJsonSchema".to_string(), json!("<story schema>"));
            }
        }
        summary.insert("generationConfig".to_string(), config);
    }

    if let Some(safety) = payload
        .get("safetySettings")
        .and_then(|value| value.as_array())
    {
        summary.insert("safetySettingsCount".to_string(), json!(safety.len()));
    }

    Value::Object(summary)
}

fn summarize_gemini_response(response: &GeminiResponse) -> Value {
    let mut text_parts = 0usize;
    let mut image_parts = 0usize;
    let mut text_preview = None;
    let mut other_parts = Vec::new();

    let candidates = response.candidates.as_deref().unwrap_or(&[]);
    for candidate in candidates {
        let Some(parts) = candidate
            .content
            .as_ref()
            .and_then(|content| content.parts.as_deref())
        else {
            continue;
        };
        for part in parts {
            match part {
                GeminiPart::Text { text, .. } => {
                    text_parts += 1;
                    if text_preview.is_none() && !text.trim().is_empty() {
                        text_preview = Some(truncate_for_log(text, 200));
                    }
                }
                GeminiPart::InlineData { inline_data } => {
                    if inline_data.mime_type.starts_with("image/") {
                        image_parts += 1;
                    }
                }
                GeminiPart::Other(value) => {
                    let kind = value
                        .as_object()
                        .and_then(|object| object.keys().next().cloned())
                        .unwrap_or_else(|| "unknown".to_string());
                    other_parts.push(kind);
                }
            }
        }
    }

    json!({
        "candidates": candidates.len(),
        "textParts": text_parts,
        "imageParts": image_parts,
        "otherParts": other_parts,
        "textPreview": text_preview
    })
}

fn summarize_error_body(body: &str) -> (Option<String>, String) {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return (None, "empty response body".to_string());
    }

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        let message = value
            .pointer("/error/message")
            .and_then(|v| v.as_str())
            .map(|v| v.to_string())
            .or_else(|| {
                value
                    .get("message")
                    .and_then(|v| v.as_str())
                    .map(|v| v.to_string())
            });
        return (message, truncate_for_log(&value.to_string(), 2000));
    }

    (None, truncate_for_log(trimmed, 2000))
}

/// Gemini `generateContent` over REST. One request per call; retry policy is
/// left to callers.
#[derive(Clone)]
pub struct GeminiClient {
    http: Client,
    base_url: String,
    api_key: String,
    safety_profile: String,
    timeout: Duration,
}

impl GeminiClient {
    pub fn new(
        http: Client,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        safety_profile: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            api_key: api_key.into(),
            safety_profile: safety_profile.into(),
            timeout,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            get_http_client().clone(),
            config.gemini_base_url.clone(),
            config.gemini_api_key.clone(),
            config.gemini_safety_settings.clone(),
            Duration::from_secs(config.gemini_request_timeout_seconds),
        )
    }

    fn redact(&self, text: &str) -> String {
        let key = self.api_key.trim();
        if key.is_empty() {
            return text.to_string();
        }
        text.replace(key, "[redacted]")
    }

    fn endpoint(&self, model: &str) -> String {
        format!("{}/models/{}:generateContent", self.base_url, model)
    }
}

#[async_trait]
impl ContentProvider for GeminiClient {
    async fn generate_content(&self, model: &str, payload: &Value) -> StoryResult<GeminiResponse> {
        if self.api_key.trim().is_empty() {
            return Err(StoryError::MissingApiKey);
        }

        let mut payload = payload.clone();
        if let Some(object) = payload.as_object_mut() {
            object
                .entry("safetySettings")
                .or_insert_with(|| Value::Array(build_safety_settings(&self.safety_profile)));
        }

        if tracing::enabled!(tracing::Level::DEBUG) {
            let payload_summary = summarize_gemini_payload(&payload);
            debug!(target: "llm.gemini", model = model, payload = %payload_summary);
        }

        let response = self
            .http
            .post(self.endpoint(model))
            .header("x-goog-api-key", &self.api_key)
            .timeout(self.timeout)
            .json(&payload)
            .send()
            .await
            .map_err(|err| {
                let err_text = self.redact(&err.to_string());
                warn!(
                    "Gemini request failed to send: {} (timeout={}, connect={}, status={:?})",
                    err_text,
                    err.is_timeout(),
                    err.is_connect(),
                    err.status()
                );
                StoryError::Transport(err_text)
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let (message, body_summary) = summarize_error_body(&body);
            warn!("Gemini API error: status={}, body={}", status, body_summary);
            return Err(StoryError::Provider {
                status,
                message: self.redact(&message.unwrap_or(body_summary)),
            });
        }

        let value = response
            .json::<GeminiResponse>()
            .await
            .map_err(|err| StoryError::Transport(self.redact(&err.to_string())))?;
        if tracing::enabled!(tracing::Level::DEBUG) {
            let response_summary = summarize_gemini_response(&value);
            debug!(target: "llm.gemini", model = model, response = %response_summary);
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(value: Value) -> GeminiResponse {
        serde_json::from_value(value).expect("valid response fixture")
    }

    #[test]
    fn text_skips_thoughts_and_joins_first_candidate() {
        let parsed = response(json!({
            "candidates": [
                { "content": { "parts": [
                    { "text": "planning...", "thought": true },
                    { "text": "{\"title\":" },
                    { "text": "\"x\"}" }
                ] } },
                { "content": { "parts": [{ "text": "ignored" }] } }
            ]
        }));
        assert_eq!(parsed.text(), "{\"title\":\"x\"}");
    }

    #[test]
    fn first_image_ignores_text_and_non_image_parts() {
        let parsed = response(json!({
            "candidates": [{ "content": { "parts": [
                { "text": "here you go" },
                { "inlineData": { "mimeType": "application/pdf", "data": "AAAA" } },
                { "functionCall": { "name": "noop" } },
                { "inlineData": { "mimeType": "image/png", "data": "aW1n" } }
            ] } }]
        }));
        let (mime, bytes) = parsed.first_image().expect("image part");
        assert_eq!(mime, "image/png");
        assert_eq!(bytes, b"img");
    }

    #[test]
    fn response_without_candidates_has_no_text_or_image() {
        let parsed = response(json!({}));
        assert!(parsed.text().is_empty());
        assert!(parsed.first_image().is_none());
    }

    #[test]
    fn image_config_omits_blank_fields() {
        assert_eq!(
            build_image_config("2:3", " "),
            Some(json!({ "aspectRatio": "2:3" }))
        );
        assert_eq!(build_image_config("", ""), None);
    }

    #[test]
    fn payload_summary_hides_inline_bytes() {
        let payload = json!({
            "contents": [{ "role": "user", "parts": [
                { "text": "hello" },
                { "inlineData": { "mimeType": "image/png", "data": "aW1n" } }
            ] }],
            "generationConfig": { "responseJsonSchema": { "type": "object" } }
        });
        let summary = summarize_gemini_payload(&payload);
        assert_eq!(summary["contents"][0]["parts"][1]["inlineData"]["dataLen"], 4);
        assert_eq!(
            summary["generationConfig"]["responseJsonSchema"],
            "<story schema>"
        );
    }

    #[test]
    fn response_summary_names_unrecognized_parts() {
        let response: GeminiResponse = serde_json::from_value(json!({
            "candidates": [{ "content": { "parts": [
                { "text": "hello" },
                { "functionCall": { "name": "lookup" } }
            ]}}]
        }))
        .expect("response");
        let summary = summarize_gemini_response(&response);
        assert_eq!(summary["textParts"], 1);
        assert_eq!(summary["otherParts"], json!(["functionCall"]));
    }

    #[test]
    fn error_body_prefers_nested_message() {
        let (message, _) = summarize_error_body(r#"{"error":{"message":"quota exceeded"}}"#);
        assert_eq!(message.as_deref(), Some("quota exceeded"));
        let (message, summary) = summarize_error_body("   ");
        assert!(message.is_none());
        assert_eq!(summary, "empty response body");
    }

    #[tokio::test]
    async fn missing_key_fails_before_any_request() {
        let client = GeminiClient::new(
            Client::new(),
            "http://127.0.0.1:9",
            "  ",
            "permissive",
            Duration::from_secs(1),
        );
        let err = client
            .generate_content("model", &json!({}))
            .await
            .expect_err("missing key");
        assert!(matches!(err, StoryError::MissingApiKey));
    }
}
