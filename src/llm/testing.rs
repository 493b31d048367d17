use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use crate::error::{StoryError, StoryResult};
use crate::llm::gemini::{ContentProvider, GeminiResponse};

/// Replays queued outcomes in order and records every request it receives.
#[derive(Default)]
pub struct ScriptedProvider {
    outcomes: Mutex<VecDeque<StoryResult<GeminiResponse>>>,
    calls: Mutex<Vec<(String, Value)>>,
}

impl ScriptedProvider {
    pub fn new(outcomes: Vec<StoryResult<GeminiResponse>>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl ContentProvider for ScriptedProvider {
    async fn generate_content(&self, model: &str, payload: &Value) -> StoryResult<GeminiResponse> {
        self.calls.lock().push((model.to_string(), payload.clone()));
        self.outcomes
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(StoryError::Transport("script exhausted".to_string())))
    }
}

pub fn text_response(text: &str) -> GeminiResponse {
    serde_json::from_value(json!({
        "candidates": [{ "content": { "parts": [{ "text": text }] } }]
    }))
    .expect("text fixture")
}

pub fn image_response(base64_data: &str) -> GeminiResponse {
    serde_json::from_value(json!({
        "candidates": [{ "content": { "parts": [
            { "inlineData": { "mimeType": "image/png", "data": base64_data } }
        ] } }]
    }))
    .expect("image fixture")
}
