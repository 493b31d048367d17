use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, error, info};

use crate::config::{
    render_template, STORY_FREE_THEME_LINE, STORY_PROMPT_TEMPLATE, STORY_THEME_LINE,
};
use crate::error::{StoryError, StoryResult};
use crate::llm::gemini::{truncate_for_log, ContentProvider};
use crate::story::types::{ChapterDraft, GenerationRequest, Story, CHAPTER_COUNT};
use crate::utils::timing::log_llm_timing;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawStory {
    title: String,
    cover_prompt: String,
    parts: Vec<Vec<String>>,
}

pub fn story_response_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "title": {
                "type": "string",
                "description": "The epic, eye-catching title of the story."
            },
            "cover_prompt": {
                "type": "string",
                "description": "A detailed prompt for a cinematic cover illustration."
            },
            "parts": {
                "type": "array",
                "description": "Exactly 5 chapters. Each chapter is a list of 2 strings: [chapter_text, image_prompt]. The text has about 250 words.",
                "minItems": CHAPTER_COUNT,
                "maxItems": CHAPTER_COUNT,
                "items": {
                    "type": "array",
                    "minItems": 2,
                    "maxItems": 2,
                    "items": { "type": "string" }
                }
            }
        },
        "required": ["title", "cover_prompt", "parts"],
        "propertyOrdering": ["title", "cover_prompt", "parts"]
    })
}

/// Parses model output into a [`Story`]. Nothing is repaired: any deviation
/// from the schema is a [`StoryError::SchemaViolation`].
pub fn parse_story(raw: &str) -> StoryResult<Story> {
    let parsed: RawStory = serde_json::from_str(raw.trim())
        .map_err(|err| StoryError::SchemaViolation(err.to_string()))?;

    if parsed.title.trim().is_empty() {
        return Err(StoryError::SchemaViolation("title is empty".to_string()));
    }
    if parsed.cover_prompt.trim().is_empty() {
        return Err(StoryError::SchemaViolation(
            "cover_prompt is empty".to_string(),
        ));
    }
    if parsed.parts.len() != CHAPTER_COUNT {
        return Err(StoryError::SchemaViolation(format!(
            "expected {CHAPTER_COUNT} parts, got {}",
            parsed.parts.len()
        )));
    }

    let mut chapters = Vec::with_capacity(CHAPTER_COUNT);
    for (index, part) in parsed.parts.into_iter().enumerate() {
        let [text, image_prompt]: [String; 2] = part.try_into().map_err(|part: Vec<String>| {
            StoryError::SchemaViolation(format!(
                "part {} has {} entries, expected 2",
                index + 1,
                part.len()
            ))
        })?;
        chapters.push(ChapterDraft { text, image_prompt });
    }
    let chapters: [ChapterDraft; CHAPTER_COUNT] = chapters
        .try_into()
        .map_err(|_| StoryError::SchemaViolation("chapter count changed".to_string()))?;

    Ok(Story {
        title: parsed.title,
        cover_prompt: parsed.cover_prompt,
        chapters,
    })
}

/// Schema-constrained story text generation.
#[derive(Clone)]
pub struct StoryWriter {
    provider: Arc<dyn ContentProvider>,
    model: String,
    language: String,
}

impl StoryWriter {
    pub fn new(
        provider: Arc<dyn ContentProvider>,
        model: impl Into<String>,
        language: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            model: model.into(),
            language: language.into(),
        }
    }

    pub fn build_prompt(&self, request: &GenerationRequest) -> String {
        let theme = match request.theme() {
            Some(description) => {
                render_template(STORY_THEME_LINE, &[("description", description)])
            }
            None => STORY_FREE_THEME_LINE.to_string(),
        };
        render_template(
            STORY_PROMPT_TEMPLATE,
            &[
                ("name", request.name.trim()),
                ("universe", request.universe.trim()),
                ("style", request.style.trim()),
                ("genre", request.genre.trim()),
                ("theme", theme.as_str()),
                ("language", self.language.trim()),
            ],
        )
    }

    pub fn build_payload(&self, request: &GenerationRequest) -> Value {
        let mut parts = vec![json!({ "text": self.build_prompt(request) })];
        parts.extend(request.images.iter().map(|image| image.to_inline_part()));

        json!({
            "contents": [{ "role": "user", "parts": parts }],
            "generationConfig": {
                "responseMimeType": "application/json",
                "responseJsonSchema": story_response_schema(),
            },
        })
    }

    /// Generates the story skeleton. Not retried here; a failed call is
    /// surfaced to the caller as is.
    pub async fn generate_story(&self, request: &GenerationRequest) -> StoryResult<Story> {
        request.validate()?;
        let payload = self.build_payload(request);
        let metadata = json!({
            "name": request.name,
            "universe": request.universe,
            "reference_images": request.images.len(),
        });

        let response = log_llm_timing("gemini", &self.model, "generate_story", Some(metadata), || {
            self.provider.generate_content(&self.model, &payload)
        })
        .await
        .inspect_err(|err| error!("Story generation failed: {err}"))?;

        let text = response.text();
        if text.trim().is_empty() {
            error!("Story generation returned an empty response (model={})", self.model);
            return Err(StoryError::EmptyResponse {
                model: self.model.clone(),
            });
        }

        let story = parse_story(&text).inspect_err(|err| {
            error!("{err}");
            debug!(target: "llm.gemini", raw = %truncate_for_log(&text, 4000));
        })?;
        info!("Generated story '{}' for {}", story.title, request.name.trim());
        Ok(story)
    }
}
