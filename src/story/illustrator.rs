use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tracing::{info, warn};

use crate::config::{render_template, IDENTITY_LOCK_TEMPLATE};
use crate::error::{StoryError, StoryResult};
use crate::llm::gemini::{build_image_config, ContentProvider};
use crate::llm::media::ReferenceImage;
use crate::story::types::GeneratedImage;
use crate::utils::timing::log_llm_timing;

pub const DEFAULT_ASPECT_RATIO: &str = "2:3";
pub const DEFAULT_IMAGE_SIZE: &str = "2K";
pub const DEFAULT_MAX_ATTEMPTS: usize = 3;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Scene prompt followed by the identity lock. The lock text never depends
/// on the scene, so every image of a story is anchored the same way.
pub fn identity_lock_instruction(prompt: &str, person_name: &str, universe_context: &str) -> String {
    render_template(
        IDENTITY_LOCK_TEMPLATE,
        &[
            ("prompt", prompt.trim()),
            ("person_name", person_name.trim()),
            ("universe_context", universe_context.trim()),
        ],
    )
}

/// Identity-locked image generation. Stateless between calls; the cover and
/// each chapter are generated by independent invocations.
#[derive(Clone)]
pub struct Illustrator {
    provider: Arc<dyn ContentProvider>,
    model: String,
    image_size: String,
    max_attempts: usize,
    retry_delay: Duration,
}

impl Illustrator {
    pub fn new(provider: Arc<dyn ContentProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            image_size: DEFAULT_IMAGE_SIZE.to_string(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    pub fn with_image_size(mut self, image_size: impl Into<String>) -> Self {
        self.image_size = image_size.into();
        self
    }

    pub fn with_retry(mut self, max_attempts: usize, retry_delay: Duration) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.retry_delay = retry_delay;
        self
    }

    pub fn build_payload(
        &self,
        prompt: &str,
        reference_images: &[ReferenceImage],
        person_name: &str,
        universe_context: &str,
        aspect_ratio: &str,
    ) -> Value {
        let instruction = identity_lock_instruction(prompt, person_name, universe_context);
        let mut parts = vec![json!({ "text": instruction })];
        parts.extend(reference_images.iter().map(|image| image.to_inline_part()));

        let mut generation_config = json!({ "responseModalities": ["IMAGE"] });
        if let Some(image_config) = build_image_config(aspect_ratio, &self.image_size) {
            if let Some(config_object) = generation_config.as_object_mut() {
                config_object.insert("imageConfig".to_string(), image_config);
            }
        }

        json!({
            "contents": [{ "role": "user", "parts": parts }],
            "generationConfig": generation_config,
        })
    }

    async fn attempt(&self, payload: &Value, aspect_ratio: &str) -> StoryResult<GeneratedImage> {
        let response = self.provider.generate_content(&self.model, payload).await?;
        let (mime_type, bytes) = response.first_image().ok_or_else(|| StoryError::NoImage {
            model: self.model.clone(),
        })?;
        Ok(GeneratedImage {
            bytes,
            mime_type,
            aspect_ratio: aspect_ratio.to_string(),
            image_size: self.image_size.clone(),
        })
    }

    /// Generates one image, retrying failed attempts after a fixed delay.
    /// After the last attempt the last error is returned; there is no
    /// placeholder fallback.
    pub async fn generate_image(
        &self,
        prompt: &str,
        reference_images: &[ReferenceImage],
        person_name: &str,
        universe_context: &str,
        aspect_ratio: &str,
    ) -> StoryResult<GeneratedImage> {
        let payload = self.build_payload(
            prompt,
            reference_images,
            person_name,
            universe_context,
            aspect_ratio,
        );
        let metadata = json!({
            "person_name": person_name,
            "aspect_ratio": aspect_ratio,
            "reference_images": reference_images.len(),
        });

        let mut attempt = 0usize;
        loop {
            attempt += 1;
            info!(
                "Generating image (attempt {}/{})",
                attempt, self.max_attempts
            );
            let result = log_llm_timing(
                "gemini",
                &self.model,
                "generate_image",
                Some(metadata.clone()),
                || self.attempt(&payload, aspect_ratio),
            )
            .await;

            let err = match result {
                Ok(image) => return Ok(image),
                Err(err) => err,
            };
            let retrying = err.is_retryable() && attempt < self.max_attempts;
            warn!(
                "Image generation attempt {}/{} failed: {} (retrying={})",
                attempt, self.max_attempts, err, retrying
            );
            if !retrying {
                return Err(err);
            }
            tokio::time::sleep(self.retry_delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::gemini::GeminiResponse;
    use crate::llm::testing::{image_response, text_response, ScriptedProvider};

    fn references() -> Vec<ReferenceImage> {
        vec![
            ReferenceImage::new(b"selfie-1".to_vec(), "image/jpeg"),
            ReferenceImage::new(b"selfie-2".to_vec(), "image/jpeg"),
        ]
    }

    fn illustrator(provider: Arc<ScriptedProvider>) -> Illustrator {
        Illustrator::new(provider, "image-model")
    }

    fn assert_two_delays(elapsed: Duration) {
        assert!(elapsed >= DEFAULT_RETRY_DELAY * 2, "elapsed {elapsed:?}");
        assert!(elapsed < DEFAULT_RETRY_DELAY * 3, "elapsed {elapsed:?}");
    }

    async fn generate(illustrator: &Illustrator) -> StoryResult<GeneratedImage> {
        illustrator
            .generate_image(
                "Ana on a rooftop",
                &references(),
                "Ana",
                "Cyberpunk",
                DEFAULT_ASPECT_RATIO,
            )
            .await
    }

    #[test]
    fn instruction_appends_identity_lock_to_scene() {
        let instruction = identity_lock_instruction(" Ana on a rooftop ", "Ana", "Cyberpunk");
        assert!(instruction.starts_with("Ana on a rooftop"));
        assert!(instruction.contains("attached photos (Ana)"));
        assert!(instruction.contains("adapted to the universe: Cyberpunk."));
        assert!(instruction.contains("IDENTITY LOCK (match face/skin/hair/light)"));

        let instruction = identity_lock_instruction("{person_name} waves", "Ana", "Sertão");
        assert!(instruction.starts_with("{person_name} waves"));
    }

    #[test]
    fn payload_attaches_every_reference_and_image_config() {
        let payload = illustrator(Arc::new(ScriptedProvider::default())).build_payload(
            "scene",
            &references(),
            "Ana",
            "Cyberpunk",
            "16:9",
        );
        let parts = payload["contents"][0]["parts"].as_array().expect("parts");
        assert_eq!(parts.len(), 3);
        assert_eq!(
            payload["generationConfig"]["responseModalities"],
            json!(["IMAGE"])
        );
        assert_eq!(
            payload["generationConfig"]["imageConfig"],
            json!({ "aspectRatio": "16:9", "imageSize": "2K" })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn first_success_returns_without_delay() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(image_response("aW1n"))]));
        let started = tokio::time::Instant::now();
        let image = generate(&illustrator(provider.clone())).await.expect("image");
        assert_eq!(image.bytes, b"img");
        assert_eq!(image.aspect_ratio, "2:3");
        assert_eq!(provider.calls().len(), 1);
        assert!(started.elapsed() < DEFAULT_RETRY_DELAY);
    }

    #[tokio::test(start_paused = true)]
    async fn third_attempt_success_follows_two_delays() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Err(StoryError::Transport("connection reset".into())),
            Ok(text_response("I cannot draw that")),
            Ok(image_response("dGhpcmQ=")),
        ]));
        let started = tokio::time::Instant::now();
        let image = generate(&illustrator(provider.clone())).await.expect("image");
        assert_eq!(image.bytes, b"third");
        assert_eq!(provider.calls().len(), 3);
        assert_two_delays(started.elapsed());
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_attempts_return_last_error_after_two_delays() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Err(StoryError::Transport("first".into())),
            Ok(GeminiResponse::default()),
            Err(StoryError::Transport("last".into())),
        ]));
        let started = tokio::time::Instant::now();
        let err = generate(&illustrator(provider.clone()))
            .await
            .expect_err("all attempts fail");
        assert!(matches!(err, StoryError::Transport(message) if message == "last"));
        assert_eq!(provider.calls().len(), 3);
        assert_two_delays(started.elapsed());
    }

    #[tokio::test(start_paused = true)]
    async fn every_attempt_sends_the_same_references() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(GeminiResponse::default()),
            Ok(image_response("aW1n")),
        ]));
        generate(&illustrator(provider.clone())).await.expect("image");
        let calls = provider.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].1, calls[1].1);
        assert_eq!(calls[1].1["contents"][0]["parts"].as_array().map(Vec::len), Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn missing_key_is_not_retried() {
        let provider = Arc::new(ScriptedProvider::new(vec![Err(StoryError::MissingApiKey)]));
        let err = generate(&illustrator(provider.clone()))
            .await
            .expect_err("config failure");
        assert!(matches!(err, StoryError::MissingApiKey));
        assert_eq!(provider.calls().len(), 1);
    }
}
