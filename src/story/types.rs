use serde::Serialize;

use crate::error::{StoryError, StoryResult};
use crate::llm::media::ReferenceImage;

pub const CHAPTER_COUNT: usize = 5;

/// Everything the caller supplies for one story.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub name: String,
    pub style: String,
    pub universe: String,
    pub genre: String,
    pub description: Option<String>,
    pub images: Vec<ReferenceImage>,
}

impl GenerationRequest {
    pub fn validate(&self) -> StoryResult<()> {
        for (field, value) in [
            ("name", &self.name),
            ("style", &self.style),
            ("universe", &self.universe),
            ("genre", &self.genre),
        ] {
            if value.trim().is_empty() {
                return Err(StoryError::InvalidRequest(format!("{field} is required")));
            }
        }
        if self.images.is_empty() {
            return Err(StoryError::InvalidRequest(
                "at least one reference image is required".to_string(),
            ));
        }
        if let Some(index) = self.images.iter().position(|image| image.bytes.is_empty()) {
            return Err(StoryError::InvalidRequest(format!(
                "reference image {} is empty",
                index + 1
            )));
        }
        Ok(())
    }

    /// The free-text theme, if the caller gave a non-blank one.
    pub fn theme(&self) -> Option<&str> {
        self.description
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChapterDraft {
    pub text: String,
    pub image_prompt: String,
}

/// Story skeleton returned by the text model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Story {
    pub title: String,
    pub cover_prompt: String,
    pub chapters: [ChapterDraft; CHAPTER_COUNT],
}

#[derive(Debug, Clone)]
pub struct GeneratedImage {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub aspect_ratio: String,
    pub image_size: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> GenerationRequest {
        GenerationRequest {
            name: "Ana".into(),
            style: "Noir".into(),
            universe: "Cyberpunk".into(),
            genre: "Mystery".into(),
            description: None,
            images: vec![ReferenceImage::new(vec![1, 2, 3], "image/png")],
        }
    }

    #[test]
    fn complete_request_is_valid() {
        assert!(request().validate().is_ok());
    }

    #[test]
    fn blank_field_is_rejected() {
        let mut invalid = request();
        invalid.genre = "   ".into();
        let err = invalid.validate().expect_err("blank genre");
        assert!(matches!(err, StoryError::InvalidRequest(message) if message.contains("genre")));
    }

    #[test]
    fn request_without_photos_is_rejected() {
        let mut invalid = request();
        invalid.images.clear();
        assert!(matches!(
            invalid.validate(),
            Err(StoryError::InvalidRequest(_))
        ));
    }

    #[test]
    fn empty_photo_is_rejected() {
        let mut invalid = request();
        invalid.images.push(ReferenceImage::new(Vec::new(), "image/png"));
        let err = invalid.validate().expect_err("empty photo");
        assert!(matches!(err, StoryError::InvalidRequest(message) if message.contains('2')));
    }

    #[test]
    fn blank_theme_counts_as_absent() {
        let mut with_theme = request();
        with_theme.description = Some("  ".into());
        assert_eq!(with_theme.theme(), None);
        with_theme.description = Some(" a heist ".into());
        assert_eq!(with_theme.theme(), Some("a heist"));
    }
}
