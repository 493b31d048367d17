use std::env;
use std::path::PathBuf;

use anyhow::Result;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use tracing::warn;

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub log_dir: PathBuf,
    pub gemini_api_key: String,
    pub gemini_base_url: String,
    pub gemini_text_model: String,
    pub gemini_image_model: String,
    pub gemini_safety_settings: String,
    pub gemini_request_timeout_seconds: u64,
    pub story_language: String,
    pub image_aspect_ratio: String,
    pub image_size: String,
    pub image_max_attempts: usize,
    pub image_retry_delay_seconds: u64,
    pub stories_dir: PathBuf,
    pub transient_images_dir: PathBuf,
    pub images_url_prefix: String,
    pub stories_url_prefix: String,
    pub viewer_template_path: Option<PathBuf>,
}

pub static CONFIG: Lazy<Config> =
    Lazy::new(|| Config::load().expect("Failed to load configuration"));

fn env_string(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_usize(name: &str, default: usize) -> usize {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .unwrap_or(default)
}

fn env_path(name: &str, default: &str) -> PathBuf {
    let value = env_string(name, default);
    let trimmed = value.trim();
    if trimmed.is_empty() {
        PathBuf::from(default)
    } else {
        PathBuf::from(trimmed)
    }
}

fn env_optional_path(name: &str) -> Option<PathBuf> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}

pub(crate) fn normalize_url_prefix(value: &str) -> String {
    let trimmed = value.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return String::new();
    }
    if trimmed.starts_with('/') || trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

fn normalize_gemini_safety_settings(value: String) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return "permissive".to_string();
    }

    let lowered = trimmed.to_lowercase();
    match lowered.as_str() {
        "permissive" | "off" | "none" => "permissive".to_string(),
        "standard" => "standard".to_string(),
        _ => {
            warn!(
                "Unknown GEMINI_SAFETY_SETTINGS value '{}'; defaulting to permissive.",
                value
            );
            "permissive".to_string()
        }
    }
}

impl Config {
    /// Reads the process environment. An empty `GEMINI_API_KEY` loads fine;
    /// the provider reports it on first use.
    pub fn load() -> Result<Self> {
        Ok(Config {
            log_level: env_string("LOG_LEVEL", "info").to_lowercase(),
            log_dir: env_path("LOG_DIR", "logs"),
            gemini_api_key: env_string("GEMINI_API_KEY", "").trim().to_string(),
            gemini_base_url: env_string(
                "GEMINI_BASE_URL",
                "https://generativelanguage.googleapis.com/v1beta",
            )
            .trim_end_matches('/')
            .to_string(),
            gemini_text_model: env_string("GEMINI_TEXT_MODEL", "gemini-3-flash-preview"),
            gemini_image_model: env_string("GEMINI_IMAGE_MODEL", "gemini-3-pro-image-preview"),
            gemini_safety_settings: normalize_gemini_safety_settings(env_string(
                "GEMINI_SAFETY_SETTINGS",
                "permissive",
            )),
            gemini_request_timeout_seconds: env_u64("GEMINI_REQUEST_TIMEOUT_SECONDS", 180),
            story_language: env_string("STORY_LANGUAGE", "Brazilian Portuguese"),
            image_aspect_ratio: env_string("IMAGE_ASPECT_RATIO", "2:3"),
            image_size: env_string("IMAGE_SIZE", "2K"),
            image_max_attempts: env_usize("IMAGE_MAX_ATTEMPTS", 3).max(1),
            image_retry_delay_seconds: env_u64("IMAGE_RETRY_DELAY_SECONDS", 2),
            stories_dir: env_path("STORIES_DIR", "story_generated"),
            transient_images_dir: env_path("TRANSIENT_IMAGES_DIR", "generated_images_temp"),
            images_url_prefix: normalize_url_prefix(&env_string("IMAGES_URL_PREFIX", "/images")),
            stories_url_prefix: normalize_url_prefix(&env_string(
                "STORIES_URL_PREFIX",
                "/stories",
            )),
            viewer_template_path: env_optional_path("VIEWER_TEMPLATE_PATH"),
        })
    }
}

pub const STORY_PROMPT_TEMPLATE: &str = r#"Write an epic, immersive story split into EXACTLY 5 CHAPTERS.

PROTAGONIST:
- The protagonist is the person shown in the attached photos. Note their visual traits so the image prompts you write keep them consistent.
- Name: {name}

STORY SETTINGS:
- Universe: {universe} (the whole story takes place in this universe)
- Visual/art style: {style} (the tone of the prose must match this style: a 'Noir' style calls for mysterious writing, a 'Cartoon' style for lighter, playful writing)
- Genre: {genre}
- {theme}

OUTPUT REQUIREMENTS:
Return JSON with exactly this structure:
- title: the story title.
- cover_prompt: a prompt for the cover illustration, describing the protagonist ({name}) in the {universe} universe, in the {style} style.
- parts: a list of 5 lists. Each inner list holds:
    1. The chapter text (about 250 words). The writing MUST reflect the {universe} universe, the {genre} genre and the tone of the {style} style.
    2. The image prompt for the chapter, describing the matching scene, including the protagonist ({name}) and the setting, in the {style} style.

IMPORTANT:
- The story text is shaped by the name, universe, style, genre and theme.
- The attached PHOTOS exist ONLY so the image prompts describe the protagonist's face correctly. Do NOT carry details from the photos (for example the clothes worn in them or the background) into the story text unless they make sense in the universe.
- Write the title and the chapter texts in {language}."#;

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{(\w+)\}").expect("valid placeholder regex"));

/// Fills `{key}` placeholders in one pass. Substituted values are never
/// rescanned, and placeholders without a value are left as written.
pub fn render_template(template: &str, values: &[(&str, &str)]) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures| {
            values
                .iter()
                .find(|(key, _)| *key == &caps[1])
                .map(|(_, value)| (*value).to_string())
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

pub const STORY_THEME_LINE: &str = "THEME/DESCRIPTION: {description}";

pub const STORY_FREE_THEME_LINE: &str =
    "THEME: FREE/RANDOM. Invent a surprising, creative story that fits the universe and the genre.";

pub const IDENTITY_LOCK_TEMPLATE: &str = r#"{prompt}

IMPORTANT: the main character of this image must be exactly the same person shown in the attached photos ({person_name}). Keep their facial features, adapted to the universe: {universe_context}.
Use the uploaded selfie as identity reference - IDENTITY LOCK (match face/skin/hair/light)."#;
