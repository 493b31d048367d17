//! Durable story storage.
//!
//! Every saved story lives in its own folder under the stories root:
//!
//! ```text
//! story_generated/
//! └── Neon Rain_1a2b3c4d/
//!     ├── story.json           manifest, written last
//!     ├── index.html           standalone viewer
//!     ├── cover_<file>.png
//!     ├── chap_1_<file>.png
//!     └── ...
//! ```
//!
//! The folder name doubles as the story id. A folder without a readable
//! `story.json` is not a story.

pub mod materializer;
pub mod reader;
pub mod transient;
pub mod viewer;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::{normalize_url_prefix, Config};

pub use materializer::{ChapterInput, SavedStory};
pub use transient::TransientImageStore;

pub const MANIFEST_FILE: &str = "story.json";
pub const VIEWER_FILE: &str = "index.html";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestChapter {
    pub text: String,
    pub image: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoryManifest {
    pub title: String,
    pub cover_image: String,
    pub chapters: Vec<ManifestChapter>,
    #[serde(default)]
    pub id: String,
}

#[derive(Debug, Clone)]
pub struct StoryStore {
    stories_dir: PathBuf,
    transient_dir: PathBuf,
    stories_url_prefix: String,
    template: String,
}

impl StoryStore {
    pub fn new(stories_dir: impl Into<PathBuf>, transient_dir: impl Into<PathBuf>) -> Self {
        Self {
            stories_dir: stories_dir.into(),
            transient_dir: transient_dir.into(),
            stories_url_prefix: "/stories".to_string(),
            template: viewer::DEFAULT_TEMPLATE.to_string(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.stories_dir, &config.transient_images_dir)
            .with_stories_url_prefix(&config.stories_url_prefix)
            .with_template(viewer::load_template(config.viewer_template_path.as_deref()))
    }

    pub fn with_stories_url_prefix(mut self, prefix: &str) -> Self {
        self.stories_url_prefix = normalize_url_prefix(prefix);
        self
    }

    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = template.into();
        self
    }

    pub fn stories_dir(&self) -> &Path {
        &self.stories_dir
    }

    pub fn transient_dir(&self) -> &Path {
        &self.transient_dir
    }
}

/// True for a single plain path component usable inside one directory.
pub(crate) fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\'])
        && !name.contains('\0')
}
