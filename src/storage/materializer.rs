use std::fs;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use url::Url;
use uuid::Uuid;

use crate::error::{StoryError, StoryResult};
use crate::storage::{
    is_plain_file_name, ManifestChapter, StoryManifest, StoryStore, MANIFEST_FILE, VIEWER_FILE,
};

static UNSAFE_TITLE_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[<>:"/\\|?*]"#).expect("valid title regex"));

const SUFFIX_LEN: usize = 8;
// Keeps `<title>_<suffix>` well under the usual 255-byte file name limit.
const MAX_TITLE_BYTES: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterInput {
    pub text: String,
    pub image_ref: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SavedStory {
    pub id: String,
    pub path: PathBuf,
}

pub fn sanitize_title(title: &str) -> String {
    UNSAFE_TITLE_CHARS.replace_all(title, "").trim().to_string()
}

fn random_suffix() -> String {
    let mut suffix = Uuid::new_v4().simple().to_string();
    suffix.truncate(SUFFIX_LEN);
    suffix
}

fn truncate_to_char_boundary(value: &str, max_bytes: usize) -> &str {
    if value.len() <= max_bytes {
        return value;
    }
    let mut end = max_bytes;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    &value[..end]
}

/// `<sanitized title>_<suffix>`, or the suffix alone when nothing of the
/// title survives sanitizing.
pub fn story_folder_name(title: &str) -> String {
    let sanitized = sanitize_title(title);
    let safe = truncate_to_char_boundary(&sanitized, MAX_TITLE_BYTES).trim_end();
    let suffix = random_suffix();
    if safe.is_empty() {
        suffix
    } else {
        format!("{safe}_{suffix}")
    }
}

/// Filename component of a served image reference such as
/// `/images/<file>` or `http://host/images/<file>?v=1`.
pub fn image_file_name(reference: &str) -> Option<String> {
    let trimmed = reference.trim();
    if trimmed.is_empty() {
        return None;
    }

    let path = match Url::parse(trimmed) {
        Ok(url) => url.path().to_string(),
        Err(_) => trimmed
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .to_string(),
    };
    let name = path.rsplit('/').next().unwrap_or_default();
    is_plain_file_name(name).then(|| name.to_string())
}

#[derive(Debug)]
enum ImagePlan {
    Copy { source: PathBuf, target: String },
    Keep(String),
}

#[derive(Debug)]
struct StoryPlan {
    cover: ImagePlan,
    chapters: Vec<ImagePlan>,
}

impl ImagePlan {
    fn stored_reference(&self) -> &str {
        match self {
            ImagePlan::Copy { target, .. } => target,
            ImagePlan::Keep(reference) => reference,
        }
    }
}

fn write_atomically(path: &Path, content: &[u8]) -> StoryResult<()> {
    let file_name = path
        .file_name()
        .map(|value| value.to_string_lossy().to_string())
        .unwrap_or_else(|| "temp_file".to_string());
    let temp_path = path.with_file_name(format!(".{file_name}.tmp.{}", random_suffix()));

    fs::write(&temp_path, content).map_err(|err| StoryError::io(&temp_path, err))?;
    fs::rename(&temp_path, path).map_err(|err| StoryError::io(path, err))
}

impl StoryStore {
    fn plan_image(&self, reference: &str, target_prefix: &str) -> ImagePlan {
        let source = image_file_name(reference)
            .map(|name| (self.transient_dir().join(&name), name))
            .filter(|(path, _)| path.is_file());

        match source {
            Some((source, name)) => ImagePlan::Copy {
                source,
                target: format!("{target_prefix}{name}"),
            },
            None => {
                warn!(
                    "Image '{}' not found in {}; keeping the original reference",
                    reference,
                    self.transient_dir().display()
                );
                ImagePlan::Keep(reference.to_string())
            }
        }
    }

    fn copy_planned(plan: &ImagePlan, folder: &Path) -> StoryResult<()> {
        if let ImagePlan::Copy { source, target } = plan {
            let destination = folder.join(target);
            fs::copy(source, &destination).map_err(|err| StoryError::io(source, err))?;
        }
        Ok(())
    }

    fn plan_story(&self, cover_image_ref: &str, chapters: &[ChapterInput]) -> StoryPlan {
        StoryPlan {
            cover: self.plan_image(cover_image_ref, "cover_"),
            chapters: chapters
                .iter()
                .enumerate()
                .map(|(index, chapter)| {
                    self.plan_image(&chapter.image_ref, &format!("chap_{}_", index + 1))
                })
                .collect(),
        }
    }

    fn materialize(
        &self,
        title: &str,
        chapters: &[ChapterInput],
        plan: &StoryPlan,
    ) -> StoryResult<SavedStory> {
        let id = story_folder_name(title);
        fs::create_dir_all(self.stories_dir())
            .map_err(|err| StoryError::io(self.stories_dir(), err))?;
        let folder = self.stories_dir().join(&id);
        fs::create_dir(&folder).map_err(|err| StoryError::io(&folder, err))?;

        Self::copy_planned(&plan.cover, &folder)?;
        for chapter_plan in &plan.chapters {
            Self::copy_planned(chapter_plan, &folder)?;
        }

        let viewer_path = folder.join(VIEWER_FILE);
        fs::write(&viewer_path, self.template.as_bytes())
            .map_err(|err| StoryError::io(&viewer_path, err))?;

        let manifest = StoryManifest {
            title: title.to_string(),
            cover_image: plan.cover.stored_reference().to_string(),
            chapters: chapters
                .iter()
                .zip(&plan.chapters)
                .map(|(chapter, chapter_plan)| ManifestChapter {
                    text: chapter.text.clone(),
                    image: chapter_plan.stored_reference().to_string(),
                })
                .collect(),
            id: id.clone(),
        };
        let manifest_path = folder.join(MANIFEST_FILE);
        let encoded = serde_json::to_vec_pretty(&manifest)
            .map_err(|err| StoryError::json(&manifest_path, err))?;
        write_atomically(&manifest_path, &encoded)?;

        let path = folder
            .canonicalize()
            .map_err(|err| StoryError::io(&folder, err))?;
        info!("Saved story '{}' to {}", title, path.display());
        Ok(SavedStory { id, path })
    }

    /// Persists a finished story into a fresh folder.
    ///
    /// Every image reference is resolved before anything is written. Images
    /// are copied (never moved) out of the transient store. The manifest is
    /// written last, so a folder left behind by a failed copy is never listed.
    pub fn save_story(
        &self,
        title: &str,
        cover_image_ref: &str,
        chapters: &[ChapterInput],
    ) -> StoryResult<SavedStory> {
        let plan = self.plan_story(cover_image_ref, chapters);
        self.materialize(title, chapters, &plan)
    }
}
