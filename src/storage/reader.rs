use std::fs;
use std::path::Path;

use serde::Serialize;
use tracing::debug;

use crate::error::{StoryError, StoryResult};
use crate::storage::{is_plain_file_name, StoryManifest, StoryStore, MANIFEST_FILE};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StorySummary {
    pub id: String,
    pub title: String,
    pub cover: String,
}

impl StoryStore {
    /// Reads `story.json` from a story folder. The folder name wins over
    /// whatever `id` the file carries.
    pub(crate) fn read_manifest(&self, folder: &Path) -> StoryResult<StoryManifest> {
        let path = folder.join(MANIFEST_FILE);
        let raw = fs::read_to_string(&path).map_err(|err| StoryError::io(&path, err))?;
        let mut manifest: StoryManifest =
            serde_json::from_str(&raw).map_err(|err| StoryError::json(&path, err))?;
        if let Some(name) = folder.file_name().and_then(|name| name.to_str()) {
            manifest.id = name.to_string();
        }
        Ok(manifest)
    }

    /// Bare filenames present in the story folder become
    /// `<stories prefix>/<id>/<file>`. Anything else (a dangling reference,
    /// an external URL, a bare name that was never copied) is served as is.
    fn served_reference(&self, id: &str, reference: &str) -> String {
        let stored = is_plain_file_name(reference)
            && self.stories_dir().join(id).join(reference).is_file();
        if stored {
            format!("{}/{}/{}", self.stories_url_prefix, id, reference)
        } else {
            reference.to_string()
        }
    }

    pub(crate) fn story_folder(&self, id: &str) -> StoryResult<std::path::PathBuf> {
        if !is_plain_file_name(id) {
            return Err(StoryError::NotFound(id.to_string()));
        }
        let folder = self.stories_dir().join(id);
        if !folder.join(MANIFEST_FILE).is_file() {
            return Err(StoryError::NotFound(id.to_string()));
        }
        Ok(folder)
    }

    /// Lazily walks the stories root. Each call starts a fresh walk; folders
    /// without a readable manifest are skipped.
    pub fn list_stories(&self) -> impl Iterator<Item = StorySummary> + '_ {
        fs::read_dir(self.stories_dir())
            .inspect_err(|err| {
                debug!(
                    "Stories root {} is not readable: {}",
                    self.stories_dir().display(),
                    err
                )
            })
            .into_iter()
            .flatten()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().map(|kind| kind.is_dir()).unwrap_or(false))
            .filter_map(move |entry| match self.read_manifest(&entry.path()) {
                Ok(manifest) => Some(StorySummary {
                    cover: self.served_reference(&manifest.id, &manifest.cover_image),
                    id: manifest.id,
                    title: manifest.title,
                }),
                Err(err) => {
                    debug!("Skipping {}: {}", entry.path().display(), err);
                    None
                }
            })
    }

    /// Full manifest with every image reference rewritten for serving.
    pub fn get_story(&self, id: &str) -> StoryResult<StoryManifest> {
        let folder = self.story_folder(id)?;
        let mut manifest = self.read_manifest(&folder)?;
        manifest.cover_image = self.served_reference(&manifest.id, &manifest.cover_image);
        for chapter in &mut manifest.chapters {
            chapter.image = self.served_reference(&manifest.id, &chapter.image);
        }
        Ok(manifest)
    }
}
