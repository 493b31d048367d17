use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::debug;
use uuid::Uuid;

use crate::config::{normalize_url_prefix, Config};
use crate::error::{StoryError, StoryResult};
use crate::llm::media::extension_for_mime;
use crate::story::types::GeneratedImage;

/// Flat directory of freshly generated images, exposed under a URL prefix.
/// Files are only ever added here; saving a story copies them out.
#[derive(Debug, Clone)]
pub struct TransientImageStore {
    dir: PathBuf,
    url_prefix: String,
}

impl TransientImageStore {
    pub fn new(dir: impl Into<PathBuf>, url_prefix: &str) -> Self {
        Self {
            dir: dir.into(),
            url_prefix: normalize_url_prefix(url_prefix),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.transient_images_dir, &config.images_url_prefix)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Writes the image under a random name and returns its served reference.
    pub async fn put(&self, image: &GeneratedImage) -> StoryResult<String> {
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|err| StoryError::io(&self.dir, err))?;

        let file_name = format!("{}.{}", Uuid::new_v4(), extension_for_mime(&image.mime_type));
        let path = self.dir.join(&file_name);
        fs::write(&path, &image.bytes)
            .await
            .map_err(|err| StoryError::io(&path, err))?;
        debug!(
            "Stored transient image {} ({} bytes, {} at {})",
            path.display(),
            image.bytes.len(),
            image.aspect_ratio,
            image.image_size
        );

        Ok(format!("{}/{}", self.url_prefix, file_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::materializer::image_file_name;
    use tempfile::TempDir;

    fn image(mime_type: &str) -> GeneratedImage {
        GeneratedImage {
            bytes: b"pixels".to_vec(),
            mime_type: mime_type.to_string(),
            aspect_ratio: "2:3".to_string(),
            image_size: "2K".to_string(),
        }
    }

    #[tokio::test]
    async fn put_returns_served_reference_to_a_new_file() {
        let root = TempDir::new().expect("temp dir");
        let store = TransientImageStore::new(root.path().join("images"), "images/");

        let first = store.put(&image("image/png")).await.expect("stored");
        let second = store.put(&image("image/jpeg")).await.expect("stored");

        assert_ne!(first, second);
        assert!(first.starts_with("/images/") && first.ends_with(".png"));
        assert!(second.ends_with(".jpg"));
        let name = image_file_name(&first).expect("file name");
        assert_eq!(
            std::fs::read(store.dir().join(name)).expect("written"),
            b"pixels"
        );
    }
}
