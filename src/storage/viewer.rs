use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::{StoryError, StoryResult};
use crate::storage::{StoryManifest, StoryStore, VIEWER_FILE};

pub const INJECTION_MARKER: &str = "// __STORY_DATA_INJECTION__";

pub const DEFAULT_TEMPLATE: &str = include_str!("../../assets/viewer_template.html");

pub fn load_template(path: Option<&Path>) -> String {
    let Some(path) = path else {
        return DEFAULT_TEMPLATE.to_string();
    };
    match fs::read_to_string(path) {
        Ok(template) if template.contains(INJECTION_MARKER) => template,
        Ok(_) => {
            warn!(
                "Viewer template {} has no injection marker; using the built-in template",
                path.display()
            );
            DEFAULT_TEMPLATE.to_string()
        }
        Err(err) => {
            warn!(
                "Failed to read viewer template {}: {}; using the built-in template",
                path.display(),
                err
            );
            DEFAULT_TEMPLATE.to_string()
        }
    }
}

fn bare_reference(reference: &str) -> String {
    if reference.contains("://") {
        return reference.to_string();
    }
    reference
        .rsplit('/')
        .next()
        .unwrap_or(reference)
        .to_string()
}

/// Manifest as seen by a viewer opened straight from disk: every local image
/// reference is a filename next to `index.html`.
pub fn standalone_manifest(manifest: &StoryManifest) -> StoryManifest {
    let mut standalone = manifest.clone();
    standalone.cover_image = bare_reference(&standalone.cover_image);
    for chapter in &mut standalone.chapters {
        chapter.image = bare_reference(&chapter.image);
    }
    standalone
}

/// Replaces the marker with `window.embeddedStory = {...};`.
pub fn inject_manifest(template: &str, manifest: &StoryManifest) -> StoryResult<String> {
    if !template.contains(INJECTION_MARKER) {
        return Err(StoryError::Template(format!(
            "missing marker '{INJECTION_MARKER}'"
        )));
    }
    let encoded = serde_json::to_string(&standalone_manifest(manifest))
        .map_err(|err| StoryError::Template(err.to_string()))?
        // Keeps chapter text from closing the surrounding <script>.
        .replace("</", "<\\/");
    Ok(template.replacen(
        INJECTION_MARKER,
        &format!("window.embeddedStory = {encoded};"),
        1,
    ))
}

impl StoryStore {
    /// Rewrites a story's `index.html` with its manifest embedded, so the
    /// folder opens without a server.
    pub fn export_standalone(&self, id: &str) -> StoryResult<PathBuf> {
        let folder = self.story_folder(id)?;
        let manifest = self.read_manifest(&folder)?;
        let html = inject_manifest(&self.template, &manifest)?;
        let path = folder.join(VIEWER_FILE);
        fs::write(&path, html).map_err(|err| StoryError::io(&path, err))?;
        info!("Exported standalone viewer for {}", id);
        Ok(path)
    }

    /// Exports every listed story; failures are logged and skipped.
    pub fn export_all(&self) -> usize {
        let ids: Vec<String> = self.list_stories().map(|summary| summary.id).collect();
        let mut exported = 0;
        for id in ids {
            match self.export_standalone(&id) {
                Ok(_) => exported += 1,
                Err(err) => warn!("Failed to export {}: {}", id, err),
            }
        }
        info!("Exported {} standalone stories", exported);
        exported
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{ManifestChapter, MANIFEST_FILE};
    use tempfile::TempDir;

    fn manifest() -> StoryManifest {
        StoryManifest {
            title: "Épica".to_string(),
            cover_image: "/stories/Epica_1/cover_a.png".to_string(),
            chapters: vec![
                ManifestChapter {
                    text: "Ela disse </script> e sorriu".to_string(),
                    image: "chap_1_b.png".to_string(),
                },
                ManifestChapter {
                    text: "fim".to_string(),
                    image: "https://placehold.co/600x400".to_string(),
                },
            ],
            id: "Epica_1".to_string(),
        }
    }

    #[test]
    fn built_in_template_carries_the_marker() {
        assert!(DEFAULT_TEMPLATE.contains(INJECTION_MARKER));
        assert_eq!(load_template(None), DEFAULT_TEMPLATE);
        assert_eq!(
            load_template(Some(Path::new("/definitely/not/here.html"))),
            DEFAULT_TEMPLATE
        );
    }

    #[test]
    fn standalone_manifest_uses_bare_local_filenames() {
        let standalone = standalone_manifest(&manifest());
        assert_eq!(standalone.cover_image, "cover_a.png");
        assert_eq!(standalone.chapters[0].image, "chap_1_b.png");
        assert_eq!(standalone.chapters[1].image, "https://placehold.co/600x400");
    }

    #[test]
    fn injection_embeds_parseable_manifest() {
        let html = inject_manifest("<script>// __STORY_DATA_INJECTION__</script>", &manifest())
            .expect("injected");
        assert!(!html.contains(INJECTION_MARKER));
        assert!(!html.contains("</script> e sorriu"));

        let json = html
            .strip_prefix("<script>window.embeddedStory = ")
            .and_then(|rest| rest.strip_suffix(";</script>"))
            .expect("embedded json");
        let parsed: StoryManifest =
            serde_json::from_str(&json.replace("<\\/", "</")).expect("manifest json");
        assert_eq!(parsed.title, "Épica");
        assert_eq!(parsed.cover_image, "cover_a.png");
    }

    #[test]
    fn template_without_marker_is_rejected() {
        assert!(matches!(
            inject_manifest("<html></html>", &manifest()),
            Err(StoryError::Template(_))
        ));
    }

    #[test]
    fn export_rewrites_saved_viewer() {
        let root = TempDir::new().expect("temp dir");
        let transient = root.path().join("tmp");
        fs::create_dir_all(&transient).expect("transient");
        fs::write(transient.join("c.png"), b"c").expect("seed");
        let store = StoryStore::new(root.path().join("stories"), &transient);
        let saved = store
            .save_story("Offline", "/images/c.png", &[])
            .expect("saved");

        let served = fs::read_to_string(saved.path.join(VIEWER_FILE)).expect("viewer");
        assert!(served.contains(INJECTION_MARKER));

        let path = store.export_standalone(&saved.id).expect("exported");
        let exported = fs::read_to_string(path).expect("viewer");
        assert!(exported.contains("window.embeddedStory = {"));
        assert!(exported.contains("\"cover_image\":\"cover_c.png\""));
        assert!(saved.path.join(MANIFEST_FILE).is_file());

        let broken = store.stories_dir().join("Broken_1");
        fs::create_dir_all(&broken).expect("broken");
        fs::write(broken.join(MANIFEST_FILE), "[]").expect("broken manifest");
        assert_eq!(store.export_all(), 1);
    }
}
