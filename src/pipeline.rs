use std::sync::Arc;

use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{error, info};

use crate::error::{StoryError, StoryResult};
use crate::llm::media::ReferenceImage;
use crate::storage::{ChapterInput, SavedStory, StoryStore, TransientImageStore};
use crate::story::{GenerationRequest, Illustrator, Story, StoryWriter, CHAPTER_COUNT};
use crate::utils::timing::StageTimer;

#[derive(Debug, Clone, Serialize)]
pub struct PipelineOutcome {
    pub story: Story,
    pub cover_image: String,
    pub chapter_images: Vec<String>,
    pub saved: SavedStory,
}

/// Text, then the cover and every chapter image concurrently, then one save.
#[derive(Clone)]
pub struct StoryPipeline {
    writer: StoryWriter,
    illustrator: Illustrator,
    images: TransientImageStore,
    store: StoryStore,
    aspect_ratio: String,
}

fn slot_label(slot: usize) -> String {
    if slot == 0 {
        "cover".to_string()
    } else {
        format!("chapter_{slot}")
    }
}

impl StoryPipeline {
    pub fn new(
        writer: StoryWriter,
        illustrator: Illustrator,
        images: TransientImageStore,
        store: StoryStore,
        aspect_ratio: impl Into<String>,
    ) -> Self {
        Self {
            writer,
            illustrator,
            images,
            store,
            aspect_ratio: aspect_ratio.into(),
        }
    }

    async fn illustrate(
        &self,
        story: &Story,
        request: &GenerationRequest,
    ) -> StoryResult<Vec<String>> {
        let references: Arc<[ReferenceImage]> = request.images.clone().into();
        let prompts = std::iter::once(story.cover_prompt.clone()).chain(
            story
                .chapters
                .iter()
                .map(|chapter| chapter.image_prompt.clone()),
        );

        let mut tasks = JoinSet::new();
        for (slot, prompt) in prompts.enumerate() {
            let illustrator = self.illustrator.clone();
            let images = self.images.clone();
            let references = Arc::clone(&references);
            let person_name = request.name.clone();
            let universe = request.universe.clone();
            let aspect_ratio = self.aspect_ratio.clone();
            tasks.spawn(async move {
                let timer = StageTimer::start(slot_label(slot));
                let result = async {
                    let image = illustrator
                        .generate_image(&prompt, &references, &person_name, &universe, &aspect_ratio)
                        .await?;
                    images.put(&image).await
                }
                .await;
                timer.finish(if result.is_ok() { "success" } else { "error" });
                result.map(|reference| (slot, reference))
            });
        }

        let mut references = vec![String::new(); CHAPTER_COUNT + 1];
        while let Some(joined) = tasks.join_next().await {
            let (slot, reference) = joined.map_err(|err| StoryError::Task(err.to_string()))??;
            info!("Illustrated {} -> {}", slot_label(slot), reference);
            references[slot] = reference;
        }
        Ok(references)
    }

    pub async fn run(&self, request: GenerationRequest) -> StoryResult<PipelineOutcome> {
        let timer = StageTimer::start("story_text");
        let story = self.writer.generate_story(&request).await;
        timer.finish(if story.is_ok() { "success" } else { "error" });
        let story = story?;

        let mut references = self.illustrate(&story, &request).await.inspect_err(|err| {
            error!("Illustrating '{}' failed: {}", story.title, err);
        })?;
        let chapter_images = references.split_off(1);
        let cover_image = references.remove(0);

        let chapters: Vec<ChapterInput> = story
            .chapters
            .iter()
            .zip(&chapter_images)
            .map(|(chapter, image_ref)| ChapterInput {
                text: chapter.text.clone(),
                image_ref: image_ref.clone(),
            })
            .collect();

        let timer = StageTimer::start("save_story");
        let store = self.store.clone();
        let title = story.title.clone();
        let cover = cover_image.clone();
        let saved = tokio::task::spawn_blocking(move || store.save_story(&title, &cover, &chapters))
            .await
            .map_err(|err| StoryError::Task(err.to_string()))
            .and_then(|result| result);
        timer.finish(if saved.is_ok() { "success" } else { "error" });

        Ok(PipelineOutcome {
            story,
            cover_image,
            chapter_images,
            saved: saved?,
        })
    }
}
