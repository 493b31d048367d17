use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use dotenvy::dotenv;
use serde::Serialize;
use tracing::{error, info};

mod config;
mod error;
mod llm;
mod pipeline;
mod storage;
mod story;
mod utils;

use config::CONFIG;
use llm::{ContentProvider, GeminiClient, ReferenceImage};
use pipeline::StoryPipeline;
use storage::{StoryStore, TransientImageStore};
use story::{GenerationRequest, Illustrator, StoryWriter};
use utils::logging::init_logging;

#[derive(Debug, Clone, PartialEq, Eq)]
struct GenerateArgs {
    name: String,
    style: String,
    universe: String,
    genre: String,
    theme: Option<String>,
    photos: Vec<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ExportTarget {
    One(String),
    All,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Generate(GenerateArgs),
    List,
    Show(String),
    Export(ExportTarget),
    Help,
}

fn usage() -> &'static str {
    "Usage:
  storybook_forge generate --name <name> --style <style> --universe <universe> --genre <genre> [--theme <text>] --photo <path> [--photo <path>...]
  storybook_forge list
  storybook_forge show <story-id>
  storybook_forge export <story-id> | --all"
}

fn parse_generate_args(args: &[String]) -> anyhow::Result<GenerateArgs> {
    let mut name = None;
    let mut style = None;
    let mut universe = None;
    let mut genre = None;
    let mut theme = None;
    let mut photos = Vec::new();

    let mut index = 0;
    while index < args.len() {
        let flag = args[index].as_str();
        let slot = match flag {
            "--name" => &mut name,
            "--style" => &mut style,
            "--universe" => &mut universe,
            "--genre" => &mut genre,
            "--theme" => &mut theme,
            "--photo" => {
                index += 1;
                let value = args
                    .get(index)
                    .ok_or_else(|| anyhow!("Missing value for --photo"))?;
                photos.push(PathBuf::from(value));
                index += 1;
                continue;
            }
            other => {
                return Err(anyhow!(
                    "Unknown generate argument: {other}\n{}",
                    usage()
                ));
            }
        };
        index += 1;
        let value = args
            .get(index)
            .ok_or_else(|| anyhow!("Missing value for {flag}"))?;
        *slot = Some(value.clone());
        index += 1;
    }

    if photos.is_empty() {
        return Err(anyhow!("At least one --photo is required"));
    }

    Ok(GenerateArgs {
        name: name.ok_or_else(|| anyhow!("--name is required"))?,
        style: style.ok_or_else(|| anyhow!("--style is required"))?,
        universe: universe.ok_or_else(|| anyhow!("--universe is required"))?,
        genre: genre.ok_or_else(|| anyhow!("--genre is required"))?,
        theme,
        photos,
    })
}

fn parse_args(args: &[String]) -> anyhow::Result<Command> {
    let Some(command) = args.get(1) else {
        return Ok(Command::Help);
    };
    let rest = &args[2..];
    match command.as_str() {
        "generate" => Ok(Command::Generate(parse_generate_args(rest)?)),
        "list" => Ok(Command::List),
        "show" => rest
            .first()
            .map(|id| Command::Show(id.clone()))
            .ok_or_else(|| anyhow!("show requires a story id\n{}", usage())),
        "export" => match rest.first().map(String::as_str) {
            Some("--all") => Ok(Command::Export(ExportTarget::All)),
            Some(id) => Ok(Command::Export(ExportTarget::One(id.to_string()))),
            None => Err(anyhow!("export requires a story id or --all\n{}", usage())),
        },
        "help" | "--help" | "-h" => Ok(Command::Help),
        other => Err(anyhow!("Unknown command: {other}\n{}", usage())),
    }
}

async fn load_reference_images(paths: &[PathBuf]) -> anyhow::Result<Vec<ReferenceImage>> {
    let mut images = Vec::with_capacity(paths.len());
    for path in paths {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read photo {}", path.display()))?;
        images.push(ReferenceImage::from_bytes(bytes));
    }
    Ok(images)
}

fn build_pipeline() -> StoryPipeline {
    let provider: Arc<dyn ContentProvider> = Arc::new(GeminiClient::from_config(&CONFIG));
    let writer = StoryWriter::new(
        provider.clone(),
        CONFIG.gemini_text_model.clone(),
        CONFIG.story_language.clone(),
    );
    let illustrator = Illustrator::new(provider, CONFIG.gemini_image_model.clone())
        .with_image_size(CONFIG.image_size.clone())
        .with_retry(
            CONFIG.image_max_attempts,
            Duration::from_secs(CONFIG.image_retry_delay_seconds),
        );
    StoryPipeline::new(
        writer,
        illustrator,
        TransientImageStore::from_config(&CONFIG),
        StoryStore::from_config(&CONFIG),
        CONFIG.image_aspect_ratio.clone(),
    )
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(command: Command) -> anyhow::Result<()> {
    match command {
        Command::Help => println!("{}", usage()),
        Command::Generate(args) => {
            let request = GenerationRequest {
                name: args.name,
                style: args.style,
                universe: args.universe,
                genre: args.genre,
                description: args.theme,
                images: load_reference_images(&args.photos).await?,
            };
            info!(
                "Generating story for {} ({} photo(s))",
                request.name,
                request.images.len()
            );
            let outcome = build_pipeline().run(request).await?;
            print_json(&outcome.saved)?;
        }
        Command::List => {
            let stories: Vec<_> = StoryStore::from_config(&CONFIG).list_stories().collect();
            print_json(&stories)?;
        }
        Command::Show(id) => {
            let manifest = StoryStore::from_config(&CONFIG).get_story(&id)?;
            print_json(&manifest)?;
        }
        Command::Export(ExportTarget::One(id)) => {
            let path = StoryStore::from_config(&CONFIG).export_standalone(&id)?;
            println!("{}", path.display());
        }
        Command::Export(ExportTarget::All) => {
            let exported = StoryStore::from_config(&CONFIG).export_all();
            println!("Exported {exported} stories");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let _guards = init_logging();

    let args: Vec<String> = std::env::args().collect();
    let command = parse_args(&args)?;
    run(command).await.inspect_err(|err| error!("{err:#}"))
}
