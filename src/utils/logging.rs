use std::fs;
use std::path::Path;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::filter::{LevelFilter, Targets};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

use crate::config::CONFIG;

pub const TIMING_TARGET: &str = "storybook.timing";

/// Keeps the background log writers alive; drop it last.
pub struct LoggingGuards {
    _guards: Vec<WorkerGuard>,
}

fn parse_log_level(value: &str) -> LevelFilter {
    match value.trim().to_lowercase().as_str() {
        "trace" => LevelFilter::TRACE,
        "debug" => LevelFilter::DEBUG,
        "info" => LevelFilter::INFO,
        "warn" | "warning" => LevelFilter::WARN,
        "error" => LevelFilter::ERROR,
        "off" => LevelFilter::OFF,
        _ => LevelFilter::INFO,
    }
}

fn story_filter(level: LevelFilter) -> Targets {
    Targets::new()
        .with_default(level)
        .with_target(TIMING_TARGET, LevelFilter::OFF)
        .with_target("hyper", LevelFilter::WARN)
        .with_target("hyper_util", LevelFilter::WARN)
        .with_target("reqwest", LevelFilter::WARN)
}

fn timing_filter() -> Targets {
    Targets::new()
        .with_default(LevelFilter::OFF)
        .with_target(TIMING_TARGET, LevelFilter::INFO)
}

/// Daily rolling `<stem>.log` and `<stem>.jsonl` writers.
struct RollingPair {
    text: NonBlocking,
    json: NonBlocking,
}

fn rolling_pair(dir: &Path, stem: &str, guards: &mut Vec<WorkerGuard>) -> RollingPair {
    let mut open = |extension: &str| {
        let appender = tracing_appender::rolling::daily(dir, format!("{stem}.{extension}"));
        let (writer, guard) = tracing_appender::non_blocking(appender);
        guards.push(guard);
        writer
    };
    RollingPair {
        text: open("log"),
        json: open("jsonl"),
    }
}

/// Human-readable logs go to stderr; stdout carries command output only.
/// Story events and provider timings land in separate file pairs under
/// `LOG_DIR`.
pub fn init_logging() -> LoggingGuards {
    let logs_dir = CONFIG.log_dir.as_path();
    if let Err(err) = fs::create_dir_all(logs_dir) {
        eprintln!("Failed to create logs directory: {err}");
    }

    let mut guards = Vec::with_capacity(4);
    let story = rolling_pair(logs_dir, "storybook", &mut guards);
    let timing = rolling_pair(logs_dir, "timing", &mut guards);
    let level = parse_log_level(&CONFIG.log_level);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(story_filter(level)),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(story.text)
                .with_ansi(false)
                .with_filter(story_filter(level)),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(story.json)
                .with_filter(story_filter(level)),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(timing.text)
                .with_ansi(false)
                .with_filter(timing_filter()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(timing.json)
                .with_filter(timing_filter()),
        )
        .init();

    LoggingGuards { _guards: guards }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::Level;

    #[test]
    fn unknown_level_defaults_to_info() {
        assert_eq!(parse_log_level("WARNING"), LevelFilter::WARN);
        assert_eq!(parse_log_level("verbose"), LevelFilter::INFO);
    }

    #[test]
    fn timing_events_are_split_from_story_events() {
        let story = story_filter(LevelFilter::DEBUG);
        assert!(story.would_enable("storybook_forge::pipeline", &Level::DEBUG));
        assert!(!story.would_enable(TIMING_TARGET, &Level::INFO));
        assert!(!story.would_enable("reqwest::connect", &Level::INFO));

        let timing = timing_filter();
        assert!(timing.would_enable(TIMING_TARGET, &Level::INFO));
        assert!(!timing.would_enable("storybook_forge::pipeline", &Level::ERROR));
    }
}
