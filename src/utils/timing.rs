use std::time::Instant;

use chrono::Utc;
use serde_json::Value as JsonValue;
use tracing::info;

/// Wraps one provider call with `storybook.timing` request/response events.
pub async fn log_llm_timing<T, E, F, Fut>(
    provider: &str,
    model: &str,
    operation: &str,
    metadata: Option<JsonValue>,
    call: F,
) -> Result<T, E>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
{
    let started_at = Utc::now();
    let started_perf = Instant::now();
    let metadata_text = metadata
        .as_ref()
        .map(|value| value.to_string())
        .unwrap_or_else(|| "{}".to_string());
    info!(
        target: "storybook.timing",
        "event=llm_request provider={} model={} operation={} started_at={} metadata={}",
        provider,
        model,
        operation,
        started_at.to_rfc3339(),
        metadata_text
    );

    let result = call().await;
    let status = if result.is_ok() { "success" } else { "error" };

    let completed_at = Utc::now();
    let duration = started_perf.elapsed().as_secs_f64();
    info!(
        target: "storybook.timing",
        "event=llm_response provider={} model={} operation={} completed_at={} duration_s={:.3} status={} metadata={}",
        provider,
        model,
        operation,
        completed_at.to_rfc3339(),
        duration,
        status,
        metadata_text
    );

    result
}

/// Times a whole pipeline stage (story text, one illustration, the save).
#[derive(Debug)]
pub struct StageTimer {
    stage: String,
    started_perf: Instant,
}

impl StageTimer {
    pub fn start(stage: impl Into<String>) -> Self {
        let stage = stage.into();
        info!(
            target: "storybook.timing",
            "event=stage_started stage={} started_at={}",
            stage,
            Utc::now().to_rfc3339()
        );
        StageTimer {
            stage,
            started_perf: Instant::now(),
        }
    }

    pub fn finish(self, status: &str) {
        info!(
            target: "storybook.timing",
            "event=stage_completed stage={} completed_at={} duration_s={:.3} status={}",
            self.stage,
            Utc::now().to_rfc3339(),
            self.started_perf.elapsed().as_secs_f64(),
            status
        );
    }
}
