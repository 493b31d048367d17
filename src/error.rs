use std::path::PathBuf;

use reqwest::StatusCode;

#[derive(Debug, thiserror::Error)]
pub enum StoryError {
    #[error("GEMINI_API_KEY is not configured")]
    MissingApiKey,

    #[error("Invalid generation request: {0}")]
    InvalidRequest(String),

    #[error("Gemini request failed: {0}")]
    Transport(String),

    #[error("Gemini request failed with status {status}: {message}")]
    Provider { status: StatusCode, message: String },

    #[error("Empty response from Gemini (model: {model})")]
    EmptyResponse { model: String },

    #[error("Story response does not match the schema: {0}")]
    SchemaViolation(String),

    #[error("No images returned by Gemini (model: {model})")]
    NoImage { model: String },

    #[error("Viewer template error: {0}")]
    Template(String),

    #[error("Image task failed: {0}")]
    Task(String),

    #[error("Story not found: {0}")]
    NotFound(String),

    #[error("I/O error at '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid JSON at '{}': {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl StoryError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoryError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        StoryError::Json {
            path: path.into(),
            source,
        }
    }

    /// Failures worth another provider attempt. Configuration and request
    /// errors never are.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoryError::Transport(_)
                | StoryError::Provider { .. }
                | StoryError::EmptyResponse { .. }
                | StoryError::NoImage { .. }
        )
    }
}

pub type StoryResult<T> = Result<T, StoryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_and_schema_errors_are_not_retryable() {
        assert!(!StoryError::MissingApiKey.is_retryable());
        assert!(!StoryError::SchemaViolation("parts".into()).is_retryable());
        assert!(StoryError::NoImage {
            model: "m".into()
        }
        .is_retryable());
        assert!(StoryError::Provider {
            status: StatusCode::SERVICE_UNAVAILABLE,
            message: "overloaded".into()
        }
        .is_retryable());
    }
}
