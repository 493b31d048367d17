pub mod gemini;
pub mod media;

pub use gemini::{ContentProvider, GeminiClient};
pub use media::ReferenceImage;

#[cfg(test)]
pub mod testing;
