pub mod illustrator;
pub mod types;
pub mod writer;

pub use illustrator::Illustrator;
pub use types::{GenerationRequest, Story, CHAPTER_COUNT};
pub use writer::StoryWriter;
