pub mod anthropic;

pub use anthropic::{InlineImage, LlmClient, LlmConfig, LlmError};
