//! Model client abstraction and the Anthropic Messages implementation

mod anthropic;
mod error;
mod scripted;
mod traits;

pub use anthropic::{AnthropicModel, DEFAULT_MAX_TOKENS, DEFAULT_MODEL};
pub use error::{ModelError, ModelResult};
pub use scripted::ScriptedModel;
pub use traits::{ModelClient, ModelRequest, ModelResponse, StopReason};
