//! Core types for conversation transcripts and tool calling

mod message;
mod tool;

pub use message::{ChatMessage, ContentPart, MessageRole};
pub use tool::{ToolCall, ToolDefinition, ToolResult};
