//! MCP (Model Context Protocol) client module
//!
//! Uses the official rmcp SDK over the streamable HTTP transport, with the
//! session's bearer token attached to every request. `ClientCache` owns the
//! live handles per (session, provider) pair and the reconnect policy for
//! provider-side session loss.

mod cache;
mod client;

pub use cache::ClientCache;
pub use client::{Connector, McpClient, McpConnector, McpError, McpResult, ProviderConnection};

// Re-export rmcp types that consumers might need
pub use rmcp::model::{CallToolResult as McpToolResult, Tool as McpTool};
