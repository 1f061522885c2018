//! Moorgate Core
//!
//! Session-scoped OAuth broker and MCP orchestration for an agentic chat
//! backend. A `SessionStore` holds per-session tokens and pending
//! authorization flows, an `OAuthBroker` runs PKCE connect flows against
//! MCP providers, a `ClientCache` maintains authenticated MCP connections,
//! and a `ChatEngine` drives the model's tool-calling loop over them.
//!
//! ```rust,ignore
//! use moorgate_core::{
//!     agent::ChatEngine, mcp::ClientCache, model::AnthropicModel,
//!     oauth::OAuthBroker, registry::ProviderRegistry,
//!     session::SessionStore, tools::ToolDispatcher,
//! };
//!
//! let registry = Arc::new(ProviderRegistry::builtin());
//! let sessions = Arc::new(SessionStore::new());
//! let broker = Arc::new(OAuthBroker::new(registry.clone(), sessions.clone(), logger.clone()));
//! let cache = Arc::new(ClientCache::new(registry.clone(), sessions.clone(), logger.clone()));
//! let dispatcher = Arc::new(ToolDispatcher::new(
//!     registry.clone(), sessions, cache, broker.clone(), logger.clone(),
//! ));
//! let engine = ChatEngine::new(Arc::new(AnthropicModel::from_env(logger.clone())?), dispatcher, logger);
//!
//! let outcome = engine.run(&session_id, "what's in Mixpanel?", prior).await?;
//! ```

pub mod agent;
pub mod callback;
pub mod error;
pub mod logging;
pub mod mcp;
pub mod model;
pub mod oauth;
pub mod registry;
pub mod session;
pub mod tools;
pub mod types;

// Re-export commonly used types
pub use types::{ChatMessage, ContentPart, MessageRole, ToolCall, ToolDefinition, ToolResult};

pub use error::{Error, Result};

pub use logging::{ConsoleLogger, Logger, NoOpLogger};

pub use registry::{ProviderConfig, ProviderRegistry};

pub use session::{OAuthFlowContext, SessionStore, TokenRecord};

pub use oauth::{AuthorizationRequest, CompletedAuthorization, OAuthBroker};

pub use mcp::{ClientCache, Connector, McpClient, McpError, McpResult, ProviderConnection};

pub use model::{AnthropicModel, ModelClient, ModelError, ScriptedModel};

pub use tools::{DispatchOutcome, IntegrationStatus, ToolCatalog, ToolDispatcher};

pub use agent::{ChatEngine, ChatOutcome, PendingAuthorization};
