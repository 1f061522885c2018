//! Tool catalog and dispatch
//!
//! Two built-in tools let the model inspect and connect integrations;
//! everything else in the catalog is a provider tool routed to the MCP
//! connection that owns it.

mod catalog;
mod dispatch;

pub use catalog::{
    builtin_tools, CatalogTool, ToolCatalog, ToolSource, CONNECT_INTEGRATION, LIST_INTEGRATIONS,
};
pub use dispatch::{DispatchOutcome, IntegrationStatus, ToolDispatcher};
