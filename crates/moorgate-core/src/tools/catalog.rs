//! Per-session tool catalog
//!
//! The catalog merges the two built-in integration tools with every tool
//! exposed by the providers the session holds a valid token for. It is
//! built once per agent run and consulted for dispatch routing.

use serde_json::json;

use crate::mcp::McpTool;
use crate::registry::ProviderRegistry;
use crate::types::ToolDefinition;

pub const LIST_INTEGRATIONS: &str = "list_integrations";
pub const CONNECT_INTEGRATION: &str = "connect_integration";

/// Where a catalog entry came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolSource {
    BuiltIn,
    Provider { provider_id: String },
}

/// A tool definition plus its routing source
#[derive(Debug, Clone)]
pub struct CatalogTool {
    pub definition: ToolDefinition,
    pub source: ToolSource,
}

impl CatalogTool {
    pub fn builtin(definition: ToolDefinition) -> Self {
        Self {
            definition,
            source: ToolSource::BuiltIn,
        }
    }

    pub fn provider(definition: ToolDefinition, provider_id: &str) -> Self {
        Self {
            definition,
            source: ToolSource::Provider {
                provider_id: provider_id.to_string(),
            },
        }
    }

    pub fn from_mcp(tool: McpTool, provider_id: &str) -> Self {
        let definition = ToolDefinition::new(
            tool.name.to_string(),
            tool.description.as_deref().unwrap_or_default(),
        )
        .with_schema(serde_json::to_value(tool.input_schema.as_ref()).unwrap_or_default());
        Self::provider(definition, provider_id)
    }
}

/// The full set of tools offered to the model for one run
#[derive(Debug, Clone, Default)]
pub struct ToolCatalog {
    tools: Vec<CatalogTool>,
}

impl ToolCatalog {
    pub fn new(tools: Vec<CatalogTool>) -> Self {
        Self { tools }
    }

    /// Definitions in catalog order, for the model request
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.definition.clone()).collect()
    }

    pub fn find(&self, name: &str) -> Option<&CatalogTool> {
        self.tools.iter().find(|t| t.definition.name == name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// The two integration-management tools every session gets
pub fn builtin_tools(registry: &ProviderRegistry) -> Vec<CatalogTool> {
    let list = ToolDefinition::new(
        LIST_INTEGRATIONS,
        "List available MCP integrations and their connection status",
    );

    let connect = ToolDefinition::new(
        CONNECT_INTEGRATION,
        "Connect to an MCP integration like Mixpanel or Jira. Returns an OAuth URL \
         the user must visit to authenticate.",
    )
    .with_schema(json!({
        "type": "object",
        "properties": {
            "integration": {
                "type": "string",
                "description": "The integration to connect to (e.g., \"mixpanel\", \"jira\")",
                "enum": registry.ids(),
            },
            "region": {
                "type": "string",
                "description": "The region for the integration, when it has more than one",
                "enum": registry.regions(),
            },
        },
        "required": ["integration"],
    }));

    vec![CatalogTool::builtin(list), CatalogTool::builtin(connect)]
}
