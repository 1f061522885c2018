//! Tool dispatch
//!
//! Routes model tool calls either to the built-in integration tools or to
//! the MCP provider that owns the tool, and turns a missing token into an
//! authorization prompt instead of an error.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Value};

use crate::error::{Error, Result};
use crate::logging::Logger;
use crate::mcp::ClientCache;
use crate::oauth::OAuthBroker;
use crate::registry::ProviderRegistry;
use crate::session::SessionStore;
use crate::tools::catalog::{
    builtin_tools, CatalogTool, ToolCatalog, ToolSource, CONNECT_INTEGRATION, LIST_INTEGRATIONS,
};

/// Connection state of one provider for one session
#[derive(Debug, Clone, Serialize)]
pub struct IntegrationStatus {
    pub id: String,
    pub name: String,
    pub connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in_secs: Option<u64>,
}

/// Result of dispatching one tool call
#[derive(Debug, Clone)]
pub enum DispatchOutcome {
    /// The tool ran; its output goes back to the model as a tool result
    Value(Value),
    /// The tool needs the user to authorize a provider first
    OAuthRequired {
        provider_id: String,
        auth_url: String,
        message: String,
    },
}

/// Routes tool calls for one registry of providers
pub struct ToolDispatcher {
    registry: Arc<ProviderRegistry>,
    sessions: Arc<SessionStore>,
    cache: Arc<ClientCache>,
    oauth: Arc<OAuthBroker>,
    logger: Arc<dyn Logger>,
}

impl ToolDispatcher {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        sessions: Arc<SessionStore>,
        cache: Arc<ClientCache>,
        oauth: Arc<OAuthBroker>,
        logger: Arc<dyn Logger>,
    ) -> Self {
        Self {
            registry,
            sessions,
            cache,
            oauth,
            logger,
        }
    }

    /// Connection status of every registered provider for this session
    pub fn status(&self, session_id: &str) -> Vec<IntegrationStatus> {
        self.registry
            .iter()
            .map(|provider| {
                let token = self.sessions.token(session_id, &provider.id);
                IntegrationStatus {
                    id: provider.id.clone(),
                    name: provider.name.clone(),
                    connected: token.is_some(),
                    expires_in_secs: token.and_then(|t| t.expires_in_secs()),
                }
            })
            .collect()
    }

    /// Build the session's tool catalog
    ///
    /// Built-in tools always appear. Provider tools appear only for
    /// providers with a valid token; a provider that fails to list its
    /// tools contributes nothing rather than failing the whole catalog.
    pub async fn catalog(&self, session_id: &str) -> ToolCatalog {
        let mut tools = builtin_tools(&self.registry);

        for provider_id in self.sessions.valid_providers(session_id) {
            match self.cache.list_tools(session_id, &provider_id).await {
                Ok(provider_tools) => {
                    self.logger.info(&format!(
                        "[ToolDispatcher] {} tools from {}",
                        provider_tools.len(),
                        provider_id
                    ));
                    tools.extend(
                        provider_tools
                            .into_iter()
                            .map(|t| CatalogTool::from_mcp(t, &provider_id)),
                    );
                }
                Err(e) => {
                    self.logger.error(&format!(
                        "[ToolDispatcher] Error getting tools from {}: {}",
                        provider_id, e
                    ));
                }
            }
        }

        ToolCatalog::new(tools)
    }

    /// Execute one tool call against the session's catalog
    pub async fn dispatch(
        &self,
        session_id: &str,
        catalog: &ToolCatalog,
        name: &str,
        arguments: Value,
    ) -> Result<DispatchOutcome> {
        match name {
            LIST_INTEGRATIONS => self.list_integrations(session_id),
            CONNECT_INTEGRATION => self.connect_integration(session_id, &arguments).await,
            _ => match catalog.find(name).map(|t| t.source.clone()) {
                Some(ToolSource::Provider { provider_id }) => {
                    self.call_provider_tool(session_id, &provider_id, name, arguments)
                        .await
                }
                Some(ToolSource::BuiltIn) | None => Err(Error::UnknownTool(name.to_string())),
            },
        }
    }

    fn list_integrations(&self, session_id: &str) -> Result<DispatchOutcome> {
        let status = self.status(session_id);
        let connected: Vec<&str> = status
            .iter()
            .filter(|s| s.connected)
            .map(|s| s.name.as_str())
            .collect();

        let message = if connected.is_empty() {
            let available: Vec<&str> = status.iter().map(|s| s.name.as_str()).collect();
            format!("No integrations connected. Available: {}", available.join(", "))
        } else {
            format!("Connected integrations: {}", connected.join(", "))
        };

        Ok(DispatchOutcome::Value(json!({
            "integrations": status,
            "message": message,
        })))
    }

    async fn connect_integration(
        &self,
        session_id: &str,
        arguments: &Value,
    ) -> Result<DispatchOutcome> {
        let integration = arguments
            .get("integration")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                Error::ToolExecution("connect_integration requires an integration".to_string())
            })?;
        let region = arguments.get("region").and_then(Value::as_str);

        let request = self.oauth.initiate(session_id, integration, region).await?;
        let provider_name = self
            .registry
            .get(integration)
            .map(|p| p.name.clone())
            .unwrap_or_else(|| integration.to_string());

        Ok(DispatchOutcome::OAuthRequired {
            provider_id: request.provider_id,
            message: format!(
                "Please click the link to authenticate with {}: {}",
                provider_name, request.auth_url
            ),
            auth_url: request.auth_url,
        })
    }

    async fn call_provider_tool(
        &self,
        session_id: &str,
        provider_id: &str,
        name: &str,
        arguments: Value,
    ) -> Result<DispatchOutcome> {
        match self
            .cache
            .call_tool(session_id, provider_id, name, arguments)
            .await
        {
            Ok(result) => Ok(DispatchOutcome::Value(serde_json::to_value(result)?)),
            // Token disappeared between catalog and call; prompt instead
            // of surfacing an internal error to the model.
            Err(Error::NotAuthenticated(_)) => {
                let request = self.oauth.initiate(session_id, provider_id, None).await?;
                let provider_name = self
                    .registry
                    .get(provider_id)
                    .map(|p| p.name.clone())
                    .unwrap_or_else(|| provider_id.to_string());
                Ok(DispatchOutcome::OAuthRequired {
                    provider_id: request.provider_id,
                    message: format!(
                        "Please click the link to authenticate with {}: {}",
                        provider_name, request.auth_url
                    ),
                    auth_url: request.auth_url,
                })
            }
            Err(e) => Err(e),
        }
    }
}
