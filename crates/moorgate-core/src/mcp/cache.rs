//! Per-session cache of live MCP connections

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::logging::Logger;
use crate::mcp::client::{Connector, McpConnector, ProviderConnection};
use crate::registry::ProviderRegistry;
use crate::session::SessionStore;

use rmcp::model::{CallToolResult, Tool};

/// Caches one live MCP connection per (session, provider) pair
///
/// Connections are created lazily on first use and reused until the session
/// disconnects or the provider drops its server-side session. All tool
/// traffic goes through `list_tools` and `call_tool`, which apply the
/// single-reconnect retry on a provider session expiry.
pub struct ClientCache {
    registry: Arc<ProviderRegistry>,
    sessions: Arc<SessionStore>,
    connector: Arc<dyn Connector>,
    clients: RwLock<HashMap<(String, String), Arc<dyn ProviderConnection>>>,
    logger: Arc<dyn Logger>,
}

impl ClientCache {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        sessions: Arc<SessionStore>,
        logger: Arc<dyn Logger>,
    ) -> Self {
        let connector = Arc::new(McpConnector::new(Arc::clone(&logger)));
        Self::with_connector(registry, sessions, connector, logger)
    }

    /// Build the cache over a custom connector
    pub fn with_connector(
        registry: Arc<ProviderRegistry>,
        sessions: Arc<SessionStore>,
        connector: Arc<dyn Connector>,
        logger: Arc<dyn Logger>,
    ) -> Self {
        Self {
            registry,
            sessions,
            connector,
            clients: RwLock::new(HashMap::new()),
            logger,
        }
    }

    /// Whether a cached connection exists for this pair
    pub fn is_connected(&self, session_id: &str, provider_id: &str) -> bool {
        self.clients
            .read()
            .contains_key(&(session_id.to_string(), provider_id.to_string()))
    }

    /// Get the cached connection for this pair, connecting if needed
    ///
    /// Requires a valid stored token; returns `NotAuthenticated` otherwise.
    /// An absent region resolves to the provider's default endpoint, which
    /// is what the token was issued against when no region was chosen.
    pub async fn get(
        &self,
        session_id: &str,
        provider_id: &str,
        region: Option<&str>,
    ) -> Result<Arc<dyn ProviderConnection>> {
        let key = (session_id.to_string(), provider_id.to_string());

        if let Some(client) = self.clients.read().get(&key) {
            return Ok(Arc::clone(client));
        }

        let provider = self.registry.require(provider_id)?;
        let token = self
            .sessions
            .token(session_id, provider_id)
            .ok_or_else(|| Error::NotAuthenticated(provider_id.to_string()))?;

        let endpoint = provider.endpoint_for(region).to_string();

        let client = self.connector.connect(&endpoint, &token.access_token).await?;

        // Another task may have connected while we were; keep the first
        // one in and close our own handle.
        {
            let mut clients = self.clients.write();
            if let Some(existing) = clients.get(&key) {
                let existing = Arc::clone(existing);
                drop(clients);
                self.close_in_background(client, "duplicate");
                return Ok(existing);
            }
            clients.insert(key, Arc::clone(&client));
        }

        Ok(client)
    }

    /// Drop the cached connection and reconnect fresh
    pub async fn reconnect(
        &self,
        session_id: &str,
        provider_id: &str,
        region: Option<&str>,
    ) -> Result<Arc<dyn ProviderConnection>> {
        self.logger.info(&format!(
            "[ClientCache] Reconnecting to {} for session {}",
            provider_id, session_id
        ));
        self.evict(session_id, provider_id);
        self.get(session_id, provider_id, region).await
    }

    /// Close the cached connection and forget the session's token
    ///
    /// Idempotent; disconnecting a provider that was never connected only
    /// clears any stored token.
    pub fn disconnect(&self, session_id: &str, provider_id: &str) {
        self.evict(session_id, provider_id);
        self.sessions.remove_token(session_id, provider_id);
        self.logger.info(&format!(
            "[ClientCache] Disconnected {} for session {}",
            provider_id, session_id
        ));
    }

    fn evict(&self, session_id: &str, provider_id: &str) {
        let key = (session_id.to_string(), provider_id.to_string());
        let removed = self.clients.write().remove(&key);
        if let Some(client) = removed {
            self.close_in_background(client, "evicted");
        }
    }

    fn close_in_background(&self, client: Arc<dyn ProviderConnection>, what: &'static str) {
        let logger = Arc::clone(&self.logger);
        tokio::spawn(async move {
            if let Err(e) = client.close().await {
                logger.debug(&format!(
                    "[ClientCache] Error closing {} connection: {}",
                    what, e
                ));
            }
        });
    }

    /// List the provider's tools, retrying once on a provider session expiry
    pub async fn list_tools(&self, session_id: &str, provider_id: &str) -> Result<Vec<Tool>> {
        let client = self.get(session_id, provider_id, None).await?;
        match client.list_tools().await {
            Ok(tools) => Ok(tools),
            Err(e) if e.is_session_expired() => {
                self.logger.warn(&format!(
                    "[ClientCache] Provider session expired for {}, reconnecting",
                    provider_id
                ));
                let client = self.reconnect(session_id, provider_id, None).await?;
                match client.list_tools().await {
                    Ok(tools) => Ok(tools),
                    Err(e) if e.is_session_expired() => {
                        self.evict(session_id, provider_id);
                        Err(Error::ProviderSessionExpired(provider_id.to_string()))
                    }
                    Err(e) => Err(e.into()),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Call a provider tool, retrying once on a provider session expiry
    ///
    /// Provider-reported rate limits surface as `RateLimited` and are never
    /// retried here.
    pub async fn call_tool(
        &self,
        session_id: &str,
        provider_id: &str,
        name: &str,
        arguments: Value,
    ) -> Result<CallToolResult> {
        let client = self.get(session_id, provider_id, None).await?;
        match client.call_tool(name, arguments.clone()).await {
            Ok(result) => Ok(result),
            Err(e) if e.is_session_expired() => {
                self.logger.warn(&format!(
                    "[ClientCache] Provider session expired for {}, reconnecting",
                    provider_id
                ));
                let client = self.reconnect(session_id, provider_id, None).await?;
                match client.call_tool(name, arguments).await {
                    Ok(result) => Ok(result),
                    Err(e) if e.is_session_expired() => {
                        self.evict(session_id, provider_id);
                        Err(Error::ProviderSessionExpired(provider_id.to_string()))
                    }
                    Err(e) => Err(self.classify(provider_id, e)),
                }
            }
            Err(e) => Err(self.classify(provider_id, e)),
        }
    }

    fn classify(&self, provider_id: &str, e: crate::mcp::McpError) -> Error {
        if e.is_rate_limited() {
            Error::RateLimited {
                provider: provider_id.to_string(),
                // MCP errors carry no retry-after hint
                retry_after_secs: None,
            }
        } else {
            e.into()
        }
    }
}
