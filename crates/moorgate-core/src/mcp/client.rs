//! Authenticated MCP client over the rmcp SDK

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use rmcp::{
    model::{
        CallToolRequestParams, CallToolResult, ClientCapabilities, ClientInfo, Implementation,
        Tool,
    },
    service::{RunningService, ServiceError},
    RoleClient, ServiceExt,
};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::logging::Logger;
use crate::registry::CLIENT_NAME;

/// MCP client errors
#[derive(Error, Debug)]
pub enum McpError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    /// `code` is the JSON-RPC error code when the provider returned one
    #[error("Tool call failed: {message}")]
    ToolCallFailed {
        message: String,
        code: Option<i32>,
    },

    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl McpError {
    /// Whether this failure is the provider reporting that its server-side
    /// session is gone, which the cache recovers from with one reconnect.
    /// Keyed on the JSON-RPC error code 404; the message fallback covers
    /// providers that only report the loss in text.
    pub fn is_session_expired(&self) -> bool {
        match self {
            McpError::ToolCallFailed {
                code: Some(404), ..
            } => true,
            McpError::ToolCallFailed { message, .. } | McpError::Protocol(message) => {
                message.contains("Session not found") || message.contains("session not found")
            }
            _ => false,
        }
    }

    /// Whether the provider rejected the call for rate limiting
    pub fn is_rate_limited(&self) -> bool {
        matches!(
            self,
            McpError::ToolCallFailed {
                code: Some(429),
                ..
            }
        )
    }
}

pub type McpResult<T> = Result<T, McpError>;

fn tool_call_error(e: ServiceError) -> McpError {
    match e {
        ServiceError::McpError(data) => McpError::ToolCallFailed {
            code: Some(data.code.0),
            message: data.message.to_string(),
        },
        other => McpError::ToolCallFailed {
            message: other.to_string(),
            code: None,
        },
    }
}

/// One live connection to an integration provider
///
/// The cache drives connections through this trait so provider behavior can
/// be scripted in tests without a live server.
#[async_trait]
pub trait ProviderConnection: Send + Sync {
    async fn list_tools(&self) -> McpResult<Vec<Tool>>;
    async fn call_tool(&self, name: &str, arguments: Value) -> McpResult<CallToolResult>;
    async fn close(&self) -> McpResult<()>;
}

/// Opens authenticated provider connections
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        endpoint: &str,
        access_token: &str,
    ) -> McpResult<Arc<dyn ProviderConnection>>;
}

/// A live, authenticated connection to one integration provider
///
/// One handle serves all tool calls for its (session, provider) pair; it is
/// never shared across sessions because the bearer token is baked into the
/// transport.
pub struct McpClient {
    // None once closed
    service: Mutex<Option<RunningService<RoleClient, ClientInfo>>>,
    logger: Arc<dyn Logger>,
}

impl McpClient {
    /// Connect to an MCP endpoint over streamable HTTP with a bearer token
    pub async fn connect(
        endpoint: &str,
        access_token: &str,
        logger: Arc<dyn Logger>,
    ) -> McpResult<Self> {
        use rmcp::transport::streamable_http_client::StreamableHttpClientTransportConfig;
        use rmcp::transport::StreamableHttpClientTransport;

        logger.info(&format!("[McpClient] Connecting to {}", endpoint));

        let mut bearer = HeaderValue::from_str(&format!("Bearer {}", access_token))
            .map_err(|e| McpError::ConnectionFailed(format!("invalid access token: {}", e)))?;
        bearer.set_sensitive(true);
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, bearer);

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| McpError::ConnectionFailed(e.to_string()))?;

        let transport = StreamableHttpClientTransport::<reqwest::Client>::with_client(
            http,
            StreamableHttpClientTransportConfig::with_uri(endpoint.to_string()),
        );

        let client_info = ClientInfo {
            meta: None,
            protocol_version: Default::default(),
            capabilities: ClientCapabilities::default(),
            client_info: Implementation {
                name: "moorgate-core".to_string(),
                title: Some(CLIENT_NAME.to_string()),
                version: env!("CARGO_PKG_VERSION").to_string(),
                website_url: None,
                icons: None,
            },
        };

        let service = client_info
            .serve(transport)
            .await
            .map_err(|e| McpError::InitializationFailed(e.to_string()))?;

        logger.info("[McpClient] Connected and initialized successfully");

        Ok(Self {
            service: Mutex::new(Some(service)),
            logger,
        })
    }
}

#[async_trait]
impl ProviderConnection for McpClient {
    /// List all tools the provider exposes
    async fn list_tools(&self) -> McpResult<Vec<Tool>> {
        let guard = self.service.lock().await;
        let service = guard
            .as_ref()
            .ok_or_else(|| McpError::Protocol("connection closed".to_string()))?;

        let result = service
            .list_tools(Default::default())
            .await
            .map_err(|e| McpError::Protocol(e.to_string()))?;

        self.logger
            .debug(&format!("[McpClient] Listed {} tools", result.tools.len()));

        Ok(result.tools)
    }

    /// Call a tool by name
    async fn call_tool(&self, name: &str, arguments: Value) -> McpResult<CallToolResult> {
        self.logger
            .debug(&format!("[McpClient] Calling tool: {}", name));

        let params = CallToolRequestParams {
            meta: None,
            name: name.to_owned().into(),
            arguments: arguments.as_object().cloned(),
            task: None,
        };

        let guard = self.service.lock().await;
        let service = guard
            .as_ref()
            .ok_or_else(|| McpError::Protocol("connection closed".to_string()))?;

        service.call_tool(params).await.map_err(tool_call_error)
    }

    /// Close the connection; idempotent
    async fn close(&self) -> McpResult<()> {
        let taken = self.service.lock().await.take();
        if let Some(service) = taken {
            self.logger.debug("[McpClient] Closing connection");
            service
                .cancel()
                .await
                .map_err(|e| McpError::Protocol(e.to_string()))?;
        }
        Ok(())
    }
}

/// Connector backed by real rmcp connections
pub struct McpConnector {
    logger: Arc<dyn Logger>,
}

impl McpConnector {
    pub fn new(logger: Arc<dyn Logger>) -> Self {
        Self { logger }
    }
}

#[async_trait]
impl Connector for McpConnector {
    async fn connect(
        &self,
        endpoint: &str,
        access_token: &str,
    ) -> McpResult<Arc<dyn ProviderConnection>> {
        let client = McpClient::connect(endpoint, access_token, Arc::clone(&self.logger)).await?;
        Ok(Arc::new(client))
    }
}
