//! Anthropic Messages API client

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::error::{ModelError, ModelResult};
use super::traits::{ModelClient, ModelRequest, ModelResponse};
use crate::logging::Logger;

pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
pub const DEFAULT_MAX_TOKENS: u32 = 1024;

const API_BASE: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";

/// Chat completion backend over the Anthropic Messages API
pub struct AnthropicModel {
    http: reqwest::Client,
    api_key: String,
    api_base: String,
    logger: Arc<dyn Logger>,
}

impl AnthropicModel {
    pub fn new(api_key: impl Into<String>, logger: Arc<dyn Logger>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.into(),
            api_base: API_BASE.to_string(),
            logger,
        }
    }

    /// Read the API key from `ANTHROPIC_API_KEY`
    pub fn from_env(logger: Arc<dyn Logger>) -> ModelResult<Self> {
        let api_key = std::env::var("ANTHROPIC_API_KEY").map_err(|_| ModelError::MissingApiKey)?;
        Ok(Self::new(api_key, logger))
    }

    /// Point at a different API base, for proxies
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into();
        self
    }

    fn request_body(request: &ModelRequest) -> Value {
        let mut body = json!({
            "model": request.model,
            "max_tokens": request.max_tokens,
            "messages": request.messages,
        });
        if let Some(ref system) = request.system {
            body["system"] = json!(system);
        }
        if !request.tools.is_empty() {
            body["tools"] = json!(request.tools);
        }
        body
    }

    fn error_message(body: &str) -> String {
        serde_json::from_str::<Value>(body)
            .ok()
            .and_then(|v| {
                v.pointer("/error/message")
                    .and_then(Value::as_str)
                    .map(String::from)
            })
            .unwrap_or_else(|| body.to_string())
    }
}

#[async_trait]
impl ModelClient for AnthropicModel {
    async fn complete(&self, request: &ModelRequest) -> ModelResult<ModelResponse> {
        self.logger.debug(&format!(
            "[AnthropicModel] {} turns, {} tools",
            request.messages.len(),
            request.tools.len()
        ));

        let response = self
            .http
            .post(format!("{}/v1/messages", self.api_base))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&Self::request_body(request))
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 429 {
            let retry_after_secs = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::RateLimited {
                retry_after_secs,
                message: Self::error_message(&body),
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            self.logger.error(&format!(
                "[AnthropicModel] API error {}: {}",
                status, body
            ));
            return Err(ModelError::Api {
                status: status.as_u16(),
                message: Self::error_message(&body),
            });
        }

        let parsed: ModelResponse = response.json().await?;
        Ok(parsed)
    }
}
