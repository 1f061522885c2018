//! Chat engine
//!
//! Drives one request through the model and the tool dispatcher. Tool
//! rounds are capped so a misbehaving model cannot loop forever; every
//! tool failure is folded back into the transcript as an error-tagged
//! result so the model can recover in the same run.

use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::json;

use crate::error::Result;
use crate::logging::Logger;
use crate::model::{ModelClient, ModelRequest, StopReason, DEFAULT_MAX_TOKENS, DEFAULT_MODEL};
use crate::tools::{DispatchOutcome, ToolDispatcher};
use crate::types::{ChatMessage, ContentPart, MessageRole, ToolResult};

/// Engine tuning knobs
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub model: String,
    pub max_tokens: u32,
    /// Maximum tool rounds per run
    pub max_tool_rounds: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            max_tool_rounds: 10,
        }
    }
}

/// An authorization the user must finish in the browser
#[derive(Debug, Clone)]
pub struct PendingAuthorization {
    pub provider_id: String,
    pub auth_url: String,
    pub message: String,
}

/// Result of one engine run
#[derive(Debug, Clone)]
pub struct ChatOutcome {
    /// Final assistant text
    pub reply: String,
    /// Full updated transcript, for the caller to send back next turn
    pub transcript: Vec<ChatMessage>,
    /// Authorizations requested during the run, in order
    pub pending_authorizations: Vec<PendingAuthorization>,
}

/// The conversation loop over one model and one dispatcher
pub struct ChatEngine {
    model: Arc<dyn ModelClient>,
    dispatcher: Arc<ToolDispatcher>,
    // Operator-set override, global across sessions
    system_prompt: RwLock<Option<String>>,
    config: EngineConfig,
    logger: Arc<dyn Logger>,
}

impl ChatEngine {
    pub fn new(
        model: Arc<dyn ModelClient>,
        dispatcher: Arc<ToolDispatcher>,
        logger: Arc<dyn Logger>,
    ) -> Self {
        Self::with_config(model, dispatcher, EngineConfig::default(), logger)
    }

    pub fn with_config(
        model: Arc<dyn ModelClient>,
        dispatcher: Arc<ToolDispatcher>,
        config: EngineConfig,
        logger: Arc<dyn Logger>,
    ) -> Self {
        Self {
            model,
            dispatcher,
            system_prompt: RwLock::new(None),
            config,
            logger,
        }
    }

    /// Set or clear the global system-prompt override
    pub fn set_system_prompt(&self, prompt: Option<String>) {
        *self.system_prompt.write() = prompt;
    }

    pub fn system_prompt(&self) -> Option<String> {
        self.system_prompt.read().clone()
    }

    /// Run one user message through the loop
    pub async fn run(
        &self,
        session_id: &str,
        message: &str,
        prior: Vec<ChatMessage>,
    ) -> Result<ChatOutcome> {
        let catalog = self.dispatcher.catalog(session_id).await;
        self.logger.info(&format!(
            "[ChatEngine] Run for session {} with {} tools",
            session_id,
            catalog.len()
        ));

        let mut transcript = prior;
        transcript.push(ChatMessage::user(message));

        let system = self.build_system_prompt(session_id);
        let mut pending = Vec::new();
        let mut rounds = 0;

        loop {
            let request = ModelRequest {
                model: self.config.model.clone(),
                max_tokens: self.config.max_tokens,
                system: Some(system.clone()),
                messages: transcript.clone(),
                tools: catalog.definitions(),
            };

            let response = self.model.complete(&request).await?;
            let calls = response.tool_calls();

            if response.stop_reason != StopReason::ToolUse
                || calls.is_empty()
                || rounds >= self.config.max_tool_rounds
            {
                if rounds >= self.config.max_tool_rounds && !calls.is_empty() {
                    self.logger.warn(&format!(
                        "[ChatEngine] Tool round cap reached for session {}",
                        session_id
                    ));
                }
                let reply = response.text();
                transcript.push(ChatMessage::with_parts(
                    MessageRole::Assistant,
                    response.content,
                ));
                return Ok(ChatOutcome {
                    reply,
                    transcript,
                    pending_authorizations: pending,
                });
            }

            transcript.push(ChatMessage::with_parts(
                MessageRole::Assistant,
                response.content,
            ));

            let mut results: Vec<ContentPart> = Vec::with_capacity(calls.len());
            for call in &calls {
                let result = match self
                    .dispatcher
                    .dispatch(session_id, &catalog, &call.name, call.input.clone())
                    .await
                {
                    Ok(DispatchOutcome::Value(value)) => {
                        ToolResult::success(&call.id, value.to_string())
                    }
                    Ok(DispatchOutcome::OAuthRequired {
                        provider_id,
                        auth_url,
                        message,
                    }) => {
                        let payload = json!({
                            "action": "oauth_required",
                            "authUrl": auth_url,
                            "message": message,
                        });
                        pending.push(PendingAuthorization {
                            provider_id,
                            auth_url,
                            message,
                        });
                        ToolResult::success(&call.id, payload.to_string())
                    }
                    Err(e) => {
                        self.logger.error(&format!(
                            "[ChatEngine] Tool {} failed: {}",
                            call.name, e
                        ));
                        ToolResult::error(&call.id, format!("Error: {}", e))
                    }
                };
                results.push(result.into());
            }

            transcript.push(ChatMessage::with_parts(MessageRole::User, results));
            rounds += 1;
        }
    }

    fn build_system_prompt(&self, session_id: &str) -> String {
        let status = self.dispatcher.status(session_id);
        let mut lines: Vec<String> = vec![];

        if let Some(override_prompt) = self.system_prompt.read().clone() {
            lines.push(override_prompt);
            lines.push(String::new());
        }

        lines.push(
            "You can use MCP integrations to answer questions. Current status:".to_string(),
        );
        for entry in &status {
            lines.push(format!(
                "- {} ({}): {}",
                entry.name,
                entry.id,
                if entry.connected {
                    "connected"
                } else {
                    "not connected"
                }
            ));
        }
        lines.push(
            "Use connect_integration to get an authorization link when a user asks for data \
             from an integration that is not connected."
                .to_string(),
        );

        lines.join("\n")
    }
}
