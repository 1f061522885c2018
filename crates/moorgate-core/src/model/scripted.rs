//! Scripted model for testing
//!
//! Replays a fixed sequence of responses without network dependencies and
//! records every request it receives for later assertions.

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::error::{ModelError, ModelResult};
use super::traits::{ModelClient, ModelRequest, ModelResponse, StopReason};
use crate::types::ContentPart;

pub struct ScriptedModel {
    responses: Mutex<VecDeque<ModelResponse>>,
    requests: Mutex<Vec<ModelRequest>>,
}

impl ScriptedModel {
    pub fn new(responses: Vec<ModelResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// A model that answers every request with one fixed text turn
    pub fn text(reply: impl Into<String>) -> Self {
        Self::new(vec![ModelResponse {
            content: vec![ContentPart::text(reply)],
            stop_reason: StopReason::EndTurn,
        }])
    }

    /// Requests received so far, in order
    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().clone()
    }

    pub fn remaining(&self) -> usize {
        self.responses.lock().len()
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    async fn complete(&self, request: &ModelRequest) -> ModelResult<ModelResponse> {
        self.requests.lock().push(request.clone());
        self.responses.lock().pop_front().ok_or(ModelError::Api {
            status: 500,
            message: "scripted responses exhausted".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChatMessage;

    fn request() -> ModelRequest {
        ModelRequest {
            model: "test".to_string(),
            max_tokens: 64,
            system: None,
            messages: vec![ChatMessage::user("hello")],
            tools: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_replays_in_order_and_records_requests() {
        let model = ScriptedModel::new(vec![
            ModelResponse {
                content: vec![ContentPart::text("first")],
                stop_reason: StopReason::EndTurn,
            },
            ModelResponse {
                content: vec![ContentPart::text("second")],
                stop_reason: StopReason::EndTurn,
            },
        ]);

        assert_eq!(model.complete(&request()).await.unwrap().text(), "first");
        assert_eq!(model.complete(&request()).await.unwrap().text(), "second");
        assert!(model.complete(&request()).await.is_err());
        assert_eq!(model.requests().len(), 3);
    }
}
