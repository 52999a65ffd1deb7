use anyhow::Result;
use std::sync::Arc;

use super::{ChatTurn, LlmProvider, LlmRequest, LlmResponse, Part};

/// Multi-turn chat bound to one provider and one system instruction.
///
/// History only grows when a call succeeds, so a failed turn can be retried
/// without leaving a dangling user message behind.
pub struct Conversation {
    provider: Arc<dyn LlmProvider>,
    system_instruction: Option<String>,
    history: Vec<ChatTurn>,
    max_tokens: Option<usize>,
    temperature: Option<f32>,
}

impl Conversation {
    pub fn new(provider: Arc<dyn LlmProvider>, system_instruction: Option<String>) -> Self {
        Self {
            provider,
            system_instruction,
            history: Vec::new(),
            max_tokens: None,
            temperature: None,
        }
    }

    pub fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: Option<usize>) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Send one user turn and record the exchange.
    pub async fn send(&mut self, parts: Vec<Part>) -> Result<LlmResponse> {
        let user_turn = ChatTurn::user(parts);

        let mut turns = self.history.clone();
        turns.push(user_turn.clone());

        let request = LlmRequest {
            system_instruction: self.system_instruction.clone(),
            turns,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            timeout_seconds: None,
        };

        let response = self.provider.generate(request).await?;

        self.history.push(user_turn);
        self.history.push(ChatTurn::model(response.content.clone()));
        Ok(response)
    }

    pub fn history(&self) -> &[ChatTurn] {
        &self.history
    }

    pub fn system_instruction(&self) -> Option<&str> {
        self.system_instruction.as_deref()
    }

    pub fn model(&self) -> &str {
        self.provider.model()
    }
}
