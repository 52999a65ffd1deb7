use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use super::{
    ChatTurn, Grounding, GroundingSource, LlmProvider, LlmRequest, LlmResponse, Part, Role,
    UsageMetadata,
};

/// Remote LLM provider using OpenAI-compatible HTTP API
pub struct RemoteLlmProvider {
    base_url: String,
    api_key: String,
    model: String,
    web_search: bool,
    default_timeout: Duration,
    default_max_tokens: Option<usize>,
    default_temperature: Option<f32>,
    client: reqwest::Client,
}

impl RemoteLlmProvider {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            web_search: false,
            default_timeout: Duration::from_secs(60),
            default_max_tokens: None,
            default_temperature: None,
            client: reqwest::Client::new(),
        }
    }

    pub fn with_defaults(
        mut self,
        timeout_secs: u64,
        max_tokens: Option<usize>,
        temperature: Option<f32>,
    ) -> Self {
        self.default_timeout = Duration::from_secs(timeout_secs);
        self.default_max_tokens = max_tokens;
        self.default_temperature = temperature;
        self
    }

    /// Ask search-capable models to ground their answer (`web_search_options`)
    pub fn with_web_search(mut self, enabled: bool) -> Self {
        self.web_search = enabled;
        self
    }

    fn build_body(&self, request: &LlmRequest) -> OpenAiRequest {
        let mut messages = Vec::with_capacity(request.turns.len() + 1);
        if let Some(system) = &request.system_instruction {
            messages.push(Message {
                role: "system".to_string(),
                content: MessageContent::Text(system.clone()),
            });
        }
        messages.extend(request.turns.iter().map(to_message));

        OpenAiRequest {
            model: self.model.clone(),
            messages,
            max_tokens: request.max_tokens.or(self.default_max_tokens),
            temperature: request.temperature.or(self.default_temperature),
            web_search_options: self.web_search.then(|| serde_json::json!({})),
        }
    }
}

fn to_message(turn: &ChatTurn) -> Message {
    let role = match turn.role {
        Role::User => "user",
        Role::Model => "assistant",
    };

    // Plain strings keep text-only endpoints happy; images need the part list.
    let content = if turn.parts.iter().all(|p| p.as_text().is_some()) {
        MessageContent::Text(turn.text())
    } else {
        MessageContent::Parts(
            turn.parts
                .iter()
                .map(|part| match part {
                    Part::Text(text) => ContentPart::Text { text: text.clone() },
                    Part::Image { mime_type, data } => ContentPart::ImageUrl {
                        image_url: ImageUrl {
                            url: format!("data:{};base64,{}", mime_type, data),
                        },
                    },
                })
                .collect(),
        )
    };

    Message {
        role: role.to_string(),
        content,
    }
}

/// Collect `url_citation` annotations. Anything that does not look like one is skipped.
fn citations(annotations: &[Value]) -> Option<Grounding> {
    let sources: Vec<GroundingSource> = annotations
        .iter()
        .filter(|a| a.get("type").and_then(Value::as_str) == Some("url_citation"))
        .filter_map(|a| {
            let citation = a.get("url_citation")?;
            Some(GroundingSource {
                uri: citation.get("url")?.as_str()?.to_string(),
                title: citation
                    .get("title")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            })
        })
        .collect();

    (!sources.is_empty()).then(|| Grounding {
        rendered_content: None,
        sources,
    })
}

#[async_trait::async_trait]
impl LlmProvider for RemoteLlmProvider {
    async fn generate(&self, request: LlmRequest) -> Result<LlmResponse> {
        let timeout = request
            .timeout_seconds
            .map(Duration::from_secs)
            .unwrap_or(self.default_timeout);

        let req_body = self.build_body(&request);

        // Make HTTP request with timeout
        let response = tokio::time::timeout(
            timeout,
            self.client
                .post(&self.base_url)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("Content-Type", "application/json")
                .json(&req_body)
                .send(),
        )
        .await
        .context("LLM request timed out")?
        .context("LLM HTTP request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("LLM API error {}: {}", status, body);
        }

        let resp_body: OpenAiResponse = response
            .json()
            .await
            .context("Failed to parse LLM response")?;

        let choice = resp_body
            .choices
            .into_iter()
            .next()
            .context("LLM response has no choices")?;

        let content = choice.message.content.unwrap_or_default();
        if content.is_empty() {
            anyhow::bail!("LLM returned an empty answer");
        }

        let usage = resp_body
            .usage
            .map(|u| UsageMetadata {
                prompt_tokens: u.prompt_tokens.unwrap_or(0),
                completion_tokens: u.completion_tokens.unwrap_or(0),
                total_tokens: u.total_tokens.unwrap_or(0),
            })
            .unwrap_or_default();

        Ok(LlmResponse {
            content,
            usage,
            model: resp_body.model.unwrap_or_else(|| self.model.clone()),
            grounding: choice.message.annotations.as_deref().and_then(citations),
        })
    }

    fn model(&self) -> &str {
        &self.model
    }
}

// OpenAI API request/response structures
#[derive(Debug, Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    web_search_options: Option<Value>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: MessageContent,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    model: Option<String>,
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    #[serde(default)]
    annotations: Option<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: Option<usize>,
    #[serde(default)]
    completion_tokens: Option<usize>,
    #[serde(default)]
    total_tokens: Option<usize>,
}
