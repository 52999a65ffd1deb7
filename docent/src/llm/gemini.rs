use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use super::{
    ChatTurn, Grounding, GroundingSource, LlmProvider, LlmRequest, LlmResponse, Part, Role,
    UsageMetadata,
};

pub const DEFAULT_GEMINI_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Gemini provider using the `generateContent` REST endpoint, grounded with Google Search
pub struct GeminiProvider {
    base_url: String,
    api_key: String,
    model: String,
    google_search: bool,
    default_timeout: Duration,
    default_max_tokens: Option<u32>,
    default_temperature: Option<f32>,
    client: reqwest::Client,
}

impl GeminiProvider {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
            google_search: true,
            default_timeout: Duration::from_secs(60),
            default_max_tokens: None,
            default_temperature: None,
            client: reqwest::Client::new(),
        }
    }

    pub fn with_defaults(
        mut self,
        timeout_secs: u64,
        max_tokens: Option<u32>,
        temperature: Option<f32>,
    ) -> Self {
        self.default_timeout = Duration::from_secs(timeout_secs);
        self.default_max_tokens = max_tokens;
        self.default_temperature = temperature;
        self
    }

    /// Toggle the Google Search tool (on by default)
    pub fn with_google_search(mut self, enabled: bool) -> Self {
        self.google_search = enabled;
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.base_url, self.model)
    }

    fn build_body(&self, request: &LlmRequest) -> GenerateContentRequest {
        let tools = if self.google_search {
            vec![Tool {
                google_search: GoogleSearch {},
            }]
        } else {
            Vec::new()
        };

        GenerateContentRequest {
            contents: request.turns.iter().map(to_content).collect(),
            system_instruction: request.system_instruction.as_ref().map(|text| Content {
                role: None,
                parts: vec![ApiPart {
                    text: Some(text.clone()),
                    inline_data: None,
                }],
            }),
            tools,
            generation_config: GenerationConfig {
                response_modalities: vec!["TEXT".to_string()],
                max_output_tokens: request
                    .max_tokens
                    .map(|n| n as u32)
                    .or(self.default_max_tokens),
                temperature: request.temperature.or(self.default_temperature),
            },
        }
    }
}

fn to_content(turn: &ChatTurn) -> Content {
    let role = match turn.role {
        Role::User => "user",
        Role::Model => "model",
    };
    Content {
        role: Some(role.to_string()),
        parts: turn
            .parts
            .iter()
            .map(|part| match part {
                Part::Text(text) => ApiPart {
                    text: Some(text.clone()),
                    inline_data: None,
                },
                Part::Image { mime_type, data } => ApiPart {
                    text: None,
                    inline_data: Some(Blob {
                        mime_type: mime_type.clone(),
                        data: data.clone(),
                    }),
                },
            })
            .collect(),
    }
}

/// Pull citation material out of a candidate's `groundingMetadata`.
///
/// Lenient by construction: any missing or oddly shaped piece is skipped, and
/// `None` is returned when nothing usable remains.
pub fn extract_grounding(metadata: &Value) -> Option<Grounding> {
    let rendered_content = metadata
        .pointer("/searchEntryPoint/renderedContent")
        .and_then(Value::as_str)
        .map(str::to_string);

    let sources = metadata
        .get("groundingChunks")
        .and_then(Value::as_array)
        .map(|chunks| {
            chunks
                .iter()
                .filter_map(|chunk| {
                    let web = chunk.get("web")?;
                    Some(GroundingSource {
                        uri: web.get("uri")?.as_str()?.to_string(),
                        title: web.get("title").and_then(Value::as_str).map(str::to_string),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    let grounding = Grounding {
        rendered_content,
        sources,
    };
    (!grounding.is_empty()).then_some(grounding)
}

#[async_trait::async_trait]
impl LlmProvider for GeminiProvider {
    async fn generate(&self, request: LlmRequest) -> Result<LlmResponse> {
        let timeout = request
            .timeout_seconds
            .map(Duration::from_secs)
            .unwrap_or(self.default_timeout);

        let body = self.build_body(&request);

        let response = tokio::time::timeout(
            timeout,
            self.client
                .post(self.endpoint())
                .header("x-goog-api-key", &self.api_key)
                .header("Content-Type", "application/json")
                .json(&body)
                .send(),
        )
        .await
        .context("LLM request timed out")?
        .context("LLM HTTP request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Gemini API error {}: {}", status, body);
        }

        let resp_body: GenerateContentResponse = response
            .json()
            .await
            .context("Failed to parse Gemini response")?;

        let Some(candidate) = resp_body.candidates.into_iter().next() else {
            anyhow::bail!(
                "Gemini response has no candidates (prompt feedback: {})",
                resp_body
                    .prompt_feedback
                    .map(|f| f.to_string())
                    .unwrap_or_else(|| "none".to_string())
            );
        };

        let content = candidate
            .content
            .map(|c| {
                c.parts
                    .into_iter()
                    .filter(|p| !p.thought.unwrap_or(false))
                    .filter_map(|p| p.text)
                    .collect::<String>()
            })
            .unwrap_or_default();

        if content.is_empty() {
            anyhow::bail!(
                "Gemini returned an empty answer (finish reason: {})",
                candidate.finish_reason.as_deref().unwrap_or("unknown")
            );
        }

        let grounding = candidate
            .grounding_metadata
            .as_ref()
            .and_then(extract_grounding);
        debug!(
            model = %self.model,
            grounded = grounding.is_some(),
            "Gemini answer received"
        );

        let usage = resp_body
            .usage_metadata
            .map(|u| UsageMetadata {
                prompt_tokens: u.prompt_token_count.unwrap_or(0),
                completion_tokens: u.candidates_token_count.unwrap_or(0),
                total_tokens: u.total_token_count.unwrap_or(0),
            })
            .unwrap_or_default();

        Ok(LlmResponse {
            content,
            usage,
            model: resp_body.model_version.unwrap_or_else(|| self.model.clone()),
            grounding,
        })
    }

    fn model(&self) -> &str {
        &self.model
    }
}

// Gemini API request/response structures
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Tool>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    parts: Vec<ApiPart>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiPart {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    inline_data: Option<Blob>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Blob {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Tool {
    google_search: GoogleSearch,
}

#[derive(Debug, Serialize)]
struct GoogleSearch {}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_modalities: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    usage_metadata: Option<ResponseUsage>,
    model_version: Option<String>,
    prompt_feedback: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
    grounding_metadata: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
    thought: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponseUsage {
    prompt_token_count: Option<usize>,
    candidates_token_count: Option<usize>,
    total_token_count: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn grounding_from_full_metadata() {
        let metadata = json!({
            "searchEntryPoint": { "renderedContent": "<div class=\"chip\">Vermeer</div>" },
            "groundingChunks": [
                { "web": { "uri": "https://example.org/a", "title": "example.org" } },
                { "retrievedContext": { "uri": "ignored" } },
                { "web": { "uri": "https://example.org/b" } }
            ],
            "webSearchQueries": ["Vermeer milkmaid"]
        });

        let grounding = extract_grounding(&metadata).expect("grounding");
        assert_eq!(
            grounding.rendered_content.as_deref(),
            Some("<div class=\"chip\">Vermeer</div>")
        );
        assert_eq!(grounding.sources.len(), 2);
        assert_eq!(grounding.sources[0].title.as_deref(), Some("example.org"));
        assert_eq!(grounding.sources[1].title, None);
    }

    #[test]
    fn malformed_grounding_is_ignored() {
        assert!(extract_grounding(&json!({})).is_none());
        assert!(extract_grounding(&json!(null)).is_none());
        assert!(extract_grounding(&json!({ "searchEntryPoint": 42 })).is_none());
        assert!(extract_grounding(&json!({ "searchEntryPoint": { "renderedContent": "  " } })).is_none());
        assert!(extract_grounding(&json!({ "groundingChunks": "nope" })).is_none());
    }

    #[test]
    fn request_body_carries_search_tool_and_image() {
        let provider = GeminiProvider::new(DEFAULT_GEMINI_URL, "key", "gemini-2.0-flash-001");
        let request = LlmRequest {
            system_instruction: Some("You are a docent.".to_string()),
            turns: vec![ChatTurn::user(vec![
                Part::text("Look at this"),
                Part::Image {
                    mime_type: "image/jpeg".to_string(),
                    data: "aGVsbG8=".to_string(),
                },
            ])],
            ..Default::default()
        };

        let body = serde_json::to_value(provider.build_body(&request)).unwrap();
        assert_eq!(body["tools"], json!([{ "googleSearch": {} }]));
        assert_eq!(body["generationConfig"]["responseModalities"], json!(["TEXT"]));
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "You are a docent.");
        assert_eq!(body["contents"][0]["role"], "user");
        assert_eq!(body["contents"][0]["parts"][1]["inlineData"]["mimeType"], "image/jpeg");
        assert!(body["generationConfig"].get("maxOutputTokens").is_none());

        let without_search = provider.with_google_search(false);
        let body = serde_json::to_value(without_search.build_body(&request)).unwrap();
        assert!(body.get("tools").is_none());
    }
}
