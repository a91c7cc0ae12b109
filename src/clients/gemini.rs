//! Gemini 适配器
//!
//! POST `{endpoint}/models/{model}:generateContent`，密钥放在 `x-goog-api-key` 头，
//! 文本位于 `candidates[0].content.parts[0].text`。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{read_json, transport_error, Provider, GENERATION_TEMPERATURE};
use crate::error::ProviderError;
use crate::models::ProviderDescriptor;
use crate::services::prompt_builder::SYSTEM_MESSAGE;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    system_instruction: Content<'a>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    parts: Vec<RequestPart<'a>>,
}

#[derive(Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    max_output_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

impl GenerateContentResponse {
    /// 拼接第一个候选的所有文本片段
    pub(crate) fn text(&self) -> Option<String> {
        let parts = &self.candidates.first()?.content.as_ref()?.parts;
        let text: String = parts.iter().filter_map(|p| p.text.as_deref()).collect();
        let text = text.trim();
        (!text.is_empty()).then(|| text.to_string())
    }
}

/// Gemini 客户端
pub struct GeminiClient {
    descriptor: ProviderDescriptor,
    api_key: String,
    http: reqwest::Client,
}

impl GeminiClient {
    pub fn new(descriptor: ProviderDescriptor, api_key: impl Into<String>) -> Self {
        Self {
            descriptor,
            api_key: api_key.into(),
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Provider for GeminiClient {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    async fn generate(&self, prompt: &str, max_tokens: u32) -> Result<String, ProviderError> {
        let name = &self.descriptor.name;
        let url = format!(
            "{}/models/{}:generateContent",
            self.descriptor.endpoint.trim_end_matches('/'),
            self.descriptor.model
        );
        debug!("调用 {}，模型: {}", name, self.descriptor.model);

        let body = GenerateContentRequest {
            contents: vec![Content {
                role: Some("user"),
                parts: vec![RequestPart { text: prompt }],
            }],
            system_instruction: Content {
                role: None,
                parts: vec![RequestPart { text: SYSTEM_MESSAGE }],
            },
            generation_config: GenerationConfig {
                max_output_tokens: max_tokens,
                temperature: GENERATION_TEMPERATURE,
            },
        };

        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(name, e))?;

        let parsed: GenerateContentResponse = read_json(name, response).await?;
        parsed.text().ok_or_else(|| super::empty_response(name, 200))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_text_from_candidates() {
        let raw = r#"{"candidates": [{"content": {"parts": [{"text": "[{\"question\": "}, {"text": "\"Q?\"}]"}], "role": "model"}}]}"#;
        let parsed: GenerateContentResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.text().as_deref(), Some(r#"[{"question": "Q?"}]"#));
    }

    #[test]
    fn test_blocked_response_has_no_text() {
        let parsed: GenerateContentResponse =
            serde_json::from_str(r#"{"promptFeedback": {"blockReason": "SAFETY"}}"#).unwrap();
        assert_eq!(parsed.text(), None);
    }
}
