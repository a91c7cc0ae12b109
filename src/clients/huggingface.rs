//! Hugging Face 推理接口适配器
//!
//! 排队型后端，模型冷启动时返回 503，由编排层重试。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{read_json, transport_error, Provider, GENERATION_TEMPERATURE};
use crate::error::ProviderError;
use crate::models::ProviderDescriptor;
use crate::services::prompt_builder::SYSTEM_MESSAGE;

#[derive(Serialize)]
struct InferenceRequest {
    inputs: String,
    parameters: InferenceParameters,
    options: InferenceOptions,
}

#[derive(Serialize)]
struct InferenceParameters {
    max_new_tokens: u32,
    temperature: f32,
    return_full_text: bool,
}

#[derive(Serialize)]
struct InferenceOptions {
    wait_for_model: bool,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum InferenceResponse {
    Batch(Vec<GeneratedText>),
    Single(GeneratedText),
}

#[derive(Debug, Deserialize)]
pub(crate) struct GeneratedText {
    generated_text: String,
}

impl InferenceResponse {
    pub(crate) fn text(&self) -> Option<String> {
        let text = match self {
            InferenceResponse::Batch(items) => items.first()?.generated_text.trim(),
            InferenceResponse::Single(item) => item.generated_text.trim(),
        };
        (!text.is_empty()).then(|| text.to_string())
    }
}

/// Hugging Face 客户端
pub struct HuggingFaceClient {
    descriptor: ProviderDescriptor,
    api_key: String,
    http: reqwest::Client,
}

impl HuggingFaceClient {
    pub fn new(descriptor: ProviderDescriptor, api_key: impl Into<String>) -> Self {
        Self {
            descriptor,
            api_key: api_key.into(),
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Provider for HuggingFaceClient {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    async fn generate(&self, prompt: &str, max_tokens: u32) -> Result<String, ProviderError> {
        let name = &self.descriptor.name;
        let url = format!(
            "{}/{}",
            self.descriptor.endpoint.trim_end_matches('/'),
            self.descriptor.model
        );
        debug!("调用 {}，模型: {}", name, self.descriptor.model);

        let body = InferenceRequest {
            inputs: format!("{}\n\n{}", SYSTEM_MESSAGE, prompt),
            parameters: InferenceParameters {
                max_new_tokens: max_tokens,
                temperature: GENERATION_TEMPERATURE,
                return_full_text: false,
            },
            options: InferenceOptions { wait_for_model: true },
        };

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(name, e))?;

        let parsed: InferenceResponse = read_json(name, response).await?;
        parsed.text().ok_or_else(|| super::empty_response(name, 200))
    }
}
