//! Ollama 本地模型适配器
//!
//! 不需要密钥，能力条件是端点可达：首次检查时请求 `/api/tags`，结果缓存。

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::{read_json, transport_error, Provider, GENERATION_TEMPERATURE};
use crate::error::ProviderError;
use crate::models::ProviderDescriptor;
use crate::services::prompt_builder::SYSTEM_MESSAGE;

/// 健康检查超时
const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Serialize)]
struct OllamaGenerateRequest<'a> {
    model: &'a str,
    system: &'a str,
    prompt: &'a str,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    num_predict: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct OllamaGenerateResponse {
    #[serde(default)]
    response: String,
}

/// Ollama 客户端
pub struct OllamaClient {
    descriptor: ProviderDescriptor,
    http: reqwest::Client,
    reachable: OnceCell<bool>,
}

impl OllamaClient {
    pub fn new(descriptor: ProviderDescriptor) -> Self {
        Self {
            descriptor,
            http: reqwest::Client::new(),
            reachable: OnceCell::new(),
        }
    }

    fn base_url(&self) -> &str {
        self.descriptor.endpoint.trim_end_matches('/')
    }

    async fn health_check(&self) -> bool {
        let url = format!("{}/api/tags", self.base_url());
        match self.http.get(&url).timeout(HEALTH_CHECK_TIMEOUT).send().await {
            Ok(resp) if resp.status().is_success() => {
                info!("✓ 本地模型端点可用: {}", self.base_url());
                true
            }
            Ok(resp) => {
                warn!("本地模型端点返回 {}，跳过", resp.status());
                false
            }
            Err(e) => {
                debug!("本地模型端点不可达 ({}): {}", self.base_url(), e);
                false
            }
        }
    }
}

#[async_trait]
impl Provider for OllamaClient {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    async fn is_available(&self) -> bool {
        *self.reachable.get_or_init(|| self.health_check()).await
    }

    async fn generate(&self, prompt: &str, max_tokens: u32) -> Result<String, ProviderError> {
        let name = &self.descriptor.name;
        let url = format!("{}/api/generate", self.base_url());
        debug!("调用 {}，模型: {}", name, self.descriptor.model);

        let body = OllamaGenerateRequest {
            model: &self.descriptor.model,
            system: SYSTEM_MESSAGE,
            prompt,
            stream: false,
            options: OllamaOptions {
                num_predict: max_tokens,
                temperature: GENERATION_TEMPERATURE,
            },
        };

        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(name, e))?;

        let parsed: OllamaGenerateResponse = read_json(name, response).await?;
        let text = parsed.response.trim();
        if text.is_empty() {
            return Err(super::empty_response(name, 200));
        }
        Ok(text.to_string())
    }
}
