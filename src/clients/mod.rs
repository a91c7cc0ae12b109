//! 服务适配层
//!
//! 每个适配器只负责一种后端的请求/响应格式，对外统一为
//! `generate(prompt, max_tokens) -> text`。
//!
//! 超时、重试、限流都不在适配器里处理，由编排层统一施加。

pub mod gemini;
pub mod huggingface;
pub mod local_template;
pub mod ollama;
pub mod openai_compatible;

pub use gemini::GeminiClient;
pub use huggingface::HuggingFaceClient;
pub use local_template::LocalTemplateGenerator;
pub use ollama::OllamaClient;
pub use openai_compatible::OpenAiCompatibleClient;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::error::ProviderError;
use crate::models::ProviderDescriptor;

/// 生成温度，所有后端一致
pub(crate) const GENERATION_TEMPERATURE: f32 = 0.7;

/// 错误响应体保留的最大字符数
const MAX_ERROR_BODY_CHARS: usize = 500;

/// 题目生成服务
#[async_trait]
pub trait Provider: Send + Sync {
    /// 静态描述信息（名称、优先级、限流、超时）
    fn descriptor(&self) -> &ProviderDescriptor;

    fn name(&self) -> &str {
        &self.descriptor().name
    }

    /// 能力检查：远程服务需要密钥，本地服务需要端点可达
    async fn is_available(&self) -> bool {
        self.descriptor().has_credentials()
    }

    /// 生成原始文本
    async fn generate(&self, prompt: &str, max_tokens: u32) -> Result<String, ProviderError>;
}

/// 传输层错误归类
pub(crate) fn transport_error(provider: &str, err: reqwest::Error) -> ProviderError {
    if err.is_connect() {
        ProviderError::Unavailable {
            provider: provider.to_string(),
            reason: err.to_string(),
        }
    } else {
        ProviderError::Http {
            provider: provider.to_string(),
            status: err.status().map(|s| s.as_u16()),
            body: err.to_string(),
        }
    }
}

/// 检查状态码并解析 JSON 响应体
pub(crate) async fn read_json<T: DeserializeOwned>(
    provider: &str,
    response: reqwest::Response,
) -> Result<T, ProviderError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ProviderError::Http {
            provider: provider.to_string(),
            status: Some(status.as_u16()),
            body: body.chars().take(MAX_ERROR_BODY_CHARS).collect(),
        });
    }

    response.json::<T>().await.map_err(|e| ProviderError::Http {
        provider: provider.to_string(),
        status: Some(status.as_u16()),
        body: format!("响应格式无法解析: {}", e),
    })
}

/// 响应中没有文本
pub(crate) fn empty_response(provider: &str, status: u16) -> ProviderError {
    ProviderError::Http {
        provider: provider.to_string(),
        status: Some(status),
        body: "响应中没有生成文本".to_string(),
    }
}
