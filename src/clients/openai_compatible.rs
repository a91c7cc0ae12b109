//! OpenAI 兼容服务适配器
//!
//! ## 技术栈
//! - 使用 `async-openai` crate 进行 API 调用
//! - 通过 api_base 切换后端：OpenAI、Groq、OpenRouter 等兼容服务

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use tracing::{debug, warn};

use super::{Provider, GENERATION_TEMPERATURE};
use crate::error::ProviderError;
use crate::models::ProviderDescriptor;
use crate::services::prompt_builder::SYSTEM_MESSAGE;

/// OpenAI 兼容客户端
pub struct OpenAiCompatibleClient {
    descriptor: ProviderDescriptor,
    client: Client<OpenAIConfig>,
}

impl OpenAiCompatibleClient {
    /// 创建客户端，`descriptor.endpoint` 为 api_base
    pub fn new(descriptor: ProviderDescriptor, api_key: &str) -> Self {
        let openai_config = OpenAIConfig::new()
            .with_api_key(api_key)
            .with_api_base(&descriptor.endpoint);

        Self {
            descriptor,
            client: Client::with_config(openai_config),
        }
    }

    fn request_error(&self, err: impl std::fmt::Display) -> ProviderError {
        ProviderError::Http {
            provider: self.descriptor.name.clone(),
            status: Some(400),
            body: format!("构建请求失败: {}", err),
        }
    }
}

#[async_trait]
impl Provider for OpenAiCompatibleClient {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    async fn generate(&self, prompt: &str, max_tokens: u32) -> Result<String, ProviderError> {
        debug!("调用 {}，模型: {}", self.descriptor.name, self.descriptor.model);

        let system_msg = ChatCompletionRequestSystemMessageArgs::default()
            .content(SYSTEM_MESSAGE)
            .build()
            .map_err(|e| self.request_error(e))?;
        let user_msg = ChatCompletionRequestUserMessageArgs::default()
            .content(prompt)
            .build()
            .map_err(|e| self.request_error(e))?;

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.descriptor.model)
            .messages(vec![
                ChatCompletionRequestMessage::System(system_msg),
                ChatCompletionRequestMessage::User(user_msg),
            ])
            .temperature(GENERATION_TEMPERATURE)
            .max_tokens(max_tokens)
            .build()
            .map_err(|e| self.request_error(e))?;

        let response = self.client.chat().create(request).await.map_err(|e| {
            warn!("{} API 调用失败: {}", self.descriptor.name, e);
            map_openai_error(&self.descriptor.name, e)
        })?;

        response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or_else(|| super::empty_response(&self.descriptor.name, 200))
    }
}

/// 由错误对象的 type / code 推断 HTTP 状态码
///
/// async-openai 不保留原始状态码，只能按错误类别还原。
fn api_error_status(kind: Option<&str>, code: Option<&str>) -> Option<u16> {
    if let Some(status) = code.and_then(|c| c.parse::<u16>().ok()) {
        if (400..600).contains(&status) {
            return Some(status);
        }
    }

    [code, kind].into_iter().flatten().find_map(|tag| match tag {
        "invalid_api_key" | "authentication_error" | "invalid_authentication" => Some(401),
        "insufficient_quota" | "permission_error" | "permission_denied" => Some(403),
        "model_not_found" | "not_found_error" => Some(404),
        "invalid_request_error" | "context_length_exceeded" | "invalid_value" => Some(400),
        "rate_limit_exceeded" | "rate_limit_error" | "tokens" | "requests" => Some(429),
        "server_error" | "api_error" | "overloaded_error" => Some(500),
        _ => None,
    })
}

/// async-openai 错误归类
fn map_openai_error(provider: &str, err: OpenAIError) -> ProviderError {
    match err {
        OpenAIError::ApiError(api) => ProviderError::Http {
            provider: provider.to_string(),
            status: api_error_status(api.r#type.as_deref(), api.code.as_deref()),
            body: api.message,
        },
        OpenAIError::Reqwest(e) if e.is_connect() => ProviderError::Unavailable {
            provider: provider.to_string(),
            reason: e.to_string(),
        },
        OpenAIError::Reqwest(e) => ProviderError::Http {
            provider: provider.to_string(),
            status: e.status().map(|s| s.as_u16()),
            body: e.to_string(),
        },
        OpenAIError::InvalidArgument(msg) => ProviderError::Http {
            provider: provider.to_string(),
            status: Some(400),
            body: format!("请求参数无效: {}", msg),
        },
        other => ProviderError::Http {
            provider: provider.to_string(),
            status: None,
            body: other.to_string(),
        },
    }
}
