use serde::{Deserialize, Serialize};

/// 本地模板生成器的服务名
pub const LOCAL_PROVIDER_NAME: &str = "local-template";

/// 服务类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderKind {
    /// OpenAI 兼容接口（OpenAI、Groq、OpenRouter 等）
    OpenAiCompatible,
    /// Google Gemini
    Gemini,
    /// Hugging Face 推理接口
    HuggingFace,
    /// 本地 Ollama 服务
    Ollama,
    /// 本地模板生成器（无网络调用）
    LocalTemplate,
}

impl ProviderKind {
    /// 是否需要 API 密钥才能使用
    pub fn requires_api_key(self) -> bool {
        matches!(
            self,
            ProviderKind::OpenAiCompatible | ProviderKind::Gemini | ProviderKind::HuggingFace
        )
    }
}

/// 配额限制
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimit {
    pub per_minute: u32,
    pub per_day: u32,
}

impl RateLimit {
    pub const fn new(per_minute: u32, per_day: u32) -> Self {
        Self {
            per_minute,
            per_day,
        }
    }

    /// 不限流
    pub const fn unlimited() -> Self {
        Self::new(u32::MAX, u32::MAX)
    }
}

/// 服务描述（启动时由配置构建，之后只读）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderDescriptor {
    pub name: String,
    pub kind: ProviderKind,
    pub endpoint: String,
    pub model: String,
    pub api_key_present: bool,
    pub max_tokens: u32,
    pub rate_limit: RateLimit,
    /// 优先级，越小越先尝试
    pub priority: u32,
    /// 单次调用超时（毫秒）
    pub timeout_ms: u64,
}

impl ProviderDescriptor {
    /// 静态能力检查：需要密钥的服务必须已配置密钥
    ///
    /// 本地端点的可达性由适配器在运行时探测。
    pub fn has_credentials(&self) -> bool {
        !self.kind.requires_api_key() || self.api_key_present
    }

    /// 是否为本地模板生成器
    pub fn is_local_template(&self) -> bool {
        self.kind == ProviderKind::LocalTemplate
    }

    /// 本地模板生成器的描述，优先级永远最低
    pub fn local_template() -> Self {
        Self {
            name: LOCAL_PROVIDER_NAME.to_string(),
            kind: ProviderKind::LocalTemplate,
            endpoint: String::new(),
            model: "template-v1".to_string(),
            api_key_present: false,
            max_tokens: 4096,
            rate_limit: RateLimit::unlimited(),
            priority: u32::MAX,
            timeout_ms: 5_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_requires_key_for_remote() {
        let mut descriptor = ProviderDescriptor {
            name: "groq".into(),
            kind: ProviderKind::OpenAiCompatible,
            endpoint: "https://api.groq.com/openai/v1".into(),
            model: "llama".into(),
            api_key_present: false,
            max_tokens: 2048,
            rate_limit: RateLimit::new(30, 14_400),
            priority: 1,
            timeout_ms: 15_000,
        };
        assert!(!descriptor.has_credentials());
        descriptor.api_key_present = true;
        assert!(descriptor.has_credentials());
    }

    #[test]
    fn test_local_template_always_capable_and_last() {
        let local = ProviderDescriptor::local_template();
        assert!(local.has_credentials());
        assert!(local.is_local_template());
        assert_eq!(local.priority, u32::MAX);
    }
}
