//! 服务注册表 - 编排层
//!
//! 启动时根据配置构建，按优先级升序排列。本地模板生成器总是排在最后。
//! 注册表作为值传入编排器，测试时可以注入假服务。

use std::sync::Arc;

use tracing::{debug, info};

use crate::clients::{
    GeminiClient, HuggingFaceClient, LocalTemplateGenerator, OllamaClient, OpenAiCompatibleClient, Provider,
};
use crate::config::Config;
use crate::models::{ProviderDescriptor, ProviderKind, RateLimit};

/// 快速服务的超时上限
const FAST_TIMEOUT_MS: u64 = 15_000;
/// 排队型服务的超时
const QUEUED_TIMEOUT_MS: u64 = 120_000;
/// 本地模型服务的超时
const LOCAL_MODEL_TIMEOUT_MS: u64 = 60_000;

/// 外部服务的静态默认配置
struct ProviderPreset {
    name: &'static str,
    kind: ProviderKind,
    endpoint: &'static str,
    default_model: &'static str,
    max_tokens: u32,
    rate_limit: RateLimit,
    priority: u32,
}

const PRESETS: [ProviderPreset; 6] = [
    ProviderPreset {
        name: "groq",
        kind: ProviderKind::OpenAiCompatible,
        endpoint: "https://api.groq.com/openai/v1",
        default_model: "llama-3.1-8b-instant",
        max_tokens: 4096,
        rate_limit: RateLimit::new(30, 14_400),
        priority: 1,
    },
    ProviderPreset {
        name: "openai",
        kind: ProviderKind::OpenAiCompatible,
        endpoint: "https://api.openai.com/v1",
        default_model: "gpt-4o-mini",
        max_tokens: 4096,
        rate_limit: RateLimit::new(60, 10_000),
        priority: 2,
    },
    ProviderPreset {
        name: "gemini",
        kind: ProviderKind::Gemini,
        endpoint: "https://generativelanguage.googleapis.com/v1beta",
        default_model: "gemini-1.5-flash",
        max_tokens: 4096,
        rate_limit: RateLimit::new(15, 1_500),
        priority: 3,
    },
    ProviderPreset {
        name: "openrouter",
        kind: ProviderKind::OpenAiCompatible,
        endpoint: "https://openrouter.ai/api/v1",
        default_model: "meta-llama/llama-3.1-8b-instruct:free",
        max_tokens: 4096,
        rate_limit: RateLimit::new(20, 200),
        priority: 4,
    },
    ProviderPreset {
        name: "huggingface",
        kind: ProviderKind::HuggingFace,
        endpoint: "https://api-inference.huggingface.co/models",
        default_model: "mistralai/Mistral-7B-Instruct-v0.2",
        max_tokens: 2048,
        rate_limit: RateLimit::new(10, 1_000),
        priority: 5,
    },
    ProviderPreset {
        name: "ollama",
        kind: ProviderKind::Ollama,
        endpoint: "",
        default_model: "llama3",
        max_tokens: 2048,
        rate_limit: RateLimit::unlimited(),
        priority: 6,
    },
];

/// 服务注册表
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn Provider>>,
}

impl ProviderRegistry {
    /// 根据配置构建：有密钥的远程服务 + 本地模型端点 + 本地模板生成器
    pub fn from_config(config: &Config) -> Self {
        let mut registry = Self::default();

        for preset in &PRESETS {
            let api_key = config.api_key(preset.name);
            let descriptor = ProviderDescriptor {
                name: preset.name.to_string(),
                kind: preset.kind,
                endpoint: if preset.kind == ProviderKind::Ollama {
                    config.local_generator_endpoint.clone()
                } else {
                    preset.endpoint.to_string()
                },
                model: config.model_for(preset.name, preset.default_model),
                api_key_present: api_key.is_some(),
                max_tokens: preset.max_tokens,
                rate_limit: preset.rate_limit,
                priority: preset.priority,
                timeout_ms: timeout_for(preset, config.timeout_ms),
            };

            let provider: Arc<dyn Provider> = match (preset.kind, api_key) {
                (ProviderKind::OpenAiCompatible, Some(key)) => Arc::new(OpenAiCompatibleClient::new(descriptor, key)),
                (ProviderKind::Gemini, Some(key)) => Arc::new(GeminiClient::new(descriptor, key)),
                (ProviderKind::HuggingFace, Some(key)) => Arc::new(HuggingFaceClient::new(descriptor, key)),
                (ProviderKind::Ollama, _) => Arc::new(OllamaClient::new(descriptor)),
                _ => {
                    debug!("未配置 {} 的密钥，跳过", preset.name);
                    continue;
                }
            };
            registry.register(provider);
        }

        registry.register(Arc::new(LocalTemplateGenerator::new()));

        info!(
            "✓ 已注册 {} 个生成服务: {}",
            registry.len(),
            registry.names().join(" → ")
        );
        registry
    }

    /// 使用给定服务构建（测试注入）
    pub fn with_providers(providers: Vec<Arc<dyn Provider>>) -> Self {
        let mut registry = Self::default();
        for provider in providers {
            registry.register(provider);
        }
        registry
    }

    /// 注册服务并保持优先级顺序（优先级相同时按注册顺序）
    pub fn register(&mut self, provider: Arc<dyn Provider>) {
        let priority = provider.descriptor().priority;
        let position = self
            .providers
            .iter()
            .position(|p| p.descriptor().priority > priority)
            .unwrap_or(self.providers.len());
        self.providers.insert(position, provider);
    }

    /// 按优先级排列的服务
    pub fn providers(&self) -> &[Arc<dyn Provider>] {
        &self.providers
    }

    pub fn names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

/// 按延迟等级确定超时
fn timeout_for(preset: &ProviderPreset, default_timeout_ms: u64) -> u64 {
    match (preset.kind, preset.priority) {
        (ProviderKind::HuggingFace, _) => QUEUED_TIMEOUT_MS,
        (ProviderKind::Ollama, _) => LOCAL_MODEL_TIMEOUT_MS,
        (_, 1) => default_timeout_ms.min(FAST_TIMEOUT_MS),
        _ => default_timeout_ms,
    }
}
