use std::collections::HashMap;

use crate::error::ConfigError;

/// 支持通过环境变量提供 API 密钥的服务: (服务名, 环境变量)
pub const PROVIDER_KEY_VARS: &[(&str, &str)] = &[
    ("groq", "GROQ_API_KEY"),
    ("openai", "OPENAI_API_KEY"),
    ("gemini", "GEMINI_API_KEY"),
    ("openrouter", "OPENROUTER_API_KEY"),
    ("huggingface", "HUGGINGFACE_API_KEY"),
];

/// 程序配置
#[derive(Clone, Debug)]
pub struct Config {
    // --- 服务配置 ---
    /// 各服务的 API 密钥（服务名 → 密钥）
    pub provider_api_keys: HashMap<String, String>,
    /// 各服务的模型名覆盖（服务名 → 模型）
    pub provider_models: HashMap<String, String>,
    /// 本地模型服务端点（Ollama）
    pub local_generator_endpoint: String,
    // --- 内容处理 ---
    /// 规范化后内容的最大长度，超出部分按句子边界截断
    pub max_content_length: usize,
    /// 规范化后内容的最小长度，低于此值直接失败
    pub min_content_length: usize,
    /// 分块大小（字符）
    pub chunk_size: usize,
    /// 相邻分块的重叠（字符）
    pub chunk_overlap: usize,
    // --- 生成 ---
    /// 从标准输入读取纯文本时的目标题数
    pub target_count: usize,
    /// 单个批次最多请求的题目数
    pub max_questions_per_chunk: usize,
    /// 每个分块最多请求的批次数
    pub max_batches_per_chunk: usize,
    /// 同时处理的分块数量（1 表示顺序处理）
    pub max_concurrent_chunks: usize,
    /// 单个服务的重试次数
    pub retry_attempts: usize,
    /// 重试间隔（毫秒）
    pub retry_backoff_ms: u64,
    /// 默认调用超时（毫秒）
    pub timeout_ms: u64,
    // --- 质量控制 ---
    /// 题目最低质量分
    pub min_question_quality: f64,
    /// 批次最低多样性
    pub min_batch_diversity: f64,
    /// 外部服务题目的重复阈值
    pub duplicate_threshold: f64,
    /// 本地模板题目的重复阈值
    pub local_duplicate_threshold: f64,
    // --- 输出 ---
    /// 是否显示详细日志
    pub verbose_logging: bool,
    /// 结果输出文件（为空时输出到标准输出）
    pub output_file: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            provider_api_keys: HashMap::new(),
            provider_models: HashMap::new(),
            local_generator_endpoint: "http://localhost:11434".to_string(),
            max_content_length: 15_000,
            min_content_length: 100,
            chunk_size: 2_500,
            chunk_overlap: 300,
            target_count: 10,
            max_questions_per_chunk: 8,
            max_batches_per_chunk: 2,
            max_concurrent_chunks: 1,
            retry_attempts: 3,
            retry_backoff_ms: 500,
            timeout_ms: 30_000,
            min_question_quality: 0.7,
            min_batch_diversity: 0.7,
            duplicate_threshold: 0.65,
            local_duplicate_threshold: 0.98,
            verbose_logging: false,
            output_file: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let default = Self::default();

        let mut provider_api_keys = HashMap::new();
        for (provider, var) in PROVIDER_KEY_VARS {
            if let Ok(key) = std::env::var(var) {
                if !key.trim().is_empty() {
                    provider_api_keys.insert(provider.to_string(), key.trim().to_string());
                }
            }
        }

        let mut provider_models = HashMap::new();
        for provider in ["groq", "openai", "gemini", "openrouter", "huggingface", "ollama"] {
            let var = format!("{}_MODEL", provider.to_uppercase());
            if let Ok(model) = std::env::var(&var) {
                provider_models.insert(provider.to_string(), model);
            }
        }

        let config = Self {
            provider_api_keys,
            provider_models,
            local_generator_endpoint: std::env::var("LOCAL_GENERATOR_ENDPOINT").unwrap_or(default.local_generator_endpoint),
            max_content_length: env_parse("MAX_CONTENT_LENGTH").unwrap_or(default.max_content_length),
            min_content_length: env_parse("MIN_CONTENT_LENGTH").unwrap_or(default.min_content_length),
            chunk_size: env_parse("CHUNK_SIZE").unwrap_or(default.chunk_size),
            chunk_overlap: env_parse("CHUNK_OVERLAP").unwrap_or(default.chunk_overlap),
            target_count: env_parse("TARGET_COUNT").unwrap_or(default.target_count),
            max_questions_per_chunk: env_parse("MAX_QUESTIONS_PER_CHUNK").unwrap_or(default.max_questions_per_chunk),
            max_batches_per_chunk: env_parse("MAX_BATCHES_PER_CHUNK").unwrap_or(default.max_batches_per_chunk),
            max_concurrent_chunks: env_parse("MAX_CONCURRENT_CHUNKS").unwrap_or(default.max_concurrent_chunks),
            retry_attempts: env_parse("RETRY_ATTEMPTS").unwrap_or(default.retry_attempts),
            retry_backoff_ms: env_parse("RETRY_BACKOFF_MS").unwrap_or(default.retry_backoff_ms),
            timeout_ms: env_parse("TIMEOUT_MS").unwrap_or(default.timeout_ms),
            min_question_quality: env_parse("MIN_QUESTION_QUALITY").unwrap_or(default.min_question_quality),
            min_batch_diversity: env_parse("MIN_BATCH_DIVERSITY").unwrap_or(default.min_batch_diversity),
            duplicate_threshold: env_parse("DUPLICATE_THRESHOLD").unwrap_or(default.duplicate_threshold),
            local_duplicate_threshold: env_parse("LOCAL_DUPLICATE_THRESHOLD").unwrap_or(default.local_duplicate_threshold),
            verbose_logging: env_parse("VERBOSE_LOGGING").unwrap_or(default.verbose_logging),
            output_file: std::env::var("OUTPUT_FILE").ok().filter(|v| !v.trim().is_empty()),
        };

        config.sanitized()
    }

    /// 修正互相矛盾或越界的配置值
    pub fn sanitized(mut self) -> Self {
        self.chunk_size = self.chunk_size.max(200);
        if self.chunk_overlap >= self.chunk_size {
            self.chunk_overlap = self.chunk_size / 4;
        }
        self.max_questions_per_chunk = self.max_questions_per_chunk.max(1);
        self.max_batches_per_chunk = self.max_batches_per_chunk.max(1);
        self.max_concurrent_chunks = self.max_concurrent_chunks.max(1);
        self.retry_attempts = self.retry_attempts.clamp(1, 3);
        self.min_question_quality = self.min_question_quality.clamp(0.0, 1.0);
        self.min_batch_diversity = self.min_batch_diversity.clamp(0.0, 1.0);
        self.duplicate_threshold = self.duplicate_threshold.clamp(0.0, 1.0);
        self.local_duplicate_threshold = self.local_duplicate_threshold.clamp(0.0, 1.0);
        self
    }

    /// 获取某个服务的 API 密钥
    pub fn api_key(&self, provider: &str) -> Option<&str> {
        self.provider_api_keys.get(provider).map(|k| k.as_str())
    }

    /// 获取某个服务的模型名，未配置时使用默认值
    pub fn model_for(&self, provider: &str, default_model: &str) -> String {
        self.provider_models
            .get(provider)
            .cloned()
            .unwrap_or_else(|| default_model.to_string())
    }
}

/// 读取并解析环境变量，缺失或无法解析时返回 None
fn env_parse<T: std::str::FromStr>(var_name: &str) -> Option<T> {
    let value = std::env::var(var_name).ok()?;
    match parse_env_value(var_name, &value) {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            tracing::warn!("⚠️ {}，使用默认值", e);
            None
        }
    }
}

fn parse_env_value<T: std::str::FromStr>(var_name: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::EnvVarParseFailed {
        var_name: var_name.to_string(),
        value: value.to_string(),
        expected_type: std::any::type_name::<T>().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.chunk_size, 2500);
        assert_eq!(config.chunk_overlap, 300);
        assert_eq!(config.max_questions_per_chunk, 8);
        assert_eq!(config.retry_attempts, 3);
        assert_eq!(config.timeout_ms, 30_000);
        assert_eq!(config.target_count, 10);
        assert!((config.min_question_quality - 0.7).abs() < f64::EPSILON);
    }

    #[test]
    fn test_sanitized_clamps_overlap() {
        let config = Config {
            chunk_size: 500,
            chunk_overlap: 800,
            retry_attempts: 10,
            ..Default::default()
        }
        .sanitized();
        assert!(config.chunk_overlap < config.chunk_size);
        assert_eq!(config.retry_attempts, 3);
    }

    #[test]
    fn test_env_value_parsing() {
        assert_eq!(parse_env_value::<usize>("TARGET_COUNT", " 12 "), Ok(12));
        assert_eq!(parse_env_value::<bool>("VERBOSE_LOGGING", "true"), Ok(true));

        let err = parse_env_value::<usize>("TARGET_COUNT", "ten").unwrap_err();
        assert_eq!(
            err,
            ConfigError::EnvVarParseFailed {
                var_name: "TARGET_COUNT".into(),
                value: "ten".into(),
                expected_type: "usize".into(),
            }
        );
        assert!(err.to_string().contains("TARGET_COUNT"));
    }

    #[test]
    fn test_target_count_from_env() {
        std::env::set_var("TARGET_COUNT", "7");
        assert_eq!(Config::from_env().target_count, 7);
        std::env::set_var("TARGET_COUNT", "many");
        assert_eq!(Config::from_env().target_count, 10);
        std::env::remove_var("TARGET_COUNT");
    }

    #[test]
    fn test_model_override() {
        let mut config = Config::default();
        config
            .provider_models
            .insert("groq".into(), "llama-3.3-70b-versatile".into());
        assert_eq!(config.model_for("groq", "x"), "llama-3.3-70b-versatile");
        assert_eq!(config.model_for("openai", "gpt-4o-mini"), "gpt-4o-mini");
    }
}
