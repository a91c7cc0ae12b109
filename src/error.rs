use thiserror::Error;

/// 应用程序错误类型
#[derive(Debug, Error)]
pub enum AppError {
    /// 内容相关错误（唯一会中止整条流水线的错误）
    #[error("内容错误: {0}")]
    Content(#[from] ContentError),
    /// 生成服务错误
    #[error("生成服务错误: {0}")]
    Provider(#[from] ProviderError),
    /// 响应解析错误
    #[error("解析错误: {0}")]
    Parse(#[from] ParseError),
    /// 文件操作错误
    #[error("文件错误: {0}")]
    File(#[from] FileError),
    /// 配置错误
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),
    /// 其他错误（用于包装第三方库错误）
    #[error("错误: {0}")]
    Other(String),
}

/// 内容相关错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContentError {
    /// 规范化后内容过短
    #[error("内容过短: 规范化后仅 {length} 个字符，至少需要 {min} 个字符")]
    TooShort { length: usize, min: usize },
}

/// 生成服务错误
///
/// 所有适配器只允许通过这几种错误向上报告失败，不泄露后端特有的类型。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// 服务不可用（缺少密钥、端点不可达、连接失败）
    #[error("服务 {provider} 不可用: {reason}")]
    Unavailable { provider: String, reason: String },
    /// 调用超时
    #[error("服务 {provider} 调用超时 ({timeout_ms}ms)")]
    Timeout { provider: String, timeout_ms: u64 },
    /// 配额耗尽（本地限流器拒绝）
    #[error("服务 {provider} 配额已耗尽")]
    RateLimited { provider: String },
    /// 服务返回错误响应
    #[error("服务 {provider} 返回错误响应: status={status:?}, body={body}")]
    Http {
        provider: String,
        status: Option<u16>,
        body: String,
    },
}

impl ProviderError {
    /// 该错误是否值得在同一服务上重试
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Timeout { .. } => true,
            ProviderError::Http { status, .. } => match status {
                Some(code) => *code == 429 || *code >= 500,
                None => true,
            },
            ProviderError::Unavailable { .. } | ProviderError::RateLimited { .. } => false,
        }
    }

    /// 出错的服务名称
    pub fn provider(&self) -> &str {
        match self {
            ProviderError::Unavailable { provider, .. }
            | ProviderError::Timeout { provider, .. }
            | ProviderError::RateLimited { provider }
            | ProviderError::Http { provider, .. } => provider,
        }
    }
}

/// 响应解析错误
#[derive(Debug, Error)]
pub enum ParseError {
    /// 响应中找不到 JSON 数组
    #[error("响应中没有找到 JSON 数组")]
    NoJsonArray,
    /// JSON 解析失败
    #[error("JSON解析失败: {source}")]
    InvalidJson {
        #[source]
        source: serde_json::Error,
    },
}

/// 文件操作错误
#[derive(Debug, Error)]
pub enum FileError {
    /// 读取文件失败
    #[error("读取文件失败 ({path}): {source}")]
    ReadFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// 写入文件失败
    #[error("写入文件失败 ({path}): {source}")]
    WriteFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// TOML 解析失败
    #[error("TOML解析失败 ({path}): {source}")]
    TomlParseFailed {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

/// 配置错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// 环境变量解析失败
    #[error("环境变量 {var_name} 解析失败: 值 '{value}' 无法转换为 {expected_type}")]
    EnvVarParseFailed {
        var_name: String,
        value: String,
        expected_type: String,
    },
}

// ========== 从常见错误类型转换 ==========

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Parse(ParseError::InvalidJson { source: err })
    }
}

// ========== 便捷构造函数 ==========

impl AppError {
    /// 创建内容过短错误
    pub fn content_too_short(length: usize, min: usize) -> Self {
        AppError::Content(ContentError::TooShort { length, min })
    }

    /// 创建文件读取错误
    pub fn file_read_failed(path: impl Into<String>, source: std::io::Error) -> Self {
        AppError::File(FileError::ReadFailed {
            path: path.into(),
            source,
        })
    }

    /// 创建文件写入错误
    pub fn file_write_failed(path: impl Into<String>, source: std::io::Error) -> Self {
        AppError::File(FileError::WriteFailed {
            path: path.into(),
            source,
        })
    }

    /// 创建 TOML 解析错误
    pub fn toml_parse_failed(path: impl Into<String>, source: toml::de::Error) -> Self {
        AppError::File(FileError::TomlParseFailed {
            path: path.into(),
            source,
        })
    }

    /// 是否为致命的内容错误
    pub fn is_fatal(&self) -> bool {
        matches!(self, AppError::Content(_))
    }
}

// ========== Result 类型别名 ==========

/// 应用程序结果类型
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        let timeout = ProviderError::Timeout {
            provider: "groq".into(),
            timeout_ms: 100,
        };
        assert!(timeout.is_retryable());

        let server = ProviderError::Http {
            provider: "openai".into(),
            status: Some(503),
            body: "overloaded".into(),
        };
        assert!(server.is_retryable());

        let bad_request = ProviderError::Http {
            provider: "openai".into(),
            status: Some(400),
            body: "bad".into(),
        };
        assert!(!bad_request.is_retryable());

        let unavailable = ProviderError::Unavailable {
            provider: "gemini".into(),
            reason: "缺少 API 密钥".into(),
        };
        assert!(!unavailable.is_retryable());
        assert_eq!(unavailable.provider(), "gemini");
    }

    #[test]
    fn test_content_error_is_fatal() {
        let err = AppError::content_too_short(80, 100);
        assert!(err.is_fatal());
        assert!(err.to_string().contains("80"));
    }
}
