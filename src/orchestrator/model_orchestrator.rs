//! 模型编排器 - 编排层
//!
//! 单个批次的生成流程：
//! 1. 按优先级遍历注册表中的服务
//! 2. 能力不满足或限流器拒绝时跳过
//! 3. 调用与超时赛跑，成功后解析、打标、质量过滤
//! 4. 外部服务的批次多样性低于阈值时视为软失败，换下一个服务
//! 5. 可重试错误（超时、429、5xx、空批次）在同一服务上重试，间隔递增
//!
//! 本地模板生成器排在最后且总是可用，所以回退链不会真正耗尽。

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::clients::Provider;
use crate::config::Config;
use crate::error::ProviderError;
use crate::infrastructure::RateLimiter;
use crate::models::Question;
use crate::orchestrator::registry::ProviderRegistry;
use crate::services::deduplicator::calculate_batch_diversity;
use crate::services::{QualityValidator, ResponseParser};

/// 没有指定主题时的默认主题
pub const DEFAULT_TOPIC: &str = "general";

/// 单个批次请求
#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub chunk_id: String,
    pub prompt: String,
    pub count: usize,
    pub topics: Vec<String>,
}

/// 单个批次结果
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub questions: Vec<Question>,
    /// 最终产出题目的服务
    pub provider: Option<String>,
    /// 所有尝试中解析出的候选题数
    pub generated: usize,
    /// 所有尝试中通过质量校验的候选题数
    pub validated: usize,
}

/// 一次尝试失败的原因
#[derive(Debug)]
enum FailureReason {
    Provider(ProviderError),
    EmptyBatch,
    LowDiversity(f64),
}

impl FailureReason {
    fn is_retryable(&self) -> bool {
        match self {
            FailureReason::Provider(e) => e.is_retryable(),
            FailureReason::EmptyBatch => true,
            FailureReason::LowDiversity(_) => false,
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::Provider(e) => write!(f, "{}", e),
            FailureReason::EmptyBatch => write!(f, "没有可用的候选题"),
            FailureReason::LowDiversity(score) => write!(f, "批次多样性过低 ({:.2})", score),
        }
    }
}

struct AttemptFailure {
    reason: FailureReason,
    generated: usize,
    validated: usize,
}

impl AttemptFailure {
    fn before_parse(reason: FailureReason) -> Self {
        Self {
            reason,
            generated: 0,
            validated: 0,
        }
    }
}

/// 模型编排器
pub struct ModelOrchestrator {
    registry: ProviderRegistry,
    rate_limiter: Arc<RateLimiter>,
    parser: ResponseParser,
    validator: QualityValidator,
    retry_attempts: usize,
    retry_backoff: Duration,
    min_question_quality: f64,
    min_batch_diversity: f64,
}

impl ModelOrchestrator {
    pub fn new(registry: ProviderRegistry, rate_limiter: Arc<RateLimiter>, config: &Config) -> Self {
        Self {
            registry,
            rate_limiter,
            parser: ResponseParser::new(),
            validator: QualityValidator::new(),
            retry_attempts: config.retry_attempts.clamp(1, 3),
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
            min_question_quality: config.min_question_quality,
            min_batch_diversity: config.min_batch_diversity,
        }
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// 生成一个批次
    ///
    /// 服务失败不会向上传播，全部失败时返回空批次。
    pub async fn generate_batch(&self, request: &BatchRequest) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();

        'providers: for provider in self.registry.providers() {
            let descriptor = provider.descriptor();

            if !provider.is_available().await {
                debug!("[{}] 跳过 {}: 能力条件不满足", request.chunk_id, descriptor.name);
                continue;
            }

            for attempt in 1..=self.retry_attempts {
                if let Err(e) = self.rate_limiter.acquire(&descriptor.name, &descriptor.rate_limit) {
                    info!("[{}] ⏳ {}，换下一个服务", request.chunk_id, e);
                    continue 'providers;
                }

                match self.attempt(provider.as_ref(), request).await {
                    Ok(questions) => {
                        outcome.generated += questions.generated;
                        outcome.validated += questions.validated;
                        info!(
                            "[{}] ✓ {} 生成 {} 道题 (解析 {}, 尝试 {}/{})",
                            request.chunk_id,
                            descriptor.name,
                            questions.accepted.len(),
                            questions.generated,
                            attempt,
                            self.retry_attempts
                        );
                        outcome.questions = questions.accepted;
                        outcome.provider = Some(descriptor.name.clone());
                        return outcome;
                    }
                    Err(failure) => {
                        outcome.generated += failure.generated;
                        outcome.validated += failure.validated;
                        warn!(
                            "[{}] ⚠️ {} 第 {}/{} 次尝试失败: {}",
                            request.chunk_id, descriptor.name, attempt, self.retry_attempts, failure.reason
                        );

                        if !failure.reason.is_retryable() {
                            continue 'providers;
                        }
                        if attempt < self.retry_attempts && !self.retry_backoff.is_zero() {
                            tokio::time::sleep(self.retry_backoff * attempt as u32).await;
                        }
                    }
                }
            }
        }

        warn!("[{}] ❌ 所有服务都未能生成题目", request.chunk_id);
        outcome
    }

    /// 对单个服务的一次尝试
    async fn attempt(&self, provider: &dyn Provider, request: &BatchRequest) -> Result<AttemptSuccess, AttemptFailure> {
        let descriptor = provider.descriptor();
        let timeout = Duration::from_millis(descriptor.timeout_ms);
        let started = Instant::now();

        let raw = match tokio::time::timeout(timeout, provider.generate(&request.prompt, descriptor.max_tokens)).await {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => return Err(AttemptFailure::before_parse(FailureReason::Provider(e))),
            Err(_) => {
                return Err(AttemptFailure::before_parse(FailureReason::Provider(ProviderError::Timeout {
                    provider: descriptor.name.clone(),
                    timeout_ms: descriptor.timeout_ms,
                })))
            }
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let mut candidates = self.parser.parse(&raw);
        let generated = candidates.len();
        if generated == 0 {
            return Err(AttemptFailure::before_parse(FailureReason::EmptyBatch));
        }

        let default_topic = request
            .topics
            .first()
            .cloned()
            .unwrap_or_else(|| DEFAULT_TOPIC.to_string());
        let generated_at = Utc::now();
        for candidate in candidates.iter_mut() {
            candidate.metadata.provider_name = descriptor.name.clone();
            candidate.metadata.source_chunk_id = request.chunk_id.clone();
            candidate.metadata.generated_at = generated_at;
            candidate.metadata.processing_time_ms = elapsed_ms;
            if candidate.topic.trim().is_empty() {
                candidate.topic = default_topic.clone();
            }
        }

        let mut accepted = self.validator.filter_high_quality(candidates, self.min_question_quality);
        let validated = accepted.len();
        if validated == 0 {
            return Err(AttemptFailure {
                reason: FailureReason::EmptyBatch,
                generated,
                validated,
            });
        }

        // 本地模板题目由构造保证质量，不参与多样性门槛
        if !descriptor.is_local_template() {
            let diversity = calculate_batch_diversity(&accepted);
            if diversity < self.min_batch_diversity {
                return Err(AttemptFailure {
                    reason: FailureReason::LowDiversity(diversity),
                    generated,
                    validated,
                });
            }
        }

        accepted.truncate(request.count.max(1));
        Ok(AttemptSuccess {
            accepted,
            generated,
            validated,
        })
    }
}

struct AttemptSuccess {
    accepted: Vec<Question>,
    generated: usize,
    validated: usize,
}
