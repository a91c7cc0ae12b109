//! 生成协调器 - 编排层
//!
//! 端到端流水线的状态机：
//!
//! ```text
//! Preprocessing → ChunkLoop → GlobalDedup → Trim → Done
//! ```
//!
//! - `Preprocessing`：规范化、最短长度检查、分块。唯一可能让整次生成失败的阶段
//! - `ChunkLoop`：逐块（或按组并发）请求批次，累计候选题达到目标后提前结束；
//!   全部分块处理完仍不足时直接调用本地生成器补足
//! - `GlobalDedup`：对全部候选题只做一次去重，之后若不足目标继续补足，
//!   直到达到目标或本地生成器的取题序列取尽
//! - `Trim`：截断到目标数量
//! - `Done`：生成元数据

use std::collections::BTreeMap;
use std::fmt::Display;
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::clients::LocalTemplateGenerator;
use crate::config::Config;
use crate::infrastructure::RateLimiter;
use crate::models::{
    ContentChunk, Difficulty, GenerationMetadata, GenerationRequest, GenerationResult, Question,
};
use crate::orchestrator::model_orchestrator::ModelOrchestrator;
use crate::orchestrator::registry::ProviderRegistry;
use crate::services::{ContentPreprocessor, Deduplicator, QualityValidator};
use crate::utils::logging::{log_chunk_start, print_final_stats};
use crate::workflow::{ChunkCtx, ChunkFlow, ChunkReport};

/// 协调器补足题目的来源分块标记
pub const TOP_UP_CHUNK_ID: &str = "top-up";

/// 协调器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationState {
    Preprocessing,
    ChunkLoop,
    GlobalDedup,
    Trim,
    Done,
}

impl Display for GenerationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            GenerationState::Preprocessing => "Preprocessing",
            GenerationState::ChunkLoop => "ChunkLoop",
            GenerationState::GlobalDedup => "GlobalDedup",
            GenerationState::Trim => "Trim",
            GenerationState::Done => "Done",
        };
        write!(f, "{}", name)
    }
}

/// 分块循环的累计结果
#[derive(Default)]
struct Accumulator {
    questions: Vec<Question>,
    generated: usize,
    validated: usize,
    chunks_processed: usize,
}

impl Accumulator {
    fn absorb(&mut self, report: ChunkReport) {
        self.generated += report.generated;
        self.validated += report.validated;
        self.chunks_processed += 1;
        self.questions.extend(report.questions);
    }
}

/// 补足时在本地取题序列上前进的游标
///
/// 请求的每种难度各占一条序列，轮流取题；某条序列取尽后跳过。
struct TopUpCursor {
    slots: Vec<TopUpSlot>,
    next: usize,
}

struct TopUpSlot {
    difficulty: Difficulty,
    position: usize,
    exhausted: bool,
}

impl TopUpCursor {
    fn new(request: &GenerationRequest) -> Self {
        let mut difficulties: Vec<Difficulty> = Vec::new();
        for difficulty in &request.difficulty_mix {
            if !difficulties.contains(difficulty) {
                difficulties.push(*difficulty);
            }
        }
        if difficulties.is_empty() {
            difficulties.push(Difficulty::Medium);
        }

        Self {
            slots: difficulties
                .into_iter()
                .map(|difficulty| TopUpSlot {
                    difficulty,
                    position: 0,
                    exhausted: false,
                })
                .collect(),
            next: 0,
        }
    }

    /// 下一条未取尽的序列
    fn next_slot(&mut self) -> Option<usize> {
        for _ in 0..self.slots.len() {
            let idx = self.next % self.slots.len();
            self.next += 1;
            if !self.slots[idx].exhausted {
                return Some(idx);
            }
        }
        None
    }
}

/// 生成协调器
pub struct GenerationCoordinator {
    config: Config,
    preprocessor: ContentPreprocessor,
    orchestrator: Arc<ModelOrchestrator>,
    local_generator: LocalTemplateGenerator,
    validator: QualityValidator,
    deduplicator: Deduplicator,
}

impl GenerationCoordinator {
    /// 根据配置构建全部组件
    pub fn new(config: Config) -> Self {
        let registry = ProviderRegistry::from_config(&config);
        Self::with_registry(config, registry)
    }

    /// 使用给定的服务注册表（测试注入假服务）
    pub fn with_registry(config: Config, registry: ProviderRegistry) -> Self {
        let orchestrator = ModelOrchestrator::new(registry, Arc::new(RateLimiter::new()), &config);
        Self::with_parts(config, orchestrator)
    }

    /// 使用已构建的编排器
    pub fn with_parts(config: Config, orchestrator: ModelOrchestrator) -> Self {
        Self {
            preprocessor: ContentPreprocessor::new(&config),
            deduplicator: Deduplicator::new(&config),
            orchestrator: Arc::new(orchestrator),
            local_generator: LocalTemplateGenerator::new(),
            validator: QualityValidator::new(),
            config,
        }
    }

    pub fn orchestrator(&self) -> &ModelOrchestrator {
        &self.orchestrator
    }

    /// 执行一次完整的生成
    ///
    /// 服务失败只会降级为回退或补足，唯一的失败结果是内容过短。
    pub async fn generate(&self, request: &GenerationRequest) -> GenerationResult {
        let started = Instant::now();
        let target = request.target_count;
        let mut metadata = GenerationMetadata {
            target_count: target,
            ..Default::default()
        };

        // ========== Preprocessing ==========
        enter(GenerationState::Preprocessing);
        let prepared = match self.preprocessor.prepare(&request.content) {
            Ok(prepared) => prepared,
            Err(e) => {
                error!("❌ 预处理失败: {}", e);
                metadata.processing_time_ms = started.elapsed().as_millis() as u64;
                return GenerationResult::failure(e.to_string(), metadata);
            }
        };
        metadata.content_truncated = prepared.truncated;

        let chunks = self.preprocessor.chunk(&prepared.text);
        metadata.chunks_total = chunks.len();
        info!(
            "✓ 预处理完成: {} 个字符, {} 个分块",
            prepared.text.chars().count(),
            chunks.len()
        );

        // ========== ChunkLoop ==========
        enter(GenerationState::ChunkLoop);
        let mut acc = if self.config.max_concurrent_chunks > 1 {
            self.run_chunks_concurrently(&chunks, request).await
        } else {
            self.run_chunks_sequentially(&chunks, request).await
        };

        let mut cursor = TopUpCursor::new(request);
        if acc.questions.len() < target {
            let shortfall = target - acc.questions.len();
            info!("🧩 分块结束后还差 {} 道，直接调用本地生成器补足", shortfall);
            if let Some(extra) = self.local_top_up(&prepared.text, shortfall, request, &mut cursor) {
                acc.questions.extend(extra);
            }
        }

        metadata.chunks_processed = acc.chunks_processed;
        metadata.total_generated = acc.generated;
        metadata.total_validated = acc.validated;

        // ========== GlobalDedup ==========
        enter(GenerationState::GlobalDedup);
        let dedup = self.deduplicator.deduplicate(acc.questions);
        metadata.duplicates_removed = dedup.duplicates_removed;
        metadata.duplicate_groups = dedup.duplicate_groups.len();
        let mut unique = dedup.unique_questions;

        while unique.len() < target {
            let gap = target - unique.len();
            let Some(candidates) = self.local_top_up(&prepared.text, gap * 2, request, &mut cursor) else {
                debug!("本地取题序列已取尽，停止补足");
                break;
            };

            let mut added = 0;
            for candidate in candidates {
                if unique.len() >= target {
                    break;
                }
                if unique.iter().any(|existing| self.deduplicator.is_duplicate(existing, &candidate)) {
                    continue;
                }
                unique.push(candidate);
                added += 1;
            }
            debug!("去重后补足: 缺 {} 道, 新增 {} 道", gap, added);
        }

        // ========== Trim ==========
        enter(GenerationState::Trim);
        unique.truncate(target);

        // ========== Done ==========
        enter(GenerationState::Done);
        metadata.local_top_up = unique
            .iter()
            .filter(|q| q.metadata.source_chunk_id == TOP_UP_CHUNK_ID)
            .count();
        metadata.final_count = unique.len();
        metadata.shortfall = target.saturating_sub(unique.len());
        metadata.providers_used = providers_used(&unique);
        metadata.provider = dominant_provider(&metadata.providers_used);
        metadata.processing_time_ms = started.elapsed().as_millis() as u64;

        if metadata.shortfall > 0 {
            warn!(
                "⚠️ 内容不足以生成 {} 道题，最终只有 {} 道",
                target, metadata.final_count
            );
        }
        print_final_stats(&metadata);

        GenerationResult {
            success: true,
            questions: unique,
            metadata,
        }
    }

    /// 顺序处理分块
    async fn run_chunks_sequentially(&self, chunks: &[ContentChunk], request: &GenerationRequest) -> Accumulator {
        let flow = self.chunk_flow();
        let target = request.target_count;
        let mut acc = Accumulator::default();

        for (index, chunk) in chunks.iter().enumerate() {
            if acc.questions.len() >= target {
                info!("✓ 已累计 {} 道候选题，提前结束分块循环", acc.questions.len());
                break;
            }
            let gap = target - acc.questions.len();
            let ctx = ChunkCtx::new(chunk, index, chunks.len());
            log_chunk_start(&ctx, gap);
            let report = flow.run(chunk, &ctx, request, gap).await;
            acc.absorb(report);
        }

        acc
    }

    /// 按组并发处理分块
    ///
    /// 每组开始前计算缺口；组内结果按分块顺序合并，去重仍在全部分块结束后进行。
    async fn run_chunks_concurrently(&self, chunks: &[ContentChunk], request: &GenerationRequest) -> Accumulator {
        let group_size = self.config.max_concurrent_chunks;
        let semaphore = Arc::new(Semaphore::new(group_size));
        let flow = self.chunk_flow();
        let target = request.target_count;
        let total = chunks.len();
        let mut acc = Accumulator::default();

        for (group_index, group) in chunks.chunks(group_size).enumerate() {
            if acc.questions.len() >= target {
                info!("✓ 已累计 {} 道候选题，提前结束分块循环", acc.questions.len());
                break;
            }
            let gap = target - acc.questions.len();
            let group_start = group_index * group_size;

            let mut handles = Vec::with_capacity(group.len());
            for (offset, chunk) in group.iter().enumerate() {
                let permit = match semaphore.clone().acquire_owned().await {
                    Ok(permit) => permit,
                    Err(e) => {
                        error!("获取并发许可失败: {}", e);
                        break;
                    }
                };

                let ctx = ChunkCtx::new(chunk, group_start + offset, total);
                log_chunk_start(&ctx, gap);

                let flow = flow.clone();
                let chunk = chunk.clone();
                let request = request.clone();
                let handle = tokio::spawn(async move {
                    let _permit = permit;
                    flow.run(&chunk, &ctx, &request, gap).await
                });
                handles.push((group_start + offset, handle));
            }

            let (indices, handles): (Vec<usize>, Vec<_>) = handles.into_iter().unzip();
            for (index, joined) in indices.into_iter().zip(join_all(handles).await) {
                match joined {
                    Ok(report) => acc.absorb(report),
                    Err(e) => error!("[分块 #{}] 任务执行失败: {}", index + 1, e),
                }
            }
        }

        acc
    }

    fn chunk_flow(&self) -> ChunkFlow {
        ChunkFlow::new(
            self.orchestrator.clone(),
            self.config.max_questions_per_chunk,
            self.config.max_batches_per_chunk,
        )
    }

    /// 直接调用本地生成器补足，绕过回退链
    ///
    /// 从游标位置继续取题并推进游标；所有序列都已取尽时返回 None。
    fn local_top_up(
        &self,
        content: &str,
        count: usize,
        request: &GenerationRequest,
        cursor: &mut TopUpCursor,
    ) -> Option<Vec<Question>> {
        let default_topic = request
            .topic_list()
            .into_iter()
            .next()
            .unwrap_or_else(|| crate::orchestrator::model_orchestrator::DEFAULT_TOPIC.to_string());

        loop {
            let idx = cursor.next_slot()?;
            let slot = &mut cursor.slots[idx];
            let batch = self
                .local_generator
                .generate_from(content, count, slot.difficulty, slot.position);
            if batch.consumed == 0 {
                debug!("本地 {} 难度序列已取尽", slot.difficulty.as_str());
                slot.exhausted = true;
                continue;
            }
            slot.position += batch.consumed;

            let mut candidates = batch.questions;
            for candidate in candidates.iter_mut() {
                candidate.metadata.source_chunk_id = TOP_UP_CHUNK_ID.to_string();
                if candidate.topic.trim().is_empty() {
                    candidate.topic = default_topic.clone();
                }
            }
            return Some(
                self.validator
                    .filter_high_quality(candidates, self.config.min_question_quality),
            );
        }
    }
}

fn enter(state: GenerationState) {
    debug!("▶ 状态: {}", state);
}

/// 最终题目中各服务的题数
fn providers_used(questions: &[Question]) -> BTreeMap<String, usize> {
    let mut used = BTreeMap::new();
    for q in questions {
        *used.entry(q.metadata.provider_name.clone()).or_insert(0) += 1;
    }
    used
}

/// 题数最多的服务（并列时取名称靠前的）
fn dominant_provider(used: &BTreeMap<String, usize>) -> Option<String> {
    used.iter()
        .fold(None, |best: Option<(&String, usize)>, (name, &count)| match best {
            Some((_, best_count)) if best_count >= count => best,
            _ => Some((name, count)),
        })
        .map(|(name, _)| name.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LOCAL_PROVIDER_NAME;

    const ARTICLE: &str = "Photosynthesis is the process plants use to turn light into chemical energy. \
        Chlorophyll is the green pigment that captures light inside the chloroplasts. \
        During photosynthesis, plants absorb carbon dioxide from the air through small pores called stomata. \
        Water is pulled up from the roots and split to release oxygen as a byproduct. \
        The glucose produced by photosynthesis fuels growth and is stored as starch. \
        Mitochondria break glucose down again during cellular respiration to release usable energy.";

    fn local_only() -> GenerationCoordinator {
        let config = Config {
            retry_backoff_ms: 0,
            ..Config::default()
        };
        GenerationCoordinator::with_registry(
            config,
            ProviderRegistry::with_providers(vec![Arc::new(LocalTemplateGenerator::new())]),
        )
    }

    #[test]
    fn test_dominant_provider_prefers_first_on_tie() {
        let mut used = BTreeMap::new();
        used.insert("gemini".to_string(), 3);
        used.insert("groq".to_string(), 3);
        used.insert("openai".to_string(), 1);
        assert_eq!(dominant_provider(&used).as_deref(), Some("gemini"));
        assert_eq!(dominant_provider(&BTreeMap::new()), None);
    }

    #[tokio::test]
    async fn test_short_content_fails() {
        let result = local_only()
            .generate(&GenerationRequest::new("Too short to generate anything useful from.", 5))
            .await;
        assert!(!result.success);
        assert!(result.questions.is_empty());
        assert!(result.metadata.error.is_some());
    }

    #[tokio::test]
    async fn test_local_only_reaches_target() {
        let result = local_only().generate(&GenerationRequest::new(ARTICLE, 4)).await;
        assert!(result.success);
        assert_eq!(result.questions.len(), 4);
        assert_eq!(result.metadata.final_count, 4);
        assert_eq!(result.metadata.shortfall, 0);
        assert_eq!(result.metadata.provider.as_deref(), Some(LOCAL_PROVIDER_NAME));
        assert_eq!(result.metadata.chunks_total, 1);
        assert!(result.questions.iter().all(|q| q.has_valid_options()));
    }

    #[tokio::test]
    async fn test_zero_target_returns_empty_success() {
        let result = local_only().generate(&GenerationRequest::new(ARTICLE, 0)).await;
        assert!(result.success);
        assert!(result.questions.is_empty());
        assert_eq!(result.metadata.chunks_processed, 0);
    }

    #[test]
    fn test_top_up_cursor_rotates_request_difficulties() {
        let request = GenerationRequest {
            difficulty_mix: vec![Difficulty::Easy, Difficulty::Hard, Difficulty::Easy],
            ..GenerationRequest::new(ARTICLE, 5)
        };
        let mut cursor = TopUpCursor::new(&request);
        assert_eq!(cursor.slots.len(), 2);
        assert_eq!(cursor.next_slot(), Some(0));
        assert_eq!(cursor.next_slot(), Some(1));

        cursor.slots[0].exhausted = true;
        assert_eq!(cursor.next_slot(), Some(1));
        assert_eq!(cursor.next_slot(), Some(1));

        cursor.slots[1].exhausted = true;
        assert_eq!(cursor.next_slot(), None);
    }

    #[test]
    fn test_top_up_stops_when_plans_are_exhausted() {
        let coordinator = local_only();
        let request = GenerationRequest::new(ARTICLE, 1_000);
        let mut cursor = TopUpCursor::new(&request);

        let mut total = 0;
        let mut calls = 0;
        while let Some(batch) = coordinator.local_top_up(ARTICLE, 8, &request, &mut cursor) {
            assert!(batch.iter().all(|q| q.metadata.source_chunk_id == TOP_UP_CHUNK_ID));
            total += batch.len();
            calls += 1;
            assert!(calls < 100);
        }
        assert!(total > 0);
        assert!(cursor.slots.iter().all(|slot| slot.exhausted));
    }

    #[tokio::test]
    async fn test_top_up_count_reflects_kept_questions() {
        let result = local_only().generate(&GenerationRequest::new(ARTICLE, 6)).await;
        let from_top_up = result
            .questions
            .iter()
            .filter(|q| q.metadata.source_chunk_id == TOP_UP_CHUNK_ID)
            .count();
        assert_eq!(result.metadata.local_top_up, from_top_up);
        assert!(result.metadata.local_top_up <= result.metadata.final_count);
    }
}
