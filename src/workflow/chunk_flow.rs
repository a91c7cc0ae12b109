//! 分块处理流程 - 流程层
//!
//! 核心职责：定义"一个分块"的完整生成流程
//!
//! 流程顺序：
//! 1. 按剩余缺口 + 50% 余量确定批次大小
//! 2. 按批次轮换难度，渲染提示词
//! 3. 交给编排器走回退链
//! 4. 累计的候选题达到缺口后提前结束

use std::sync::Arc;

use tracing::{debug, info};

use crate::models::{ContentChunk, GenerationRequest, Question};
use crate::orchestrator::model_orchestrator::{BatchRequest, ModelOrchestrator};
use crate::services::prompt_builder::{build_prompt, PromptInput};
use crate::workflow::chunk_ctx::ChunkCtx;

/// 单个分块的处理结果
#[derive(Debug, Default)]
pub struct ChunkReport {
    pub questions: Vec<Question>,
    /// 解析出的候选题数
    pub generated: usize,
    /// 通过质量校验的候选题数
    pub validated: usize,
    /// 实际请求的批次数
    pub batches: usize,
}

/// 分块处理流程
///
/// - 决定每个批次请求多少道题、用什么难度
/// - 不关心由哪个服务生成
#[derive(Clone)]
pub struct ChunkFlow {
    orchestrator: Arc<ModelOrchestrator>,
    max_questions_per_chunk: usize,
    max_batches_per_chunk: usize,
}

impl ChunkFlow {
    pub fn new(orchestrator: Arc<ModelOrchestrator>, max_questions_per_chunk: usize, max_batches_per_chunk: usize) -> Self {
        Self {
            orchestrator,
            max_questions_per_chunk: max_questions_per_chunk.max(1),
            max_batches_per_chunk: max_batches_per_chunk.max(1),
        }
    }

    /// 批次大小：缺口加 50% 余量，不超过单批上限
    pub fn batch_size(&self, gap: usize) -> usize {
        let buffered = (gap * 3).div_ceil(2);
        buffered.clamp(1, self.max_questions_per_chunk)
    }

    /// 处理一个分块
    ///
    /// `gap` 是开始处理时距离目标还差的题数。
    pub async fn run(&self, chunk: &ContentChunk, ctx: &ChunkCtx, request: &GenerationRequest, gap: usize) -> ChunkReport {
        let mut report = ChunkReport::default();
        if gap == 0 {
            debug!("{} 已满足目标数量，跳过", ctx);
            return report;
        }

        let topics = request.topic_list();

        for batch in 0..self.max_batches_per_chunk {
            let remaining = gap.saturating_sub(report.questions.len());
            if remaining == 0 {
                break;
            }

            let count = self.batch_size(remaining);
            let difficulty = request.difficulty_for_batch(ctx.chunk_index * self.max_batches_per_chunk + batch);
            let prompt = build_prompt(&PromptInput::for_chunk(chunk, count, difficulty, &topics));

            debug!(
                "{} 批次 {}/{}: 请求 {} 道 {} 题",
                ctx,
                batch + 1,
                self.max_batches_per_chunk,
                count,
                difficulty.as_str()
            );

            let outcome = self
                .orchestrator
                .generate_batch(&BatchRequest {
                    chunk_id: ctx.chunk_id.clone(),
                    prompt,
                    count,
                    topics: topics.clone(),
                })
                .await;

            report.batches += 1;
            report.generated += outcome.generated;
            report.validated += outcome.validated;
            report.questions.extend(outcome.questions);
        }

        info!(
            "{} ✓ 完成: {} 道候选题 ({} 个批次)",
            ctx,
            report.questions.len(),
            report.batches
        );
        report
    }
}
