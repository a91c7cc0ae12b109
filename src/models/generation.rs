use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::models::question::{Difficulty, Question};

fn default_target_count() -> usize {
    10
}

/// 生成请求（协调器的输入）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    pub content: String,
    /// 难度分布，按批次循环使用；为空时使用 medium
    #[serde(default)]
    pub difficulty_mix: Vec<Difficulty>,
    #[serde(default = "default_target_count")]
    pub target_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topics: Option<Vec<String>>,
}

impl GenerationRequest {
    pub fn new(content: impl Into<String>, target_count: usize) -> Self {
        Self {
            content: content.into(),
            difficulty_mix: Vec::new(),
            target_count,
            topics: None,
        }
    }

    /// 第 n 个批次使用的难度
    pub fn difficulty_for_batch(&self, batch_index: usize) -> Difficulty {
        if self.difficulty_mix.is_empty() {
            Difficulty::Medium
        } else {
            self.difficulty_mix[batch_index % self.difficulty_mix.len()]
        }
    }

    /// 请求的主题（去掉空白项）
    pub fn topic_list(&self) -> Vec<String> {
        self.topics
            .as_ref()
            .map(|topics| {
                topics
                    .iter()
                    .map(|t| t.trim().to_string())
                    .filter(|t| !t.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// 生成结果元数据
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationMetadata {
    pub target_count: usize,
    pub final_count: usize,
    /// 目标数量与最终数量的差额（供给不足时大于 0）
    pub shortfall: usize,
    pub chunks_total: usize,
    pub chunks_processed: usize,
    /// 解析出的候选题总数
    pub total_generated: usize,
    /// 通过质量校验的候选题总数
    pub total_validated: usize,
    pub duplicates_removed: usize,
    pub duplicate_groups: usize,
    /// 最终题目中由协调器直接调用本地生成器补足的题数
    pub local_top_up: usize,
    /// 服务名 → 最终题目中来自该服务的数量
    pub providers_used: BTreeMap<String, usize>,
    /// 最终题目中占比最高的服务
    pub provider: Option<String>,
    /// 内容是否因超长被截断
    pub content_truncated: bool,
    pub processing_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// 生成结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationResult {
    pub success: bool,
    pub questions: Vec<Question>,
    pub metadata: GenerationMetadata,
}

impl GenerationResult {
    /// 致命失败的结果
    pub fn failure(error: impl Into<String>, metadata: GenerationMetadata) -> Self {
        Self {
            success: false,
            questions: Vec::new(),
            metadata: GenerationMetadata {
                error: Some(error.into()),
                ..metadata
            },
        }
    }
}

/// 重复组：代表题 + 被并入的重复题
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateGroup {
    pub representative: Question,
    pub duplicates: Vec<Question>,
    /// 组内与代表题的最高相似度
    pub similarity_score: f64,
}

/// 去重结果
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeduplicationResult {
    pub unique_questions: Vec<Question>,
    pub duplicates_removed: usize,
    pub duplicate_groups: Vec<DuplicateGroup>,
}
