//! 分块处理上下文
//!
//! 封装"我正在处理第几个分块"这一信息

use std::fmt::Display;

use crate::models::ContentChunk;

/// 分块处理上下文
#[derive(Debug, Clone)]
pub struct ChunkCtx {
    /// 分块ID
    pub chunk_id: String,

    /// 分块索引（从0开始）
    pub chunk_index: usize,

    /// 分块总数（仅用于日志显示）
    pub chunk_total: usize,
}

impl ChunkCtx {
    /// 创建新的分块上下文
    pub fn new(chunk: &ContentChunk, chunk_index: usize, chunk_total: usize) -> Self {
        Self {
            chunk_id: chunk.id.clone(),
            chunk_index,
            chunk_total,
        }
    }
}

impl Display for ChunkCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[分块 #{}/{} {}]",
            self.chunk_index + 1,
            self.chunk_total,
            self.chunk_id
        )
    }
}
