//! 内容预处理 - 业务能力层
//!
//! 负责把原始文档文本规范化并切分成分块：
//! 1. 统一 Unicode 空白字符
//! 2. 去掉页码、页脚等排版残留
//! 3. 合并空白
//! 4. 超长内容按句子边界截断
//! 5. 滑动窗口分块，边界尽量落在句子结尾

use regex::Regex;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::models::ContentChunk;

/// 句子边界向后延伸的最大比例（相对分块大小）
const MAX_EXTENSION_RATIO: f64 = 0.7;

/// 预处理输出
#[derive(Debug, Clone)]
pub struct PreparedContent {
    pub text: String,
    pub truncated: bool,
}

/// 内容预处理器
pub struct ContentPreprocessor {
    chunk_size: usize,
    overlap: usize,
    min_length: usize,
    max_length: usize,
    page_artifacts: Vec<Regex>,
}

impl ContentPreprocessor {
    /// 根据配置创建预处理器
    pub fn new(config: &Config) -> Self {
        Self::with_sizes(
            config.chunk_size,
            config.chunk_overlap,
            config.min_content_length,
            config.max_content_length,
        )
    }

    /// 使用自定义尺寸创建
    pub fn with_sizes(chunk_size: usize, overlap: usize, min_length: usize, max_length: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        let overlap = if overlap >= chunk_size { chunk_size / 4 } else { overlap };

        // 单独成行的页码/页脚
        let patterns = [
            r"(?im)^\s*(page\s+)?\d+\s*(of\s+\d+)?\s*$",
            r"(?im)^\s*[-–—]\s*\d+\s*[-–—]\s*$",
            r"(?im)^\s*(copyright|©|\(c\)).{0,120}$",
            r"(?im)^\s*(confidential|all rights reserved).{0,80}$",
        ];
        let page_artifacts = patterns
            .iter()
            .filter_map(|p| match Regex::new(p) {
                Ok(re) => Some(re),
                Err(e) => {
                    warn!("页码规则编译失败 {}: {}", p, e);
                    None
                }
            })
            .collect();

        Self {
            chunk_size,
            overlap,
            min_length,
            max_length: max_length.max(min_length),
            page_artifacts,
        }
    }

    /// 规范化文本
    ///
    /// 合并空白、去掉页码/页脚残留、统一 Unicode 空白。
    pub fn preprocess(&self, text: &str) -> String {
        let unified: String = text
            .chars()
            .filter_map(|c| match c {
                '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{FEFF}' | '\u{00AD}' => None,
                '\u{00A0}' | '\u{2000}'..='\u{200A}' | '\u{202F}' | '\u{205F}' | '\u{3000}' => Some(' '),
                '\r' => Some('\n'),
                '\u{2018}' | '\u{2019}' => Some('\''),
                '\u{201C}' | '\u{201D}' => Some('"'),
                other => Some(other),
            })
            .collect();

        let mut stripped = unified;
        for re in &self.page_artifacts {
            stripped = re.replace_all(&stripped, "").into_owned();
        }

        // 行尾连字符断词：ex-\nample → example
        let dehyphenated = stripped.replace("-\n", "");

        dehyphenated.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    /// 规范化 + 最短长度检查 + 超长截断
    pub fn prepare(&self, text: &str) -> AppResult<PreparedContent> {
        let normalized = self.preprocess(text);
        let length = normalized.chars().count();

        if length < self.min_length {
            warn!("内容过短: {} 个字符 (至少需要 {})", length, self.min_length);
            return Err(AppError::content_too_short(length, self.min_length));
        }

        if length <= self.max_length {
            return Ok(PreparedContent {
                text: normalized,
                truncated: false,
            });
        }

        let cut = byte_index_of_char(&normalized, self.max_length);
        let head = &normalized[..cut];
        let end = head
            .rfind(|c| matches!(c, '.' | '!' | '?'))
            .map(|pos| pos + 1)
            .filter(|&pos| pos >= self.min_length)
            .unwrap_or(cut);

        info!(
            "✂️ 内容超长 ({} 字符)，截断到 {} 字节",
            length, end
        );

        Ok(PreparedContent {
            text: normalized[..end].trim_end().to_string(),
            truncated: true,
        })
    }

    /// 滑动窗口分块
    ///
    /// - 文本不超过分块大小时返回单个分块
    /// - 每个窗口的边界向后寻找最近的句子结尾，延伸不超过分块大小的 70%，否则硬切
    /// - 下一个窗口从 `end - overlap` 开始，且起点严格递增
    pub fn chunk(&self, text: &str) -> Vec<ContentChunk> {
        let len = text.len();
        if len == 0 {
            return Vec::new();
        }
        if text.chars().count() <= self.chunk_size {
            return vec![ContentChunk::new(0, text, 0, len)];
        }

        let max_extension = (self.chunk_size as f64 * MAX_EXTENSION_RATIO) as usize;
        let mut chunks = Vec::new();
        let mut start = 0usize;

        loop {
            let hard_end = snap_to_char_boundary(text, start + self.chunk_size);
            let end = if hard_end >= len {
                len
            } else {
                find_sentence_end(text, hard_end, max_extension).unwrap_or(hard_end)
            };

            chunks.push(ContentChunk::new(chunks.len(), &text[start..end], start, end));

            if end >= len {
                break;
            }

            let mut next_start = snap_to_char_boundary(text, end.saturating_sub(self.overlap));
            if next_start <= start {
                // 保证进度，防止病态输入导致死循环
                next_start = next_char_boundary(text, start);
            }
            start = next_start;
        }

        debug!("内容切分为 {} 个分块 (总长度 {})", chunks.len(), len);
        chunks
    }
}

/// 从 `from` 向后寻找句子终止符，返回终止符之后的位置
fn find_sentence_end(text: &str, from: usize, max_extension: usize) -> Option<usize> {
    let limit = snap_to_char_boundary(text, from + max_extension);
    let bytes = text.as_bytes();
    for (i, c) in text[from..limit].char_indices() {
        if matches!(c, '.' | '!' | '?') {
            let after = from + i + 1;
            if after >= bytes.len() || bytes[after].is_ascii_whitespace() {
                return Some(after);
            }
        }
    }
    None
}

/// 把字节位置向后对齐到字符边界（不超过文本长度）
fn snap_to_char_boundary(text: &str, pos: usize) -> usize {
    if pos >= text.len() {
        return text.len();
    }
    let mut p = pos;
    while p < text.len() && !text.is_char_boundary(p) {
        p += 1;
    }
    p
}

/// `pos` 之后的下一个字符边界
fn next_char_boundary(text: &str, pos: usize) -> usize {
    text[pos..]
        .char_indices()
        .nth(1)
        .map(|(i, _)| pos + i)
        .unwrap_or(text.len())
}

/// 第 n 个字符的字节位置
fn byte_index_of_char(text: &str, n: usize) -> usize {
    text.char_indices().nth(n).map(|(i, _)| i).unwrap_or(text.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn preprocessor(chunk_size: usize, overlap: usize) -> ContentPreprocessor {
        ContentPreprocessor::with_sizes(chunk_size, overlap, 100, 15_000)
    }

    fn sample_text(sentences: usize) -> String {
        (0..sentences)
            .map(|i| format!("Sentence number {} talks about topic {} in some detail.", i, i % 7))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn test_preprocess_strips_page_numbers_and_spaces() {
        let p = preprocessor(2500, 300);
        let raw = "First line\u{00A0}with  nbsp.\nPage 3 of 10\n- 4 -\n12\nSecond\u{3000}line.\r\nCopyright 2024 Example Corp";
        assert_eq!(p.preprocess(raw), "First line with nbsp. Second line.");
    }

    #[test]
    fn test_prepare_rejects_short_content() {
        let p = preprocessor(2500, 300);
        let err = p.prepare(&"x".repeat(80)).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_prepare_truncates_at_sentence() {
        let p = ContentPreprocessor::with_sizes(2500, 300, 100, 500);
        let prepared = p.prepare(&sample_text(40)).unwrap();
        assert!(prepared.truncated);
        assert!(prepared.text.chars().count() <= 500);
        assert!(prepared.text.ends_with('.'));
    }

    #[test]
    fn test_short_text_is_single_chunk() {
        let p = preprocessor(2500, 300);
        let text = sample_text(5);
        let chunks = p.chunk(&text);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].start_offset, 0);
        assert_eq!(chunks[0].end_offset, text.len());
    }

    #[test]
    fn test_chunks_cover_text_without_gaps() {
        let p = preprocessor(500, 100);
        let text = sample_text(80);
        let chunks = p.chunk(&text);
        assert!(chunks.len() > 1);

        assert_eq!(chunks[0].start_offset, 0);
        assert_eq!(chunks.last().unwrap().end_offset, text.len());
        for pair in chunks.windows(2) {
            assert!(pair[1].start_offset > pair[0].start_offset);
            assert!(pair[1].start_offset <= pair[0].end_offset, "gap between chunks");
        }
        for chunk in &chunks {
            assert_eq!(chunk.text, &text[chunk.start_offset..chunk.end_offset]);
        }
    }

    #[test]
    fn test_chunks_prefer_sentence_boundaries() {
        let p = preprocessor(500, 100);
        let text = sample_text(80);
        let chunks = p.chunk(&text);
        for chunk in &chunks[..chunks.len() - 1] {
            assert!(chunk.text.ends_with('.'), "chunk ends mid-sentence: {:?}", chunk.text);
            assert!(chunk.text.len() <= 500 + 350);
        }
    }

    #[test]
    fn test_pathological_text_without_terminators_makes_progress() {
        let p = preprocessor(200, 199);
        let text = "a".repeat(2_000);
        let chunks = p.chunk(&text);
        assert_eq!(chunks.last().unwrap().end_offset, text.len());
        for pair in chunks.windows(2) {
            assert!(pair[1].start_offset > pair[0].start_offset);
        }
    }

    #[test]
    fn test_multibyte_text_chunks_on_char_boundaries() {
        let p = preprocessor(300, 50);
        let text = "Über größere Flüsse führen Brücken. ".repeat(40);
        let chunks = p.chunk(text.trim());
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(!chunk.text.is_empty());
        }
    }
}
