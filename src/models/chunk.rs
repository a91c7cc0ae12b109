use serde::{Deserialize, Serialize};

/// 内容分块
///
/// 由预处理器生成，偏移量为规范化文本中的字节位置，创建后不再修改。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentChunk {
    pub id: String,
    pub text: String,
    pub start_offset: usize,
    pub end_offset: usize,
    pub word_count: usize,
    pub sentence_count: usize,
}

impl ContentChunk {
    /// 创建分块并统计词数和句子数
    pub fn new(index: usize, text: impl Into<String>, start_offset: usize, end_offset: usize) -> Self {
        let text = text.into();
        let word_count = text.split_whitespace().count();
        let sentence_count = count_sentences(&text);
        Self {
            id: format!("chunk-{}", index),
            text,
            start_offset,
            end_offset,
            word_count,
            sentence_count,
        }
    }
}

/// 统计句子数：以 `.` `!` `?` 结尾且后接空白或文本结束
fn count_sentences(text: &str) -> usize {
    let chars: Vec<char> = text.chars().collect();
    let mut count = 0;
    for (i, c) in chars.iter().enumerate() {
        if matches!(c, '.' | '!' | '?') {
            let next = chars.get(i + 1);
            if next.map_or(true, |n| n.is_whitespace()) {
                count += 1;
            }
        }
    }
    // 末尾没有终止符的残句也算一句
    let trimmed = text.trim_end();
    if !trimmed.is_empty() && !trimmed.ends_with(['.', '!', '?']) {
        count += 1;
    }
    count
}
