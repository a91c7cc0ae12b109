//! 文本相似度 - 业务能力层
//!
//! 去重器和质量校验器共用的相似度工具：
//! - 词集合 Jaccard
//! - 归一化编辑距离相似度
//! - 字符三元组余弦相似度
//!
//! 所有函数都是对称的：`f(a, b) == f(b, a)`。

use std::collections::{HashMap, HashSet};
use std::hash::Hash;

use crate::services::stopwords::is_stopword;

/// 文本相似度中三个指标的权重
const JACCARD_WEIGHT: f64 = 0.4;
const EDIT_WEIGHT: f64 = 0.3;
const TRIGRAM_WEIGHT: f64 = 0.3;

/// 编辑距离参与计算的最大字符数
const MAX_EDIT_CHARS: usize = 600;

/// 小写化，非字母数字替换为空格，合并空白
pub fn normalize(text: &str) -> String {
    let mut lowered = String::with_capacity(text.len());
    for c in text.chars() {
        if c.is_alphanumeric() {
            lowered.extend(c.to_lowercase());
        } else {
            lowered.push(' ');
        }
    }
    lowered.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// 归一化后的单词列表
pub fn words(text: &str) -> Vec<String> {
    normalize(text).split(' ').filter(|w| !w.is_empty()).map(str::to_string).collect()
}

/// 实词：去掉停用词和过短的词
pub fn content_words(text: &str) -> Vec<String> {
    words(text)
        .into_iter()
        .filter(|w| w.chars().count() > 2 && !is_stopword(w))
        .collect()
}

/// 两段文本共有的实词数量
pub fn shared_content_words(a: &str, b: &str) -> usize {
    let set_a: HashSet<String> = content_words(a).into_iter().collect();
    let set_b: HashSet<String> = content_words(b).into_iter().collect();
    set_a.intersection(&set_b).count()
}

/// 集合 Jaccard 相似度，两个空集合返回 0
pub fn jaccard<T: Eq + Hash>(a: &HashSet<T>, b: &HashSet<T>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count() as f64;
    let union = a.union(b).count() as f64;
    if union == 0.0 {
        0.0
    } else {
        intersection / union
    }
}

/// 词集合 Jaccard 相似度
pub fn word_jaccard(a: &str, b: &str) -> f64 {
    let set_a: HashSet<String> = words(a).into_iter().collect();
    let set_b: HashSet<String> = words(b).into_iter().collect();
    jaccard(&set_a, &set_b)
}

/// Levenshtein 编辑距离（按字符）
pub fn levenshtein(a: &[char], b: &[char]) -> usize {
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = if ca == cb { 0 } else { 1 };
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

/// 归一化编辑距离相似度：`1 - distance / max_len`
pub fn edit_similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = normalize(a).chars().take(MAX_EDIT_CHARS).collect();
    let b: Vec<char> = normalize(b).chars().take(MAX_EDIT_CHARS).collect();
    let max_len = a.len().max(b.len());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - levenshtein(&a, &b) as f64 / max_len as f64
}

/// 字符三元组计数（首尾补空格）
fn trigram_counts(text: &str) -> HashMap<[char; 3], usize> {
    let padded: Vec<char> = format!(" {} ", normalize(text)).chars().collect();
    let mut counts = HashMap::new();
    if padded.len() < 3 {
        return counts;
    }
    for window in padded.windows(3) {
        *counts.entry([window[0], window[1], window[2]]).or_insert(0) += 1;
    }
    counts
}

/// 字符三元组余弦相似度
pub fn trigram_cosine(a: &str, b: &str) -> f64 {
    let va = trigram_counts(a);
    let vb = trigram_counts(b);
    if va.is_empty() || vb.is_empty() {
        return 0.0;
    }

    let dot: f64 = va
        .iter()
        .filter_map(|(gram, ca)| vb.get(gram).map(|cb| (*ca * *cb) as f64))
        .sum();
    let norm_a: f64 = va.values().map(|c| (*c * *c) as f64).sum::<f64>().sqrt();
    let norm_b: f64 = vb.values().map(|c| (*c * *c) as f64).sum::<f64>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        (dot / (norm_a * norm_b)).clamp(0.0, 1.0)
    }
}

/// 综合文本相似度：Jaccard 0.4 + 编辑距离 0.3 + 三元组余弦 0.3
pub fn text_similarity(a: &str, b: &str) -> f64 {
    let na = normalize(a);
    let nb = normalize(b);
    if na.is_empty() || nb.is_empty() {
        return 0.0;
    }
    if na == nb {
        return 1.0;
    }
    let score = JACCARD_WEIGHT * word_jaccard(&na, &nb)
        + EDIT_WEIGHT * edit_similarity(&na, &nb)
        + TRIGRAM_WEIGHT * trigram_cosine(&na, &nb);
    score.clamp(0.0, 1.0)
}
