//! 英文停用词表
//!
//! 相似度计算、关键概念提取和相关性校验共用同一张表。

use phf::phf_set;

static STOPWORDS: phf::Set<&'static str> = phf_set! {
    "a", "about", "above", "according", "after", "again", "against", "all", "also", "am",
    "an", "and", "any", "are", "as", "at", "be", "because", "been", "before", "being",
    "below", "best", "between", "both", "but", "by", "can", "cannot", "could", "did",
    "do", "does", "doing", "down", "during", "each", "either", "following", "few", "for",
    "from", "further", "had", "has", "have", "having", "he", "her", "here", "hers", "him",
    "his", "how", "however", "i", "if", "in", "into", "is", "it", "its", "itself", "just",
    "least", "less", "many", "may", "might", "more", "most", "much", "must", "my", "neither",
    "no", "nor", "not", "of", "off", "often", "on", "once", "one", "only", "or", "other",
    "our", "out", "over", "own", "passage", "same", "several", "she", "should", "so", "some",
    "such", "than", "that", "the", "their", "them", "then", "there", "these", "they", "this",
    "those", "through", "to", "too", "under", "until", "up", "usually", "very", "was", "we",
    "were", "what", "when", "where", "which", "while", "who", "whom", "why", "will", "with",
    "would", "you", "your", "text", "statement", "true", "false", "describes",
    "described", "main", "primary",
};

/// 是否为停用词（要求传入小写单词）
pub fn is_stopword(word: &str) -> bool {
    STOPWORDS.contains(word)
}
