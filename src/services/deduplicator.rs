//! 去重与多样性评分 - 业务能力层
//!
//! 两道题的最终相似度取"字面相似度"和"语义相似度"的最大值：
//! - 字面：题干 0.5、选项 0.2、主题 0.05、关键词 0.05（答案项 0.2 保留不用），按有效权重归一化
//! - 语义：关键概念集合 Jaccard，或题型意图相同时按主语相似度打分
//!
//! 超过阈值即视为重复。任意一方来自本地模板生成器时使用宽松阈值。

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;
use tracing::{debug, info};

use crate::config::Config;
use crate::models::{DeduplicationResult, DuplicateGroup, Question};
use crate::services::text_similarity::{content_words, jaccard, normalize, text_similarity};

const TEXT_WEIGHT: f64 = 0.5;
const OPTIONS_WEIGHT: f64 = 0.2;
const TOPIC_WEIGHT: f64 = 0.05;
const KEYWORDS_WEIGHT: f64 = 0.05;
/// 单一题型下答案项不参与计算，只归一化实际使用的权重
const ACTIVE_WEIGHT: f64 = TEXT_WEIGHT + OPTIONS_WEIGHT + TOPIC_WEIGHT + KEYWORDS_WEIGHT;

/// 题型意图相同时的基础分，剩余部分由主语相似度决定
const INTENT_BASE: f64 = 0.4;
const INTENT_SUBJECT_WEIGHT: f64 = 0.6;

pub const DEFAULT_DUPLICATE_THRESHOLD: f64 = 0.65;
pub const DEFAULT_LOCAL_DUPLICATE_THRESHOLD: f64 = 0.98;

/// 题干意图模式，捕获组 1 为主语部分
fn intent_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"^what is the (?:primary|main|key) (.+)$",
            r"^what (?:role|purpose|function) does (.+)$",
            r"^what (?:is|are) (.+)$",
            r"^which of the following (.+)$",
            r"^which statement best describes (.+)$",
            r"^which term best completes the statement (.+)$",
            r"^based on the passage what can be inferred about (.+)$",
            r"^why (?:does|do|is|are|did) (.+)$",
            r"^how (?:does|do|is|are|did) (.+)$",
        ]
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
    })
}

/// 去重器
#[derive(Debug, Clone)]
pub struct Deduplicator {
    threshold: f64,
    local_threshold: f64,
}

impl Default for Deduplicator {
    fn default() -> Self {
        Self::with_thresholds(DEFAULT_DUPLICATE_THRESHOLD, DEFAULT_LOCAL_DUPLICATE_THRESHOLD)
    }
}

impl Deduplicator {
    pub fn new(config: &Config) -> Self {
        Self::with_thresholds(config.duplicate_threshold, config.local_duplicate_threshold)
    }

    pub fn with_thresholds(threshold: f64, local_threshold: f64) -> Self {
        Self {
            threshold,
            local_threshold,
        }
    }

    /// 一对题目适用的阈值（对称）
    pub fn threshold_for(&self, a: &Question, b: &Question) -> f64 {
        if a.is_local() || b.is_local() {
            self.local_threshold
        } else {
            self.threshold
        }
    }

    /// 最终重复信号：内容哈希相同为 1.0，否则取字面和语义相似度的最大值
    pub fn similarity(&self, a: &Question, b: &Question) -> f64 {
        if !a.metadata.content_hash.is_empty() && a.metadata.content_hash == b.metadata.content_hash {
            return 1.0;
        }
        lexical_similarity(a, b).max(semantic_similarity(a, b)).clamp(0.0, 1.0)
    }

    /// 是否重复
    pub fn is_duplicate(&self, a: &Question, b: &Question) -> bool {
        self.similarity(a, b) > self.threshold_for(a, b)
    }

    /// 去重
    ///
    /// 每道候选题与已接受的题逐一比较，超过阈值时归入最相似的那道题的重复组
    /// （相似度相同时取先出现的），否则接受。先出现的题作为组代表。
    pub fn deduplicate(&self, candidates: Vec<Question>) -> DeduplicationResult {
        let total = candidates.len();
        let mut unique: Vec<Question> = Vec::with_capacity(total);
        let mut groups: Vec<(Vec<Question>, f64)> = Vec::with_capacity(total);

        for candidate in candidates {
            let mut best: Option<(usize, f64)> = None;
            for (idx, existing) in unique.iter().enumerate() {
                let sim = self.similarity(&candidate, existing);
                if sim <= self.threshold_for(&candidate, existing) {
                    continue;
                }
                if best.map_or(true, |(_, best_sim)| sim > best_sim) {
                    best = Some((idx, sim));
                }
            }

            match best {
                Some((idx, sim)) => {
                    debug!(
                        "重复题 ({:.2}): \"{}\" ≈ \"{}\"",
                        sim,
                        crate::utils::logging::truncate_text(&candidate.text, 40),
                        crate::utils::logging::truncate_text(&unique[idx].text, 40)
                    );
                    let (duplicates, score) = &mut groups[idx];
                    duplicates.push(candidate);
                    *score = score.max(sim);
                }
                None => {
                    unique.push(candidate);
                    groups.push((Vec::new(), 0.0));
                }
            }
        }

        let duplicate_groups: Vec<DuplicateGroup> = unique
            .iter()
            .zip(groups)
            .filter(|(_, (duplicates, _))| !duplicates.is_empty())
            .map(|(representative, (duplicates, similarity_score))| DuplicateGroup {
                representative: representative.clone(),
                duplicates,
                similarity_score,
            })
            .collect();

        let duplicates_removed = total - unique.len();
        if duplicates_removed > 0 {
            info!(
                "🧹 去重: {} → {} (移除 {}, {} 组)",
                total,
                unique.len(),
                duplicates_removed,
                duplicate_groups.len()
            );
        }

        DeduplicationResult {
            unique_questions: unique,
            duplicates_removed,
            duplicate_groups,
        }
    }
}

/// 字面相似度
pub fn lexical_similarity(a: &Question, b: &Question) -> f64 {
    let weighted = TEXT_WEIGHT * text_similarity(&a.text, &b.text)
        + OPTIONS_WEIGHT * options_similarity(a, b)
        + TOPIC_WEIGHT * topic_similarity(&a.topic, &b.topic)
        + KEYWORDS_WEIGHT * keyword_similarity(&a.keywords, &b.keywords);
    (weighted / ACTIVE_WEIGHT).clamp(0.0, 1.0)
}

/// 选项相似度：每个选项取对方选项中的最佳匹配，双向平均
pub fn options_similarity(a: &Question, b: &Question) -> f64 {
    if a.options.is_empty() || b.options.is_empty() {
        return 0.0;
    }
    let forward = best_match_average(a, b);
    let backward = best_match_average(b, a);
    (forward + backward) / 2.0
}

fn best_match_average(from: &Question, to: &Question) -> f64 {
    let total: f64 = from
        .options
        .iter()
        .map(|option| {
            to.options
                .iter()
                .map(|other| text_similarity(&option.text, &other.text))
                .fold(0.0, f64::max)
        })
        .sum();
    total / from.options.len() as f64
}

/// 主题相似度
pub fn topic_similarity(a: &str, b: &str) -> f64 {
    let (na, nb) = (normalize(a), normalize(b));
    if na.is_empty() || nb.is_empty() {
        0.0
    } else if na == nb {
        1.0
    } else {
        text_similarity(&na, &nb)
    }
}

/// 关键词集合 Jaccard（忽略大小写）
pub fn keyword_similarity(a: &[String], b: &[String]) -> f64 {
    let set_a: HashSet<String> = a.iter().map(|k| normalize(k)).filter(|k| !k.is_empty()).collect();
    let set_b: HashSet<String> = b.iter().map(|k| normalize(k)).filter(|k| !k.is_empty()).collect();
    jaccard(&set_a, &set_b)
}

/// 语义相似度：关键概念 Jaccard 与题型意图匹配取最大值
pub fn semantic_similarity(a: &Question, b: &Question) -> f64 {
    let concepts_a: HashSet<String> = content_words(&a.text).into_iter().collect();
    let concepts_b: HashSet<String> = content_words(&b.text).into_iter().collect();
    let concept_score = jaccard(&concepts_a, &concepts_b);

    concept_score.max(intent_similarity(&a.text, &b.text))
}

/// 两道题匹配同一意图模式时：0.4 + 0.6 × 主语相似度；否则 0
pub fn intent_similarity(a: &str, b: &str) -> f64 {
    let (na, nb) = (normalize(a), normalize(b));
    for pattern in intent_patterns() {
        let subject_a = pattern.captures(&na).and_then(|c| c.get(1));
        let subject_b = pattern.captures(&nb).and_then(|c| c.get(1));
        match (subject_a, subject_b) {
            (Some(sa), Some(sb)) => {
                return INTENT_BASE + INTENT_SUBJECT_WEIGHT * text_similarity(sa.as_str(), sb.as_str());
            }
            // 只有一方匹配时意图不同
            (Some(_), None) | (None, Some(_)) => return 0.0,
            (None, None) => {}
        }
    }
    0.0
}

/// 批次多样性：1 - 去停用词后题干两两相似度的平均值
///
/// 少于两道题时返回 1.0。
pub fn calculate_batch_diversity(candidates: &[Question]) -> f64 {
    if candidates.len() < 2 {
        return 1.0;
    }

    let stems: Vec<String> = candidates.iter().map(|q| content_words(&q.text).join(" ")).collect();

    let mut total = 0.0;
    let mut pairs = 0usize;
    for i in 0..stems.len() {
        for j in (i + 1)..stems.len() {
            total += text_similarity(&stems[i], &stems[j]);
            pairs += 1;
        }
    }

    (1.0 - total / pairs as f64).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{content_hash, QuestionOption, LOCAL_PROVIDER_NAME};

    fn question(text: &str, options: [&str; 4], provider: &str) -> Question {
        let mut q = Question {
            text: text.into(),
            options: options
                .iter()
                .enumerate()
                .map(|(i, o)| QuestionOption::new(["a", "b", "c", "d"][i], *o, i == 0))
                .collect(),
            topic: "biology".into(),
            ..Default::default()
        };
        q.metadata.provider_name = provider.into();
        q.metadata.content_hash = content_hash(text);
        q
    }

    #[test]
    fn test_near_identical_questions_are_collapsed() {
        let a = question(
            "What pigment do green plants use to capture sunlight for photosynthesis?",
            ["Chlorophyll", "Carotene", "Melanin", "Hemoglobin"],
            "groq",
        );
        let b = question(
            "What pigment do green plants use to capture sunlight during photosynthesis?",
            ["Melanin", "Hemoglobin", "Chlorophyll", "Carotene"],
            "openai",
        );
        let result = Deduplicator::default().deduplicate(vec![a.clone(), b]);
        assert_eq!(result.duplicates_removed, 1);
        assert_eq!(result.unique_questions.len(), 1);
        assert_eq!(result.unique_questions[0].id, a.id);
        assert_eq!(result.duplicate_groups.len(), 1);
        assert_eq!(result.duplicate_groups[0].representative.id, a.id);
        assert!(result.duplicate_groups[0].similarity_score > 0.65);
    }

    #[test]
    fn test_distinct_questions_are_kept() {
        let a = question(
            "What pigment do green plants use to capture sunlight?",
            ["Chlorophyll", "Carotene", "Melanin", "Hemoglobin"],
            "groq",
        );
        let b = question(
            "Which gas is released into the atmosphere as a byproduct of photosynthesis?",
            ["Oxygen", "Nitrogen", "Methane", "Argon"],
            "groq",
        );
        let result = Deduplicator::default().deduplicate(vec![a, b]);
        assert_eq!(result.duplicates_removed, 0);
        assert!(result.duplicate_groups.is_empty());
    }

    #[test]
    fn test_exact_hash_match_is_duplicate() {
        let a = question("Where is ATP made?", ["Mitochondria", "Nucleus", "Wall", "Vacuole"], "groq");
        let b = question("where  is ATP   made?", ["Ribosome", "Cytoplasm", "Membrane", "Golgi"], "openai");
        assert!((Deduplicator::default().similarity(&a, &b) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_local_provenance_uses_relaxed_threshold() {
        let a = question(
            "Which statement best describes chlorophyll according to the passage?",
            ["Chlorophyll absorbs light", "It stores water", "It makes roots", "It releases heat"],
            LOCAL_PROVIDER_NAME,
        );
        let b = question(
            "Which statement best describes chloroplasts according to the passage?",
            ["Chloroplasts hold pigment", "They store water", "They make roots", "They release heat"],
            LOCAL_PROVIDER_NAME,
        );
        let dedup = Deduplicator::default();
        assert!((dedup.threshold_for(&a, &b) - 0.98).abs() < 1e-9);
        assert!(!dedup.is_duplicate(&a, &b));
    }

    #[test]
    fn test_similarity_is_symmetric() {
        let a = question(
            "What is the primary function of chlorophyll in leaves?",
            ["Absorb light", "Store sugar", "Carry water", "Release carbon"],
            "groq",
        );
        let b = question(
            "What is the primary role of stomata in leaves?",
            ["Gas exchange", "Absorb light", "Store sugar", "Anchor roots"],
            LOCAL_PROVIDER_NAME,
        );
        let dedup = Deduplicator::default();
        assert!((dedup.similarity(&a, &b) - dedup.similarity(&b, &a)).abs() < 1e-12);
        assert_eq!(dedup.threshold_for(&a, &b), dedup.threshold_for(&b, &a));
    }

    #[test]
    fn test_intent_match_scores_subject() {
        let same = intent_similarity(
            "What is the primary function of chlorophyll?",
            "What is the primary function of chlorophyll pigments?",
        );
        assert!(same > 0.8);
        let different = intent_similarity(
            "What is the primary function of chlorophyll?",
            "Why does the ocean look blue?",
        );
        assert_eq!(different, 0.0);
    }

    #[test]
    fn test_deduplicate_is_idempotent() {
        let pool = vec![
            question("What pigment captures sunlight in plants?", ["Chlorophyll", "Melanin", "Keratin", "Opsin"], "groq"),
            question("What pigment captures the sunlight in plants?", ["Melanin", "Chlorophyll", "Opsin", "Keratin"], "groq"),
            question("Which gas do plants release during photosynthesis?", ["Oxygen", "Neon", "Argon", "Helium"], "groq"),
            question("Where in the cell does photosynthesis take place?", ["Chloroplast", "Nucleus", "Ribosome", "Vacuole"], "openai"),
            question("Which gas do plants release while performing photosynthesis?", ["Oxygen", "Argon", "Neon", "Helium"], "openai"),
        ];
        let dedup = Deduplicator::default();
        let first = dedup.deduplicate(pool);
        assert!(first.duplicates_removed >= 2);

        let second = dedup.deduplicate(first.unique_questions.clone());
        assert_eq!(second.duplicates_removed, 0);
        assert_eq!(second.unique_questions.len(), first.unique_questions.len());

        // 接受的题目两两不超过阈值
        let unique = &first.unique_questions;
        for i in 0..unique.len() {
            for j in (i + 1)..unique.len() {
                assert!(dedup.similarity(&unique[i], &unique[j]) <= dedup.threshold_for(&unique[i], &unique[j]));
            }
        }
    }

    #[test]
    fn test_batch_diversity() {
        let single = vec![question("Only one?", ["a", "b", "c", "d"], "groq")];
        assert_eq!(calculate_batch_diversity(&single), 1.0);

        let repeated: Vec<Question> = (0..3)
            .map(|_| question("What pigment captures sunlight?", ["a", "b", "c", "d"], "groq"))
            .collect();
        assert!(calculate_batch_diversity(&repeated) < 0.01);

        let varied = vec![
            question("What pigment captures sunlight?", ["a", "b", "c", "d"], "groq"),
            question("Which gas escapes through stomata?", ["a", "b", "c", "d"], "groq"),
            question("How long did the Roman Empire last?", ["a", "b", "c", "d"], "groq"),
        ];
        assert!(calculate_batch_diversity(&varied) > 0.7);
    }
}
