//! 质量校验 - 业务能力层
//!
//! 每道候选题从 1.0 分开始扣分：
//! - 结构问题（正确选项缺失/重复、题干过短等）每项 0.15
//! - 表述问题（模糊量词、双重否定、缺少问号、过长）每项 0.1
//! - 难度不符（声明难度与认知层级关键词不一致）每项 0.1
//! - 相关性问题（与原文摘录共享的实词太少）每项 0.2
//!
//! 分数 ≥ 0.5 且没有高严重度的结构问题才算有效。
//! 本地模板生成的题目由构造保证结构正确，放宽高严重度门槛和相关性门槛。

use std::collections::HashSet;
use std::fmt;

use tracing::debug;

use crate::models::question::OPTION_COUNT;
use crate::models::{Difficulty, Question};
use crate::services::text_similarity::{normalize, shared_content_words, words};

const STRUCTURAL_PENALTY: f64 = 0.15;
const CLARITY_PENALTY: f64 = 0.1;
const DIFFICULTY_PENALTY: f64 = 0.1;
const RELEVANCE_PENALTY: f64 = 0.2;

/// 有效题目的最低分
const VALID_SCORE: f64 = 0.5;

const MIN_TEXT_CHARS: usize = 10;
const MAX_TEXT_CHARS: usize = 300;

/// 与原文摘录至少共享的实词数
const MIN_SHARED_WORDS: usize = 2;
const MIN_SHARED_WORDS_LOCAL: usize = 1;

const AMBIGUOUS_QUANTIFIERS: [&str; 9] = [
    "some", "sometimes", "usually", "often", "generally", "probably", "maybe", "might", "several",
];

const NEGATIONS: [&str; 7] = ["not", "no", "never", "none", "neither", "nor", "cannot"];

const CATCH_ALL_OPTIONS: [&str; 2] = ["all of the above", "none of the above"];

/// 高认知层级关键词（分析、评价、推断）
const HIGHER_ORDER_CUES: [&str; 14] = [
    "why", "analyze", "analyse", "evaluate", "infer", "inferred", "implication", "implies",
    "compare", "contrast", "justify", "predict", "conclude", "consequence",
];

/// 记忆类关键词
const RECALL_CUES: [&str; 6] = ["what is", "define", "definition of", "name the", "list the", "identify"];

/// 问题类别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueCategory {
    Structural,
    Clarity,
    Difficulty,
    Relevance,
}

impl IssueCategory {
    fn penalty(self) -> f64 {
        match self {
            IssueCategory::Structural => STRUCTURAL_PENALTY,
            IssueCategory::Clarity => CLARITY_PENALTY,
            IssueCategory::Difficulty => DIFFICULTY_PENALTY,
            IssueCategory::Relevance => RELEVANCE_PENALTY,
        }
    }
}

/// 严重程度
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Low,
    Medium,
    High,
}

/// 单条校验问题
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationIssue {
    pub category: IssueCategory,
    pub severity: Severity,
    pub message: String,
}

impl ValidationIssue {
    fn new(category: IssueCategory, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            category,
            severity,
            message: message.into(),
        }
    }

    fn is_blocking(&self) -> bool {
        self.category == IssueCategory::Structural && self.severity == Severity::High
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}/{:?}] {}", self.category, self.severity, self.message)
    }
}

/// 校验结果
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub score: f64,
    pub issues: Vec<ValidationIssue>,
}

/// 质量校验器
#[derive(Debug, Default, Clone)]
pub struct QualityValidator;

impl QualityValidator {
    pub fn new() -> Self {
        Self
    }

    /// 校验单道候选题
    pub fn validate(&self, candidate: &Question) -> ValidationReport {
        let local = candidate.is_local();

        let mut issues = Vec::new();
        check_structure(candidate, &mut issues);
        check_clarity(candidate, &mut issues);
        check_difficulty(candidate, &mut issues);
        check_relevance(candidate, local, &mut issues);

        let penalty: f64 = issues.iter().map(|i| i.category.penalty()).sum();
        let score = (1.0 - penalty).clamp(0.0, 1.0);
        let blocked = !local && issues.iter().any(ValidationIssue::is_blocking);

        ValidationReport {
            is_valid: score >= VALID_SCORE && !blocked,
            score,
            issues,
        }
    }

    /// 过滤出高质量题目，并把分数写入元数据
    pub fn filter_high_quality(&self, candidates: Vec<Question>, min_score: f64) -> Vec<Question> {
        let total = candidates.len();
        let kept: Vec<Question> = candidates
            .into_iter()
            .filter_map(|mut candidate| {
                let report = self.validate(&candidate);
                candidate.metadata.quality_score = report.score;
                if report.is_valid && report.score >= min_score {
                    Some(candidate)
                } else {
                    debug!(
                        "丢弃候选题 (分数 {:.2}): {} | {}",
                        report.score,
                        crate::utils::logging::truncate_text(&candidate.text, 50),
                        report.issues.iter().map(|i| i.to_string()).collect::<Vec<_>>().join("; ")
                    );
                    None
                }
            })
            .collect();

        if kept.len() < total {
            debug!("质量过滤: {}/{} 通过", kept.len(), total);
        }
        kept
    }
}

fn check_structure(candidate: &Question, issues: &mut Vec<ValidationIssue>) {
    use IssueCategory::Structural;

    if candidate.options.len() != OPTION_COUNT {
        issues.push(ValidationIssue::new(
            Structural,
            Severity::High,
            format!("选项数量为 {}，应为 {}", candidate.options.len(), OPTION_COUNT),
        ));
    }

    match candidate.correct_count() {
        0 => issues.push(ValidationIssue::new(Structural, Severity::High, "缺少正确选项")),
        1 => {}
        n => issues.push(ValidationIssue::new(Structural, Severity::High, format!("{} 个正确选项", n))),
    }

    if candidate.text.trim().chars().count() < MIN_TEXT_CHARS {
        issues.push(ValidationIssue::new(Structural, Severity::High, "题干过短"));
    }

    if candidate.options.iter().any(|o| o.text.trim().is_empty()) {
        issues.push(ValidationIssue::new(Structural, Severity::Medium, "存在空选项"));
    }

    let distinct: HashSet<String> = candidate.options.iter().map(|o| normalize(&o.text)).collect();
    if distinct.len() < candidate.options.len() {
        issues.push(ValidationIssue::new(Structural, Severity::Medium, "存在重复选项"));
    }
}

fn check_clarity(candidate: &Question, issues: &mut Vec<ValidationIssue>) {
    use IssueCategory::Clarity;

    let tokens = words(&candidate.text);

    if let Some(q) = tokens.iter().find(|w| AMBIGUOUS_QUANTIFIERS.contains(&w.as_str())) {
        issues.push(ValidationIssue::new(Clarity, Severity::Low, format!("模糊量词 \"{}\"", q)));
    }

    let negations = tokens.iter().filter(|w| NEGATIONS.contains(&w.as_str())).count()
        + candidate.text.to_lowercase().matches("n't").count();
    if negations >= 2 {
        issues.push(ValidationIssue::new(Clarity, Severity::Medium, "双重否定"));
    }

    if !candidate.text.trim_end().ends_with('?') {
        issues.push(ValidationIssue::new(Clarity, Severity::Low, "题干没有以问号结尾"));
    }

    if candidate.text.chars().count() > MAX_TEXT_CHARS {
        issues.push(ValidationIssue::new(Clarity, Severity::Low, "题干过长"));
    }

    let has_catch_all = candidate
        .options
        .iter()
        .any(|o| CATCH_ALL_OPTIONS.contains(&normalize(&o.text).as_str()));
    if has_catch_all {
        issues.push(ValidationIssue::new(Clarity, Severity::Low, "使用了\"以上全部/以上都不是\"选项"));
    }
}

fn check_difficulty(candidate: &Question, issues: &mut Vec<ValidationIssue>) {
    let normalized = normalize(&candidate.text);
    let tokens: HashSet<&str> = normalized.split(' ').collect();

    let higher_order = HIGHER_ORDER_CUES.iter().any(|cue| tokens.contains(cue));
    let recall = RECALL_CUES.iter().any(|cue| normalized.contains(cue));

    let mismatch = match candidate.difficulty {
        Difficulty::Easy => higher_order,
        Difficulty::Hard => recall && !higher_order,
        Difficulty::Medium => false,
    };

    if mismatch {
        issues.push(ValidationIssue::new(
            IssueCategory::Difficulty,
            Severity::Low,
            format!("声明难度 {} 与题干的认知层级不符", candidate.difficulty),
        ));
    }
}

fn check_relevance(candidate: &Question, local: bool, issues: &mut Vec<ValidationIssue>) {
    if candidate.source_excerpt.trim().is_empty() {
        issues.push(ValidationIssue::new(IssueCategory::Relevance, Severity::Medium, "缺少原文摘录"));
        return;
    }

    let mut answered = candidate.text.clone();
    if let Some(correct) = candidate.correct_option() {
        answered.push(' ');
        answered.push_str(&correct.text);
    }

    let required = if local { MIN_SHARED_WORDS_LOCAL } else { MIN_SHARED_WORDS };
    let shared = shared_content_words(&answered, &candidate.source_excerpt);
    if shared < required {
        issues.push(ValidationIssue::new(
            IssueCategory::Relevance,
            Severity::Medium,
            format!("与原文摘录只共享 {} 个实词 (至少 {})", shared, required),
        ));
    }
}
