use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::models::provider::LOCAL_PROVIDER_NAME;

/// 每道选择题固定的选项数量
pub const OPTION_COUNT: usize = 4;

/// 选项编号
pub const OPTION_IDS: [&str; OPTION_COUNT] = ["a", "b", "c", "d"];

/// 题目难度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    #[default]
    Medium,
    Hard,
}

impl Difficulty {
    /// 获取标准名称
    pub fn as_str(self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
        }
    }

    /// 宽松解析服务返回的难度字符串
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "easy" | "beginner" | "basic" | "simple" => Some(Difficulty::Easy),
            "medium" | "intermediate" | "moderate" | "normal" => Some(Difficulty::Medium),
            "hard" | "advanced" | "difficult" | "expert" => Some(Difficulty::Hard),
            _ => None,
        }
    }
}

impl std::fmt::Display for Difficulty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 题目类型（当前只支持单选题）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum QuestionType {
    #[default]
    #[serde(rename = "multiple-choice")]
    MultipleChoice,
}

/// 选项
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionOption {
    pub id: String,
    pub text: String,
    pub is_correct: bool,
}

impl QuestionOption {
    pub fn new(id: impl Into<String>, text: impl Into<String>, is_correct: bool) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            is_correct,
        }
    }
}

/// 题目元数据
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionMetadata {
    pub generated_at: DateTime<Utc>,
    pub provider_name: String,
    /// 服务自评置信度，[0, 1]
    pub confidence: f64,
    /// 质量校验分，[0, 1]
    pub quality_score: f64,
    pub processing_time_ms: u64,
    pub source_chunk_id: String,
    pub content_hash: String,
}

impl Default for QuestionMetadata {
    fn default() -> Self {
        Self {
            generated_at: Utc::now(),
            provider_name: String::new(),
            confidence: 0.0,
            quality_score: 0.0,
            processing_time_ms: 0,
            source_chunk_id: String::new(),
            content_hash: String::new(),
        }
    }
}

/// 题目（校验前称为候选题）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub id: String,
    #[serde(rename = "type")]
    pub question_type: QuestionType,
    pub text: String,
    pub options: Vec<QuestionOption>,
    pub explanation: String,
    pub difficulty: Difficulty,
    pub topic: String,
    pub keywords: Vec<String>,
    pub source_excerpt: String,
    pub metadata: QuestionMetadata,
}

impl Default for Question {
    fn default() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            question_type: QuestionType::MultipleChoice,
            text: String::new(),
            options: Vec::new(),
            explanation: String::new(),
            difficulty: Difficulty::Medium,
            topic: String::new(),
            keywords: Vec::new(),
            source_excerpt: String::new(),
            metadata: QuestionMetadata::default(),
        }
    }
}

impl Question {
    /// 正确选项数量
    pub fn correct_count(&self) -> usize {
        self.options.iter().filter(|o| o.is_correct).count()
    }

    /// 第一个正确选项
    pub fn correct_option(&self) -> Option<&QuestionOption> {
        self.options.iter().find(|o| o.is_correct)
    }

    /// 是否由本地模板生成器生成
    pub fn is_local(&self) -> bool {
        self.metadata.provider_name == LOCAL_PROVIDER_NAME
    }

    /// 满足"4 个选项且恰好一个正确"的不变量
    pub fn has_valid_options(&self) -> bool {
        self.options.len() == OPTION_COUNT && self.correct_count() == 1
    }
}

/// 计算题干的内容哈希（SHA-256，忽略大小写和空白差异）
pub fn content_hash(text: &str) -> String {
    let normalized = text
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_difficulty_parse_aliases() {
        assert_eq!(Difficulty::parse("Beginner"), Some(Difficulty::Easy));
        assert_eq!(Difficulty::parse(" advanced "), Some(Difficulty::Hard));
        assert_eq!(Difficulty::parse("medium"), Some(Difficulty::Medium));
        assert_eq!(Difficulty::parse("impossible"), None);
    }

    #[test]
    fn test_content_hash_ignores_case_and_spacing() {
        let a = content_hash("What is  the capital of France?");
        let b = content_hash("what is the capital\nof france?");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, content_hash("What is the capital of Spain?"));
    }

    #[test]
    fn test_question_serializes_with_type_tag() {
        let question = Question {
            text: "Which gas do plants absorb?".into(),
            options: vec![
                QuestionOption::new("a", "Carbon dioxide", true),
                QuestionOption::new("b", "Oxygen", false),
                QuestionOption::new("c", "Helium", false),
                QuestionOption::new("d", "Neon", false),
            ],
            ..Default::default()
        };
        let json = serde_json::to_value(&question).unwrap();
        assert_eq!(json["type"], "multiple-choice");
        assert_eq!(json["options"][0]["isCorrect"], true);
        assert!(question.has_valid_options());
        assert!(!question.is_local());
    }
}
