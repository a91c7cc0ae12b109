//! 提示词构建 - 业务能力层
//!
//! 所有服务共用同一份提示词格式。本地模板生成器也通过这份格式
//! 读回内容、题目数量和难度，因此渲染和解析放在同一个模块里。

use patterns::{content_re, count_re, difficulty_re, topics_re};

use crate::models::{ContentChunk, Difficulty};

/// 系统消息
pub const SYSTEM_MESSAGE: &str = "You are an expert exam author. You write clear, unambiguous \
multiple-choice questions grounded strictly in the provided source text. \
Respond ONLY with a JSON array, no prose and no markdown.";

/// 一次批量生成的提示词参数
#[derive(Debug, Clone, PartialEq)]
pub struct PromptInput {
    pub content: String,
    pub count: usize,
    pub difficulty: Difficulty,
    pub topics: Vec<String>,
}

impl PromptInput {
    pub fn for_chunk(chunk: &ContentChunk, count: usize, difficulty: Difficulty, topics: &[String]) -> Self {
        Self {
            content: chunk.text.clone(),
            count,
            difficulty,
            topics: topics.to_vec(),
        }
    }
}

/// 渲染提示词
pub fn build_prompt(input: &PromptInput) -> String {
    let topics_line = if input.topics.is_empty() {
        "Focus topics: any".to_string()
    } else {
        format!("Focus topics: {}", input.topics.join(", "))
    };

    format!(
        r#"Generate {count} multiple-choice questions.
Difficulty: {difficulty}
{topics_line}

Rules:
1. Every question has exactly 4 options and exactly one correct option.
2. Questions must be answerable from the source text alone.
3. End every question with a question mark.
4. Avoid "all of the above", "none of the above" and double negatives.
5. Vary the position of the correct option.
6. Each question must test a different fact or concept.

Return a JSON array where each item looks like:
{{"question": "...", "options": [{{"text": "...", "isCorrect": true}}, {{"text": "...", "isCorrect": false}}, {{"text": "...", "isCorrect": false}}, {{"text": "...", "isCorrect": false}}], "explanation": "...", "difficulty": "{difficulty}", "topic": "...", "keywords": ["..."], "sourceExcerpt": "exact sentence from the source", "confidence": 0.9}}

<content>
{content}
</content>"#,
        count = input.count,
        difficulty = input.difficulty,
        topics_line = topics_line,
        content = input.content,
    )
}

/// 从提示词中读回参数（本地模板生成器使用）
pub fn parse_prompt(prompt: &str) -> Option<PromptInput> {
    let content = content_re()
        .captures(prompt)
        .and_then(|cap| cap.get(1))
        .map(|m| m.as_str().trim().to_string())?;

    let count = count_re()
        .captures(prompt)
        .and_then(|cap| cap.get(1))
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(5);

    let difficulty = difficulty_re()
        .captures(prompt)
        .and_then(|cap| cap.get(1))
        .and_then(|m| Difficulty::parse(m.as_str()))
        .unwrap_or_default();

    let topics = topics_re()
        .captures(prompt)
        .and_then(|cap| cap.get(1))
        .map(|m| {
            m.as_str()
                .split(',')
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty() && t != "any")
                .collect()
        })
        .unwrap_or_default();

    Some(PromptInput {
        content,
        count,
        difficulty,
        topics,
    })
}

/// 提示词解析用到的正则，只编译一次
mod patterns {
    use regex::Regex;
    use std::sync::OnceLock;

    macro_rules! cached_regex {
        ($name:ident, $pattern:expr) => {
            pub fn $name() -> &'static Regex {
                static RE: OnceLock<Regex> = OnceLock::new();
                RE.get_or_init(|| Regex::new($pattern).expect("内置正则必须合法"))
            }
        };
    }

    cached_regex!(content_re, r"(?s)<content>\s*(.*?)\s*</content>");
    cached_regex!(count_re, r"(?m)^Generate (\d+) multiple-choice questions");
    cached_regex!(difficulty_re, r"(?m)^Difficulty: (\w+)");
    cached_regex!(topics_re, r"(?m)^Focus topics: (.*)$");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_round_trips_parameters() {
        let input = PromptInput {
            content: "Chlorophyll absorbs light. Plants release oxygen.".into(),
            count: 6,
            difficulty: Difficulty::Hard,
            topics: vec!["biology".into(), "plants".into()],
        };
        let prompt = build_prompt(&input);
        assert!(prompt.contains("Generate 6 multiple-choice questions."));
        assert_eq!(parse_prompt(&prompt), Some(input));
    }

    #[test]
    fn test_prompt_without_topics() {
        let chunk = ContentChunk::new(0, "Some source text.", 0, 17);
        let input = PromptInput::for_chunk(&chunk, 3, Difficulty::Easy, &[]);
        let parsed = parse_prompt(&build_prompt(&input)).unwrap();
        assert!(parsed.topics.is_empty());
        assert_eq!(parsed.count, 3);
    }

    #[test]
    fn test_parse_prompt_without_content_block() {
        assert_eq!(parse_prompt("Generate 3 multiple-choice questions."), None);
    }
}
