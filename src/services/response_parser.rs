//! 响应解析 - 业务能力层
//!
//! 把服务返回的"近似 JSON"文本转换成候选题：
//! 1. 去掉 markdown 代码块标记
//! 2. 去掉 `//` 和 `/* */` 注释（字符串内的不动）
//! 3. 去掉 `]` / `}` 前多余的逗号
//! 4. 提取第一个顶层数组（前后可以有多余文字）
//!
//! 解析失败时返回空列表，由编排层的软失败路径处理。

use regex::Regex;
use serde_json::Value as JsonValue;
use std::sync::OnceLock;
use tracing::{debug, warn};

use crate::error::ParseError;
use crate::models::question::{OPTION_COUNT, OPTION_IDS};
use crate::models::{content_hash, Difficulty, Question, QuestionMetadata, QuestionOption};

/// 选项不足 4 个时补充的干扰项
const SYNTHETIC_DISTRACTORS: [&str; 5] = [
    "It is not stated in the source text",
    "The opposite of what the text describes",
    "A claim unrelated to the topic of the text",
    "It cannot be determined from the passage",
    "An exception the text explicitly rules out",
];

/// 服务未给出置信度时的默认值
const DEFAULT_CONFIDENCE: f64 = 0.8;

const TEXT_KEYS: [&str; 5] = ["question", "text", "questionText", "prompt", "stem"];
const OPTION_KEYS: [&str; 3] = ["options", "choices", "answers"];
const OPTION_TEXT_KEYS: [&str; 4] = ["text", "option", "value", "label"];
const OPTION_CORRECT_KEYS: [&str; 3] = ["isCorrect", "is_correct", "correct"];
const ANSWER_KEYS: [&str; 4] = ["correctAnswer", "correct_answer", "answer", "correctOption"];
const EXCERPT_KEYS: [&str; 4] = ["sourceExcerpt", "source_excerpt", "source", "excerpt"];
const WRAPPER_KEYS: [&str; 4] = ["questions", "items", "data", "results"];

/// 响应解析器
#[derive(Debug, Default, Clone)]
pub struct ResponseParser;

impl ResponseParser {
    pub fn new() -> Self {
        Self
    }

    /// 解析原始文本，失败时返回空列表
    pub fn parse(&self, raw_text: &str) -> Vec<Question> {
        match self.try_parse(raw_text) {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!("解析服务响应失败，按空批次处理: {}", e);
                Vec::new()
            }
        }
    }

    /// 解析原始文本，返回详细错误
    pub fn try_parse(&self, raw_text: &str) -> Result<Vec<Question>, ParseError> {
        let cleaned = sanitize_json(&strip_code_fences(raw_text));
        let value = extract_payload(&cleaned)?;

        let items = match value {
            JsonValue::Array(items) => items,
            JsonValue::Object(_) => vec![value],
            _ => return Err(ParseError::NoJsonArray),
        };

        let total = items.len();
        let candidates: Vec<Question> = items.iter().filter_map(normalize_candidate).collect();
        if candidates.len() < total {
            debug!("丢弃 {} 个无效候选题 (共 {})", total - candidates.len(), total);
        }
        Ok(candidates)
    }
}

/// 去掉 markdown 代码块标记
fn strip_code_fences(text: &str) -> String {
    static FENCE: OnceLock<Option<Regex>> = OnceLock::new();
    let fence = FENCE.get_or_init(|| Regex::new(r"```[A-Za-z0-9_-]*").ok());
    match fence {
        Some(re) => re.replace_all(text, "").into_owned(),
        None => text.replace("```", ""),
    }
}

/// 去掉注释和多余逗号，字符串内容保持不变
fn sanitize_json(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            i += 1;
            continue;
        }

        match c {
            '"' => {
                in_string = true;
                out.push(c);
                i += 1;
            }
            '/' if chars.get(i + 1) == Some(&'/') => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            '/' if chars.get(i + 1) == Some(&'*') => {
                i += 2;
                while i < chars.len() && !(chars[i] == '*' && chars.get(i + 1) == Some(&'/')) {
                    i += 1;
                }
                i = (i + 2).min(chars.len());
            }
            ',' => {
                let next = chars[i + 1..].iter().find(|ch| !ch.is_whitespace());
                if !matches!(next, Some(']') | Some('}')) {
                    out.push(c);
                }
                i += 1;
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }

    out
}

/// 找到第一个能解析出候选题的顶层 JSON 值
///
/// 按出现顺序尝试每个 `[` / `{`，前面文字里的括号解析失败时继续往后找。
fn extract_payload(text: &str) -> Result<JsonValue, ParseError> {
    let mut last_error = None;

    for (start, b) in text.bytes().enumerate() {
        if b != b'[' && b != b'{' {
            continue;
        }
        let Some(end) = matching_close(text, start) else {
            continue;
        };

        match serde_json::from_str::<JsonValue>(&text[start..=end]) {
            // 对象可能是 {"questions": [...]} 这样的包装，或者单个题目
            Ok(value) if b == b'{' => {
                if let Some(inner) = unwrap_object(&value) {
                    return Ok(inner);
                }
            }
            Ok(value) if is_candidate_array(&value) => return Ok(value),
            Ok(_) => {}
            Err(source) => {
                debug!("位置 {} 的括号不是有效 JSON，继续查找: {}", start, source);
                last_error = Some(source);
            }
        }
    }

    Err(last_error.map_or(ParseError::NoJsonArray, |source| ParseError::InvalidJson { source }))
}

/// 空数组或包含对象的数组
fn is_candidate_array(value: &JsonValue) -> bool {
    match value {
        JsonValue::Array(items) => items.is_empty() || items.iter().any(JsonValue::is_object),
        _ => false,
    }
}

/// 包装对象中取出题目数组；单个题目对象原样返回
fn unwrap_object(value: &JsonValue) -> Option<JsonValue> {
    let object = value.as_object()?;
    for key in WRAPPER_KEYS {
        if let Some(inner @ JsonValue::Array(_)) = object.get(key) {
            return Some(inner.clone());
        }
    }
    if TEXT_KEYS.iter().any(|k| object.contains_key(*k)) {
        return Some(value.clone());
    }
    None
}

/// 括号匹配，返回与 `open_pos` 处括号配对的位置（字节）
fn matching_close(text: &str, open_pos: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    let open = bytes[open_pos];
    let close = match open {
        b'[' => b']',
        b'{' => b'}',
        _ => return None,
    };

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[open_pos..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            _ if b == open => depth += 1,
            _ if b == close => {
                depth -= 1;
                if depth == 0 {
                    return Some(open_pos + offset);
                }
            }
            _ => {}
        }
    }
    None
}

fn first_string(object: &serde_json::Map<String, JsonValue>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| object.get(*k))
        .filter_map(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .find(|s| !s.is_empty())
}

/// 去掉 "A) " "b. " "(c) " 之类的选项前缀
fn strip_option_label(text: &str) -> String {
    static LABEL: OnceLock<Option<Regex>> = OnceLock::new();
    let label = LABEL.get_or_init(|| Regex::new(r"^\(?[A-Da-d][\).:]\s+").ok());
    match label {
        Some(re) => re.replace(text.trim(), "").trim().to_string(),
        None => text.trim().to_string(),
    }
}

/// 提取选项 (文本, 是否正确)
fn extract_options(object: &serde_json::Map<String, JsonValue>) -> Vec<(String, bool)> {
    let raw = OPTION_KEYS.iter().find_map(|k| object.get(*k));
    let entries: Vec<&JsonValue> = match raw {
        Some(JsonValue::Array(items)) => items.iter().collect(),
        Some(JsonValue::Object(map)) => map.values().collect(),
        _ => Vec::new(),
    };

    entries
        .into_iter()
        .filter_map(|entry| match entry {
            JsonValue::String(s) => Some((strip_option_label(s), false)),
            JsonValue::Object(opt) => {
                let text = first_string(opt, &OPTION_TEXT_KEYS)?;
                let correct = OPTION_CORRECT_KEYS
                    .iter()
                    .filter_map(|k| opt.get(*k))
                    .any(|v| v.as_bool().unwrap_or(false));
                Some((strip_option_label(&text), correct))
            }
            JsonValue::Number(n) => Some((n.to_string(), false)),
            _ => None,
        })
        .filter(|(text, _)| !text.is_empty())
        .collect()
}

/// 根据 correctAnswer 字段推断正确选项下标
fn resolve_answer_index(value: &JsonValue, options: &[(String, bool)]) -> Option<usize> {
    match value {
        JsonValue::Number(n) => {
            let n = n.as_u64()? as usize;
            if n < options.len() {
                Some(n)
            } else if n == options.len() && n > 0 {
                // 1-based 下标
                Some(n - 1)
            } else {
                None
            }
        }
        JsonValue::String(s) => {
            let trimmed = s.trim();
            let letter = strip_option_label(&format!("{} ", trimmed));
            if trimmed.len() == 1 || (letter.is_empty() && trimmed.len() <= 3) {
                let c = trimmed.chars().find(|c| c.is_ascii_alphabetic())?;
                let idx = (c.to_ascii_lowercase() as u8).checked_sub(b'a')? as usize;
                if idx < options.len() {
                    return Some(idx);
                }
            }
            let wanted = strip_option_label(trimmed).to_lowercase();
            options.iter().position(|(text, _)| text.to_lowercase() == wanted)
        }
        _ => None,
    }
}

fn extract_keywords(object: &serde_json::Map<String, JsonValue>) -> Vec<String> {
    match object.get("keywords").or_else(|| object.get("tags")) {
        Some(JsonValue::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        Some(JsonValue::String(s)) => s
            .split(',')
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .collect(),
        _ => Vec::new(),
    }
}

/// 单个候选题的规范化
///
/// - 没有题干的候选题直接丢弃
/// - 选项多于 4 个截断（保留正确选项），少于 4 个补充干扰项
/// - 没有标记正确选项时默认第一个，并记录修复
fn normalize_candidate(value: &JsonValue) -> Option<Question> {
    let object = value.as_object()?;

    let text = match first_string(object, &TEXT_KEYS) {
        Some(text) => text,
        None => {
            debug!("丢弃候选题: 题干为空");
            return None;
        }
    };

    let mut options = extract_options(object);

    // 没有在选项上标记正确答案时，尝试 correctAnswer 字段
    if !options.iter().any(|(_, correct)| *correct) {
        if let Some(idx) = ANSWER_KEYS
            .iter()
            .filter_map(|k| object.get(*k))
            .find_map(|v| resolve_answer_index(v, &options))
        {
            options[idx].1 = true;
        }
    }

    // 多个正确选项只保留第一个
    let mut seen_correct = false;
    for option in options.iter_mut() {
        if option.1 {
            if seen_correct {
                warn!("修复: 题目 \"{}\" 标记了多个正确选项，只保留第一个", preview(&text));
                option.1 = false;
            }
            seen_correct = true;
        }
    }

    if options.len() > OPTION_COUNT {
        if let Some(correct_idx) = options.iter().position(|(_, c)| *c) {
            if correct_idx >= OPTION_COUNT {
                options.swap(correct_idx, OPTION_COUNT - 1);
            }
        }
        debug!("修复: 选项数 {} 截断为 {}", options.len(), OPTION_COUNT);
        options.truncate(OPTION_COUNT);
    }

    if options.len() < OPTION_COUNT {
        debug!("修复: 选项数 {} 补充到 {}", options.len(), OPTION_COUNT);
        for filler in SYNTHETIC_DISTRACTORS {
            if options.len() >= OPTION_COUNT {
                break;
            }
            if !options.iter().any(|(t, _)| t.eq_ignore_ascii_case(filler)) {
                options.push((filler.to_string(), false));
            }
        }
    }

    if !options.iter().any(|(_, correct)| *correct) {
        warn!("修复: 题目 \"{}\" 未标记正确选项，默认第一个为正确答案", preview(&text));
        options[0].1 = true;
    }

    let options: Vec<QuestionOption> = options
        .into_iter()
        .zip(OPTION_IDS)
        .map(|((text, correct), id)| QuestionOption::new(id, text, correct))
        .collect();

    let difficulty = object
        .get("difficulty")
        .and_then(|v| v.as_str())
        .and_then(Difficulty::parse)
        .unwrap_or_default();

    let confidence = object
        .get("confidence")
        .and_then(|v| v.as_f64())
        .map(|c| if c > 1.0 { c / 100.0 } else { c })
        .unwrap_or(DEFAULT_CONFIDENCE)
        .clamp(0.0, 1.0);

    Some(Question {
        options,
        explanation: first_string(object, &["explanation", "rationale"]).unwrap_or_default(),
        difficulty,
        topic: first_string(object, &["topic", "category"]).unwrap_or_default(),
        keywords: extract_keywords(object),
        source_excerpt: first_string(object, &EXCERPT_KEYS).unwrap_or_default(),
        metadata: QuestionMetadata {
            confidence,
            content_hash: content_hash(&text),
            ..Default::default()
        },
        text,
        ..Default::default()
    })
}

fn preview(text: &str) -> String {
    crate::utils::logging::truncate_text(text, 40)
}
