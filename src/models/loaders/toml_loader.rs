use crate::error::{AppError, AppResult};
use crate::models::generation::GenerationRequest;
use std::path::Path;
use tokio::fs;

/// 从 TOML 文件加载生成请求
///
/// 文件格式：
/// ```toml
/// target_count = 10
/// difficulty_mix = ["easy", "medium", "hard"]
/// topics = ["photosynthesis"]
/// content = """..."""
/// # 或者用 content_file 指向一个纯文本文件（相对于 TOML 所在目录）
/// ```
pub async fn load_request_from_toml(toml_file_path: &Path) -> AppResult<GenerationRequest> {
    let path_display = toml_file_path.display().to_string();
    let content = fs::read_to_string(toml_file_path)
        .await
        .map_err(|e| AppError::file_read_failed(&path_display, e))?;

    let raw: RawRequest =
        toml::from_str(&content).map_err(|e| AppError::toml_parse_failed(&path_display, e))?;

    let body = match (raw.content, raw.content_file) {
        (Some(text), _) => text,
        (None, Some(file)) => {
            let base = toml_file_path.parent().unwrap_or_else(|| Path::new("."));
            let text_path = base.join(&file);
            tracing::info!("正在读取内容文件: {}", text_path.display());
            fs::read_to_string(&text_path)
                .await
                .map_err(|e| AppError::file_read_failed(text_path.display().to_string(), e))?
        }
        (None, None) => {
            return Err(AppError::Other(format!(
                "请求文件 {} 缺少 content 或 content_file",
                path_display
            )))
        }
    };

    Ok(GenerationRequest {
        content: body,
        difficulty_mix: raw.difficulty_mix,
        target_count: raw.target_count,
        topics: raw.topics,
    })
}

/// 直接从纯文本构建请求
pub fn load_request_from_text(text: impl Into<String>, target_count: usize) -> GenerationRequest {
    GenerationRequest::new(text, target_count)
}

#[derive(Debug, serde::Deserialize)]
struct RawRequest {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    content_file: Option<String>,
    #[serde(default)]
    difficulty_mix: Vec<crate::models::question::Difficulty>,
    #[serde(default = "default_target_count")]
    target_count: usize,
    #[serde(default)]
    topics: Option<Vec<String>>,
}

fn default_target_count() -> usize {
    10
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::question::Difficulty;

    #[tokio::test]
    async fn test_load_request_with_inline_content() {
        let dir = std::env::temp_dir().join(format!("qg-loader-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("request.toml");
        std::fs::write(
            &path,
            "target_count = 4\ndifficulty_mix = [\"easy\", \"hard\"]\ncontent = \"Some body text.\"\n",
        )
        .unwrap();

        let request = load_request_from_toml(&path).await.unwrap();
        assert_eq!(request.target_count, 4);
        assert_eq!(request.difficulty_mix, vec![Difficulty::Easy, Difficulty::Hard]);
        assert_eq!(request.content, "Some body text.");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_load_request_with_content_file() {
        let dir = std::env::temp_dir().join(format!("qg-loader-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("article.txt"), "Article body.").unwrap();
        let path = dir.join("request.toml");
        std::fs::write(&path, "content_file = \"article.txt\"\n").unwrap();

        let request = load_request_from_toml(&path).await.unwrap();
        assert_eq!(request.content, "Article body.");
        assert_eq!(request.target_count, 10);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_missing_content_is_error() {
        let dir = std::env::temp_dir().join(format!("qg-loader-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("request.toml");
        std::fs::write(&path, "target_count = 3\n").unwrap();

        assert!(load_request_from_toml(&path).await.is_err());

        std::fs::remove_dir_all(&dir).ok();
    }
}
