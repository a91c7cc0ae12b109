use std::path::Path;

use anyhow::{Context, Result};
use tokio::io::AsyncReadExt;
use tracing::info;

use question_generator::models::{load_request_from_text, load_request_from_toml, GenerationRequest};
use question_generator::utils::logging;
use question_generator::{AppError, Config, GenerationCoordinator};

/// 用法:
///   question-generator request.toml
///   cat article.txt | question-generator
#[tokio::main]
async fn main() -> Result<()> {
    // 加载配置
    let config = Config::from_env();

    // 初始化日志
    logging::init(config.verbose_logging);

    let request = read_request(config.target_count).await?;

    let coordinator = GenerationCoordinator::new(config.clone());
    logging::log_startup(&config, &coordinator.orchestrator().registry().names());

    let result = coordinator.generate(&request).await;
    let json = serde_json::to_string_pretty(&result).context("序列化生成结果失败")?;

    match &config.output_file {
        Some(path) => {
            tokio::fs::write(path, json)
                .await
                .map_err(|e| AppError::file_write_failed(path, e))?;
            info!("✓ 结果已写入 {}", path);
        }
        None => println!("{}", json),
    }

    if !result.success {
        std::process::exit(1);
    }
    Ok(())
}

/// 读取生成请求：有参数时读取 TOML 文件，否则从标准输入读取纯文本
async fn read_request(target_count: usize) -> Result<GenerationRequest> {
    if let Some(path) = std::env::args().nth(1) {
        info!("正在读取请求文件: {}", path);
        return Ok(load_request_from_toml(Path::new(&path)).await?);
    }

    let mut text = String::new();
    tokio::io::stdin()
        .read_to_string(&mut text)
        .await
        .context("读取标准输入失败")?;
    Ok(load_request_from_text(text, target_count))
}
