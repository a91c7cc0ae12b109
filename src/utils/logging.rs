//! 日志工具模块
//!
//! 提供日志初始化、格式化和输出的辅助函数

use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::models::GenerationMetadata;
use crate::workflow::ChunkCtx;

/// 初始化日志
///
/// `RUST_LOG` 优先；未设置时默认 `info`，详细模式下为 `debug`。
/// 重复调用不会报错（测试中常见）。
pub fn init(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

/// 记录程序启动信息
///
/// 只输出已配置密钥的服务名称，不输出密钥本身。
pub fn log_startup(config: &Config, providers: &[&str]) {
    info!("{}", "=".repeat(60));
    info!("🚀 题目生成启动");
    info!("🔌 生成服务: {}", providers.join(" → "));
    info!(
        "📐 分块 {} / 重叠 {} / 每批最多 {} 题",
        config.chunk_size, config.chunk_overlap, config.max_questions_per_chunk
    );
    info!("📊 分块并发数: {}", config.max_concurrent_chunks);
    info!("{}", "=".repeat(60));
}

/// 记录分块开始信息
pub fn log_chunk_start(ctx: &ChunkCtx, gap: usize) {
    info!("\n{}", "─".repeat(60));
    info!("{} 📦 开始处理，还差 {} 道题", ctx, gap);
    info!("{}", "─".repeat(60));
}

/// 打印最终统计信息
pub fn print_final_stats(metadata: &GenerationMetadata) {
    info!("\n{}", "=".repeat(60));
    info!("📊 生成完成统计");
    info!("完成时间: {}", chrono::Local::now().format("%Y-%m-%d %H:%M:%S"));
    info!("{}", "=".repeat(60));
    info!("✅ 最终题数: {}/{}", metadata.final_count, metadata.target_count);
    info!(
        "📦 分块: {}/{} 已处理",
        metadata.chunks_processed, metadata.chunks_total
    );
    info!(
        "🧪 解析 {} / 校验通过 {} / 去重移除 {} ({} 组)",
        metadata.total_generated,
        metadata.total_validated,
        metadata.duplicates_removed,
        metadata.duplicate_groups
    );
    if metadata.local_top_up > 0 {
        info!("🧩 本地补足: {}", metadata.local_top_up);
    }
    for (provider, count) in &metadata.providers_used {
        info!("   {} → {} 道", provider, count);
    }
    if metadata.shortfall > 0 {
        info!("⚠️ 供给不足，缺少 {} 道", metadata.shortfall);
    }
    info!("⏱️ 耗时: {}ms", metadata.processing_time_ms);
    info!("{}", "=".repeat(60));
}

/// 截断长文本用于日志显示
///
/// # 参数
/// - `text`: 原始文本
/// - `max_len`: 最大长度
///
/// # 返回
/// 返回截断后的文本
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        text.chars().take(max_len).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}
