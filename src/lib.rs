//! # Question Generator
//!
//! 从学习材料中生成选择题的 Rust 应用程序
//!
//! ## 架构设计
//!
//! 本系统采用严格的四层架构：
//!
//! ### ① 基础设施层（Infrastructure）
//! - `infrastructure/` - 持有共享的可变状态，只暴露能力
//! - `RateLimiter` - 每个服务的分钟/天配额计数
//!
//! ### ② 业务能力层（Clients / Services）
//! - `clients/` - 生成服务适配器，统一实现 `Provider` trait
//! - `services/` - 描述"我能做什么"：预处理、提示词、解析、校验、去重
//!
//! ### ③ 流程层（Workflow）
//! - `workflow/` - 定义"一个分块"的完整生成流程
//! - `ChunkCtx` - 上下文封装（chunk_id + chunk_index）
//! - `ChunkFlow` - 批次规划（缺口 + 余量 → 编排器）
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/registry` - 服务注册表
//! - `orchestrator/model_orchestrator` - 单批次回退链
//! - `orchestrator/coordinator` - 端到端状态机
//!
//! ## 模块结构

pub mod clients;
pub mod config;
pub mod error;
pub mod infrastructure;

pub mod models;
pub mod orchestrator;
pub mod services;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use clients::{LocalTemplateGenerator, Provider};
pub use config::Config;
pub use error::{AppError, AppResult, ProviderError};
pub use infrastructure::RateLimiter;
pub use models::{GenerationMetadata, GenerationRequest, GenerationResult, Question};
pub use orchestrator::{GenerationCoordinator, ModelOrchestrator, ProviderRegistry};
pub use workflow::{ChunkCtx, ChunkFlow};
