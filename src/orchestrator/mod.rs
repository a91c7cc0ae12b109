//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 本层负责服务调度和流水线控制，是整个系统的"指挥中心"。
//!
//! ## 模块划分
//!
//! ### `registry` - 服务注册表
//! - 启动时根据配置构建，按优先级排列
//! - 作为值传入编排器，测试时注入假服务
//!
//! ### `model_orchestrator` - 模型编排器
//! - 单个批次的回退链：能力检查 → 限流 → 超时赛跑 → 解析 → 质量过滤 → 多样性门槛
//! - 统一的重试和超时，适配器本身不做重试
//!
//! ### `coordinator` - 生成协调器
//! - 端到端状态机：Preprocessing → ChunkLoop → GlobalDedup → Trim → Done
//! - 控制分块并发（Semaphore）
//! - 供给不足时直接调用本地生成器补足
//! - 输出最终统计信息
//!
//! ## 层次关系
//!
//! ```text
//! coordinator (处理 GenerationRequest)
//!     ↓
//! workflow::ChunkFlow (处理单个分块)
//!     ↓
//! model_orchestrator (处理单个批次)
//!     ↓
//! clients (生成服务) / services (解析、校验、去重)
//!     ↓
//! infrastructure (基础设施：RateLimiter)
//! ```

pub mod coordinator;
pub mod model_orchestrator;
pub mod registry;

// 重新导出主要类型
pub use coordinator::{GenerationCoordinator, GenerationState};
pub use model_orchestrator::{BatchOutcome, BatchRequest, ModelOrchestrator};
pub use registry::ProviderRegistry;
