//! autobee - Rust 自主智能体
//!
//! 模块划分：
//! - **agent**: 无头运行时（按配置组装账本、工具、编排器，并执行自调度循环）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型、恢复策略、重试执行器、优雅关闭
//! - **ledger**: 内容寻址、哈希链式记忆账本（签名、上传、链上锚定、回溯校验）
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / Scripted）、嵌入
//! - **memory**: 对话消息、上下文窗口压缩、记忆相似度索引
//! - **observability**: 日志初始化
//! - **tools**: 工具注册表（save_experience / search_memory / get_current_time）与执行器
//! - **workflow**: 工作流状态机（Input → ToolExecution → MessageSummary → FinishWorkflow）

pub mod agent;
pub mod config;
pub mod core;
pub mod ledger;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod tools;
pub mod workflow;

pub use ledger::MemoryLedger;
pub use workflow::{FinalReport, Orchestrator};
