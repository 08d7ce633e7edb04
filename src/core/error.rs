//! Agent 错误类型与恢复动作
//!
//! 与 RecoveryEngine 配合：根据 AgentError 决定 RetryStep（整步重试一次）或 Abort（终止本次运行）。

use thiserror::Error;

use crate::ledger::LedgerError;

/// 编排器与工具层可能出现的错误
#[derive(Error, Debug)]
pub enum AgentError {
    /// 可重试的网络错误（已在重试执行器中耗尽次数后才会上抛）
    #[error("Transient network error: {0}")]
    TransientNetwork(String),

    #[error("LLM error: {0}")]
    LlmError(String),

    /// 决策输出不符合预期结构（控制信号 / 最终报告）
    #[error("Structured parse failure: {0}")]
    StructuredParse(String),

    #[error("Tool execution failed: {0}")]
    ToolExecutionFailed(String),

    #[error("Tool timeout: {0}")]
    ToolTimeout(String),

    /// 决策选择了未注册的工具
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid arguments for tool {tool}: {reason}")]
    InvalidArguments { tool: String, reason: String },

    /// 单次运行内 Input 访问次数超过上限
    #[error("Runaway workflow: exceeded {max_steps} input steps")]
    RunawayWorkflow { max_steps: usize },

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("Cancelled")]
    Cancelled,
}

/// 恢复引擎根据错误类型给出的建议动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// 整步重试（编排器层面最多一次）
    RetryStep,
    /// 终止当前运行，产出带失败标记的报告
    Abort,
}
