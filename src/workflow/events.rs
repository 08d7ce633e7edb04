//! 工作流过程事件：供日志之外的观察者（测试、前端）跟踪状态转移与工具调用

use serde::Serialize;

use crate::workflow::state::WorkflowPhase;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    /// 进入某个状态
    StateEntered { run_id: String, phase: WorkflowPhase },
    /// 决策完成
    Decided {
        run_id: String,
        tool_calls: usize,
        should_stop: bool,
        reason: String,
    },
    /// 工具返回（预览）
    ToolResult {
        run_id: String,
        tool: String,
        ok: bool,
        preview: String,
    },
    /// 历史被压缩
    Summarized { run_id: String, replaced: usize },
    /// 整步重试
    StepRetried { run_id: String, phase: WorkflowPhase, error: String },
    /// 运行结束
    Finished { run_id: String, failed: bool },
}
