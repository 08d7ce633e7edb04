//! 工作流状态机：决策、工具执行、历史压缩与最终报告

pub mod decision;
pub mod events;
pub mod orchestrator;
pub mod report;
pub mod state;

pub use decision::{decision_messages, decision_system_prompt, extract_json, parse_decision, Decision};
pub use events::WorkflowEvent;
pub use orchestrator::{Orchestrator, OrchestratorOptions, WorkflowRun};
pub use report::{parse_report, FinalReport, EXTRACTION_FAILED};
pub use state::{PruningParameters, ToolCall, WorkflowControl, WorkflowPhase, WorkflowState};
