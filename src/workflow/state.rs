//! 工作流状态：每次运行独占一份，以 run_id 区分
//!
//! 状态转移：Input → (ToolExecution →) MessageSummary → Input …，Input 判定 shouldStop 后进入 FinishWorkflow。

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::config::WorkflowSection;
use crate::memory::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkflowPhase {
    Input,
    ToolExecution,
    MessageSummary,
    FinishWorkflow,
}

impl fmt::Display for WorkflowPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkflowPhase::Input => "input",
            WorkflowPhase::ToolExecution => "tools",
            WorkflowPhase::MessageSummary => "summary",
            WorkflowPhase::FinishWorkflow => "finish",
        };
        f.write_str(name)
    }
}

/// 控制信号
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowControl {
    pub should_stop: bool,
    pub reason: String,
}

impl WorkflowControl {
    pub fn stop(reason: impl Into<String>) -> Self {
        Self {
            should_stop: true,
            reason: reason.into(),
        }
    }
}

/// 待执行的工具调用
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    #[serde(default = "empty_object")]
    pub arguments: Value,
}

fn empty_object() -> Value {
    Value::Object(Default::default())
}

/// 剪枝参数，单次运行内不变
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PruningParameters {
    pub max_history_before_summary: usize,
    /// 每次决策发送的最近消息条数（不含首条）
    pub max_retained_queue_size: usize,
}

impl From<&WorkflowSection> for PruningParameters {
    fn from(section: &WorkflowSection) -> Self {
        Self {
            max_history_before_summary: section.max_history_before_summary,
            max_retained_queue_size: section.max_retained_queue_size,
        }
    }
}

impl Default for PruningParameters {
    fn default() -> Self {
        Self {
            max_history_before_summary: 30,
            max_retained_queue_size: 50,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkflowState {
    pub run_id: String,
    pub history: Vec<Message>,
    pub control: Option<WorkflowControl>,
    pub pending_tool_calls: Vec<ToolCall>,
    pub pruning: PruningParameters,
    /// 已访问的状态序列
    pub visited: Vec<WorkflowPhase>,
    /// Input 访问次数
    pub input_steps: usize,
}

impl WorkflowState {
    pub fn new(initial_messages: Vec<Message>, pruning: PruningParameters) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            history: initial_messages,
            control: None,
            pending_tool_calls: Vec::new(),
            pruning,
            visited: Vec::new(),
            input_steps: 0,
        }
    }

    pub fn should_stop(&self) -> bool {
        self.control.as_ref().is_some_and(|c| c.should_stop)
    }

    /// Input 之后的去向
    pub fn next_after_input(&self) -> WorkflowPhase {
        if self.should_stop() {
            WorkflowPhase::FinishWorkflow
        } else if !self.pending_tool_calls.is_empty() {
            WorkflowPhase::ToolExecution
        } else {
            WorkflowPhase::MessageSummary
        }
    }

    /// 发送给决策的消息窗口：首条消息 + 最近 max_retained_queue_size 条
    pub fn prompt_window(&self) -> Vec<Message> {
        let keep = self.pruning.max_retained_queue_size;
        match self.history.split_first() {
            None => Vec::new(),
            Some((first, rest)) => {
                let start = rest.len().saturating_sub(keep);
                std::iter::once(first.clone())
                    .chain(rest[start..].iter().cloned())
                    .collect()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(n: usize, keep: usize) -> WorkflowState {
        WorkflowState::new(
            (0..n).map(|i| Message::user(format!("m{i}"))).collect(),
            PruningParameters {
                max_history_before_summary: 30,
                max_retained_queue_size: keep,
            },
        )
    }

    #[test]
    fn test_routing_after_input() {
        let mut s = state(1, 10);
        assert_eq!(s.next_after_input(), WorkflowPhase::MessageSummary);

        s.pending_tool_calls.push(ToolCall {
            name: "get_current_time".into(),
            arguments: empty_object(),
        });
        assert_eq!(s.next_after_input(), WorkflowPhase::ToolExecution);

        s.control = Some(WorkflowControl::stop("done"));
        assert_eq!(s.next_after_input(), WorkflowPhase::FinishWorkflow);
    }

    #[test]
    fn test_prompt_window_keeps_first_and_recent() {
        let s = state(10, 3);
        let window: Vec<_> = s.prompt_window().into_iter().map(|m| m.content).collect();
        assert_eq!(window, vec!["m0", "m7", "m8", "m9"]);
        assert_eq!(s.history.len(), 10);

        assert_eq!(state(2, 3).prompt_window().len(), 2);
        assert!(state(0, 3).prompt_window().is_empty());
    }

    #[test]
    fn test_run_ids_are_unique() {
        assert_ne!(state(1, 1).run_id, state(1, 1).run_id);
    }

    #[test]
    fn test_tool_call_arguments_default_to_object() {
        let call: ToolCall = serde_json::from_str(r#"{"name": "get_current_time"}"#).unwrap();
        assert!(call.arguments.is_object());
    }
}
