//! 决策调用：组装提示并解析模型输出
//!
//! 输出约定为一个 JSON 对象 {thought, toolCalls, shouldStop, reason}；
//! 可包在 ```json 代码块中。控制字段无法解析时按 "Failed to parse control message" 终止。

use serde::Deserialize;
use tracing::{error, warn};

use crate::memory::{collapse_messages, Message};
use crate::tools::decision_schema_json;
use crate::workflow::state::{ToolCall, WorkflowControl};

pub const CONTROL_PARSE_FAILURE: &str = "Failed to parse control message";

/// 一次决策的结果
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    /// 写入历史的 ai 消息内容（模型原始输出）
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
    pub control: WorkflowControl,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDecision {
    #[serde(default)]
    tool_calls: Vec<ToolCall>,
    should_stop: bool,
    #[serde(default)]
    reason: String,
}

/// 从文本中取出 JSON：优先 ```json 代码块，其次第一个 '{' 到最后一个 '}'
pub fn extract_json(output: &str) -> Option<&str> {
    let trimmed = output.trim();
    if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        return Some(rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim()));
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    (end > start).then(|| &trimmed[start..=end])
}

/// 解析决策输出；控制字段缺失或 JSON 不合法时返回终止决策
pub fn parse_decision(output: &str) -> Decision {
    let parsed = extract_json(output)
        .ok_or_else(|| "no JSON object found".to_string())
        .and_then(|json| serde_json::from_str::<RawDecision>(json).map_err(|e| e.to_string()));

    match parsed {
        Ok(raw) => {
            let mut tool_calls = raw.tool_calls;
            if raw.should_stop && !tool_calls.is_empty() {
                warn!(dropped = tool_calls.len(), "stop requested, pending tool calls dropped");
                tool_calls.clear();
            }
            Decision {
                text: output.to_string(),
                tool_calls,
                control: WorkflowControl {
                    should_stop: raw.should_stop,
                    reason: raw.reason,
                },
            }
        }
        Err(reason) => {
            error!(%reason, "failed to parse workflow control, applying fallback termination");
            Decision {
                text: output.to_string(),
                tool_calls: Vec::new(),
                control: WorkflowControl::stop(CONTROL_PARSE_FAILURE),
            }
        }
    }
}

/// 决策 system 提示
pub fn decision_system_prompt(tools_json: &str, instructions: Option<&str>) -> String {
    format!(
        "You are an autonomous agent that orchestrates tasks.\n\
         - After you have completed the task(s) AND saved the experience to permanent storage, STOP THE WORKFLOW.\n\
         - If you don't know what to do, STOP THE WORKFLOW and give a reason.\n\
         - There is NO HUMAN IN THE LOOP. If you need human intervention, STOP THE WORKFLOW and give a reason.\n\
         - If you face any difficulties, DON'T retry more than once.\n\
         - Every once in a while you get a summarized version of your previous messages. It is up to date.\n\
         - If you need the date and time, use the get_current_time tool.\n\
         - Save significant actions, critical lessons and strategic decisions with save_experience. \
         Include timestamps, ids, reasoning and full context.\n\
         - Use search_memory to recall what you did before.\n\n\
         Custom instructions:\n{}\n\n\
         Available tools:\n{}\n\n\
         Reply with ONLY one JSON object matching this schema:\n{}",
        instructions.unwrap_or("None"),
        tools_json,
        decision_schema_json()
    )
}

/// 决策调用的完整消息列表
pub fn decision_messages(system_prompt: &str, window: &[Message]) -> Vec<Message> {
    vec![
        Message::system(system_prompt),
        Message::user(format!(
            "Based on the following messages, determine what actions should be taken.\n\nMessages:\n{}",
            collapse_messages(window)
        )),
    ]
}
