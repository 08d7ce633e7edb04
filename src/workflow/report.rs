//! 最终报告
//!
//! 结束时请求模型输出 {workflowSummary, nextWorkflowPrompt?, secondsUntilNextWorkflow?}。
//! 解析失败不报错，而是返回带 extraction_failed 标记的报告；编排器出错时同样返回报告，error 字段非空。

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::core::AgentError;
use crate::memory::{collapse_messages, Message};
use crate::workflow::decision::extract_json;

pub const EXTRACTION_FAILED: &str = "Extracting workflow data failed";

/// 模型建议的下次运行间隔上限（30 天）
pub const MAX_SCHEDULE_SECS: f64 = 30.0 * 24.0 * 3600.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalReport {
    pub summary: String,
    pub next_prompt: Option<String>,
    pub seconds_until_next: Option<f64>,
    /// 模型输出无法解析为报告
    pub extraction_failed: bool,
    /// 运行因错误终止
    pub error: Option<String>,
    /// 决策给出的终止原因
    #[serde(default)]
    pub stop_reason: Option<String>,
}

impl FinalReport {
    pub fn is_failure(&self) -> bool {
        self.extraction_failed || self.error.is_some()
    }

    pub fn extraction_failure() -> Self {
        Self {
            summary: EXTRACTION_FAILED.to_string(),
            next_prompt: None,
            seconds_until_next: None,
            extraction_failed: true,
            error: None,
            stop_reason: None,
        }
    }

    pub fn failed(err: &AgentError, finished_at: DateTime<Utc>) -> Self {
        Self {
            summary: decorate_summary(&format!("Workflow failed: {}", err), finished_at),
            next_prompt: None,
            seconds_until_next: None,
            extraction_failed: false,
            error: Some(err.to_string()),
            stop_reason: None,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawReport {
    workflow_summary: String,
    next_workflow_prompt: Option<String>,
    seconds_until_next_workflow: Option<f64>,
}

pub fn decorate_summary(summary: &str, finished_at: DateTime<Utc>) -> String {
    format!(
        "This action finished running at {}. Action summary: {}",
        finished_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        summary
    )
}

/// 解析报告输出；失败时返回 extraction_failure
pub fn parse_report(output: &str, finished_at: DateTime<Utc>, self_schedule: bool) -> FinalReport {
    let parsed = extract_json(output)
        .ok_or_else(|| "no JSON object found".to_string())
        .and_then(|json| serde_json::from_str::<RawReport>(json).map_err(|e| e.to_string()));

    match parsed {
        Ok(raw) => {
            let (next_prompt, seconds_until_next) = if self_schedule {
                (
                    raw.next_workflow_prompt
                        .filter(|p| !p.trim().is_empty())
                        .map(|p| format!("Instructions for this workflow: {}", p)),
                    raw.seconds_until_next_workflow
                        .filter(|s| s.is_finite() && *s >= 0.0)
                        .map(|s| s.min(MAX_SCHEDULE_SECS)),
                )
            } else {
                (None, None)
            };
            FinalReport {
                summary: decorate_summary(&raw.workflow_summary, finished_at),
                next_prompt,
                seconds_until_next,
                extraction_failed: false,
                error: None,
                stop_reason: None,
            }
        }
        Err(reason) => {
            error!(%reason, "failed to extract workflow report");
            FinalReport::extraction_failure()
        }
    }
}

/// 报告调用的消息列表
pub fn report_messages(history: &[Message], finished_at: DateTime<Utc>, self_schedule: bool, instructions: Option<&str>) -> Vec<Message> {
    let system = format!(
        "Summarize the following messages in detail. This is returned as a report of what was \
         accomplished during the execution of the workflow.\n\n\
         self-schedule: {self_schedule}\n\
         If self-schedule is true, recommend the prompt for the next workflow in nextWorkflowPrompt \
         and how many seconds until it should begin in secondsUntilNextWorkflow.\n\
         If self-schedule is false, leave both fields out.\n\n\
         Custom instructions:\n{}\n\n\
         Return ONLY raw JSON of the form \
         {{\"workflowSummary\": string, \"nextWorkflowPrompt\": string?, \"secondsUntilNextWorkflow\": number?}} \
         with no markdown and no extra text.",
        instructions.unwrap_or("None")
    );
    vec![
        Message::system(system),
        Message::user(format!(
            "This workflow is ending at {}.\nMessages:\n{}",
            finished_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            collapse_messages(history)
        )),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_parse_report_decorates_fields() {
        let r = parse_report(
            r#"{"workflowSummary": "posted twice", "nextWorkflowPrompt": "check replies", "secondsUntilNextWorkflow": 600}"#,
            at(),
            true,
        );
        assert_eq!(
            r.summary,
            "This action finished running at 2024-05-01T12:00:00Z. Action summary: posted twice"
        );
        assert_eq!(r.next_prompt.as_deref(), Some("Instructions for this workflow: check replies"));
        assert_eq!(r.seconds_until_next, Some(600.0));
        assert!(!r.is_failure());
    }

    #[test]
    fn test_oversized_delay_is_clamped() {
        let r = parse_report(r#"{"workflowSummary": "s", "secondsUntilNextWorkflow": 1e30}"#, at(), true);
        assert_eq!(r.seconds_until_next, Some(MAX_SCHEDULE_SECS));

        let r = parse_report(r#"{"workflowSummary": "s", "secondsUntilNextWorkflow": -5}"#, at(), true);
        assert!(r.seconds_until_next.is_none());
    }

    #[test]
    fn test_self_schedule_disabled_drops_recommendation() {
        let r = parse_report(
            r#"{"workflowSummary": "s", "nextWorkflowPrompt": "p", "secondsUntilNextWorkflow": 5}"#,
            at(),
            false,
        );
        assert!(r.next_prompt.is_none());
        assert!(r.seconds_until_next.is_none());
    }

    #[test]
    fn test_unparseable_report_is_marked() {
        let r = parse_report("I did stuff", at(), true);
        assert!(r.extraction_failed);
        assert_eq!(r.summary, EXTRACTION_FAILED);
        assert!(r.error.is_none());
    }

    #[test]
    fn test_failed_report_carries_error() {
        let r = FinalReport::failed(&AgentError::RunawayWorkflow { max_steps: 3 }, at());
        assert!(r.is_failure());
        assert!(r.error.unwrap().contains("3"));
    }
}
