//! 工具执行器
//!
//! 查找并校验参数后在超时内调用工具；未知工具、参数不合法、超时、执行失败都以 AgentError 返回，
//! 由编排器转为工具结果消息。工具失败不重试。每次调用输出一行 JSON 审计日志。

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::time::timeout;

use crate::core::AgentError;
use crate::tools::ToolRegistry;

pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    timeout: Duration,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>, timeout: Duration) -> Self {
        Self { registry, timeout }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub async fn execute(&self, tool_name: &str, args: Value) -> Result<String, AgentError> {
        let start = Instant::now();
        let preview = args_preview(&args);

        let result = match self.registry.resolve(tool_name, &args) {
            Ok(tool) => match timeout(self.timeout, tool.execute(args)).await {
                Ok(r) => r,
                Err(_) => Err(AgentError::ToolTimeout(format!(
                    "{} exceeded {:?}",
                    tool_name, self.timeout
                ))),
            },
            Err(e) => Err(e),
        };

        let outcome = match &result {
            Ok(_) => "ok",
            Err(AgentError::ToolTimeout(_)) => "timeout",
            Err(AgentError::UnknownTool(_)) => "unknown_tool",
            Err(AgentError::InvalidArguments { .. }) => "invalid_arguments",
            Err(_) => "error",
        };
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": tool_name,
            "ok": result.is_ok(),
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": preview,
        });
        tracing::info!(audit = %audit, "tool");

        result
    }
}

fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::Tool;
    use async_trait::async_trait;

    struct Sleepy;

    #[async_trait]
    impl Tool for Sleepy {
        fn name(&self) -> &str {
            "sleepy"
        }

        fn description(&self) -> &str {
            "Never finishes in time"
        }

        async fn execute(&self, _args: Value) -> Result<String, AgentError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("late".to_string())
        }
    }

    struct Failing;

    #[async_trait]
    impl Tool for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        fn description(&self) -> &str {
            "Always fails"
        }

        async fn execute(&self, _args: Value) -> Result<String, AgentError> {
            Err(AgentError::ToolExecutionFailed("boom".to_string()))
        }
    }

    fn executor() -> ToolExecutor {
        let mut registry = ToolRegistry::new();
        registry.register(Sleepy);
        registry.register(Failing);
        ToolExecutor::new(Arc::new(registry), Duration::from_millis(20))
    }

    #[tokio::test]
    async fn test_timeout() {
        assert!(matches!(
            executor().execute("sleepy", serde_json::json!({})).await,
            Err(AgentError::ToolTimeout(_))
        ));
    }

    #[tokio::test]
    async fn test_failure_and_unknown_are_errors() {
        let ex = executor();
        assert!(matches!(
            ex.execute("failing", serde_json::json!({})).await,
            Err(AgentError::ToolExecutionFailed(_))
        ));
        assert!(matches!(
            ex.execute("missing", serde_json::json!({})).await,
            Err(AgentError::UnknownTool(_))
        ));
    }

    #[test]
    fn test_args_preview_truncates() {
        let long = serde_json::json!({ "text": "x".repeat(500) });
        assert!(args_preview(&long).ends_with("..."));
        assert_eq!(args_preview(&serde_json::json!({})), "{}");
    }
}
