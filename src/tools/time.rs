//! get_current_time：返回当前 UTC 时间（ISO-8601）

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde_json::Value;

use crate::core::AgentError;
use crate::tools::Tool;

pub struct CurrentTimeTool;

#[async_trait]
impl Tool for CurrentTimeTool {
    fn name(&self) -> &str {
        "get_current_time"
    }

    fn description(&self) -> &str {
        "Get the current date and time in ISO-8601 (UTC). This is reliable."
    }

    async fn execute(&self, _args: Value) -> Result<String, AgentError> {
        Ok(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true))
    }
}
