//! save_experience：把经验写入记忆账本，并加入检索索引

use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::core::AgentError;
use crate::ledger::{LedgerError, MemoryLedger};
use crate::memory::MemoryIndex;
use crate::tools::schema::parameters_schema;
use crate::tools::Tool;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SaveExperienceArgs {
    /// The experience to store permanently. Include timestamps, ids, reasoning and full context.
    pub data: Value,
}

pub struct SaveExperienceTool {
    ledger: MemoryLedger,
    index: Arc<MemoryIndex>,
}

impl SaveExperienceTool {
    pub fn new(ledger: MemoryLedger, index: Arc<MemoryIndex>) -> Self {
        Self { ledger, index }
    }
}

#[async_trait]
impl Tool for SaveExperienceTool {
    fn name(&self) -> &str {
        "save_experience"
    }

    fn description(&self) -> &str {
        "Save an experience to permanent, tamper-evident storage. Use it after a significant \
         action, a critical lesson or a strategic decision. Returns the content id of the record."
    }

    fn parameters_schema(&self) -> Value {
        parameters_schema::<SaveExperienceArgs>()
    }

    async fn execute(&self, args: Value) -> Result<String, AgentError> {
        let args: SaveExperienceArgs = serde_json::from_value(args).map_err(|e| AgentError::InvalidArguments {
            tool: self.name().to_string(),
            reason: e.to_string(),
        })?;

        match self.ledger.append(args.data.clone()).await {
            Ok(outcome) => {
                self.index.add(&outcome.cid, args.data).await;
                Ok(serde_json::to_string(&outcome).map_err(|e| AgentError::ToolExecutionFailed(e.to_string()))?)
            }
            Err(err) => {
                // 内容已存储，仍然可检索
                if let LedgerError::AnchorFailure { cid, .. } = &err {
                    warn!(cid = %cid, "experience stored without anchor");
                    self.index.add(cid, args.data).await;
                }
                Err(err.into())
            }
        }
    }
}
