//! search_memory：按相似度检索过往经验，返回原始记录内容

use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::core::AgentError;
use crate::memory::MemoryIndex;
use crate::tools::schema::parameters_schema;
use crate::tools::Tool;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SearchMemoryArgs {
    /// What to look for in past experiences
    pub query: String,
    /// Maximum number of matches to return
    pub top_k: Option<usize>,
}

pub struct SearchMemoryTool {
    index: Arc<MemoryIndex>,
    default_top_k: usize,
}

impl SearchMemoryTool {
    pub fn new(index: Arc<MemoryIndex>, default_top_k: usize) -> Self {
        Self {
            index,
            default_top_k: default_top_k.max(1),
        }
    }
}

#[async_trait]
impl Tool for SearchMemoryTool {
    fn name(&self) -> &str {
        "search_memory"
    }

    fn description(&self) -> &str {
        "Search previously saved experiences by similarity. Returns the best matches with their content ids and original data."
    }

    fn parameters_schema(&self) -> Value {
        parameters_schema::<SearchMemoryArgs>()
    }

    async fn execute(&self, args: Value) -> Result<String, AgentError> {
        let args: SearchMemoryArgs = serde_json::from_value(args).map_err(|e| AgentError::InvalidArguments {
            tool: self.name().to_string(),
            reason: e.to_string(),
        })?;
        let top_k = args.top_k.unwrap_or(self.default_top_k).max(1);
        let hits = self.index.search(&args.query, top_k).await;
        Ok(json!({ "query": args.query, "matches": hits }).to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_returns_top_k_with_payload() {
        let index = Arc::new(MemoryIndex::new(None));
        index.add("c1", json!({"note": "replied to a thread about rust"})).await;
        index.add("c2", json!({"note": "rust meetup notes"})).await;
        index.add("c3", json!({"note": "weather"})).await;

        let tool = SearchMemoryTool::new(index, 5);
        let out: Value = serde_json::from_str(
            &tool.execute(json!({"query": "rust", "top_k": 1})).await.unwrap(),
        )
        .unwrap();
        let matches = out["matches"].as_array().unwrap();
        assert_eq!(matches.len(), 1);
        assert!(matches[0]["payload"]["note"].as_str().unwrap().contains("rust"));
    }

    #[tokio::test]
    async fn test_schema_requires_query() {
        let tool = SearchMemoryTool::new(Arc::new(MemoryIndex::new(None)), 5);
        assert_eq!(tool.parameters_schema()["required"], json!(["query"]));
    }
}
