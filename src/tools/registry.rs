//! 工具注册表
//!
//! 所有工具实现 Tool trait（name / description / parameters_schema / execute），由 ToolRegistry 按名注册与查找。
//! 调用前按声明的 schema 校验参数：必须是对象、必填字段齐全、已声明字段类型匹配。

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::core::AgentError;

#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具名称（决策输出中的 "name" 字段）
    fn name(&self) -> &str;

    /// 工具描述（供 LLM 理解功能）
    fn description(&self) -> &str;

    /// 参数 JSON Schema；默认无参数
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    async fn execute(&self, args: Value) -> Result<String, AgentError>;
}

/// 按名称存储 Arc<dyn Tool>；BTreeMap 保证生成的工具清单顺序稳定
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.register_arc(Arc::new(tool));
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    /// 工具清单 JSON，拼入决策提示
    pub fn to_schema_json(&self) -> String {
        let tools: Vec<Value> = self
            .tools
            .iter()
            .map(|(name, tool)| {
                json!({
                    "name": name,
                    "description": tool.description(),
                    "parameters": tool.parameters_schema()
                })
            })
            .collect();
        serde_json::to_string_pretty(&tools).unwrap_or_else(|_| "[]".to_string())
    }

    /// 查找工具并校验参数
    pub fn resolve(&self, name: &str, args: &Value) -> Result<Arc<dyn Tool>, AgentError> {
        let tool = self
            .get(name)
            .ok_or_else(|| AgentError::UnknownTool(name.to_string()))?;
        validate_args(name, &tool.parameters_schema(), args)?;
        Ok(tool)
    }
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        "null" => value.is_null(),
        _ => true,
    }
}

/// 按 schema 的 required / properties.*.type 校验参数（type 可为字符串或字符串数组）
pub fn validate_args(tool: &str, schema: &Value, args: &Value) -> Result<(), AgentError> {
    let invalid = |reason: String| AgentError::InvalidArguments {
        tool: tool.to_string(),
        reason,
    };

    let Some(obj) = args.as_object() else {
        return Err(invalid(format!("arguments must be a JSON object, got {}", args)));
    };

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for field in required.iter().filter_map(Value::as_str) {
            if !obj.contains_key(field) {
                return Err(invalid(format!("missing required field '{}'", field)));
            }
        }
    }

    if let Some(props) = schema.get("properties").and_then(Value::as_object) {
        for (field, value) in obj {
            let Some(expected) = props.get(field).and_then(|p| p.get("type")) else {
                continue;
            };
            let ok = match expected {
                Value::String(t) => type_matches(t, value),
                Value::Array(ts) => ts.iter().filter_map(Value::as_str).any(|t| type_matches(t, value)),
                _ => true,
            };
            if !ok {
                return Err(invalid(format!("field '{}' should be {}", field, expected)));
            }
        }
    }
    Ok(())
}
