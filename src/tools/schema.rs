//! 由 schemars 生成工具参数 Schema 与决策输出格式 Schema
//!
//! 参数结构体派生 JsonSchema，工具的 parameters_schema 直接复用；决策格式 Schema 拼入 system prompt，减少模型输出格式错误。

use schemars::{schema_for, JsonSchema};
use serde_json::Value;

/// 结构体 T 的参数 Schema（去掉 $schema / title 等元信息）
pub fn parameters_schema<T: JsonSchema>() -> Value {
    let mut schema = serde_json::to_value(schema_for!(T)).unwrap_or(Value::Null);
    if let Some(obj) = schema.as_object_mut() {
        obj.remove("$schema");
        obj.remove("title");
        obj.entry("required").or_insert_with(|| Value::Array(vec![]));
    }
    schema
}

#[allow(dead_code)]
#[derive(JsonSchema)]
#[serde(rename_all = "camelCase")]
struct ToolCallFormat {
    /// Name of a registered tool
    name: String,
    /// Arguments object matching the tool's parameter schema
    arguments: Value,
}

/// 每一步决策的输出格式
#[allow(dead_code)]
#[derive(JsonSchema)]
#[serde(rename_all = "camelCase")]
struct DecisionFormat {
    /// Reasoning for this step
    thought: String,
    /// Tool calls to run in order; empty when no tool is needed
    tool_calls: Vec<ToolCallFormat>,
    /// Whether the workflow should stop
    should_stop: bool,
    /// The reason for stopping (or continuing)
    reason: String,
}

/// 决策输出格式的 JSON Schema 字符串
pub fn decision_schema_json() -> String {
    serde_json::to_string_pretty(&schema_for!(DecisionFormat)).unwrap_or_default()
}
