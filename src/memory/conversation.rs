//! 对话消息
//!
//! 工作流历史中的角色：system、human（User）、agent（Assistant）、工具结果（Tool）。

use serde::{Deserialize, Serialize};

/// 消息角色
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "human",
            Role::Assistant => "ai",
            Role::Tool => "tool",
        }
    }
}

/// 单条消息；Tool 消息带工具名
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Message {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            name: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn tool(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::new(Role::Tool, content)
        }
    }

    /// 单行形式 "role: content"，用于摘要与报告提示
    pub fn collapsed(&self) -> String {
        match (&self.role, &self.name) {
            (Role::Tool, Some(name)) => format!("tool({}): {}", name, self.content),
            (role, _) => format!("{}: {}", role.as_str(), self.content),
        }
    }
}

/// 将若干消息按行拼接为单行形式
pub fn collapse_messages(messages: &[Message]) -> String {
    messages
        .iter()
        .map(Message::collapsed)
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collapsed_tags_roles() {
        assert_eq!(Message::user("hi").collapsed(), "human: hi");
        assert_eq!(Message::assistant("ok").collapsed(), "ai: ok");
        assert_eq!(
            Message::tool("get_current_time", "2024").collapsed(),
            "tool(get_current_time): 2024"
        );
    }

    #[test]
    fn test_collapse_messages_joins_lines() {
        let text = collapse_messages(&[Message::system("rules"), Message::user("go")]);
        assert_eq!(text, "system: rules\nhuman: go");
    }
}
