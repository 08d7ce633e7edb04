//! OpenAI 兼容端点的决策客户端（async_openai，base_url 可配置）
//!
//! 工具结果没有对应的 tool_call_id，统一折叠成带工具名前缀的 user 消息发送。

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_openai::config::OpenAIConfig;
use async_openai::error::OpenAIError;
use async_openai::types::chat::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequestArgs,
};
use async_openai::Client;
use async_trait::async_trait;
use tracing::debug;

use crate::llm::{LlmClient, LlmError};
use crate::memory::{Message, Role};

/// 进程内累计的 token 用量
#[derive(Debug, Default)]
pub struct TokenUsage {
    prompt: AtomicU64,
    completion: AtomicU64,
}

impl TokenUsage {
    pub fn record(&self, prompt: u64, completion: u64) {
        self.prompt.fetch_add(prompt, Ordering::Relaxed);
        self.completion.fetch_add(completion, Ordering::Relaxed);
    }

    /// (prompt, completion, total)
    pub fn totals(&self) -> (u64, u64, u64) {
        let prompt = self.prompt.load(Ordering::Relaxed);
        let completion = self.completion.load(Ordering::Relaxed);
        (prompt, completion, prompt + completion)
    }
}

/// 连接类错误可重试，其余（鉴权、请求体、反序列化）不重试
pub(crate) fn map_openai_error(err: OpenAIError) -> LlmError {
    if let OpenAIError::Reqwest(e) = err {
        return LlmError::Transient(e.to_string());
    }
    LlmError::Api(err.to_string())
}

pub(crate) fn openai_config(base_url: Option<&str>, api_key: &str) -> OpenAIConfig {
    base_url.into_iter().fold(OpenAIConfig::new().with_api_key(api_key), |cfg, url| {
        cfg.with_api_base(url)
    })
}

fn request_message(message: &Message) -> Result<ChatCompletionRequestMessage, OpenAIError> {
    Ok(match message.role {
        Role::System => ChatCompletionRequestMessage::System(
            ChatCompletionRequestSystemMessageArgs::default()
                .content(message.content.clone())
                .build()?,
        ),
        Role::Assistant => ChatCompletionRequestMessage::Assistant(
            ChatCompletionRequestAssistantMessageArgs::default()
                .content(message.content.clone())
                .build()?,
        ),
        Role::User | Role::Tool => {
            let text = match message.role {
                Role::Tool => message.collapsed(),
                _ => message.content.clone(),
            };
            ChatCompletionRequestMessage::User(ChatCompletionRequestUserMessageArgs::default().content(text).build()?)
        }
    })
}

pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
    model: String,
    timeout: Duration,
    usage: TokenUsage,
}

impl OpenAiClient {
    pub fn new(base_url: Option<&str>, model: &str, api_key: &str, timeout: Duration) -> Self {
        Self {
            client: Client::with_config(openai_config(base_url, api_key)),
            model: model.to_string(),
            timeout,
            usage: TokenUsage::default(),
        }
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        let request_messages = messages
            .iter()
            .map(request_message)
            .collect::<Result<Vec<_>, _>>()
            .map_err(map_openai_error)?;
        let request = CreateChatCompletionRequestArgs::default()
            .model(self.model.as_str())
            .messages(request_messages)
            .build()
            .map_err(map_openai_error)?;

        let chat = self.client.chat();
        let call = chat.create(request);
        let response = match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result.map_err(map_openai_error)?,
            Err(_) => {
                return Err(LlmError::Transient(format!(
                    "no response from {} within {:?}",
                    self.model, self.timeout
                )))
            }
        };

        if let Some(usage) = response.usage {
            self.usage
                .record(u64::from(usage.prompt_tokens), u64::from(usage.completion_tokens));
            debug!(prompt = usage.prompt_tokens, completion = usage.completion_tokens, "llm usage");
        }

        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| LlmError::Api(format!("{} returned an empty completion", self.model)))
    }

    fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.totals()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_messages_are_sent_as_user_text() {
        let msg = request_message(&Message::tool("search_memory", "no matches")).unwrap();
        match msg {
            ChatCompletionRequestMessage::User(_) => {}
            other => panic!("unexpected message kind: {other:?}"),
        }
    }

    #[test]
    fn test_usage_totals_accumulate() {
        let usage = TokenUsage::default();
        usage.record(10, 5);
        usage.record(1, 1);
        assert_eq!(usage.totals(), (11, 6, 17));
    }
}
