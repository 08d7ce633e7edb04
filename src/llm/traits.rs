//! LLM 客户端抽象
//!
//! 决策、摘要、报告提取都通过 LlmClient::complete 完成；RetryingLlmClient 为任意后端加上有界重试。

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::core::{retry_with_backoff, AgentError, RetryConfig, Retryable};
use crate::memory::Message;

#[derive(Error, Debug, Clone)]
pub enum LlmError {
    /// 网络错误、超时、限流：可重试
    #[error("transient LLM failure: {0}")]
    Transient(String),

    /// 请求被拒绝或响应不可用
    #[error("LLM API error: {0}")]
    Api(String),

    /// 脚本客户端已无可用回复
    #[error("no scripted response left")]
    Exhausted,
}

impl Retryable for LlmError {
    fn is_retryable(&self) -> bool {
        matches!(self, LlmError::Transient(_))
    }
}

impl From<LlmError> for AgentError {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::Transient(msg) => AgentError::TransientNetwork(msg),
            other => AgentError::LlmError(other.to_string()),
        }
    }
}

/// LLM 客户端 trait
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式完成，返回首条回复文本
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError>;

    /// 累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}

/// 在任意 LlmClient 外层施加重试（仅对 Transient 错误）
pub struct RetryingLlmClient {
    inner: Arc<dyn LlmClient>,
    retry: RetryConfig,
}

impl RetryingLlmClient {
    pub fn new(inner: Arc<dyn LlmClient>, retry: RetryConfig) -> Self {
        Self { inner, retry }
    }
}

#[async_trait]
impl LlmClient for RetryingLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        let inner = &self.inner;
        retry_with_backoff(&self.retry, "llm.complete", || inner.complete(messages)).await
    }

    fn token_usage(&self) -> (u64, u64, u64) {
        self.inner.token_usage()
    }
}
