//! 记忆检索用的文本嵌入
//!
//! 未启用或没有 API Key 时不创建提供方，索引退回词重叠打分。

use std::sync::Arc;

use async_openai::config::OpenAIConfig;
use async_openai::types::embeddings::{CreateEmbeddingRequestArgs, EmbeddingInput};
use async_openai::Client;
use async_trait::async_trait;
use tracing::warn;

use crate::llm::openai::{map_openai_error, openai_config};
use crate::llm::LlmError;

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// 空白文本返回空向量（不发请求）
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError>;
}

/// OpenAI 兼容 /embeddings 端点
pub struct OpenAiEmbedder {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiEmbedder {
    pub fn new(base_url: Option<&str>, model: &str, api_key: &str) -> Self {
        Self {
            client: Client::with_config(openai_config(base_url, api_key)),
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        let request = CreateEmbeddingRequestArgs::default()
            .model(self.model.as_str())
            .input(EmbeddingInput::String(text.trim().to_string()))
            .build()
            .map_err(map_openai_error)?;
        let mut response = self
            .client
            .embeddings()
            .create(request)
            .await
            .map_err(map_openai_error)?;
        if response.data.is_empty() {
            return Err(LlmError::Api(format!("{} returned no embedding", self.model)));
        }
        Ok(response.data.swap_remove(0).embedding)
    }
}

pub fn create_embedder_from_config(
    enabled: bool,
    base_url: Option<&str>,
    model: &str,
    api_key: Option<&str>,
) -> Option<Arc<dyn EmbeddingProvider>> {
    if !enabled {
        return None;
    }
    let Some(key) = api_key.filter(|k| !k.is_empty()) else {
        warn!(model, "embeddings enabled without an API key, index uses token overlap");
        return None;
    };
    Some(Arc::new(OpenAiEmbedder::new(base_url, model, key)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_or_keyless_embedder_is_none() {
        assert!(create_embedder_from_config(false, None, "m", Some("k")).is_none());
        assert!(create_embedder_from_config(true, None, "m", None).is_none());
        assert!(create_embedder_from_config(true, None, "m", Some("")).is_none());
        assert!(create_embedder_from_config(true, Some("http://localhost:1"), "m", Some("k")).is_some());
    }
}
