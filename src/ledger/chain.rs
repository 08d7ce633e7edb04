//! 链提交协作方：锚定摘要与读取最近锚定状态
//!
//! - InMemoryChain：进程内链，按身份记录提交序列，拒绝不递增的 nonce，支持注入失败
//! - HttpChainClient：通过 reqwest 调用锚定网关

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::ledger::LedgerError;

/// 已被接受的锚定交易
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxHandle {
    pub tx_hash: String,
    pub nonce: u64,
}

/// 一次锚定提交（供测试观察提交顺序）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub digest: String,
    pub nonce: u64,
}

#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn submit(&self, identity: &str, digest: &str, nonce: u64) -> Result<TxHandle, LedgerError>;

    /// 该身份最近一次锚定的摘要
    async fn last_digest(&self, identity: &str) -> Result<Option<String>, LedgerError>;

    /// 该身份最近一次被接受的 nonce
    async fn last_nonce(&self, identity: &str) -> Result<Option<u64>, LedgerError>;
}

/// 进程内链
#[derive(Debug, Default)]
pub struct InMemoryChain {
    submissions: Mutex<HashMap<String, Vec<Submission>>>,
    failing_submits: AtomicUsize,
    fail_all: AtomicBool,
}

impl InMemoryChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_submits(&self, n: usize) {
        self.failing_submits.store(n, Ordering::SeqCst);
    }

    /// 持续失败（模拟链端不可用），直到再次调用 set_unavailable(false)
    pub fn set_unavailable(&self, unavailable: bool) {
        self.fail_all.store(unavailable, Ordering::SeqCst);
    }

    pub async fn submissions(&self, identity: &str) -> Vec<Submission> {
        self.submissions
            .lock()
            .await
            .get(identity)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl ChainClient for InMemoryChain {
    async fn submit(&self, identity: &str, digest: &str, nonce: u64) -> Result<TxHandle, LedgerError> {
        if self.fail_all.load(Ordering::SeqCst)
            || self
                .failing_submits
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        {
            return Err(LedgerError::TransientNetwork("simulated chain outage".to_string()));
        }
        let mut all = self.submissions.lock().await;
        let entries = all.entry(identity.to_string()).or_default();
        if let Some(last) = entries.last() {
            if nonce <= last.nonce {
                return Err(LedgerError::Rejected(format!(
                    "nonce too low: got {}, last accepted {}",
                    nonce, last.nonce
                )));
            }
        }
        entries.push(Submission {
            digest: digest.to_string(),
            nonce,
        });
        let tx_hash = format!(
            "0x{}",
            blake3::hash(format!("{identity}:{digest}:{nonce}").as_bytes()).to_hex()
        );
        Ok(TxHandle { tx_hash, nonce })
    }

    async fn last_digest(&self, identity: &str) -> Result<Option<String>, LedgerError> {
        Ok(self
            .submissions
            .lock()
            .await
            .get(identity)
            .and_then(|s| s.last())
            .map(|s| s.digest.clone()))
    }

    async fn last_nonce(&self, identity: &str) -> Result<Option<u64>, LedgerError> {
        Ok(self
            .submissions
            .lock()
            .await
            .get(identity)
            .and_then(|s| s.last())
            .map(|s| s.nonce))
    }
}

#[derive(Serialize)]
struct SubmitRequest<'a> {
    identity: &'a str,
    digest: &'a str,
    nonce: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnchorStateResponse {
    digest: Option<String>,
    nonce: Option<u64>,
}

/// 锚定网关：POST {base}/anchors 提交；GET {base}/anchors/{identity} 读取最近状态
pub struct HttpChainClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpChainClient {
    pub fn new(base_url: &str, api_key: Option<String>, timeout_secs: u64) -> Result<Self, LedgerError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn authorized(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => req.header("X-Api-Key", key),
            None => req,
        }
    }

    async fn state(&self, identity: &str) -> Result<Option<AnchorStateResponse>, LedgerError> {
        let resp = self
            .authorized(self.client.get(format!("{}/anchors/{}", self.base_url, identity)))
            .send()
            .await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Ok(Some(resp.error_for_status()?.json().await?))
    }
}

#[async_trait]
impl ChainClient for HttpChainClient {
    async fn submit(&self, identity: &str, digest: &str, nonce: u64) -> Result<TxHandle, LedgerError> {
        let resp = self
            .authorized(self.client.post(format!("{}/anchors", self.base_url)))
            .json(&SubmitRequest {
                identity,
                digest,
                nonce,
            })
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.json().await?)
    }

    async fn last_digest(&self, identity: &str) -> Result<Option<String>, LedgerError> {
        Ok(self.state(identity).await?.and_then(|s| s.digest))
    }

    async fn last_nonce(&self, identity: &str) -> Result<Option<u64>, LedgerError> {
        Ok(self.state(identity).await?.and_then(|s| s.nonce))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rejects_non_increasing_nonce() {
        let chain = InMemoryChain::new();
        chain.submit("me", "0xaa", 0).await.unwrap();
        chain.submit("me", "0xbb", 1).await.unwrap();
        assert!(matches!(
            chain.submit("me", "0xcc", 1).await,
            Err(LedgerError::Rejected(_))
        ));
        assert_eq!(chain.last_digest("me").await.unwrap().as_deref(), Some("0xbb"));
        assert_eq!(chain.last_nonce("me").await.unwrap(), Some(1));
        assert_eq!(chain.last_nonce("other").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_outage_is_transient() {
        let chain = InMemoryChain::new();
        chain.set_unavailable(true);
        assert!(matches!(
            chain.submit("me", "0xaa", 0).await,
            Err(LedgerError::TransientNetwork(_))
        ));
        chain.set_unavailable(false);
        assert!(chain.submit("me", "0xaa", 0).await.is_ok());
    }
}
