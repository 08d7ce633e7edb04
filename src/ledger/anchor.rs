//! Nonce 序列器：进程内唯一的链上锚定入口
//!
//! ChainAnchor 只在提交被接受后更新；失败的提交不消耗 nonce，重试沿用同一个值。
//! 取号与提交处于同一临界区，因此并发锚定不会复用 nonce，提交顺序严格递增。

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::core::{retry_with_backoff, RetryConfig};
use crate::ledger::chain::{ChainClient, TxHandle};
use crate::ledger::LedgerError;

/// 某个身份在链上的最近锚定状态
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChainAnchor {
    pub last_anchored_hash: Option<String>,
    pub last_nonce: Option<u64>,
}

impl ChainAnchor {
    pub fn next_nonce(&self) -> u64 {
        self.last_nonce.map_or(0, |n| n + 1)
    }
}

pub struct NonceSequencer {
    identity: String,
    state: Mutex<ChainAnchor>,
    chain: Arc<dyn ChainClient>,
    retry: RetryConfig,
}

impl NonceSequencer {
    pub fn new(identity: impl Into<String>, chain: Arc<dyn ChainClient>, retry: RetryConfig) -> Self {
        Self {
            identity: identity.into(),
            state: Mutex::new(ChainAnchor::default()),
            chain,
            retry,
        }
    }

    /// 启动时从链读取最近摘要与 nonce（带重试）
    pub async fn bootstrap(&self) -> Result<ChainAnchor, LedgerError> {
        let identity = self.identity.as_str();
        let chain = &self.chain;
        let last_anchored_hash =
            retry_with_backoff(&self.retry, "chain.last_digest", || chain.last_digest(identity)).await?;
        let last_nonce =
            retry_with_backoff(&self.retry, "chain.last_nonce", || chain.last_nonce(identity)).await?;

        let anchor = ChainAnchor {
            last_anchored_hash,
            last_nonce,
        };
        info!(
            identity = %self.identity,
            last_nonce = ?anchor.last_nonce,
            has_digest = anchor.last_anchored_hash.is_some(),
            "chain anchor bootstrapped"
        );
        *self.state.lock().await = anchor.clone();
        Ok(anchor)
    }

    pub async fn snapshot(&self) -> ChainAnchor {
        self.state.lock().await.clone()
    }

    /// 以下一个 nonce 提交摘要；成功后推进状态
    pub async fn anchor(&self, digest: &str) -> Result<TxHandle, LedgerError> {
        let mut state = self.state.lock().await;
        let nonce = state.next_nonce();
        debug!(identity = %self.identity, nonce, digest, "submitting anchor");

        let identity = self.identity.as_str();
        let chain = &self.chain;
        let handle = retry_with_backoff(&self.retry, "chain.submit", || {
            chain.submit(identity, digest, nonce)
        })
        .await?;

        state.last_nonce = Some(handle.nonce);
        state.last_anchored_hash = Some(digest.to_string());
        info!(identity = %self.identity, nonce = handle.nonce, tx = %handle.tx_hash, "anchor accepted");
        Ok(handle)
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::chain::InMemoryChain;

    fn sequencer(chain: Arc<InMemoryChain>, attempts: usize) -> NonceSequencer {
        NonceSequencer::new("agent", chain, RetryConfig::immediate(attempts))
    }

    #[tokio::test]
    async fn test_nonce_starts_at_zero_and_increments() {
        let chain = Arc::new(InMemoryChain::new());
        let seq = sequencer(chain.clone(), 1);
        assert_eq!(seq.anchor("0xa").await.unwrap().nonce, 0);
        assert_eq!(seq.anchor("0xb").await.unwrap().nonce, 1);
        let snap = seq.snapshot().await;
        assert_eq!(snap.last_nonce, Some(1));
        assert_eq!(snap.last_anchored_hash.as_deref(), Some("0xb"));
    }

    #[tokio::test]
    async fn test_failed_submit_does_not_consume_nonce() {
        let chain = Arc::new(InMemoryChain::new());
        let seq = sequencer(chain.clone(), 1);
        chain.fail_next_submits(1);
        assert!(seq.anchor("0xa").await.is_err());
        assert_eq!(seq.snapshot().await, ChainAnchor::default());
        assert_eq!(seq.anchor("0xa").await.unwrap().nonce, 0);
    }

    #[tokio::test]
    async fn test_retry_reuses_same_nonce() {
        let chain = Arc::new(InMemoryChain::new());
        let seq = sequencer(chain.clone(), 3);
        chain.fail_next_submits(2);
        assert_eq!(seq.anchor("0xa").await.unwrap().nonce, 0);
        assert_eq!(chain.submissions("agent").await.len(), 1);
    }

    #[tokio::test]
    async fn test_bootstrap_continues_from_chain_state() {
        let chain = Arc::new(InMemoryChain::new());
        chain.submit("agent", "0xold", 4).await.unwrap();
        let seq = sequencer(chain.clone(), 1);
        let anchor = seq.bootstrap().await.unwrap();
        assert_eq!(anchor.last_nonce, Some(4));
        assert_eq!(seq.anchor("0xnew").await.unwrap().nonce, 5);
    }

    #[tokio::test]
    async fn test_concurrent_anchors_use_distinct_increasing_nonces() {
        let chain = Arc::new(InMemoryChain::new());
        let seq = Arc::new(sequencer(chain.clone(), 1));
        let mut handles = Vec::new();
        for i in 0..8 {
            let seq = seq.clone();
            handles.push(tokio::spawn(async move { seq.anchor(&format!("0x{i}")).await }));
        }
        let mut nonces = Vec::new();
        for h in handles {
            nonces.push(h.await.unwrap().unwrap().nonce);
        }
        nonces.sort_unstable();
        assert_eq!(nonces, (0..8).collect::<Vec<u64>>());
        let observed: Vec<u64> = chain.submissions("agent").await.iter().map(|s| s.nonce).collect();
        assert_eq!(observed, (0..8).collect::<Vec<u64>>());
    }
}
