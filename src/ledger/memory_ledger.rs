//! 记忆账本：签名 → 上传 → 缓存并推进本地头部 → 链上锚定
//!
//! 整个 append 持有同一把追加锁，保证链是线性的（第 N+1 条的 previousCid 必为第 N 条的 cid）。
//! 上传成功而锚定耗尽重试时返回 AnchorFailure：内容已存储、本地头部已推进，
//! 下一次 verify_chain 会报告本地头部与链上摘要不一致，直到后续锚定成功。

use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::core::{retry_with_backoff, RetryConfig};
use crate::ledger::anchor::{ChainAnchor, NonceSequencer};
use crate::ledger::backfill::{download_record, BackfillReport, Backfiller};
use crate::ledger::cache::RecordCache;
use crate::ledger::chain::ChainClient;
use crate::ledger::record::{anchor_digest, MemoryRecord};
use crate::ledger::signer::{verify_signature, Signer};
use crate::ledger::storage::{ContentStore, UploadOptions};
use crate::ledger::traversal::walk_back;
use crate::ledger::LedgerError;

/// 账本运行参数
#[derive(Debug, Clone)]
pub struct LedgerOptions {
    pub agent_version: String,
    pub upload: UploadOptions,
    pub retry: RetryConfig,
    pub max_traversal_depth: usize,
    pub backfill_depth: usize,
    /// 关闭时取消后台回填
    pub cancel: CancellationToken,
}

impl Default for LedgerOptions {
    fn default() -> Self {
        Self {
            agent_version: env!("CARGO_PKG_VERSION").to_string(),
            upload: UploadOptions {
                compression: true,
                ..Default::default()
            },
            retry: RetryConfig::default(),
            max_traversal_depth: 1000,
            backfill_depth: 200,
            cancel: CancellationToken::new(),
        }
    }
}

/// append 成功的结果
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppendOutcome {
    pub cid: String,
    pub previous_cid: String,
    pub digest: String,
    pub nonce: u64,
    pub tx_hash: String,
}

/// verify_chain 的结果；不一致只报告，不自动修正
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainVerification {
    pub consistent: bool,
    pub head_cid: Option<String>,
    pub local_digest: Option<String>,
    pub anchored_digest: Option<String>,
    pub depth: usize,
    pub reached_genesis: bool,
    pub details: Vec<String>,
}

/// 启动校验结果
#[derive(Debug, Clone)]
pub struct BootstrapReport {
    pub anchor: ChainAnchor,
    pub head_cid: Option<String>,
    /// 本地指针与链上状态不一致
    pub pointer_mismatch: bool,
}

struct LedgerInner {
    signer: Arc<dyn Signer>,
    store: Arc<dyn ContentStore>,
    chain: Arc<dyn ChainClient>,
    cache: Arc<RecordCache>,
    sequencer: NonceSequencer,
    backfiller: Arc<Backfiller>,
    append_lock: Mutex<()>,
    options: LedgerOptions,
}

#[derive(Clone)]
pub struct MemoryLedger {
    inner: Arc<LedgerInner>,
}

impl MemoryLedger {
    /// 组装账本并执行启动校验
    pub async fn open(
        signer: Arc<dyn Signer>,
        store: Arc<dyn ContentStore>,
        chain: Arc<dyn ChainClient>,
        cache: Arc<RecordCache>,
        options: LedgerOptions,
    ) -> Result<(Self, BootstrapReport), LedgerError> {
        let ledger = Self::new(signer, store, chain, cache, options);
        let report = ledger.bootstrap().await?;
        Ok((ledger, report))
    }

    /// 只组装，不访问链
    pub fn new(
        signer: Arc<dyn Signer>,
        store: Arc<dyn ContentStore>,
        chain: Arc<dyn ChainClient>,
        cache: Arc<RecordCache>,
        options: LedgerOptions,
    ) -> Self {
        let sequencer = NonceSequencer::new(signer.identity(), chain.clone(), options.retry.clone());
        let backfiller = Arc::new(Backfiller::new(
            store.clone(),
            cache.clone(),
            options.retry.clone(),
            options.backfill_depth,
            options.cancel.child_token(),
        ));
        Self {
            inner: Arc::new(LedgerInner {
                signer,
                store,
                chain,
                cache,
                sequencer,
                backfiller,
                append_lock: Mutex::new(()),
                options,
            }),
        }
    }

    pub fn identity(&self) -> &str {
        self.inner.signer.identity()
    }

    pub fn cache(&self) -> &Arc<RecordCache> {
        &self.inner.cache
    }

    pub fn head(&self) -> Result<Option<String>, LedgerError> {
        self.inner.cache.last_cid(self.identity())
    }

    pub async fn anchor_state(&self) -> ChainAnchor {
        self.inner.sequencer.snapshot().await
    }

    /// 从链读取锚定状态，并与本地 lastKnownCid 对照；链为准
    pub async fn bootstrap(&self) -> Result<BootstrapReport, LedgerError> {
        let _guard = self.inner.append_lock.lock().await;
        let identity = self.identity();
        let anchor = self.inner.sequencer.bootstrap().await?;
        let local = self.inner.cache.last_cid(identity)?;

        let mut pointer_mismatch = false;
        let head_cid = match &anchor.last_anchored_hash {
            Some(digest) => match self.inner.cache.cid_for_digest(digest)? {
                Some(chain_cid) => {
                    if local.as_deref() != Some(chain_cid.as_str()) {
                        pointer_mismatch = true;
                        warn!(
                            local = ?local,
                            chain = %chain_cid,
                            "local head disagrees with anchored digest, following chain"
                        );
                        self.inner.cache.set_last_cid(identity, &chain_cid)?;
                    }
                    Some(chain_cid)
                }
                None => {
                    pointer_mismatch = local
                        .as_deref()
                        .map(|cid| anchor_digest(cid) != *digest)
                        .unwrap_or(true);
                    if pointer_mismatch {
                        warn!(
                            digest = %digest,
                            local = ?local,
                            "anchored digest not found in local cache, keeping local head"
                        );
                    }
                    local
                }
            },
            None => {
                if let Some(cid) = &local {
                    pointer_mismatch = true;
                    warn!(local = %cid, "local head exists but chain has no anchor for this identity");
                }
                local
            }
        };

        info!(identity, head = ?head_cid, last_nonce = ?anchor.last_nonce, "ledger bootstrapped");
        Ok(BootstrapReport {
            anchor,
            head_cid,
            pointer_mismatch,
        })
    }

    /// 追加一条经验记录；上传与锚定都被接受后才返回
    pub async fn append(&self, payload: Value) -> Result<AppendOutcome, LedgerError> {
        let inner = &self.inner;
        let _guard = inner.append_lock.lock().await;
        let identity = self.identity();

        let previous_cid = inner.cache.last_cid(identity)?.unwrap_or_default();
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let mut record = MemoryRecord::unsigned(
            payload,
            previous_cid.clone(),
            timestamp.clone(),
            inner.options.agent_version.clone(),
        );
        record.signature = inner.signer.sign(&record.signing_bytes()?)?;

        let body = record.to_upload_bytes()?;
        let upload = UploadOptions {
            file_name: Some(format!("memory-{}.json", timestamp)),
            ..inner.options.upload.clone()
        };
        let store = &inner.store;
        let cid = retry_with_backoff(&inner.options.retry, "storage.upload", || {
            store.upload(body.clone(), &upload)
        })
        .await?;
        debug!(cid = %cid, previous = %previous_cid, "record uploaded");

        record.cid = cid.clone();
        inner.cache.put(&record, Some(identity))?;
        inner.cache.set_last_cid(identity, &cid)?;

        let digest = anchor_digest(&cid);
        match inner.sequencer.anchor(&digest).await {
            Ok(tx) => {
                info!(cid = %cid, nonce = tx.nonce, "memory appended");
                Ok(AppendOutcome {
                    cid,
                    previous_cid,
                    digest,
                    nonce: tx.nonce,
                    tx_hash: tx.tx_hash,
                })
            }
            Err(e) => {
                error!(cid = %cid, error = %e, "record stored but anchor failed");
                Err(LedgerError::AnchorFailure {
                    cid,
                    reason: e.to_string(),
                })
            }
        }
    }

    /// 读取记录：缓存命中或下载后写入缓存；未知祖先在后台回填
    pub async fn fetch(&self, cid: &str) -> Result<MemoryRecord, LedgerError> {
        self.fetch_and_backfill(cid).await.map(|(record, _)| record)
    }

    /// 同 fetch，并返回后台回填任务（若调度了）
    pub async fn fetch_and_backfill(
        &self,
        cid: &str,
    ) -> Result<(MemoryRecord, Option<JoinHandle<BackfillReport>>), LedgerError> {
        let record = self.load_record(cid).await?;
        let mut handle = None;
        if !record.previous_cid.is_empty() && !self.inner.cache.contains(&record.previous_cid)? {
            handle = self.inner.backfiller.schedule(&record.previous_cid);
        }
        Ok((record, handle))
    }

    async fn load_record(&self, cid: &str) -> Result<MemoryRecord, LedgerError> {
        if let Some(record) = self.inner.cache.get(cid)? {
            return Ok(record);
        }
        let record = download_record(self.inner.store.as_ref(), &self.inner.options.retry, cid).await?;
        self.inner.cache.put(&record, None)?;
        Ok(record)
    }

    /// 回溯校验：逐跳验证签名归属，并比较本地头部摘要与链上最近摘要
    pub async fn verify_chain(&self, identity: &str) -> Result<ChainVerification, LedgerError> {
        let anchored_digest = if identity == self.identity() {
            self.inner.sequencer.snapshot().await.last_anchored_hash
        } else {
            let chain = &self.inner.chain;
            retry_with_backoff(&self.inner.options.retry, "chain.last_digest", || {
                chain.last_digest(identity)
            })
            .await?
        };

        let head_cid = self.inner.cache.last_cid(identity)?;
        let walk = walk_back(
            head_cid.as_deref().unwrap_or_default(),
            self.inner.options.max_traversal_depth,
            |cid| {
                let ledger = self.clone();
                async move { ledger.load_record(&cid).await }
            },
        )
        .await?;

        let mut details = Vec::new();
        for record in walk.iter() {
            let owned = record
                .signing_bytes()
                .map(|bytes| verify_signature(identity, &bytes, &record.signature))
                .unwrap_or(false);
            if !owned {
                details.push(format!("signature does not belong to {} at {}", identity, record.cid));
            }
        }

        let local_digest = head_cid.as_deref().map(anchor_digest);
        if local_digest != anchored_digest {
            details.push(format!(
                "local head digest {} differs from anchored digest {}",
                local_digest.as_deref().unwrap_or("<none>"),
                anchored_digest.as_deref().unwrap_or("<none>")
            ));
        }
        if !walk.reached_genesis {
            debug!(depth = walk.depth(), "traversal stopped at depth bound");
        }

        let consistent = details.is_empty();
        if consistent {
            info!(identity, depth = walk.depth(), "chain verified");
        } else {
            warn!(identity, issues = details.len(), "chain verification found divergence");
        }

        Ok(ChainVerification {
            consistent,
            head_cid,
            local_digest,
            anchored_digest,
            depth: walk.depth(),
            reached_genesis: walk.reached_genesis,
            details,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::chain::InMemoryChain;
    use crate::ledger::signer::SchnorrSigner;
    use crate::ledger::storage::InMemoryContentStore;
    use serde_json::json;

    struct Fixture {
        ledger: MemoryLedger,
        store: Arc<InMemoryContentStore>,
        chain: Arc<InMemoryChain>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryContentStore::new());
        let chain = Arc::new(InMemoryChain::new());
        let signer = Arc::new(SchnorrSigner::from_secret_bytes(&[0x11; 32]).unwrap());
        let options = LedgerOptions {
            retry: RetryConfig::immediate(2),
            ..Default::default()
        };
        let ledger = MemoryLedger::new(
            signer,
            store.clone(),
            chain.clone(),
            Arc::new(RecordCache::open_in_memory().unwrap()),
            options,
        );
        Fixture { ledger, store, chain }
    }

    #[tokio::test]
    async fn test_append_links_records() {
        let f = fixture();
        let first = f.ledger.append(json!({"note": "x"})).await.unwrap();
        assert_eq!(first.previous_cid, "");
        assert_eq!(first.nonce, 0);
        let second = f.ledger.append(json!({"note": "y"})).await.unwrap();
        assert_eq!(second.previous_cid, first.cid);
        assert_eq!(second.nonce, 1);
        assert_eq!(f.ledger.head().unwrap().as_deref(), Some(second.cid.as_str()));
    }

    #[tokio::test]
    async fn test_upload_retried_then_anchored() {
        let f = fixture();
        f.store.fail_next_uploads(1);
        let outcome = f.ledger.append(json!({"note": "x"})).await.unwrap();
        assert_eq!(f.store.upload_count(), 2);
        assert_eq!(f.chain.submissions(f.ledger.identity()).await[0].digest, outcome.digest);
    }

    #[tokio::test]
    async fn test_anchor_failure_keeps_content_and_is_detectable() {
        let f = fixture();
        f.ledger.append(json!({"note": "x"})).await.unwrap();
        f.chain.set_unavailable(true);
        let err = f.ledger.append(json!({"note": "y"})).await.unwrap_err();
        let orphan = match err {
            LedgerError::AnchorFailure { cid, .. } => cid,
            other => panic!("unexpected error: {other}"),
        };
        assert!(f.ledger.cache().contains(&orphan).unwrap());

        let report = f.ledger.verify_chain(f.ledger.identity()).await.unwrap();
        assert!(!report.consistent);
        assert_eq!(report.head_cid.as_deref(), Some(orphan.as_str()));
        assert_eq!(report.depth, 2);
    }

    #[tokio::test]
    async fn test_verify_consistent_chain() {
        let f = fixture();
        for i in 0..3 {
            f.ledger.append(json!({ "i": i })).await.unwrap();
        }
        let report = f.ledger.verify_chain(f.ledger.identity()).await.unwrap();
        assert!(report.consistent, "{:?}", report.details);
        assert_eq!(report.depth, 3);
        assert!(report.reached_genesis);
    }

    #[tokio::test]
    async fn test_verify_empty_chain_is_consistent() {
        let f = fixture();
        let report = f.ledger.verify_chain(f.ledger.identity()).await.unwrap();
        assert!(report.consistent);
        assert_eq!(report.depth, 0);
    }

    #[tokio::test]
    async fn test_verify_flags_foreign_signatures() {
        let f = fixture();
        f.ledger.append(json!({"note": "x"})).await.unwrap();
        let other = SchnorrSigner::from_secret_bytes(&[0x22; 32]).unwrap();
        let head = f.ledger.head().unwrap().unwrap();
        f.ledger.cache().set_last_cid(other.identity(), &head).unwrap();
        let report = f.ledger.verify_chain(other.identity()).await.unwrap();
        assert!(!report.consistent);
        assert!(report.details.iter().any(|d| d.contains("signature")));
    }

    #[tokio::test]
    async fn test_fetch_downloads_and_caches() {
        let f = fixture();
        let record = MemoryRecord::unsigned(json!({"note": "remote"}), "", "t", "v");
        let cid = f
            .store
            .upload(record.to_upload_bytes().unwrap(), &UploadOptions::default())
            .await
            .unwrap();

        let fetched = f.ledger.fetch(&cid).await.unwrap();
        assert_eq!(fetched.payload["note"], "remote");
        assert!(f.ledger.cache().contains(&cid).unwrap());

        let downloads = f.store.download_count();
        f.ledger.fetch(&cid).await.unwrap();
        assert_eq!(f.store.download_count(), downloads);
    }

    #[tokio::test]
    async fn test_fetch_unknown_cid_is_not_found() {
        let f = fixture();
        assert!(matches!(
            f.ledger.fetch("bafkmissing").await,
            Err(LedgerError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_bootstrap_follows_chain_pointer() {
        let f = fixture();
        let first = f.ledger.append(json!({"note": "x"})).await.unwrap();
        f.chain.set_unavailable(true);
        let _ = f.ledger.append(json!({"note": "orphan"})).await;
        f.chain.set_unavailable(false);

        let report = f.ledger.bootstrap().await.unwrap();
        assert!(report.pointer_mismatch);
        assert_eq!(report.head_cid.as_deref(), Some(first.cid.as_str()));
        assert_eq!(report.anchor.last_nonce, Some(0));
        assert_eq!(f.ledger.head().unwrap().as_deref(), Some(first.cid.as_str()));
    }
}
