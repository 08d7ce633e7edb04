//! 后台祖先回填
//!
//! fetch 命中未知祖先时调度：沿 previousCid 下载并写入缓存，不阻塞调用方。
//! 同一起点的并发调度由 in-flight 表去重；已缓存的记录直接跳过下载继续向前，因此中断后可续跑。

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::{retry_with_backoff, RetryConfig};
use crate::ledger::cache::RecordCache;
use crate::ledger::record::MemoryRecord;
use crate::ledger::storage::ContentStore;
use crate::ledger::LedgerError;

/// 下载一条记录（带重试）；存储中不存在时返回 NotFound
pub(crate) async fn download_record(
    store: &dyn ContentStore,
    retry: &RetryConfig,
    cid: &str,
) -> Result<MemoryRecord, LedgerError> {
    let bytes = retry_with_backoff(retry, "storage.download", || store.download(cid))
        .await?
        .ok_or_else(|| LedgerError::NotFound(cid.to_string()))?;
    MemoryRecord::from_bytes(cid, &bytes)
}

/// 回填结束原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackfillStop {
    Genesis,
    DepthLimit,
    Cancelled,
    /// 下载失败或遇到环，留待下次续跑
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct BackfillReport {
    pub start: String,
    /// 新下载并写入缓存的条数
    pub downloaded: usize,
    /// 途经的记录数（含已缓存的）
    pub visited: usize,
    pub stop: BackfillStop,
}

pub struct Backfiller {
    store: Arc<dyn ContentStore>,
    cache: Arc<RecordCache>,
    retry: RetryConfig,
    max_depth: usize,
    cancel: CancellationToken,
    in_flight: Mutex<HashSet<String>>,
}

impl Backfiller {
    pub fn new(
        store: Arc<dyn ContentStore>,
        cache: Arc<RecordCache>,
        retry: RetryConfig,
        max_depth: usize,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            cache,
            retry,
            max_depth,
            cancel,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    fn in_flight(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.in_flight.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn is_in_flight(&self, cid: &str) -> bool {
        self.in_flight().contains(cid)
    }

    /// 在后台从 `from` 开始回填；同一起点已在进行中时返回 None
    pub fn schedule(self: &Arc<Self>, from: &str) -> Option<JoinHandle<BackfillReport>> {
        if from.is_empty() || self.cancel.is_cancelled() {
            return None;
        }
        if !self.in_flight().insert(from.to_string()) {
            debug!(cid = from, "backfill already in flight");
            return None;
        }

        let this = Arc::clone(self);
        let from = from.to_string();
        Some(tokio::spawn(async move {
            let report = this.run(&from).await;
            this.in_flight().remove(&from);
            match &report.stop {
                BackfillStop::Failed(reason) => {
                    warn!(cid = %from, downloaded = report.downloaded, %reason, "backfill stopped early")
                }
                stop => {
                    info!(cid = %from, downloaded = report.downloaded, visited = report.visited, ?stop, "backfill finished")
                }
            }
            report
        }))
    }

    /// 同步执行一次回填
    pub async fn run(&self, from: &str) -> BackfillReport {
        let mut report = BackfillReport {
            start: from.to_string(),
            downloaded: 0,
            visited: 0,
            stop: BackfillStop::Genesis,
        };
        let mut visited: HashSet<String> = HashSet::new();
        let mut cursor = from.to_string();

        while !cursor.is_empty() {
            if self.cancel.is_cancelled() {
                report.stop = BackfillStop::Cancelled;
                return report;
            }
            if report.visited >= self.max_depth {
                report.stop = BackfillStop::DepthLimit;
                return report;
            }
            if !visited.insert(cursor.clone()) {
                report.stop = BackfillStop::Failed(format!("cycle at {}", cursor));
                return report;
            }

            let record = match self.cache.get(&cursor) {
                Ok(Some(record)) => record,
                Ok(None) => {
                    let downloaded = tokio::select! {
                        _ = self.cancel.cancelled() => {
                            report.stop = BackfillStop::Cancelled;
                            return report;
                        }
                        r = download_record(self.store.as_ref(), &self.retry, &cursor) => r,
                    };
                    match downloaded.and_then(|r| self.cache.put(&r, None).map(|_| r)) {
                        Ok(record) => {
                            report.downloaded += 1;
                            record
                        }
                        Err(e) => {
                            report.stop = BackfillStop::Failed(e.to_string());
                            return report;
                        }
                    }
                }
                Err(e) => {
                    report.stop = BackfillStop::Failed(e.to_string());
                    return report;
                }
            };

            report.visited += 1;
            cursor = record.previous_cid;
        }

        report
    }
}
