//! 内容寻址存储协作方
//!
//! upload(bytes, options) -> cid；download(cid) -> bytes。CID 由存储侧根据内容派生，调用方不可指定。
//! - InMemoryContentStore：进程内实现（BLAKE3 派生 CID），用于离线运行与测试，支持注入失败
//! - HttpContentStore：通过 reqwest 调用远端存储网关

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::RwLock;

use crate::ledger::LedgerError;

/// 上传选项
#[derive(Debug, Clone, Default)]
pub struct UploadOptions {
    pub compression: bool,
    pub encryption_password: Option<String>,
    /// 供存储侧展示的文件名
    pub file_name: Option<String>,
}

/// 内容寻址存储
#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn upload(&self, bytes: Vec<u8>, options: &UploadOptions) -> Result<String, LedgerError>;

    /// 不存在时返回 Ok(None)
    async fn download(&self, cid: &str) -> Result<Option<Vec<u8>>, LedgerError>;
}

/// 进程内存储：CID = "bafkr" + BLAKE3(内容)
#[derive(Debug, Default)]
pub struct InMemoryContentStore {
    objects: RwLock<HashMap<String, Vec<u8>>>,
    /// 接下来 n 次上传返回 TransientNetwork
    failing_uploads: AtomicUsize,
    /// 接下来 n 次下载返回 TransientNetwork
    failing_downloads: AtomicUsize,
    uploads: AtomicUsize,
    downloads: AtomicUsize,
}

impl InMemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn content_cid(bytes: &[u8]) -> String {
        format!("bafkr{}", blake3::hash(bytes).to_hex())
    }

    pub fn fail_next_uploads(&self, n: usize) {
        self.failing_uploads.store(n, Ordering::SeqCst);
    }

    pub fn fail_next_downloads(&self, n: usize) {
        self.failing_downloads.store(n, Ordering::SeqCst);
    }

    /// 以指定 CID 写入原始内容（用于构造损坏的链）
    pub async fn insert_raw(&self, cid: impl Into<String>, bytes: Vec<u8>) {
        self.objects.write().await.insert(cid.into(), bytes);
    }

    pub fn upload_count(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    pub fn download_count(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl ContentStore for InMemoryContentStore {
    async fn upload(&self, bytes: Vec<u8>, _options: &UploadOptions) -> Result<String, LedgerError> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.failing_uploads) {
            return Err(LedgerError::TransientNetwork("simulated upload failure".to_string()));
        }
        let cid = Self::content_cid(&bytes);
        self.objects.write().await.entry(cid.clone()).or_insert(bytes);
        Ok(cid)
    }

    async fn download(&self, cid: &str) -> Result<Option<Vec<u8>>, LedgerError> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.failing_downloads) {
            return Err(LedgerError::TransientNetwork("simulated download failure".to_string()));
        }
        Ok(self.objects.read().await.get(cid).cloned())
    }
}

#[derive(Deserialize)]
struct UploadResponse {
    cid: String,
}

/// 远端存储网关：POST {base}/uploads 返回 {"cid"}；GET {base}/objects/{cid} 返回原始内容
pub struct HttpContentStore {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpContentStore {
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
}

#[async_trait]
impl ContentStore for HttpContentStore {
    async fn upload(&self, bytes: Vec<u8>, options: &UploadOptions) -> Result<String, LedgerError> {
        let mut req = self
            .authorized(self.client.post(format!("{}/uploads", self.base_url)))
            .header("Content-Type", "application/json")
            .query(&[("compression", options.compression.to_string())]);
        if let Some(name) = &options.file_name {
            req = req.query(&[("name", name)]);
        }
        if let Some(password) = &options.encryption_password {
            req = req.header("X-Encryption-Password", password);
        }
        let resp = req.body(bytes).send().await?.error_for_status()?;
        let body: UploadResponse = resp.json().await?;
        Ok(body.cid)
    }

    async fn download(&self, cid: &str) -> Result<Option<Vec<u8>>, LedgerError> {
        let resp = self
            .authorized(self.client.get(format!("{}/objects/{}", self.base_url, cid)))
            .send()
            .await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let bytes = resp.error_for_status()?.bytes().await?;
        Ok(Some(bytes.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cid_derived_from_content() {
        let store = InMemoryContentStore::new();
        let opts = UploadOptions::default();
        let a = store.upload(b"one".to_vec(), &opts).await.unwrap();
        let b = store.upload(b"one".to_vec(), &opts).await.unwrap();
        let c = store.upload(b"two".to_vec(), &opts).await.unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(store.download(&a).await.unwrap().unwrap(), b"one".to_vec());
        assert!(store.download("bafkmissing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_injected_failures_are_consumed() {
        let store = InMemoryContentStore::new();
        store.fail_next_uploads(1);
        let opts = UploadOptions::default();
        assert!(matches!(
            store.upload(b"x".to_vec(), &opts).await,
            Err(LedgerError::TransientNetwork(_))
        ));
        assert!(store.upload(b"x".to_vec(), &opts).await.is_ok());
        assert_eq!(store.upload_count(), 2);
    }
}
