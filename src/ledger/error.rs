//! 账本错误类型

use thiserror::Error;

use crate::core::Retryable;

/// 账本与外部协作方（存储 / 链 / 签名 / 本地缓存）的错误
#[derive(Error, Debug)]
pub enum LedgerError {
    /// 网络抖动、5xx、超时：可重试
    #[error("Transient network error: {0}")]
    TransientNetwork(String),

    /// 内容已上传，但锚定提交在重试后仍未被接受
    #[error("Anchor submission failed for {cid}: {reason}")]
    AnchorFailure { cid: String, reason: String },

    /// 回溯时遇到环或无法解析的祖先
    #[error("Corrupt chain: {0}")]
    CorruptChain(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    /// 协作方明确拒绝（4xx、nonce 过低等），重试无意义
    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Signing error: {0}")]
    Signing(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Cache error: {0}")]
    Cache(#[from] rusqlite::Error),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),
}

impl Retryable for LedgerError {
    fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::TransientNetwork(_))
    }
}

impl From<reqwest::Error> for LedgerError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) if status.is_client_error() && status.as_u16() != 429 && status.as_u16() != 408 => {
                LedgerError::Rejected(err.to_string())
            }
            _ => LedgerError::TransientNetwork(err.to_string()),
        }
    }
}
