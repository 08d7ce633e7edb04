//! 记忆记录：上传到内容寻址存储的不可变条目
//!
//! 签名覆盖 {data, previousCid, timestamp, agentVersion}；`cid` 由存储层在上传后分配，不参与签名也不随内容上传。

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ledger::LedgerError;

/// 一条经验记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryRecord {
    /// 调用方提供的任意结构化内容
    pub payload: Value,
    /// 本链上一条记录的 CID；创世记录为空串
    #[serde(default)]
    pub previous_cid: String,
    pub signature: String,
    /// ISO-8601 创建时间
    pub timestamp: String,
    pub agent_version: String,
    /// 存储层分配的内容标识
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cid: String,
}

/// 参与签名的字段（键按字典序序列化，保证签名输入确定）
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SigningInput<'a> {
    data: &'a Value,
    previous_cid: &'a str,
    timestamp: &'a str,
    agent_version: &'a str,
}

impl MemoryRecord {
    /// 构造尚未签名的记录
    pub fn unsigned(
        payload: Value,
        previous_cid: impl Into<String>,
        timestamp: impl Into<String>,
        agent_version: impl Into<String>,
    ) -> Self {
        Self {
            payload,
            previous_cid: previous_cid.into(),
            signature: String::new(),
            timestamp: timestamp.into(),
            agent_version: agent_version.into(),
            cid: String::new(),
        }
    }

    pub fn is_genesis(&self) -> bool {
        self.previous_cid.is_empty()
    }

    /// 签名输入的规范字节
    pub fn signing_bytes(&self) -> Result<Vec<u8>, LedgerError> {
        let input = SigningInput {
            data: &self.payload,
            previous_cid: &self.previous_cid,
            timestamp: &self.timestamp,
            agent_version: &self.agent_version,
        };
        Ok(serde_json::to_vec(&input)?)
    }

    /// 上传体（不含 cid）
    pub fn to_upload_bytes(&self) -> Result<Vec<u8>, LedgerError> {
        let mut body = self.clone();
        body.cid.clear();
        Ok(serde_json::to_vec_pretty(&body)?)
    }

    /// 从下载内容还原，并填入请求时使用的 cid
    pub fn from_bytes(cid: &str, bytes: &[u8]) -> Result<Self, LedgerError> {
        let mut record: MemoryRecord = serde_json::from_slice(bytes)?;
        record.cid = cid.to_string();
        Ok(record)
    }
}

/// 由 CID 派生的链上短摘要（BLAKE3，0x 前缀十六进制）
pub fn anchor_digest(cid: &str) -> String {
    format!("0x{}", blake3::hash(cid.as_bytes()).to_hex())
}
