//! 本地记录缓存（SQLite）
//!
//! - records：按 CID 存放已上传或已下载的记录，只追加（INSERT OR IGNORE）
//! - pointers：每个身份一条 lastKnownCid 指针
//!
//! 同时提供列表/分页查询，供只读 API 使用。

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::ledger::record::{anchor_digest, MemoryRecord};
use crate::ledger::LedgerError;

pub const MAX_PAGE_LIMIT: usize = 100;

/// 列表查询参数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecordQuery {
    pub page: usize,
    pub limit: usize,
    /// 在记录正文中做子串匹配
    pub search: Option<String>,
    pub author: Option<String>,
}

impl Default for RecordQuery {
    fn default() -> Self {
        Self {
            page: 1,
            limit: 20,
            search: None,
            author: None,
        }
    }
}

impl RecordQuery {
    fn validate(&self) -> Result<(), LedgerError> {
        if self.page < 1 {
            return Err(LedgerError::InvalidQuery("page must be >= 1".to_string()));
        }
        if self.limit < 1 || self.limit > MAX_PAGE_LIMIT {
            return Err(LedgerError::InvalidQuery(format!(
                "limit must be between 1 and {}",
                MAX_PAGE_LIMIT
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub total: usize,
    pub page: usize,
    pub limit: usize,
    pub total_pages: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecordPage {
    pub data: Vec<MemoryRecord>,
    pub pagination: Pagination,
}

pub struct RecordCache {
    conn: Mutex<Connection>,
}

impl RecordCache {
    /// 打开（必要时创建）磁盘缓存
    pub fn open(path: &Path) -> Result<Self, LedgerError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    LedgerError::InvalidQuery(format!("cannot create {}: {}", parent.display(), e))
                })?;
            }
        }
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, LedgerError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, LedgerError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS records (
                 cid TEXT PRIMARY KEY,
                 previous_cid TEXT NOT NULL,
                 author TEXT,
                 digest TEXT NOT NULL,
                 body TEXT NOT NULL,
                 created_at TEXT NOT NULL
             );

             CREATE INDEX IF NOT EXISTS idx_records_digest ON records(digest);
             CREATE INDEX IF NOT EXISTS idx_records_author ON records(author);

             CREATE TABLE IF NOT EXISTS pointers (
                 agent TEXT PRIMARY KEY,
                 last_cid TEXT NOT NULL,
                 updated_at TEXT NOT NULL
             );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock_connection(&self) -> MutexGuard<'_, Connection> {
        // 持锁期间只执行单条语句，中毒后连接本身仍可用
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn decode(cid: String, body: String) -> Result<MemoryRecord, LedgerError> {
        let mut record: MemoryRecord = serde_json::from_str(&body)?;
        record.cid = cid;
        Ok(record)
    }

    pub fn get(&self, cid: &str) -> Result<Option<MemoryRecord>, LedgerError> {
        let row: Option<String> = self
            .lock_connection()
            .query_row("SELECT body FROM records WHERE cid = ?1", params![cid], |row| row.get(0))
            .optional()?;
        row.map(|body| Self::decode(cid.to_string(), body)).transpose()
    }

    pub fn contains(&self, cid: &str) -> Result<bool, LedgerError> {
        let found: Option<i64> = self
            .lock_connection()
            .query_row("SELECT 1 FROM records WHERE cid = ?1", params![cid], |row| row.get(0))
            .optional()?;
        Ok(found.is_some())
    }

    /// 写入记录；已存在时不覆盖，返回是否新插入
    pub fn put(&self, record: &MemoryRecord, author: Option<&str>) -> Result<bool, LedgerError> {
        if record.cid.is_empty() {
            return Err(LedgerError::InvalidQuery("record has no cid".to_string()));
        }
        let body = serde_json::to_string(record)?;
        let inserted = self.lock_connection().execute(
            "INSERT OR IGNORE INTO records (cid, previous_cid, author, digest, body, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.cid,
                record.previous_cid,
                author,
                anchor_digest(&record.cid),
                body,
                record.timestamp
            ],
        )?;
        Ok(inserted > 0)
    }

    /// 由链上摘要反查 CID
    pub fn cid_for_digest(&self, digest: &str) -> Result<Option<String>, LedgerError> {
        Ok(self
            .lock_connection()
            .query_row(
                "SELECT cid FROM records WHERE digest = ?1 LIMIT 1",
                params![digest],
                |row| row.get(0),
            )
            .optional()?)
    }

    pub fn last_cid(&self, agent: &str) -> Result<Option<String>, LedgerError> {
        Ok(self
            .lock_connection()
            .query_row(
                "SELECT last_cid FROM pointers WHERE agent = ?1",
                params![agent],
                |row| row.get(0),
            )
            .optional()?)
    }

    pub fn set_last_cid(&self, agent: &str, cid: &str) -> Result<(), LedgerError> {
        self.lock_connection().execute(
            "INSERT INTO pointers (agent, last_cid, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(agent) DO UPDATE SET last_cid = excluded.last_cid, updated_at = excluded.updated_at",
            params![agent, cid, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// 全部记录，按写入顺序
    pub fn all_records(&self) -> Result<Vec<MemoryRecord>, LedgerError> {
        let conn = self.lock_connection();
        let mut stmt = conn.prepare("SELECT cid, body FROM records ORDER BY rowid ASC")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter()
            .map(|(cid, body)| Self::decode(cid, body))
            .collect()
    }

    pub fn len(&self) -> Result<usize, LedgerError> {
        let count: i64 = self
            .lock_connection()
            .query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> Result<bool, LedgerError> {
        Ok(self.len()? == 0)
    }

    /// 分页列表，最新在前
    pub fn list(&self, query: &RecordQuery) -> Result<RecordPage, LedgerError> {
        query.validate()?;
        let search = query.search.as_deref().map(str::trim).filter(|s| !s.is_empty());
        let author = query.author.as_deref().filter(|s| !s.is_empty());

        let filter = "(?1 IS NULL OR instr(lower(body), lower(?1)) > 0)
                      AND (?2 IS NULL OR author = ?2)";

        let conn = self.lock_connection();
        let total: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM records WHERE {filter}"),
            params![search, author],
            |row| row.get(0),
        )?;

        let offset = query
            .page
            .checked_sub(1)
            .and_then(|p| p.checked_mul(query.limit))
            .and_then(|o| i64::try_from(o).ok())
            .ok_or_else(|| LedgerError::InvalidQuery(format!("page {} is out of range", query.page)))?;
        let mut stmt = conn.prepare(&format!(
            "SELECT cid, body FROM records WHERE {filter} ORDER BY rowid DESC LIMIT ?3 OFFSET ?4"
        ))?;
        let rows = stmt
            .query_map(
                params![search, author, query.limit as i64, offset],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )?
            .collect::<Result<Vec<_>, _>>()?;
        drop(stmt);
        drop(conn);

        let data = rows
            .into_iter()
            .map(|(cid, body)| Self::decode(cid, body))
            .collect::<Result<Vec<_>, _>>()?;
        let total = total as usize;
        Ok(RecordPage {
            data,
            pagination: Pagination {
                total,
                page: query.page,
                limit: query.limit,
                total_pages: total.div_ceil(query.limit),
            },
        })
    }
}
