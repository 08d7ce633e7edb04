//! 回溯遍历：从头部沿 previousCid 走到创世记录
//!
//! 以 CID 为键的记录表 + 访问集合；重复访问即为环，立即以 CorruptChain 终止。

use std::collections::{HashMap, HashSet};
use std::future::Future;

use crate::ledger::record::MemoryRecord;
use crate::ledger::LedgerError;

/// 一次回溯的结果（cids 从头部到最早的祖先）
#[derive(Debug, Default)]
pub struct ChainWalk {
    pub cids: Vec<String>,
    pub records: HashMap<String, MemoryRecord>,
    /// 是否到达了创世记录（false 表示被深度上限截断）
    pub reached_genesis: bool,
}

impl ChainWalk {
    pub fn depth(&self) -> usize {
        self.cids.len()
    }

    pub fn head(&self) -> Option<&MemoryRecord> {
        self.cids.first().and_then(|cid| self.records.get(cid))
    }

    /// 按从头部到祖先的顺序迭代
    pub fn iter(&self) -> impl Iterator<Item = &MemoryRecord> {
        self.cids.iter().filter_map(|cid| self.records.get(cid))
    }
}

/// 从 head 回溯，最多访问 max_depth 条记录
///
/// `load` 负责把 CID 解析为记录（缓存或下载）；无法解析的祖先视为链损坏。
pub async fn walk_back<F, Fut>(head: &str, max_depth: usize, mut load: F) -> Result<ChainWalk, LedgerError>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<MemoryRecord, LedgerError>>,
{
    let mut walk = ChainWalk::default();
    let mut visited: HashSet<String> = HashSet::new();
    let mut cursor = head.to_string();

    while !cursor.is_empty() {
        if walk.depth() >= max_depth {
            return Ok(walk);
        }
        if !visited.insert(cursor.clone()) {
            return Err(LedgerError::CorruptChain(format!(
                "cycle detected: {} revisited after {} hops",
                cursor,
                walk.depth()
            )));
        }

        let record = match load(cursor.clone()).await {
            Ok(record) => record,
            Err(LedgerError::NotFound(cid)) => {
                return Err(LedgerError::CorruptChain(format!("unresolvable ancestor {}", cid)));
            }
            Err(e) => return Err(e),
        };

        let previous = record.previous_cid.clone();
        walk.cids.push(cursor.clone());
        walk.records.insert(cursor, record);
        cursor = previous;
    }

    walk.reached_genesis = true;
    Ok(walk)
}
