//! 记忆相似度索引（search_memory 的后端）
//!
//! 启动时从本地缓存重建，之后每次 save_experience 即时加入。
//! 配置了嵌入提供方时按余弦相似度打分，否则按查询词覆盖率打分（含 CJK 时用 jieba 分词）。

use std::collections::HashSet;
use std::sync::{Arc, OnceLock};

use futures_util::stream::{self, StreamExt};
use jieba_rs::Jieba;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::core::AgentError;
use crate::ledger::RecordCache;
use crate::llm::EmbeddingProvider;

static JIEBA: OnceLock<Jieba> = OnceLock::new();

const REBUILD_CONCURRENCY: usize = 4;

fn is_cjk(c: char) -> bool {
    matches!(c,
        '\u{4E00}'..='\u{9FFF}'
        | '\u{3400}'..='\u{4DBF}'
        | '\u{F900}'..='\u{FAFF}'
        | '\u{3040}'..='\u{30FF}'
    )
}

/// 分词：含 CJK 时走 jieba 搜索模式，否则按非字母数字切分；统一小写并去掉单字符英文词
pub fn tokenize(text: &str) -> HashSet<String> {
    let keep = |t: &str| t.chars().count() > 1 || t.chars().next().is_some_and(is_cjk);
    if text.chars().any(is_cjk) {
        JIEBA
            .get_or_init(Jieba::new)
            .cut_for_search(text, true)
            .into_iter()
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty() && t.chars().any(char::is_alphanumeric) && keep(t.as_str()))
            .collect()
    } else {
        text.split(|c: char| !c.is_alphanumeric())
            .filter(|t| keep(*t))
            .map(str::to_lowercase)
            .collect()
    }
}

/// 查询词在文档中出现的比例
fn overlap_score(query: &HashSet<String>, doc: &HashSet<String>) -> f32 {
    if query.is_empty() {
        return 0.0;
    }
    query.intersection(doc).count() as f32 / query.len() as f32
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// 记录正文：字符串原样使用，其它结构序列化为 JSON
fn payload_text(payload: &Value) -> String {
    match payload {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub cid: String,
    pub score: f32,
    pub payload: Value,
}

struct IndexEntry {
    cid: String,
    payload: Value,
    tokens: HashSet<String>,
    embedding: Option<Vec<f32>>,
}

pub struct MemoryIndex {
    entries: RwLock<Vec<IndexEntry>>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
}

impl MemoryIndex {
    pub fn new(embedder: Option<Arc<dyn EmbeddingProvider>>) -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            embedder,
        }
    }

    async fn embed(&self, text: &str) -> Option<Vec<f32>> {
        let embedder = self.embedder.as_ref()?;
        match embedder.embed(text).await {
            Ok(v) if !v.is_empty() => Some(v),
            Ok(_) => None,
            Err(e) => {
                warn!(error = %e, "embedding failed, falling back to token overlap");
                None
            }
        }
    }

    /// 加入一条记录；同一 cid 只索引一次
    pub async fn add(&self, cid: &str, payload: Value) -> bool {
        if self.entries.read().await.iter().any(|e| e.cid == cid) {
            return false;
        }
        let text = payload_text(&payload);
        let embedding = self.embed(&text).await;
        let entry = IndexEntry {
            cid: cid.to_string(),
            tokens: tokenize(&text),
            payload,
            embedding,
        };
        let mut entries = self.entries.write().await;
        if entries.iter().any(|e| e.cid == cid) {
            return false;
        }
        entries.push(entry);
        true
    }

    /// 从本地缓存中的全部记录重建
    pub async fn rebuild_from(&self, cache: &RecordCache) -> Result<usize, AgentError> {
        let records = cache.all_records()?;
        // 启用嵌入时每条记录一次请求，并发进行
        let added = stream::iter(records)
            .map(|record| async move { self.add(&record.cid, record.payload).await })
            .buffer_unordered(REBUILD_CONCURRENCY)
            .filter(|added| futures_util::future::ready(*added))
            .count()
            .await;
        debug!(added, "memory index rebuilt from cache");
        Ok(added)
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// 返回得分最高的 top_k 条（得分为 0 的不返回）
    pub async fn search(&self, query: &str, top_k: usize) -> Vec<SearchHit> {
        let query_embedding = self.embed(query).await;
        let query_tokens = tokenize(query);
        let entries = self.entries.read().await;

        let mut hits: Vec<SearchHit> = entries
            .iter()
            .map(|e| {
                let score = match (&query_embedding, &e.embedding) {
                    (Some(q), Some(d)) => cosine_similarity(q, d),
                    _ => overlap_score(&query_tokens, &e.tokens),
                };
                SearchHit {
                    cid: e.cid.clone(),
                    score,
                    payload: e.payload.clone(),
                }
            })
            .filter(|h| h.score > 0.0)
            .collect();

        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(top_k);
        hits
    }
}
