//! 哈希链式记忆账本
//!
//! - **record**: 记忆记录与签名输入、链上摘要
//! - **signer**: Signer trait 与 secp256k1 Schnorr 实现
//! - **storage**: 内容寻址存储（进程内 / HTTP）
//! - **chain**: 链上锚定（进程内 / HTTP）
//! - **anchor**: ChainAnchor 与 Nonce 序列器
//! - **cache**: SQLite 本地缓存与分页查询
//! - **traversal**: 带环检测的回溯遍历
//! - **backfill**: 后台祖先回填
//! - **memory_ledger**: 对外入口 MemoryLedger

pub mod anchor;
pub mod backfill;
pub mod cache;
pub mod chain;
pub mod error;
pub mod memory_ledger;
pub mod record;
pub mod signer;
pub mod storage;
pub mod traversal;

pub use anchor::{ChainAnchor, NonceSequencer};
pub use backfill::{BackfillReport, BackfillStop, Backfiller};
pub use cache::{Pagination, RecordCache, RecordPage, RecordQuery};
pub use chain::{ChainClient, HttpChainClient, InMemoryChain, TxHandle};
pub use error::LedgerError;
pub use memory_ledger::{AppendOutcome, BootstrapReport, ChainVerification, LedgerOptions, MemoryLedger};
pub use record::{anchor_digest, MemoryRecord};
pub use signer::{verify_signature, SchnorrSigner, Signer};
pub use storage::{ContentStore, HttpContentStore, InMemoryContentStore, UploadOptions};
pub use traversal::{walk_back, ChainWalk};
