//! 记忆层：对话消息、上下文窗口压缩、经验检索索引

pub mod context;
pub mod conversation;
pub mod index;

pub use context::{ContextWindowManager, SUMMARY_PREFIX};
pub use conversation::{collapse_messages, Message, Role};
pub use index::{tokenize, MemoryIndex, SearchHit};
