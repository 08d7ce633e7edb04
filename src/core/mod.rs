//! 核心层：错误与恢复、重试执行器、优雅关闭

pub mod error;
pub mod recovery;
pub mod retry;
pub mod shutdown;

pub use error::{AgentError, RecoveryAction};
pub use recovery::RecoveryEngine;
pub use retry::{retry_with_backoff, RetryConfig, Retryable};
pub use shutdown::{run_with_graceful_shutdown, ShutdownManager, ShutdownReason};
