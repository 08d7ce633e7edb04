//! 重试执行器：对任意可失败的网络操作施加有限次数重试与指数退避
//!
//! 账本上传、锚定提交、LLM 决策调用共用同一实现；耗尽次数后把最后一次错误原样返回给调用方。

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::warn;

use crate::config::RetrySection;

/// 重试配置
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// 最大尝试次数（含首次）
    pub max_attempts: usize,
    /// 首次退避时长
    pub initial_backoff: Duration,
    /// 退避上限
    pub max_backoff: Duration,
    /// 指数增长因子；1.0 即固定退避
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(5),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// 测试与离线模式用：不等待、只尝试 n 次
    pub fn immediate(max_attempts: usize) -> Self {
        Self {
            max_attempts,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            backoff_multiplier: 1.0,
        }
    }
}

impl From<&RetrySection> for RetryConfig {
    fn from(section: &RetrySection) -> Self {
        Self {
            max_attempts: section.max_attempts.max(1),
            initial_backoff: Duration::from_millis(section.initial_backoff_ms),
            max_backoff: Duration::from_millis(section.max_backoff_ms),
            backoff_multiplier: section.backoff_multiplier.max(1.0),
        }
    }
}

/// 错误是否值得重试；不可重试的错误立即返回
pub trait Retryable {
    fn is_retryable(&self) -> bool {
        true
    }
}

impl Retryable for String {}

/// 以指数退避重试一个异步操作
pub async fn retry_with_backoff<F, Fut, T, E>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display + Retryable,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempts = 0;
    let mut backoff = config.initial_backoff;

    loop {
        attempts += 1;

        match operation().await {
            Ok(result) => {
                if attempts > 1 {
                    tracing::info!(operation = operation_name, attempts, "recovered after retries");
                }
                return Ok(result);
            }
            Err(err) => {
                if !err.is_retryable() {
                    warn!("{} failed with non-retryable error: {}", operation_name, err);
                    return Err(err);
                }
                if attempts >= max_attempts {
                    warn!(
                        "{} failed after {} attempts: {}",
                        operation_name, attempts, err
                    );
                    return Err(err);
                }

                warn!(
                    "{} attempt {}/{} failed: {}. Retrying in {:?}...",
                    operation_name, attempts, max_attempts, err, backoff
                );

                sleep(backoff).await;

                backoff = Duration::from_secs_f64(
                    (backoff.as_secs_f64() * config.backoff_multiplier)
                        .min(config.max_backoff.as_secs_f64()),
                );
            }
        }
    }
}
