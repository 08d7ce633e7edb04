//! 关闭信号
//!
//! 自调度循环、编排器与后台回填共用同一个 CancellationToken（回填持有子 token）。
//! 收到 Ctrl+C / SIGTERM 后取消 token，并给正在进行的运行一段宽限期收尾；
//! 已写入缓存的记录保持完整，下次启动时回填可续传。

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Ctrl+C
    UserInitiated,
    /// SIGTERM
    Signal,
    FatalError(String),
}

#[derive(Debug, Default)]
pub struct ShutdownManager {
    token: CancellationToken,
    /// 只记录第一次触发的原因
    reason: Mutex<Option<ShutdownReason>>,
}

impl ShutdownManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn shutdown(&self, reason: ShutdownReason) {
        let mut slot = self.reason.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if slot.is_none() {
            info!(?reason, "shutdown requested");
            *slot = Some(reason);
        }
        drop(slot);
        self.token.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn reason(&self) -> Option<ShutdownReason> {
        self.reason
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub async fn wait_for_shutdown(&self) {
        self.token.cancelled().await;
    }

    /// Ctrl+C 与（unix 下）SIGTERM 都会触发关闭
    pub fn install_signal_handlers(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let reason = tokio::select! {
                _ = ctrl_c() => ShutdownReason::UserInitiated,
                _ = terminate() => ShutdownReason::Signal,
                _ = manager.wait_for_shutdown() => return,
            };
            manager.shutdown(reason);
        });
    }
}

async fn ctrl_c() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(_) => std::future::pending::<()>().await,
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await
}

/// 运行 app 直到结束；收到关闭信号后最多再等待 grace 让 app 自行退出
pub async fn run_with_graceful_shutdown<F>(manager: Arc<ShutdownManager>, app: F, grace: Duration)
where
    F: Future<Output = ()>,
{
    manager.install_signal_handlers();
    tokio::pin!(app);

    tokio::select! {
        _ = &mut app => info!("application finished"),
        _ = manager.wait_for_shutdown() => {
            if tokio::time::timeout(grace, &mut app).await.is_err() {
                warn!(grace_secs = grace.as_secs(), reason = ?manager.reason(), "grace period elapsed, exiting");
            } else {
                info!(reason = ?manager.reason(), "stopped after shutdown signal");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_reason_wins_and_children_cancel() {
        let manager = ShutdownManager::new();
        let child = manager.token().child_token();
        assert!(!manager.is_shutdown());

        manager.shutdown(ShutdownReason::FatalError("boom".into()));
        manager.shutdown(ShutdownReason::Signal);
        assert!(child.is_cancelled());
        assert_eq!(manager.reason(), Some(ShutdownReason::FatalError("boom".into())));
    }

    #[tokio::test]
    async fn test_app_gets_grace_period_after_shutdown() {
        let manager = Arc::new(ShutdownManager::new());
        let token = manager.token();
        let finished = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let flag = finished.clone();
        let app = async move {
            token.cancelled().await;
            tokio::time::sleep(Duration::from_millis(20)).await;
            flag.store(true, std::sync::atomic::Ordering::SeqCst);
        };
        let trigger = manager.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.shutdown(ShutdownReason::UserInitiated);
        });

        run_with_graceful_shutdown(manager, app, Duration::from_secs(5)).await;
        assert!(finished.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_grace_period_is_bounded() {
        let manager = Arc::new(ShutdownManager::new());
        manager.shutdown(ShutdownReason::Signal);
        let app = std::future::pending::<()>();
        tokio::time::timeout(
            Duration::from_secs(5),
            run_with_graceful_shutdown(manager, app, Duration::from_millis(10)),
        )
        .await
        .unwrap();
    }
}
