//! autobee - 自主智能体守护进程
//!
//! 入口：加载配置、初始化日志、安装关闭信号，组装运行时并进入自调度循环。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use autobee::agent::{build_runtime, run_scheduler};
use autobee::config::load_config;
use autobee::core::{run_with_graceful_shutdown, ShutdownManager};
use autobee::observability;

/// 收到关闭信号后等待当前运行收尾的时长
const SHUTDOWN_GRACE: Duration = Duration::from_secs(15);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    // 可选：第一个参数为额外配置文件
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = load_config(config_path).context("Failed to load config")?;

    let shutdown = Arc::new(ShutdownManager::new());
    let runtime = build_runtime(config, shutdown.token())
        .await
        .context("Failed to build runtime")?;

    let token = shutdown.token();
    run_with_graceful_shutdown(shutdown, run_scheduler(&runtime, token), SHUTDOWN_GRACE).await;
    Ok(())
}
