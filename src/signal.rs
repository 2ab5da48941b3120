//! 重新加载信号
//!
//! 收到 SIGHUP 时用当前的基础配置重载，让覆盖文件的修改生效。

use crate::core::fanout::FanoutLogger;
use crate::error::Result;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinHandle;
use tracing::{error, info};

/// 安装 SIGHUP 监听任务
///
/// 必须在 tokio 运行时中调用。信号监听在返回前已经注册完成；
/// 任务在运行时关闭或被 `abort` 时结束。
pub fn spawn_reload_on_sighup(logger: Arc<FanoutLogger>) -> Result<JoinHandle<()>> {
    let mut hangups = signal(SignalKind::hangup())?;

    Ok(tokio::spawn(async move {
        while hangups.recv().await.is_some() {
            let span = logger.span().clone();
            info!(
                parent: &span,
                "SIGHUP received, reloading configuration from {}",
                logger.override_file().display()
            );
            match logger.reload_current().await {
                Ok(report) => info!(
                    parent: &span,
                    replaced = ?report.replaced,
                    unchanged = report.unchanged.len(),
                    "reload finished"
                ),
                Err(e) => error!(parent: &span, error = %e, "could not re-load configuration"),
            }
        }
    }))
}
