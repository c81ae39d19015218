//! 优雅关闭
//!
//! 信号只取消 token，不强行中断任务：编排器在阶段之间、目标之间检查 token，
//! 正在处理的目标总能把外部动作的结果落库后再退出。节奏睡眠会被 token 立即唤醒。
//! 只保留第一次触发的关闭原因，供命令行退出时报告。

use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Ctrl+C
    UserInitiated,
    /// SIGTERM
    Signal,
    /// 检测信号或不可恢复错误
    FatalError(String),
}

pub struct ShutdownManager {
    token: CancellationToken,
    reason: watch::Sender<Option<ShutdownReason>>,
}

impl ShutdownManager {
    pub fn new() -> Self {
        let (reason, _) = watch::channel(None);
        Self {
            token: CancellationToken::new(),
            reason,
        }
    }

    /// 下发给编排器与节奏控制器的 token
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn shutdown(&self, reason: ShutdownReason) {
        self.reason.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            info!(?reason, "Shutdown requested, finishing current target");
            *current = Some(reason);
            true
        });
        self.token.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }

    /// 第一次触发关闭的原因
    pub fn reason(&self) -> Option<ShutdownReason> {
        self.reason.borrow().clone()
    }

    pub async fn wait_for_shutdown(&self) -> Option<ShutdownReason> {
        self.token.cancelled().await;
        self.reason()
    }

    /// Ctrl+C 与 SIGTERM 都只触发取消
    pub fn install_signal_handlers(self: &Arc<Self>) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let reason = tokio::select! {
                res = tokio::signal::ctrl_c() => match res {
                    Ok(()) => ShutdownReason::UserInitiated,
                    Err(_) => return,
                },
                () = terminated() => ShutdownReason::Signal,
                () = this.token.cancelled() => return,
            };
            this.shutdown(reason);
        });
    }
}

#[cfg(unix)]
async fn terminated() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            term.recv().await;
        }
        Err(_) => std::future::pending().await,
    }
}

#[cfg(not(unix))]
async fn terminated() {
    std::future::pending().await
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}
