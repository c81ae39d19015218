//! 可取消的睡眠
//!
//! 节奏控制与调度等待都通过 `Sleeper` 挂起；取消信号到达时立即返回。

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

#[async_trait]
pub trait Sleeper: Send + Sync {
    /// 睡眠 `duration`；完整睡完返回 true，被取消返回 false
    async fn sleep(&self, duration: Duration, cancel: &CancellationToken) -> bool;
}

/// 生产实现：tokio 定时器与取消信号竞争
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration, cancel: &CancellationToken) -> bool {
        if duration.is_zero() {
            return !cancel.is_cancelled();
        }
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }
}

/// 只记录、不真正睡眠
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    slept: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn durations(&self) -> Vec<Duration> {
        self.slept.lock().map(|v| v.clone()).unwrap_or_default()
    }

    pub fn total(&self) -> Duration {
        self.durations().into_iter().sum()
    }

    pub fn count(&self) -> usize {
        self.slept.lock().map(|v| v.len()).unwrap_or_default()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration, cancel: &CancellationToken) -> bool {
        if cancel.is_cancelled() {
            return false;
        }
        if let Ok(mut slept) = self.slept.lock() {
            slept.push(duration);
        }
        true
    }
}
