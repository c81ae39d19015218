//! 每轮的各个阶段：登录、发现、连接请求、跟进消息
//!
//! 所有阶段共享一个 `PhaseContext`；单个目标的可恢复错误只记失败事件并跳过，
//! 检测信号与会话失效通过 `PhaseContext::escalate` 变成 `CycleError` 中止本轮。
//! 目标之间、翻页之前以及不可撤回的点击之前都检查 `PhaseContext::halt`。

pub mod auth;
pub mod connect;
pub mod discover;
pub mod message;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::core::clock::Clock;
use crate::core::error::{CycleError, InteractionError};
use crate::core::state::Halt;
use crate::interaction::{HumanInteractor, SessionGuard};
use crate::outreach::OutreachStateMachine;
use crate::pacing::PacingController;
use crate::schedule::ActivityScheduler;
use crate::store::{ActionKind, NewEvent, Outcome};

pub use auth::{authenticate, AuthOutcome};
pub use connect::send_connection_requests;
pub use discover::{build_search_url, canonical_profile_url, discover_targets};
pub use message::{send_follow_ups, thread_url};

pub struct PhaseContext {
    pub human: Arc<HumanInteractor>,
    pub guard: Arc<SessionGuard>,
    pub outreach: Arc<OutreachStateMachine>,
    pub clock: Arc<dyn Clock>,
    pub cancel: CancellationToken,
    /// 为 `None` 时不受活跃窗口约束（`once --force`）
    pub schedule: Option<ActivityScheduler>,
}

impl PhaseContext {
    pub fn pacing(&self) -> &Arc<PacingController> {
        self.human.pacing()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn halt(&self) -> Option<Halt> {
        if self.is_cancelled() {
            return Some(Halt::Cancelled);
        }
        match &self.schedule {
            Some(schedule) if !schedule.is_active_at(&self.clock.now()) => Some(Halt::WindowClosed),
            _ => None,
        }
    }

    /// 当前页面命中检测信号时返回 `Blocked`
    pub async fn ensure_clear(&self) -> Result<(), InteractionError> {
        self.guard.ensure_clear(self.human.driver().as_ref()).await
    }

    /// 把不可恢复的交互错误升级为整轮错误，并写入对应的审计事件
    pub async fn escalate(
        &self,
        kind: ActionKind,
        target_url: Option<&str>,
        err: InteractionError,
    ) -> CycleError {
        let at = self.clock.now_utc();
        match err {
            InteractionError::Blocked(reason) => {
                let snapshot = self
                    .guard
                    .capture(self.human.driver().as_ref(), kind.as_str())
                    .await;
                error!(%kind, reason = %reason, snapshot = ?snapshot, "Detection signal, stopping cycle");
                if let Err(e) = self.outreach.record_blocked(kind, target_url, &reason, at) {
                    return CycleError::Store(e);
                }
                CycleError::Blocked { reason, snapshot }
            }
            InteractionError::SessionLost(reason) => {
                error!(%kind, reason = %reason, "Session lost, stopping cycle");
                if let Err(e) = self.log_failure(kind, target_url, &reason) {
                    return CycleError::Store(e);
                }
                CycleError::SessionLost(reason)
            }
            recoverable => {
                // 调用方本应自行处理可恢复错误，这里按会话失效处理
                warn!(%kind, error = %recoverable, "Unhandled interaction error escalated");
                CycleError::SessionLost(recoverable.to_string())
            }
        }
    }

    fn log_failure(
        &self,
        kind: ActionKind,
        target_url: Option<&str>,
        detail: &str,
    ) -> Result<(), crate::core::error::StoreError> {
        let mut event = NewEvent::new(kind, Outcome::Failure, self.clock.now_utc()).detail(detail);
        if let Some(url) = target_url {
            event = event.target(url);
        }
        self.outreach.store().log_event(&event)?;
        Ok(())
    }
}
