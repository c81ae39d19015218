//! OutreachStateMachine：目标生命周期
//!
//! ```text
//! discovered ──(配额 + 无既有请求)──▶ requested(pending)
//! requested(pending) ──(外部信号)──▶ requested(accepted | rejected)
//! requested(accepted) ──(配额 + 接受后已满最短等待)──▶ messaged
//! ```
//!
//! 发送分两步：`prepare_*` 只读判断能否发送，外部动作成功后 `confirm_*` 才落库（记录与事件同一事务）。
//! 连接请求发送失败只记失败事件、不写请求记录，目标在后续轮次仍可重试；
//! 若外部动作其实已部分成功，可能产生重复尝试，这是有意保留的取舍。
//! 跟进消息失败会写入 failed 记录，不会自动重发。

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use tracing::debug;

use crate::core::error::{StoreError, TransitionError};
use crate::quota::{QuotaDecision, QuotaTracker};
use crate::store::{
    AcceptedConnection, ActionKind, ActivityEvent, FollowUpMessage, MessageStatus, NewEvent,
    OutreachRequest, OutreachStore, Outcome, RequestStatus, Target, TargetDraft,
};

/// 目标当前所处状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetState {
    Unknown,
    Discovered,
    Requested(RequestStatus),
    Messaged(MessageStatus),
}

/// 能否发送连接请求
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestGate {
    Proceed(Target),
    /// 已有请求，幂等跳过
    AlreadyContacted(OutreachRequest),
    QuotaExhausted(QuotaDecision),
}

/// 能否发送跟进消息
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageGate {
    Proceed(Target),
    NotAccepted(RequestStatus),
    TooEarly { eligible_at: DateTime<Utc> },
    AlreadyMessaged,
    QuotaExhausted(QuotaDecision),
}

pub struct OutreachStateMachine {
    store: Arc<dyn OutreachStore>,
    quota: Arc<QuotaTracker>,
    min_message_delay: Duration,
}

impl OutreachStateMachine {
    pub fn new(store: Arc<dyn OutreachStore>, quota: Arc<QuotaTracker>, min_message_delay: Duration) -> Self {
        Self {
            store,
            quota,
            min_message_delay,
        }
    }

    pub fn store(&self) -> &Arc<dyn OutreachStore> {
        &self.store
    }

    pub fn quota(&self) -> &Arc<QuotaTracker> {
        &self.quota
    }

    pub fn min_message_delay(&self) -> Duration {
        self.min_message_delay
    }

    /// 登记发现的目标（幂等）
    pub fn discover(&self, draft: &TargetDraft, at: DateTime<Utc>) -> Result<Target, StoreError> {
        self.store.upsert_target(draft, at)
    }

    pub fn state_of(&self, url: &str) -> Result<TargetState, StoreError> {
        if self.store.target_by_url(url)?.is_none() {
            return Ok(TargetState::Unknown);
        }
        let Some(request) = self.store.request_for(url)? else {
            return Ok(TargetState::Discovered);
        };
        let messages = self.store.messages_for(url)?;
        // 任一已发送消息优先
        if messages.iter().any(|m| m.status == MessageStatus::Sent) {
            return Ok(TargetState::Messaged(MessageStatus::Sent));
        }
        if let Some(last) = messages.last() {
            return Ok(TargetState::Messaged(last.status));
        }
        Ok(TargetState::Requested(request.status))
    }

    /// 等待发送连接请求的目标
    pub fn request_candidates(&self, limit: usize) -> Result<Vec<Target>, StoreError> {
        self.store.targets_awaiting_request(limit)
    }

    /// 已接受、尚未跟进的连接
    pub fn message_candidates(&self) -> Result<Vec<AcceptedConnection>, StoreError> {
        self.store.accepted_unmessaged()
    }

    pub fn prepare_request<Tz: TimeZone>(
        &self,
        url: &str,
        now: &DateTime<Tz>,
    ) -> Result<RequestGate, TransitionError> {
        let target = self
            .store
            .target_by_url(url)?
            .ok_or_else(|| TransitionError::UnknownTarget(url.to_string()))?;
        if let Some(existing) = self.store.request_for(url)? {
            debug!(url, status = %existing.status, "Target already contacted, skipping");
            return Ok(RequestGate::AlreadyContacted(existing));
        }
        let decision = self.quota.check(ActionKind::ConnectionRequest, now)?;
        if !decision.is_allowed() {
            return Ok(RequestGate::QuotaExhausted(decision));
        }
        Ok(RequestGate::Proceed(target))
    }

    /// 外部动作成功后落库：pending 请求 + 成功事件
    pub fn confirm_request(
        &self,
        target: &Target,
        note: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<OutreachRequest, TransitionError> {
        if let Some(existing) = self.store.request_for(&target.url)? {
            return Err(TransitionError::InvalidTransition {
                from: format!("requested({})", existing.status),
                to: "requested(pending)".to_string(),
            });
        }
        let detail = if note.is_some() { "sent with note" } else { "sent without note" };
        let event = NewEvent::new(ActionKind::ConnectionRequest, Outcome::Success, at)
            .target(target.url.clone())
            .detail(detail);
        Ok(self.store.record_request(target, note, &event)?)
    }

    /// 发送失败：只记事件，目标保持原状态
    pub fn record_request_failure(
        &self,
        target_url: &str,
        detail: &str,
        at: DateTime<Utc>,
    ) -> Result<ActivityEvent, StoreError> {
        self.store.log_event(
            &NewEvent::new(ActionKind::ConnectionRequest, Outcome::Failure, at)
                .target(target_url)
                .detail(detail),
        )
    }

    pub fn record_quota_skip(
        &self,
        kind: ActionKind,
        target_url: Option<&str>,
        decision: QuotaDecision,
        at: DateTime<Utc>,
    ) -> Result<ActivityEvent, StoreError> {
        let mut event = NewEvent::new(kind, Outcome::QuotaBlocked, at).detail(decision.to_string());
        if let Some(url) = target_url {
            event = event.target(url);
        }
        self.store.log_event(&event)
    }

    pub fn record_blocked(
        &self,
        kind: ActionKind,
        target_url: Option<&str>,
        reason: &str,
        at: DateTime<Utc>,
    ) -> Result<ActivityEvent, StoreError> {
        let mut event = NewEvent::new(kind, Outcome::Blocked, at).detail(reason);
        if let Some(url) = target_url {
            event = event.target(url);
        }
        self.store.log_event(&event)
    }

    /// 外部检测到的接受 / 拒绝，只允许从 pending 迁移
    pub fn record_response(
        &self,
        url: &str,
        status: RequestStatus,
        at: DateTime<Utc>,
    ) -> Result<OutreachRequest, TransitionError> {
        let request = self
            .store
            .request_for(url)?
            .ok_or_else(|| TransitionError::NoRequest(url.to_string()))?;
        if status == RequestStatus::Pending || request.status != RequestStatus::Pending {
            return Err(TransitionError::InvalidTransition {
                from: request.status.to_string(),
                to: status.to_string(),
            });
        }

        self.store.update_request_status(url, status, at)?;
        self.store.log_event(
            &NewEvent::new(ActionKind::StatusUpdate, Outcome::Success, at)
                .target(url)
                .detail(format!("request {status}")),
        )?;
        self.store
            .request_for(url)?
            .ok_or_else(|| TransitionError::NoRequest(url.to_string()))
    }

    /// 跟进消息的门槛：已接受、已满等待时长（含边界）、消息配额未满
    pub fn message_gate<Tz: TimeZone>(
        &self,
        url: &str,
        now: &DateTime<Tz>,
    ) -> Result<MessageGate, TransitionError> {
        let target = self
            .store
            .target_by_url(url)?
            .ok_or_else(|| TransitionError::UnknownTarget(url.to_string()))?;
        let request = self
            .store
            .request_for(url)?
            .ok_or_else(|| TransitionError::NoRequest(url.to_string()))?;

        let accepted_at = match (request.status, request.accepted_at) {
            (RequestStatus::Accepted, Some(at)) => at,
            (status, _) => return Ok(MessageGate::NotAccepted(status)),
        };
        if !self.store.messages_for(url)?.is_empty() {
            return Ok(MessageGate::AlreadyMessaged);
        }
        let eligible_at = accepted_at + self.min_message_delay;
        if now.with_timezone(&Utc) < eligible_at {
            return Ok(MessageGate::TooEarly { eligible_at });
        }
        let decision = self.quota.check(ActionKind::Message, now)?;
        if !decision.is_allowed() {
            return Ok(MessageGate::QuotaExhausted(decision));
        }
        Ok(MessageGate::Proceed(target))
    }

    pub fn confirm_message(
        &self,
        target: &Target,
        content: &str,
        at: DateTime<Utc>,
    ) -> Result<FollowUpMessage, StoreError> {
        let event = NewEvent::new(ActionKind::Message, Outcome::Success, at)
            .target(target.url.clone())
            .detail("follow-up sent");
        self.store
            .record_message(target, content, MessageStatus::Sent, &event)
    }

    /// 消息发送失败：写 failed 记录与失败事件，之后不再自动重发
    pub fn record_message_failure(
        &self,
        target: &Target,
        content: &str,
        detail: &str,
        at: DateTime<Utc>,
    ) -> Result<FollowUpMessage, StoreError> {
        let event = NewEvent::new(ActionKind::Message, Outcome::Failure, at)
            .target(target.url.clone())
            .detail(detail);
        self.store
            .record_message(target, content, MessageStatus::Failed, &event)
    }
}
