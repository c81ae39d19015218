//! 持久化协作方：目标、外联请求、跟进消息与审计事件
//!
//! - **Target**：按身份键（规范化 URL）唯一，重复发现只刷新属性
//! - **OutreachRequest**：每个目标至多一条；`accepted_at` 当且仅当状态为 accepted 时存在
//! - **FollowUpMessage**：只对已接受且超过最短等待时长的请求创建
//! - **ActivityEvent**：只追加、不修改，是配额计数的唯一来源
//!
//! 所有方法同步执行；实现方自行保证互斥（见 `sqlite::SqliteStore` 的粗粒度锁）。

pub mod sqlite;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::error::StoreError;

pub use sqlite::SqliteStore;

/// 审计事件的动作类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// 一次发现搜索（一个查询）
    Search,
    ConnectionRequest,
    Message,
    Authentication,
    /// 外部检测到的请求状态变化（接受 / 拒绝）
    StatusUpdate,
}

impl ActionKind {
    pub const ALL: [ActionKind; 5] = [
        ActionKind::Search,
        ActionKind::ConnectionRequest,
        ActionKind::Message,
        ActionKind::Authentication,
        ActionKind::StatusUpdate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Search => "search",
            ActionKind::ConnectionRequest => "connection_request",
            ActionKind::Message => "message",
            ActionKind::Authentication => "authentication",
            ActionKind::StatusUpdate => "status_update",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionKind {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ActionKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown action kind: {s}")))
    }
}

/// 审计事件结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure,
    /// 检测信号（验证码、挑战页等）
    Blocked,
    /// 配额耗尽导致跳过（信息性）
    QuotaBlocked,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Failure => "failure",
            Outcome::Blocked => "blocked",
            Outcome::QuotaBlocked => "quota_blocked",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Outcome {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(Outcome::Success),
            "failure" => Ok(Outcome::Failure),
            "blocked" => Ok(Outcome::Blocked),
            "quota_blocked" => Ok(Outcome::QuotaBlocked),
            other => Err(StoreError::Corrupt(format!("unknown outcome: {other}"))),
        }
    }
}

/// 外联请求状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Accepted,
    Rejected,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Accepted => "accepted",
            RequestStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RequestStatus::Pending),
            "accepted" => Ok(RequestStatus::Accepted),
            "rejected" => Ok(RequestStatus::Rejected),
            other => Err(StoreError::Corrupt(format!("unknown request status: {other}"))),
        }
    }
}

/// 跟进消息状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Sent,
    Failed,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Sent => "sent",
            MessageStatus::Failed => "failed",
        }
    }
}

impl FromStr for MessageStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sent" => Ok(MessageStatus::Sent),
            "failed" => Ok(MessageStatus::Failed),
            other => Err(StoreError::Corrupt(format!("unknown message status: {other}"))),
        }
    }
}

/// 发现阶段提取到的目标属性（尚未入库）
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetDraft {
    pub url: String,
    pub name: String,
    pub role: String,
    pub organization: String,
    pub location: String,
    pub keywords: String,
}

impl TargetDraft {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = role.into();
        self
    }

    pub fn with_organization(mut self, organization: impl Into<String>) -> Self {
        self.organization = organization.into();
        self
    }

    pub fn with_keywords(mut self, keywords: impl Into<String>) -> Self {
        self.keywords = keywords.into();
        self
    }
}

/// 已入库目标
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Target {
    pub id: i64,
    pub url: String,
    pub name: String,
    pub role: String,
    pub organization: String,
    pub location: String,
    pub keywords: String,
    pub discovered_at: DateTime<Utc>,
}

/// 外联请求
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutreachRequest {
    pub id: i64,
    pub target_id: i64,
    pub target_url: String,
    pub created_at: DateTime<Utc>,
    pub note: Option<String>,
    pub status: RequestStatus,
    pub accepted_at: Option<DateTime<Utc>>,
}

/// 已接受但尚未跟进的请求，连同目标属性（用于渲染消息）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptedConnection {
    pub request: OutreachRequest,
    pub target: Target,
}

/// 跟进消息
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FollowUpMessage {
    pub id: i64,
    pub target_id: i64,
    pub target_url: String,
    pub content: String,
    pub sent_at: DateTime<Utc>,
    pub status: MessageStatus,
}

/// 待追加的审计事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEvent {
    pub kind: ActionKind,
    pub target_url: Option<String>,
    pub outcome: Outcome,
    pub detail: String,
    pub at: DateTime<Utc>,
}

impl NewEvent {
    pub fn new(kind: ActionKind, outcome: Outcome, at: DateTime<Utc>) -> Self {
        Self {
            kind,
            target_url: None,
            outcome,
            detail: String::new(),
            at,
        }
    }

    pub fn target(mut self, url: impl Into<String>) -> Self {
        self.target_url = Some(url.into());
        self
    }

    pub fn detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = detail.into();
        self
    }
}

/// 已落库的审计事件
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActivityEvent {
    pub id: i64,
    pub kind: ActionKind,
    pub target_url: Option<String>,
    pub outcome: Outcome,
    pub detail: String,
    pub at: DateTime<Utc>,
}

/// 持久化协作方接口
///
/// 同一逻辑输入重复调用必须安全（重复发现幂等）。
/// `record_request` / `record_message` 把业务记录与审计事件放在同一事务中，避免配额漂移。
pub trait OutreachStore: Send + Sync {
    /// 按身份键插入或刷新目标；`discovered_at` 只在首次插入时写入
    fn upsert_target(&self, draft: &TargetDraft, at: DateTime<Utc>) -> Result<Target, StoreError>;

    fn target_by_url(&self, url: &str) -> Result<Option<Target>, StoreError>;

    /// 尚无外联请求的目标，按发现时间先后
    fn targets_awaiting_request(&self, limit: usize) -> Result<Vec<Target>, StoreError>;

    fn request_for(&self, target_url: &str) -> Result<Option<OutreachRequest>, StoreError>;

    /// 写入 pending 请求并追加成功事件（同一事务）
    fn record_request(
        &self,
        target: &Target,
        note: Option<&str>,
        event: &NewEvent,
    ) -> Result<OutreachRequest, StoreError>;

    /// 更新请求状态；accepted 时写入 `at`，其余状态清空 `accepted_at`。返回是否有行被更新
    fn update_request_status(
        &self,
        target_url: &str,
        status: RequestStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// 已接受且没有任何跟进消息记录的请求
    fn accepted_unmessaged(&self) -> Result<Vec<AcceptedConnection>, StoreError>;

    fn messages_for(&self, target_url: &str) -> Result<Vec<FollowUpMessage>, StoreError>;

    /// 写入跟进消息并追加对应事件（同一事务）
    fn record_message(
        &self,
        target: &Target,
        content: &str,
        status: MessageStatus,
        event: &NewEvent,
    ) -> Result<FollowUpMessage, StoreError>;

    fn log_event(&self, event: &NewEvent) -> Result<ActivityEvent, StoreError>;

    /// 统计 `since` 之后（含）某类动作某结果的事件数
    fn count_events(
        &self,
        kind: ActionKind,
        outcome: Outcome,
        since: DateTime<Utc>,
    ) -> Result<u32, StoreError>;

    /// 最近的审计事件（新到旧）
    fn recent_events(&self, limit: usize) -> Result<Vec<ActivityEvent>, StoreError>;
}
