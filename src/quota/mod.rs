//! QuotaTracker：按动作类型的小时 / 日上限
//!
//! 计数每次都从审计事件实时读出，不在内存中缓存，进程重启后配额状态不丢失。
//! 只统计 `success` 事件；`count >= cap` 即拦截。
//! “当天”按传入时间所在时区的自然日计算。

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Timelike, Utc};
use serde::Serialize;

use crate::config::{RateLimit, RateLimitsSection};
use crate::core::error::StoreError;
use crate::store::{ActionKind, OutreachStore, Outcome};

/// 一次配额检查的结论
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaDecision {
    Allowed,
    HourlyCapReached { count: u32, cap: u32 },
    DailyCapReached { count: u32, cap: u32 },
}

impl QuotaDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, QuotaDecision::Allowed)
    }
}

impl fmt::Display for QuotaDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuotaDecision::Allowed => f.write_str("allowed"),
            QuotaDecision::HourlyCapReached { count, cap } => {
                write!(f, "hourly cap reached ({count}/{cap})")
            }
            QuotaDecision::DailyCapReached { count, cap } => {
                write!(f, "daily cap reached ({count}/{cap})")
            }
        }
    }
}

/// 某动作类型的当前用量
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuotaUsage {
    pub kind: ActionKind,
    pub last_hour: u32,
    pub per_hour: u32,
    pub today: u32,
    pub per_day: u32,
}

impl QuotaUsage {
    pub fn exhausted_today(&self) -> bool {
        self.today >= self.per_day
    }
}

pub struct QuotaTracker {
    store: Arc<dyn OutreachStore>,
    limits: HashMap<ActionKind, RateLimit>,
}

impl QuotaTracker {
    pub fn new(store: Arc<dyn OutreachStore>, limits: &RateLimitsSection) -> Self {
        let limits = HashMap::from([
            (ActionKind::ConnectionRequest, limits.connections),
            (ActionKind::Message, limits.messages),
            (ActionKind::Search, limits.searches),
        ]);
        Self { store, limits }
    }

    pub fn limit_for(&self, kind: ActionKind) -> Option<RateLimit> {
        self.limits.get(&kind).copied()
    }

    /// 读事件日志并与上限比较；无上限的类型总是允许
    pub fn check<Tz: TimeZone>(
        &self,
        kind: ActionKind,
        now: &DateTime<Tz>,
    ) -> Result<QuotaDecision, StoreError> {
        let Some(limit) = self.limit_for(kind) else {
            return Ok(QuotaDecision::Allowed);
        };

        let today = self.count_today(kind, now)?;
        if today >= limit.per_day {
            return Ok(QuotaDecision::DailyCapReached {
                count: today,
                cap: limit.per_day,
            });
        }
        let last_hour = self.count_last_hour(kind, now)?;
        if last_hour >= limit.per_hour {
            return Ok(QuotaDecision::HourlyCapReached {
                count: last_hour,
                cap: limit.per_hour,
            });
        }
        Ok(QuotaDecision::Allowed)
    }

    pub fn can_proceed<Tz: TimeZone>(
        &self,
        kind: ActionKind,
        now: &DateTime<Tz>,
    ) -> Result<bool, StoreError> {
        Ok(self.check(kind, now)?.is_allowed())
    }

    /// 所有受限类型的用量，顺序固定
    pub fn usage<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> Result<Vec<QuotaUsage>, StoreError> {
        let mut out = Vec::new();
        for kind in [ActionKind::Search, ActionKind::ConnectionRequest, ActionKind::Message] {
            let Some(limit) = self.limit_for(kind) else {
                continue;
            };
            out.push(QuotaUsage {
                kind,
                last_hour: self.count_last_hour(kind, now)?,
                per_hour: limit.per_hour,
                today: self.count_today(kind, now)?,
                per_day: limit.per_day,
            });
        }
        Ok(out)
    }

    /// 外联相关的类型（连接、消息）当天是否都已用尽
    pub fn outreach_exhausted_today<Tz: TimeZone>(
        &self,
        now: &DateTime<Tz>,
    ) -> Result<bool, StoreError> {
        for kind in [ActionKind::ConnectionRequest, ActionKind::Message] {
            if let Some(limit) = self.limit_for(kind) {
                if self.count_today(kind, now)? < limit.per_day {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    fn count_last_hour<Tz: TimeZone>(
        &self,
        kind: ActionKind,
        now: &DateTime<Tz>,
    ) -> Result<u32, StoreError> {
        let since = now.with_timezone(&Utc) - Duration::hours(1);
        self.store.count_events(kind, Outcome::Success, since)
    }

    fn count_today<Tz: TimeZone>(
        &self,
        kind: ActionKind,
        now: &DateTime<Tz>,
    ) -> Result<u32, StoreError> {
        self.store
            .count_events(kind, Outcome::Success, start_of_day(now))
    }
}

/// `now` 所在时区当天零点（转成 UTC）
pub fn start_of_day<Tz: TimeZone>(now: &DateTime<Tz>) -> DateTime<Utc> {
    let midnight = now.date_naive().and_time(chrono::NaiveTime::MIN);
    match now.timezone().from_local_datetime(&midnight).earliest() {
        Some(start) => start.with_timezone(&Utc),
        // 零点落在夏令时缺口里时退回到按秒数回拨
        None => {
            now.with_timezone(&Utc) - Duration::seconds(i64::from(now.num_seconds_from_midnight()))
        }
    }
}
