//! 阶段与报告：每轮、每阶段的处理统计

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// 工作流阶段，每轮按此顺序执行
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Authenticate,
    Discover,
    Connect,
    Message,
}

impl Phase {
    pub const ORDER: [Phase; 4] = [Phase::Authenticate, Phase::Discover, Phase::Connect, Phase::Message];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Authenticate => "authenticate",
            Phase::Discover => "discover",
            Phase::Connect => "connect",
            Phase::Message => "message",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 提前结束的原因：取消信号或活跃窗口已关闭
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Halt {
    Cancelled,
    WindowClosed,
}

impl fmt::Display for Halt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Halt::Cancelled => "cancelled",
            Halt::WindowClosed => "active window closed",
        })
    }
}

/// 单阶段统计
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PhaseReport {
    /// 实际尝试处理的目标（或查询）数
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// 幂等跳过 / 未到时间等
    pub skipped: usize,
    /// 因配额耗尽提前结束
    pub quota_exhausted: bool,
    /// 因取消信号提前结束
    pub cancelled: bool,
    /// 活跃窗口在阶段进行中关闭
    pub window_closed: bool,
}

impl PhaseReport {
    pub fn halt(&mut self, halt: Halt) {
        match halt {
            Halt::Cancelled => self.cancelled = true,
            Halt::WindowClosed => self.window_closed = true,
        }
    }
}

impl fmt::Display for PhaseReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "processed={} ok={} failed={} skipped={}",
            self.processed, self.succeeded, self.failed, self.skipped
        )?;
        if self.quota_exhausted {
            f.write_str(" (quota exhausted)")?;
        }
        if self.cancelled {
            f.write_str(" (cancelled)")?;
        }
        if self.window_closed {
            f.write_str(" (window closed)")?;
        }
        Ok(())
    }
}

/// 一轮的汇总
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub phases: Vec<(Phase, PhaseReport)>,
    pub cancelled: bool,
    pub window_closed: bool,
}

impl CycleReport {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            finished_at: None,
            phases: Vec::new(),
            cancelled: false,
            window_closed: false,
        }
    }

    pub fn push(&mut self, phase: Phase, report: PhaseReport) {
        self.cancelled |= report.cancelled;
        self.window_closed |= report.window_closed;
        self.phases.push((phase, report));
    }

    /// 阶段之间发现需要停止
    pub fn halt(&mut self, halt: Halt) {
        match halt {
            Halt::Cancelled => self.cancelled = true,
            Halt::WindowClosed => self.window_closed = true,
        }
    }

    pub fn phase(&self, phase: Phase) -> Option<&PhaseReport> {
        self.phases.iter().find(|(p, _)| *p == phase).map(|(_, r)| r)
    }

    pub fn finish(&mut self, at: DateTime<Utc>) {
        self.finished_at = Some(at);
    }
}
