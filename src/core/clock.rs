//! 时钟抽象：生产用系统本地时间，测试用可手动推进的时钟

use std::sync::Mutex;

use chrono::{DateTime, Duration, Local, Utc};

pub trait Clock: Send + Sync {
    /// 本地时间（调度与“当天”配额都按本地时区计算）
    fn now(&self) -> DateTime<Local>;

    fn now_utc(&self) -> DateTime<Utc> {
        self.now().with_timezone(&Utc)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// 固定时间，只在 `advance` / `set` 时变化
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut now) = self.now.lock() {
            *now += by;
        }
    }

    pub fn set(&self, to: DateTime<Utc>) {
        if let Ok(mut now) = self.now.lock() {
            *now = to;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Local> {
        self.now_utc().with_timezone(&Local)
    }

    fn now_utc(&self) -> DateTime<Utc> {
        match self.now.lock() {
            Ok(now) => *now,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advance() {
        let start = Utc::now();
        let clock = ManualClock::new(start);
        assert_eq!(clock.now_utc(), start);
        clock.advance(Duration::minutes(90));
        assert_eq!(clock.now_utc(), start + Duration::minutes(90));
        assert_eq!(clock.now().with_timezone(&Utc), start + Duration::minutes(90));
    }
}
