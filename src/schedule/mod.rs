//! ActivityScheduler：活跃日 × 活跃小时窗口
//!
//! 小时窗口支持跨夜（`end < start`，如 22 -> 6 表示 `hour >= 22 || hour < 6`），`end = 24` 表示到当天结束。
//! 所有计算都在传入时间自身的时区进行；生产环境传本地时间，测试可传任意 `TimeZone`。

use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Datelike, Duration as ChronoDuration, NaiveDate, TimeZone, Timelike, Weekday};
use rand::Rng;

use crate::config::SchedulingSection;
use crate::core::error::ConfigError;

/// 向前扫描的天数上限（含今天之后第 7 天，即下周同一天）
const SCAN_HORIZON_DAYS: i64 = 7;

/// 小时窗口 `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HourWindow {
    start: u32,
    end: u32,
}

impl HourWindow {
    /// `start <= 23`、`end <= 24`，配置校验已保证
    pub fn new(start: u32, end: u32) -> Self {
        debug_assert!(start <= 23 && end <= 24, "hour window {start} -> {end} out of range");
        Self { start, end }
    }

    pub fn start(&self) -> u32 {
        self.start
    }

    pub fn end(&self) -> u32 {
        self.end
    }

    pub fn is_overnight(&self) -> bool {
        self.end < self.start
    }

    pub fn contains(&self, hour: u32) -> bool {
        if self.is_overnight() {
            hour >= self.start || hour < self.end
        } else {
            hour >= self.start && hour < self.end
        }
    }

    /// 窗口关闭前的最后一个整点小时
    pub fn last_hour(&self) -> u32 {
        (self.end + 23) % 24
    }
}

#[derive(Debug, Clone)]
pub struct ActivityScheduler {
    days: HashSet<Weekday>,
    window: HourWindow,
    midday_break_hour: Option<u32>,
    midday_break_minutes: (u32, u32),
    end_of_window_break: bool,
}

impl ActivityScheduler {
    pub fn new(days: HashSet<Weekday>, window: HourWindow) -> Self {
        Self {
            days,
            window,
            midday_break_hour: Some(12),
            midday_break_minutes: (30, 60),
            end_of_window_break: true,
        }
    }

    pub fn from_config(cfg: &SchedulingSection) -> Result<Self, ConfigError> {
        let window = HourWindow::new(cfg.active_hours.start, cfg.active_hours.end);
        Ok(Self::new(cfg.weekdays()?, window)
            .with_midday_break(
                cfg.midday_break_hour,
                cfg.midday_break_minutes.min,
                cfg.midday_break_minutes.max,
            )
            .with_end_of_window_break(cfg.end_of_window_break))
    }

    pub fn with_midday_break(mut self, hour: Option<u32>, min_minutes: u32, max_minutes: u32) -> Self {
        self.midday_break_hour = hour;
        self.midday_break_minutes = (min_minutes.min(max_minutes), max_minutes.max(min_minutes));
        self
    }

    pub fn with_end_of_window_break(mut self, enabled: bool) -> Self {
        self.end_of_window_break = enabled;
        self
    }

    pub fn window(&self) -> HourWindow {
        self.window
    }

    /// 活跃日，按周一到周日排序
    pub fn active_days(&self) -> Vec<Weekday> {
        let mut days: Vec<Weekday> = self.days.iter().copied().collect();
        days.sort_by_key(|d| d.num_days_from_monday());
        days
    }

    pub fn is_active_at<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> bool {
        self.days.contains(&now.weekday()) && self.window.contains(now.hour())
    }

    /// 下一个可以行动的时刻；当前已在窗口内则返回 `now`
    ///
    /// 最多向前扫描 7 天；找不到活跃日时退回“明天的窗口开始时刻”。
    pub fn next_eligible_instant<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> DateTime<Tz> {
        if self.is_active_at(now) {
            return now.clone();
        }
        let tz = now.timezone();
        let today = now.date_naive();

        for offset in 0..=SCAN_HORIZON_DAYS {
            let Some(date) = today.checked_add_signed(ChronoDuration::days(offset)) else {
                break;
            };
            if !self.days.contains(&date.weekday()) {
                continue;
            }
            if let Some(start) = local_instant(&tz, date, self.window.start) {
                if start > *now {
                    return start;
                }
            }
        }

        tracing::warn!(
            days = ?self.active_days(),
            "No active day within scan horizon, falling back to tomorrow's window start"
        );
        today
            .checked_add_signed(ChronoDuration::days(1))
            .and_then(|tomorrow| local_instant(&tz, tomorrow, self.window.start))
            .unwrap_or_else(|| now.clone() + ChronoDuration::days(1))
    }

    /// 距离下一个可行动时刻还要等多久
    pub fn wait_until_eligible<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> Duration {
        let next = self.next_eligible_instant(now);
        next.signed_duration_since(now.clone())
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    /// 时段驱动的休息信号：午间休息小时，或窗口关闭前最后一小时
    pub fn should_take_break<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> bool {
        if !self.is_active_at(now) {
            return false;
        }
        self.in_midday_break(now) || self.in_closing_hour(now)
    }

    /// 休息时长：午间在配置区间内随机；收尾小时一直休息到窗口关闭
    pub fn break_duration<Tz: TimeZone, R: Rng + ?Sized>(
        &self,
        now: &DateTime<Tz>,
        rng: &mut R,
    ) -> Duration {
        if !self.is_active_at(now) {
            return Duration::ZERO;
        }
        if self.in_midday_break(now) {
            let (lo, hi) = self.midday_break_minutes;
            return Duration::from_secs(u64::from(rng.gen_range(lo..=hi)) * 60);
        }
        if self.in_closing_hour(now) {
            let elapsed = now.minute() * 60 + now.second();
            return Duration::from_secs(u64::from(3600 - elapsed.min(3600)));
        }
        Duration::ZERO
    }

    fn in_midday_break<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> bool {
        self.midday_break_hour == Some(now.hour())
    }

    fn in_closing_hour<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> bool {
        // 全天窗口没有“收尾”
        let all_day = self.window.start == 0 && self.window.end == 24;
        self.end_of_window_break && !all_day && now.hour() == self.window.last_hour()
    }

    /// 工作日 9:00-17:00
    pub fn is_business_hours<Tz: TimeZone>(now: &DateTime<Tz>) -> bool {
        !matches!(now.weekday(), Weekday::Sat | Weekday::Sun) && (9..17).contains(&now.hour())
    }
}

/// 某天某整点在给定时区的时刻；落在夏令时缺口时顺延一小时
fn local_instant<Tz: TimeZone>(tz: &Tz, date: NaiveDate, hour: u32) -> Option<DateTime<Tz>> {
    let naive = date.and_hms_opt(hour, 0, 0)?;
    tz.from_local_datetime(&naive)
        .earliest()
        .or_else(|| tz.from_local_datetime(&(naive + ChronoDuration::hours(1))).earliest())
}
