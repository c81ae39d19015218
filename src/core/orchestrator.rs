//! WorkflowOrchestrator：主控循环
//!
//! 每轮严格按 登录 -> 发现 -> 连接 -> 跟进 顺序执行，阶段之间、目标之间检查取消信号与活跃窗口。
//! `run_forever` 在外层叠加调度门控：窗口外等待、时段休息、配额全满暂停、失败退避、轮间停顿。

use std::sync::Arc;
use std::time::Duration;

use chrono::Timelike;
use tracing::{error, info, warn};

use crate::config::AppConfig;
use crate::core::error::CycleError;
use crate::core::state::{CycleReport, Phase, PhaseReport};
use crate::outreach::OutreachStateMachine;
use crate::phases::{
    authenticate, discover_targets, send_connection_requests, send_follow_ups, PhaseContext,
};
use crate::quota::QuotaTracker;
use crate::schedule::ActivityScheduler;

pub struct WorkflowOrchestrator {
    config: Arc<AppConfig>,
    ctx: PhaseContext,
    scheduler: ActivityScheduler,
}

impl WorkflowOrchestrator {
    pub fn new(config: Arc<AppConfig>, ctx: PhaseContext, scheduler: ActivityScheduler) -> Self {
        Self {
            config,
            ctx,
            scheduler,
        }
    }

    pub fn context(&self) -> &PhaseContext {
        &self.ctx
    }

    pub fn scheduler(&self) -> &ActivityScheduler {
        &self.scheduler
    }

    pub fn outreach(&self) -> &Arc<OutreachStateMachine> {
        &self.ctx.outreach
    }

    pub fn quota(&self) -> &Arc<QuotaTracker> {
        self.ctx.outreach.quota()
    }

    /// 执行一轮；取消或窗口关闭时提前结束并在报告中标记，不回滚已完成的工作
    pub async fn run_cycle(&self) -> Result<CycleReport, CycleError> {
        let cfg = &self.config;
        let ctx = &self.ctx;
        let now = ctx.clock.now();
        let mut report = CycleReport::new(ctx.clock.now_utc());
        info!(
            business_hours = ActivityScheduler::is_business_hours(&now),
            "Cycle started"
        );

        for phase in Phase::ORDER {
            if let Some(halt) = ctx.halt() {
                info!(%phase, %halt, "Stopping before phase");
                report.halt(halt);
                break;
            }
            let phase_report = match phase {
                Phase::Authenticate => {
                    authenticate(ctx, &cfg.site, &cfg.credentials).await?;
                    PhaseReport {
                        processed: 1,
                        succeeded: 1,
                        ..Default::default()
                    }
                }
                Phase::Discover => discover_targets(ctx, &cfg.search).await?,
                Phase::Connect => send_connection_requests(ctx, &cfg.connection).await?,
                Phase::Message => {
                    send_follow_ups(ctx, &cfg.messaging, &cfg.connection.fallback_first_name)
                        .await?
                }
            };
            info!(%phase, report = %phase_report, "Phase finished");
            let stopped = phase_report.cancelled || phase_report.window_closed;
            report.push(phase, phase_report);
            if stopped {
                break;
            }
        }

        report.finish(ctx.clock.now_utc());
        Ok(report)
    }

    /// 持续运行直到取消或遇到检测信号
    ///
    /// 检测信号（`CycleError::Blocked`）直接返回，不再继续尝试；其余整轮错误退避后重试。
    pub async fn run_forever(&self) -> Result<(), CycleError> {
        let app = &self.config.app;
        let pacing = self.ctx.pacing();
        // 同一个休息时段只休息一次
        let mut last_break: Option<(chrono::NaiveDate, u32)> = None;

        while !self.ctx.is_cancelled() {
            let now = self.ctx.clock.now();

            if !self.scheduler.is_active_at(&now) {
                let next = self.scheduler.next_eligible_instant(&now);
                let wait = self.scheduler.wait_until_eligible(&now);
                info!(next = %next, wait_secs = wait.as_secs(), "Outside active window, waiting");
                pacing.sleep(wait).await;
                continue;
            }

            let slot = (now.date_naive(), now.hour());
            if self.scheduler.should_take_break(&now) && last_break != Some(slot) {
                last_break = Some(slot);
                let pause = pacing.with_rng(|rng| self.scheduler.break_duration(&now, rng));
                info!(minutes = pause.as_secs() / 60, "Taking a scheduled break");
                pacing.sleep(pause).await;
                continue;
            }

            if self.quota().outreach_exhausted_today(&now)? {
                info!(
                    recheck_secs = app.quota_recheck_secs,
                    "Daily outreach quotas reached, pausing"
                );
                pacing.sleep(Duration::from_secs(app.quota_recheck_secs)).await;
                continue;
            }

            match self.run_cycle().await {
                Ok(report) => {
                    let summary: Vec<String> = report
                        .phases
                        .iter()
                        .map(|(phase, r)| format!("{phase}: {r}"))
                        .collect();
                    info!(summary = %summary.join("; "), "Cycle finished");
                    if report.cancelled {
                        break;
                    }
                    if report.window_closed {
                        info!("Active window closed mid-cycle");
                        continue;
                    }
                }
                Err(e @ CycleError::Blocked { .. }) => {
                    error!(error = %e, "Stopping workflow after detection signal");
                    return Err(e);
                }
                Err(e @ CycleError::Config(_)) => {
                    error!(error = %e, "Configuration problem, stopping workflow");
                    return Err(e);
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        backoff_secs = app.retry_backoff_secs,
                        "Cycle aborted, backing off"
                    );
                    pacing
                        .sleep(Duration::from_secs(app.retry_backoff_secs))
                        .await;
                    continue;
                }
            }

            info!(pause_secs = app.cycle_pause_secs, "Pausing before next cycle");
            pacing.sleep(Duration::from_secs(app.cycle_pause_secs)).await;
        }

        info!("Workflow stopped");
        Ok(())
    }
}
