//! 工作流构建器：统一的组件装配
//!
//! 生产环境与测试共用同一条装配路径，只替换驱动、存储、时钟、睡眠与随机种子。

use std::sync::Arc;

use chrono::Duration as ChronoDuration;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::core::clock::{Clock, SystemClock};
use crate::core::error::CycleError;
use crate::core::orchestrator::WorkflowOrchestrator;
use crate::interaction::{HumanInteractor, Interaction, SessionGuard};
use crate::outreach::OutreachStateMachine;
use crate::pacing::{PacingController, Sleeper, TokioSleeper};
use crate::phases::PhaseContext;
use crate::quota::QuotaTracker;
use crate::schedule::ActivityScheduler;
use crate::store::{OutreachStore, SqliteStore};

pub struct WorkflowBuilder {
    config: AppConfig,
    driver: Arc<dyn Interaction>,
    store: Option<Arc<dyn OutreachStore>>,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn Sleeper>,
    cancel: CancellationToken,
    seed: Option<u64>,
    enforce_window: bool,
}

impl WorkflowBuilder {
    pub fn new(config: AppConfig, driver: Arc<dyn Interaction>) -> Self {
        Self {
            config,
            driver,
            store: None,
            clock: Arc::new(SystemClock),
            sleeper: Arc::new(TokioSleeper),
            cancel: CancellationToken::new(),
            seed: None,
            enforce_window: true,
        }
    }

    /// 默认打开 `[app].database_path`
    pub fn with_store(mut self, store: Arc<dyn OutreachStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// 固定随机种子
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// 阶段内不再检查活跃窗口
    pub fn ignore_active_window(mut self) -> Self {
        self.enforce_window = false;
        self
    }

    pub fn build(self) -> Result<WorkflowOrchestrator, CycleError> {
        let config = self.config;
        config.validate()?;

        let store: Arc<dyn OutreachStore> = match self.store {
            Some(store) => store,
            None => Arc::new(SqliteStore::open(&config.app.database_path)?),
        };
        let scheduler = ActivityScheduler::from_config(&config.scheduling)?;

        let mut pacing = PacingController::new(&config.pacing, self.sleeper, self.cancel.clone());
        if let Some(seed) = self.seed {
            pacing = pacing.seeded(seed);
        }
        let pacing = Arc::new(pacing);

        let quota = Arc::new(QuotaTracker::new(store.clone(), &config.rate_limits));
        let outreach = Arc::new(OutreachStateMachine::new(
            store,
            quota,
            ChronoDuration::hours(i64::from(config.messaging.delay_after_acceptance_hours)),
        ));
        let human = Arc::new(HumanInteractor::new(
            self.driver,
            pacing,
            &config.pacing,
            config.browser.viewport,
        ));
        let guard = Arc::new(SessionGuard::from_config(&config));

        let ctx = PhaseContext {
            human,
            guard,
            outreach,
            clock: self.clock,
            cancel: self.cancel,
            schedule: self.enforce_window.then(|| scheduler.clone()),
        };
        Ok(WorkflowOrchestrator::new(Arc::new(config), ctx, scheduler))
    }
}
