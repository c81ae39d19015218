//! PacingController：延迟区间、交互计数冷却与共享随机源
//!
//! 一个实例在整个进程内共享（`Arc`），计数器因此是全局的：
//! 无论交互来自哪个阶段，达到阈值都会触发同一次冷却。

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::keystrokes::{plan_keystrokes, Keystroke};
use super::sleeper::Sleeper;
use crate::config::{CooldownSection, DelayBand, PacingSection};

/// 内置延迟类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DelayCategory {
    /// 两个动作之间
    Action,
    Scroll,
    /// 两次按键之间
    Typing,
    /// 较长的思考停顿
    Think,
}

impl DelayCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            DelayCategory::Action => "action",
            DelayCategory::Scroll => "scroll",
            DelayCategory::Typing => "typing",
            DelayCategory::Think => "think",
        }
    }
}

pub struct PacingController {
    bands: HashMap<String, DelayBand>,
    cooldown: CooldownSection,
    idle_breaks: bool,
    typo_probability: f64,
    /// 自上次冷却以来完成的人类化交互次数
    actions: Mutex<u32>,
    rng: Mutex<StdRng>,
    sleeper: Arc<dyn Sleeper>,
    cancel: CancellationToken,
}

impl PacingController {
    pub fn new(cfg: &PacingSection, sleeper: Arc<dyn Sleeper>, cancel: CancellationToken) -> Self {
        Self {
            bands: cfg.delays.clone(),
            cooldown: cfg.cooldown.clone(),
            idle_breaks: cfg.enable_idle_breaks,
            typo_probability: cfg.typo_probability,
            actions: Mutex::new(0),
            rng: Mutex::new(StdRng::from_entropy()),
            sleeper,
            cancel,
        }
    }

    /// 固定种子，测试用
    pub fn seeded(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// 在共享随机源上执行一段逻辑
    pub fn with_rng<T>(&self, f: impl FnOnce(&mut StdRng) -> T) -> T {
        match self.rng.lock() {
            Ok(mut rng) => f(&mut rng),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }

    /// 从类别区间均匀抽样；未配置的类别返回 None
    pub fn sample(&self, category: &str) -> Option<Duration> {
        let band = self.bands.get(category)?;
        let (lo, hi) = (band.min.min(band.max), band.max.max(band.min));
        let ms = self.with_rng(|rng| rng.gen_range(lo..=hi));
        Some(Duration::from_millis(ms))
    }

    /// 按内置类别暂停
    pub async fn delay(&self, category: DelayCategory) {
        self.delay_named(category.as_str()).await;
    }

    /// 按任意类别名暂停；未配置时立即返回
    pub async fn delay_named(&self, category: &str) {
        match self.sample(category) {
            Some(duration) => {
                debug!(category, ms = duration.as_millis() as u64, "Pacing delay");
                self.sleep(duration).await;
            }
            None => debug!(category, "Delay category not configured, skipping"),
        }
    }

    /// 在 `[min, max]` 内随机暂停
    pub async fn pause_between(&self, min: Duration, max: Duration) {
        let (lo, hi) = (min.min(max), max.max(min));
        let ms = self.with_rng(|rng| rng.gen_range(lo.as_millis() as u64..=hi.as_millis() as u64));
        self.sleep(Duration::from_millis(ms)).await;
    }

    /// 可取消睡眠；取消后立即返回 false
    pub async fn sleep(&self, duration: Duration) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        self.sleeper.sleep(duration, &self.cancel).await
    }

    pub fn interaction_count(&self) -> u32 {
        self.actions.lock().map(|n| *n).unwrap_or_default()
    }

    /// 记录一次完成的人类化交互（点击、整段输入）
    ///
    /// 计数达到阈值时归零并冷却；返回是否进入了冷却。
    pub async fn record_interaction(&self) -> bool {
        let reached = {
            let mut actions = match self.actions.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            *actions += 1;
            if self.idle_breaks && *actions >= self.cooldown.threshold_actions {
                *actions = 0;
                true
            } else {
                false
            }
        };
        if !reached {
            return false;
        }

        let secs = self.with_rng(|rng| {
            let (lo, hi) = (
                self.cooldown.min_secs.min(self.cooldown.max_secs),
                self.cooldown.max_secs.max(self.cooldown.min_secs),
            );
            rng.gen_range(lo..=hi)
        });
        info!(
            secs,
            threshold = self.cooldown.threshold_actions,
            "Interaction threshold reached, taking a cooldown break"
        );
        self.sleep(Duration::from_secs(secs)).await;
        true
    }

    /// 按当前打错概率生成按键计划
    pub fn plan_typing(&self, text: &str) -> Vec<Keystroke> {
        let probability = self.typo_probability;
        self.with_rng(|rng| plan_keystrokes(text, probability, rng))
    }
}

impl std::fmt::Debug for PacingController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacingController")
            .field("bands", &self.bands)
            .field("cooldown", &self.cooldown)
            .field("actions", &self.interaction_count())
            .finish_non_exhaustive()
    }
}
