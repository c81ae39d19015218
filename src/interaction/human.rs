//! 人类化交互流程
//!
//! 曲线移动 + 抖动点击、逐键输入（含打错更正）、随机滚动、随机悬停、阅读模拟、查找前思考。
//! 每个行为都有独立开关；关闭后退化为驱动的原子操作。

use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::Rng;
use tracing::debug;

use super::{ElementHandle, Interaction, Keystroke, Point};
use crate::config::{PacingSection, Viewport};
use crate::core::error::InteractionError;
use crate::pacing::{DelayCategory, MotionSynthesizer, PacingController};

/// 点击位置相对元素中心的最大偏移（像素）
const CLICK_JITTER: f64 = 5.0;

#[derive(Debug, Clone, Copy)]
struct Behaviours {
    mouse_movement: bool,
    scrolling: bool,
    typing: bool,
    hovering: bool,
}

pub struct HumanInteractor {
    driver: Arc<dyn Interaction>,
    pacing: Arc<PacingController>,
    motion: MotionSynthesizer,
    behaviours: Behaviours,
    viewport: Viewport,
    pointer: Mutex<Point>,
}

impl HumanInteractor {
    pub fn new(
        driver: Arc<dyn Interaction>,
        pacing: Arc<PacingController>,
        cfg: &PacingSection,
        viewport: Viewport,
    ) -> Self {
        Self {
            driver,
            pacing,
            motion: MotionSynthesizer::from_config(&cfg.motion),
            behaviours: Behaviours {
                mouse_movement: cfg.enable_mouse_movement,
                scrolling: cfg.enable_random_scrolling,
                typing: cfg.enable_human_typing,
                hovering: cfg.enable_mouse_hovering,
            },
            viewport,
            pointer: Mutex::new(Point::new(
                f64::from(viewport.width) / 2.0,
                f64::from(viewport.height) / 2.0,
            )),
        }
    }

    pub fn driver(&self) -> &Arc<dyn Interaction> {
        &self.driver
    }

    pub fn pacing(&self) -> &Arc<PacingController> {
        &self.pacing
    }

    fn pointer(&self) -> Point {
        self.pointer.lock().map(|p| *p).unwrap_or(Point::new(0.0, 0.0))
    }

    fn set_pointer(&self, at: Point) {
        if let Ok(mut p) = self.pointer.lock() {
            *p = at;
        }
    }

    /// 打开页面后做一次动作停顿
    pub async fn navigate(&self, url: &str) -> Result<(), InteractionError> {
        debug!(url, "Navigating");
        self.driver.navigate(url).await?;
        self.pacing.delay(DelayCategory::Action).await;
        Ok(())
    }

    /// 沿 Bezier 曲线移动指针，每步 10-30ms
    pub async fn move_to(&self, to: Point) -> Result<(), InteractionError> {
        if !self.behaviours.mouse_movement {
            self.driver.move_pointer(to).await?;
            self.set_pointer(to);
            return Ok(());
        }
        let from = self.pointer();
        let path: Vec<Point> = self
            .pacing
            .with_rng(|rng| self.motion.path(from, to, rng).collect());
        for point in path {
            self.driver.move_pointer(point).await?;
            self.pacing
                .pause_between(Duration::from_millis(10), Duration::from_millis(30))
                .await;
        }
        self.set_pointer(to);
        Ok(())
    }

    /// 移到元素中心附近（±5px）、停顿 100-300ms 后点击，计入一次交互
    pub async fn click(&self, element: &ElementHandle) -> Result<(), InteractionError> {
        let center = self.driver.element_center(element).await?;
        let target = self.pacing.with_rng(|rng| {
            Point::new(
                center.x + rng.gen_range(-CLICK_JITTER..=CLICK_JITTER),
                center.y + rng.gen_range(-CLICK_JITTER..=CLICK_JITTER),
            )
        });
        self.move_to(target).await?;
        self.pacing
            .pause_between(Duration::from_millis(100), Duration::from_millis(300))
            .await;
        self.driver.click(element).await?;
        self.pacing.record_interaction().await;
        Ok(())
    }

    /// 点击聚焦后逐键输入；整段输入完成计入一次交互
    pub async fn type_into(&self, element: &ElementHandle, text: &str) -> Result<(), InteractionError> {
        self.click(element).await?;
        if !self.behaviours.typing {
            self.driver.type_text(element, text).await?;
        } else {
            let plan = self.pacing.plan_typing(text);
            let corrections = plan.iter().filter(|k| **k == Keystroke::Backspace).count();
            debug!(chars = text.chars().count(), corrections, "Typing");
            for key in plan {
                self.driver.press_key(key).await?;
                self.pacing.delay(DelayCategory::Typing).await;
            }
        }
        self.pacing.record_interaction().await;
        Ok(())
    }

    /// 2-5 次滚动，每次 200-600px，约 30% 向上
    pub async fn random_scroll(&self) -> Result<(), InteractionError> {
        if !self.behaviours.scrolling {
            return Ok(());
        }
        let steps: Vec<i64> = self.pacing.with_rng(|rng| {
            let count = rng.gen_range(2..=5);
            (0..count)
                .map(|_| {
                    let dy = rng.gen_range(200..=600);
                    if rng.gen_bool(0.3) {
                        -dy
                    } else {
                        dy
                    }
                })
                .collect()
        });
        for dy in steps {
            self.driver.scroll_by(dy).await?;
            self.pacing.delay(DelayCategory::Scroll).await;
        }
        Ok(())
    }

    /// 移到视口内随机位置并停留 500-2000ms
    pub async fn hover_randomly(&self) -> Result<(), InteractionError> {
        if !self.behaviours.hovering {
            return Ok(());
        }
        let (w, h) = (f64::from(self.viewport.width), f64::from(self.viewport.height));
        let target = self
            .pacing
            .with_rng(|rng| Point::new(rng.gen_range(0.0..w), rng.gen_range(0.0..h)));
        self.move_to(target).await?;
        self.pacing
            .pause_between(Duration::from_millis(500), Duration::from_millis(2000))
            .await;
        Ok(())
    }

    /// 阅读：3-5 次 100-300px 的向下滚动，每次停 2-5 秒
    pub async fn simulate_reading(&self) -> Result<(), InteractionError> {
        if !self.behaviours.scrolling {
            self.pacing.delay(DelayCategory::Think).await;
            return Ok(());
        }
        let steps: Vec<i64> = self.pacing.with_rng(|rng| {
            let count = rng.gen_range(3..=5);
            (0..count).map(|_| rng.gen_range(100..=300)).collect()
        });
        for dy in steps {
            self.driver.scroll_by(dy).await?;
            self.pacing
                .pause_between(Duration::from_secs(2), Duration::from_secs(5))
                .await;
        }
        Ok(())
    }

    /// 先思考，再依次尝试候选选择器，返回第一个命中的元素
    pub async fn find_first(&self, selectors: &[String]) -> Result<Option<ElementHandle>, InteractionError> {
        if selectors.is_empty() {
            return Ok(None);
        }
        self.pacing.delay(DelayCategory::Think).await;
        self.pacing
            .pause_between(Duration::from_millis(200), Duration::from_millis(500))
            .await;
        for selector in selectors {
            if let Some(element) = self.driver.find_element(selector).await? {
                return Ok(Some(element));
            }
        }
        Ok(None)
    }

    /// 同 `find_first`，找不到时返回 `NotFound`
    pub async fn require_first(&self, selectors: &[String]) -> Result<ElementHandle, InteractionError> {
        self.find_first(selectors)
            .await?
            .ok_or_else(|| InteractionError::NotFound(selectors.join(" | ")))
    }
}
