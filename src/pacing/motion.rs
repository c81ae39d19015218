//! 指针轨迹合成：起点与终点之间的三次 Bezier 曲线
//!
//! 两个控制点位于直线的 1/4 与 3/4 处，各自在 x / y 上加独立随机抖动；
//! 步数在 `[min_steps, max_steps]` 内随机。`t = i / steps`，i 从 0 到 steps（含两端）。

use rand::Rng;

use crate::config::MotionSection;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    fn lerp(self, other: Point, t: f64) -> Point {
        Point::new(self.x + (other.x - self.x) * t, self.y + (other.y - self.y) * t)
    }
}

/// 轨迹参数
#[derive(Debug, Clone)]
pub struct MotionSynthesizer {
    jitter: f64,
    min_steps: u32,
    max_steps: u32,
}

impl MotionSynthesizer {
    pub fn new(jitter: f64, min_steps: u32, max_steps: u32) -> Self {
        let min_steps = min_steps.max(1);
        Self {
            jitter: jitter.abs(),
            min_steps,
            max_steps: max_steps.max(min_steps),
        }
    }

    pub fn from_config(cfg: &MotionSection) -> Self {
        Self::new(cfg.jitter, cfg.min_steps, cfg.max_steps)
    }

    /// 生成一条轨迹；随机源由调用方注入
    pub fn path<R: Rng + ?Sized>(&self, start: Point, end: Point, rng: &mut R) -> BezierPath {
        let mut offset = || {
            if self.jitter == 0.0 {
                0.0
            } else {
                rng.gen_range(-self.jitter..=self.jitter)
            }
        };
        let c1 = start.lerp(end, 0.25);
        let c1 = Point::new(c1.x + offset(), c1.y + offset());
        let c2 = start.lerp(end, 0.75);
        let c2 = Point::new(c2.x + offset(), c2.y + offset());
        let steps = rng.gen_range(self.min_steps..=self.max_steps);

        BezierPath {
            control: [start, c1, c2, end],
            steps,
            next: 0,
        }
    }
}

impl Default for MotionSynthesizer {
    fn default() -> Self {
        Self::from_config(&MotionSection::default())
    }
}

/// 一次性轨迹迭代器，共 `steps + 1` 个点，首尾分别等于起点与终点
#[derive(Debug, Clone)]
pub struct BezierPath {
    control: [Point; 4],
    steps: u32,
    next: u32,
}

impl BezierPath {
    pub fn steps(&self) -> u32 {
        self.steps
    }

    fn at(&self, t: f64) -> Point {
        let [p0, p1, p2, p3] = self.control;
        let u = 1.0 - t;
        let w0 = u * u * u;
        let w1 = 3.0 * u * u * t;
        let w2 = 3.0 * u * t * t;
        let w3 = t * t * t;
        Point::new(
            w0 * p0.x + w1 * p1.x + w2 * p2.x + w3 * p3.x,
            w0 * p0.y + w1 * p1.y + w2 * p2.y + w3 * p3.y,
        )
    }
}

impl Iterator for BezierPath {
    type Item = Point;

    fn next(&mut self) -> Option<Point> {
        if self.next > self.steps {
            return None;
        }
        let i = self.next;
        self.next += 1;
        // 端点直接返回，避免浮点误差
        if i == 0 {
            return Some(self.control[0]);
        }
        if i == self.steps {
            return Some(self.control[3]);
        }
        Some(self.at(f64::from(i) / f64::from(self.steps)))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.steps + 1).saturating_sub(self.next) as usize;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for BezierPath {}
