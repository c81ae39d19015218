//! 人类化节奏引擎
//!
//! - `motion`：三次 Bezier 指针轨迹
//! - `keystrokes`：纯函数的打字计划（含打错再删除）
//! - `sleeper`：可取消的睡眠抽象，测试中用记录型实现
//! - `controller`：延迟区间、冷却计数与随机源的持有者

pub mod controller;
pub mod keystrokes;
pub mod motion;
pub mod sleeper;

pub use controller::{DelayCategory, PacingController};
pub use keystrokes::{plan_keystrokes, replay, Keystroke};
pub use motion::{BezierPath, MotionSynthesizer, Point};
pub use sleeper::{RecordingSleeper, Sleeper, TokioSleeper};
