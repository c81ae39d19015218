//! Cadence - 浏览器驱动外联工作流的节奏与流程控制核心
//!
//! 模块划分：
//! - **config**: 应用配置加载与校验（TOML + 环境变量）
//! - **core**: 错误、时钟、阶段报告、装配、主控循环、优雅关闭
//! - **pacing**: 人类化节奏（延迟区间、Bezier 轨迹、打字计划、冷却）
//! - **quota**: 基于审计事件的小时 / 日配额
//! - **schedule**: 活跃日 × 活跃小时调度
//! - **store**: 持久化协作方与 SQLite 实现
//! - **outreach**: 目标生命周期状态机与个性化模板
//! - **interaction**: 浏览器驱动抽象、人类化交互、会话守卫
//! - **phases**: 登录、发现、连接、跟进各阶段
//! - **observability**: 日志初始化

pub mod config;
pub mod core;
pub mod interaction;
pub mod observability;
pub mod outreach;
pub mod pacing;
pub mod phases;
pub mod quota;
pub mod schedule;
pub mod store;

pub use crate::core::{WorkflowBuilder, WorkflowOrchestrator};
