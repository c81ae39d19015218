//! 交互协作方：浏览器 / DOM 驱动的抽象
//!
//! 核心逻辑只依赖 `Interaction` trait；生产实现是 `chrome::ChromeDriver`（feature "browser"），
//! 测试中用脚本化的假实现。人类化的点击、输入、滚动都在 `human::HumanInteractor` 中，
//! 基于本 trait 的原子操作组合而成。

pub mod guard;
pub mod human;

#[cfg(feature = "browser")]
pub mod chrome;

use std::path::Path;

use async_trait::async_trait;

use crate::core::error::InteractionError;
pub use crate::pacing::{Keystroke, Point};

pub use guard::SessionGuard;
pub use human::HumanInteractor;

/// 元素定位路径：从页面根开始的 (选择器, 序号) 链
///
/// 句柄不持有浏览器对象，每次使用时按路径重新定位，页面刷新后自然失效。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementHandle {
    path: Vec<(String, usize)>,
}

impl ElementHandle {
    pub fn new(selector: impl Into<String>, index: usize) -> Self {
        Self {
            path: vec![(selector.into(), index)],
        }
    }

    /// 在当前元素内部继续定位
    pub fn child(&self, selector: impl Into<String>, index: usize) -> Self {
        let mut path = self.path.clone();
        path.push((selector.into(), index));
        Self { path }
    }

    pub fn path(&self) -> &[(String, usize)] {
        &self.path
    }

    /// 最后一级选择器
    pub fn selector(&self) -> &str {
        self.path.last().map(|(s, _)| s.as_str()).unwrap_or_default()
    }
}

#[async_trait]
pub trait Interaction: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<(), InteractionError>;

    async fn current_url(&self) -> Result<String, InteractionError>;

    /// 找不到返回 `Ok(None)`，驱动本身出错才返回 `Err`
    async fn find_element(&self, selector: &str) -> Result<Option<ElementHandle>, InteractionError>;

    async fn find_elements(&self, selector: &str) -> Result<Vec<ElementHandle>, InteractionError>;

    async fn find_within(
        &self,
        parent: &ElementHandle,
        selector: &str,
    ) -> Result<Option<ElementHandle>, InteractionError>;

    async fn element_text(&self, element: &ElementHandle) -> Result<String, InteractionError>;

    async fn element_attribute(
        &self,
        element: &ElementHandle,
        name: &str,
    ) -> Result<Option<String>, InteractionError>;

    /// 元素中心点（视口坐标）
    async fn element_center(&self, element: &ElementHandle) -> Result<Point, InteractionError>;

    async fn click(&self, element: &ElementHandle) -> Result<(), InteractionError>;

    /// 一次性输入整段文本（关闭人类化打字时使用）
    async fn type_text(&self, element: &ElementHandle, text: &str) -> Result<(), InteractionError>;

    /// 向当前焦点元素发送单个按键
    async fn press_key(&self, key: Keystroke) -> Result<(), InteractionError>;

    async fn move_pointer(&self, to: Point) -> Result<(), InteractionError>;

    /// 垂直滚动，负数向上
    async fn scroll_by(&self, dy: i64) -> Result<(), InteractionError>;

    async fn screenshot(&self, path: &Path) -> Result<(), InteractionError>;
}
